pub mod helpers;
pub mod property;
pub mod unit;
