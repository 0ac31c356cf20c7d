pub mod estimate;
pub mod expand;
pub mod helpers;
pub mod linearize;
pub mod optimizer;
