//! Algebraic simplification of kernel graphs.
//!
//! - [`patterns`] - the constant folder
//! - [`threefry`] - inline expansion of the threefry mixing op
//! - [`float4`] - vector load/store folding

pub mod float4;
pub mod patterns;
pub mod threefry;

pub use float4::float4_folding;
pub use patterns::constant_folder;
pub use threefry::expand_threefry;
