//! UOp (micro-operation) implementation.
//!
//! # Module Organization
//!
//! - [`core`] - UOp struct and fundamental operations
//! - [`constructors`] - Constructor methods organized by semantic category
//! - [`eval`] - Constant evaluation for operations
//! - [`range_eval`] - Integer range analysis (vmin/vmax)

pub mod constructors;
pub mod core;
pub mod eval;
pub mod range_eval;

pub use constructors::IntoUOp;
pub use core::{Srcs, UOp, UOpKey};
pub use eval::{exec_alu, threefry2x32};
