//! Common imports for working with UOp graphs.
//!
//! ```rust,ignore
//! use kernc_ir::prelude::*;
//! ```

pub use crate::op::{Op, OpTag};
pub use crate::pattern::{Bindings, PatternMatcher, UPat};
pub use crate::types::{BinaryOp, ConstValue, ReduceOp, TernaryOp, UnaryOp, WmmaArg};
pub use crate::uop::{IntoUOp, UOp, UOpKey};

pub use kernc_dtype::{AddrSpace, DType, ScalarDType};
