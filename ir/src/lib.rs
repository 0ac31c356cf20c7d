//! Intermediate representation for the kernel compiler.
//!
//! # Module Organization
//!
//! - [`types`] - constant values and ALU operation kinds
//! - [`op`] - operation enum carried by every node
//! - [`uop`] - the UOp node, its constructors, constant evaluation and bounds
//! - [`pattern`] - `UPat` pattern language and the rule matcher
//! - [`rewrite`] - fixed-point graph rewriting with per-pass hash-consing
//! - [`shape`] - strided views (`View`, `ShapeTracker`)
//! - [`ast`] - kernel input AST and its verifier
//! - [`error`] - error types

pub mod ast;
pub mod error;
pub mod op;
pub mod prelude;
pub mod shape;
pub mod types;
pub mod uop;

#[macro_use]
pub mod pattern;
pub mod rewrite;

#[cfg(test)]
pub mod test;

pub use ast::{AstKey, AstNode, AstOp, AstOpTag, ConstBuffer, KernelInfo, MemBuffer, verify_ast};
pub use error::{AstError, Error, Result};
pub use op::{Op, OpTag};
pub use pattern::{Bindings, PatternMatcher, UPat};
pub use rewrite::{RewriteCache, graph_rewrite, graph_rewrite_with_cache};
pub use shape::{ShapeTracker, View};
pub use types::{BinaryOp, ConstValue, ReduceOp, TernaryOp, UnaryOp, WmmaArg};
pub use uop::{IntoUOp, UOp, UOpKey};

pub use kernc_dtype::DType;
