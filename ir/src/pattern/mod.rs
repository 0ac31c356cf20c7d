//! Pattern matching infrastructure for UOp graphs.
//!
//! [`UPat`] describes the shape of a subgraph, [`PatternMatcher`] holds an
//! ordered list of `(UPat, rewrite fn)` rules and the [`pattern!`] macro
//! registers rules with their captures already unpacked.

#[macro_use]
pub mod macros;
pub mod matcher;
pub mod upat;

pub use matcher::{OpKey, PatternMatcher, RewriteFn};
pub use upat::{ArgPattern, Bindings, IntoUPat, OpFilter, SrcPattern, UPat};
