//! Error type of the compile pipeline.

use kernc_ir::AstError;
use snafu::Snafu;

use crate::linearize::LinearizeError;
use crate::lower::LowerError;
use crate::optimizer::OptError;

/// Anything that stops a kernel from becoming a [`Program`](crate::optimizer::Program).
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum CompileError {
    /// The input AST is malformed.
    #[snafu(context(false), display("malformed ast: {source}"))]
    Ast { source: AstError },

    #[snafu(context(false), display("{source}"))]
    Opt { source: OptError },

    #[snafu(context(false), display("lowering failed: {source}"))]
    Lower { source: LowerError },

    /// A rewrite pass broke an invariant; this is a rule set bug.
    #[snafu(context(false), display("linearize failed: {source}"))]
    Linearize { source: LinearizeError },

    #[snafu(context(false), display("view error: {source}"))]
    Shape { source: kernc_ir::Error },

    #[snafu(display("no view computed for {op}"))]
    MissingView { op: String },
}

pub type Result<T, E = CompileError> = std::result::Result<T, E>;
