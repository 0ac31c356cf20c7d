use kernc_ir::OpTag;
use snafu::Snafu;

/// A linearized kernel broke an invariant the renderers rely on.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum LinearizeError {
    #[snafu(display("dtype mismatch at {index}: {detail}"))]
    TypeMismatch { index: usize, detail: String },
    #[snafu(display("instruction list didn't end with SINK, ended with {last}"))]
    MissingSink { last: String },
    #[snafu(display("bad ops left in instruction list: {ops:?}"))]
    BadOps { ops: Vec<OpTag> },
    #[snafu(display("repeated stores in instruction list"))]
    RepeatedStores,
}

pub type Result<T, E = LinearizeError> = std::result::Result<T, E>;
