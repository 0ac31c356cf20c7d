//! Property-based tests for IR invariants.
//!
//! Uses proptest to verify invariants across wide input spaces.

pub mod generators;

mod eval_props;
mod view_props;
