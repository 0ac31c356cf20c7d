//! Strided views over flat buffers.
//!
//! - [`view`] - a single shape/strides/offset/mask view
//! - [`tracker`] - stack of views and index expression rendering

pub mod tracker;
pub mod view;

pub use tracker::ShapeTracker;
pub use view::{Mask, View};
