// Library crate - exports the aggregation core and service plumbing

pub mod api;
pub mod engine;
pub mod normalize;
pub mod store;
pub mod streams;
pub mod types;

// Re-export commonly used types
pub use engine::AggregationEngine;
pub use store::{PnlStore, ResultSink};
pub use types::*;
