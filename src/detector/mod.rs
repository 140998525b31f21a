pub mod closed;
pub mod lvr;
pub mod mad;
pub mod pipeline;
pub mod spike;
pub mod zscore;

pub use pipeline::DetectorPipeline;
