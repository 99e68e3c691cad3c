pub mod evictor;
pub mod pipeline;

pub use evictor::{EvictionReport, QuotaEvictor};
pub use pipeline::{UploadPipeline, UploadReport};
