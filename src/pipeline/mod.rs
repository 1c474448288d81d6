// Import pipeline: parse -> match -> save, with progress events throughout

pub mod batch_writer;
pub mod csv_parser;
pub mod mapping_cache;
pub mod matcher;
pub mod orchestrator;
pub mod progress;

pub use orchestrator::{ImportPipeline, ImportRequest};
pub use progress::{ImportSummary, ProgressEvent};
