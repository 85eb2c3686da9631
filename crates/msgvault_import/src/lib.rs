//! The streaming bulk-import pipeline (C7, spec §4.9).

mod pipeline;
mod validate;

pub use pipeline::{import_stream, ImportProgress, ImportSummary, MAX_BATCH_SIZE};
pub use validate::validate;
