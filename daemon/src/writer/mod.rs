//! Producer side of the catchpoint subsystem: `DatabaseStep`
//! reads live storage in chunk-sized batches, `CatchpointWriter` frames
//! those batches as TAR entries inside a gzip stream, and `Repacker`
//! prepends the header the writer could not have known in advance.

mod catchpoint_writer;
mod chunk_encoder;
mod database_step;
mod repacker;

pub use catchpoint_writer::CatchpointWriter;
pub use database_step::DatabaseStep;
pub use repacker::Repacker;
