// Catchsync Daemon Library
// Exposes internal modules for benchmarking and testing

#[macro_use]
extern crate log;

pub mod accessor;
pub mod concurrency;
pub mod error;
pub mod store;
pub mod writer;
