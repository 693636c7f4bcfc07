//! Command implementations, one module per command group.

pub mod dead_letters;
pub mod ingest;
pub mod init;
pub mod reprocess;
pub mod runs;
pub mod select;
