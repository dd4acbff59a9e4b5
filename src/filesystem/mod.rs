//! # Filesystem Scope
//!
//! Per-task temporary directories and blocking file helpers that report progress
//! and honour cooperative cancellation.

pub mod archive;
pub mod working_directory;

pub use archive::{copy_file_with_progress, unzip_archive, zip_directory, NoProgress, ProgressSink};
pub use working_directory::{sweep, CleanupReport, WorkingDirectory};
