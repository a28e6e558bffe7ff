//! Library interface for taproom
//!
//! Drives the Homebrew CLI as a child process: buffered and streaming
//! execution, a closed error taxonomy, a disk-backed result cache, and a set
//! of named operations tying them together.

pub mod brew;
pub mod cache;
pub mod config;
pub mod error;
pub mod operation;
pub mod process;
pub mod stream;

// Re-export commonly used types
pub use brew::{Brew, OperationStream, Refreshed, Source};
pub use cache::{CacheEntry, DiskCache, IsEmpty, Restored};
pub use config::Config;
pub use error::{ExecutionError, Result};
pub use operation::{CachePolicy, ExitPolicy, Mode, Operation, PackageKind};
pub use process::{ProcessResult, Runner};
pub use stream::{LineSplitter, Lines, OutputLine, OutputStream, Utf8Chunker};
