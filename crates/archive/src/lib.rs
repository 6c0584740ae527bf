//! stepkit result archiving.
//!
//! A [`TaskArchiver`] walks a finished task result and fills the archives a
//! [`DataArchiveManager`] chooses for it, collecting answers into
//! `answers.json` and finishing each archive with `metadata.json`.

#![warn(missing_docs)]

mod archive;
mod archiver;
mod directory;
mod error;
mod filename;
mod metadata;

pub use archive::{default_archivable, Archivable, ArchiveChoice, DataArchive, DataArchiveManager, FileArchivable, JsonArchivable};
pub use archiver::{archive_and_upload, TaskArchiver};
pub use directory::{DirectoryArchive, DirectoryArchiveManager};
pub use error::{ArchiveError, Result};
pub use filename::{scrubbed_filename, ReservedFilename};
pub use metadata::{ArchiveConfig, TaskMetadata};
