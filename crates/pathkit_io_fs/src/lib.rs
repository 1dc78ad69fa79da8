//! `pathkit_io_fs` v1:
//! Pattern-driven file-tree engine.
//!
//! Modules:
//! - `spec`      : enums/options/errors
//! - `pattern`   : glob compilation and include/exclude/prune predicates
//! - `walk`      : single traversal driving copy/move/delete/scan operations
//! - `watch`     : recursive directory watching
//! - `atomic`    : write-to-temp-then-rename file writer
//! - `temporary` : process-scoped temporary area
//! - `report`    : run-time report and progress models
//! - `location`  : `Location`, `File` and `Directory` façades
//! - `folder`    : virtual directory composed of several trees and files
//! - `archive`   : archive codec seam and zip codec
//! - `util`      : shared helper functions

pub mod archive;
pub mod atomic;
pub mod folder;
pub mod location;
pub mod pattern;
pub mod report;
pub mod spec;
pub mod temporary;
pub mod walk;
pub mod watch;
mod util;

#[cfg(test)]
mod testutil;

pub use archive::{
    ArchiveFormat, ArchiveInput, ArchiveOutput, ArchiveSink, ArchiveSource, SpecArchiveEntry,
    ZipFormat,
};
pub use atomic::AtomicWriter;
pub use folder::Folder;
pub use location::{Directory, File, Location, locate};
pub use pattern::{GlobPattern, SpecPatternSet};
pub use report::{Progress, ReportWalk, ReportWalkBuilder};
pub use spec::{
    EnumConflictPolicy, EnumEntryAction, EnumEntryKind, EnumOperationKind, EnumReplaceDecision,
    FsError, FsResult, SpecWalkOptions, TypeEntryFilter,
};
pub use temporary::{SpecTemporaryConfig, TemporaryArea};
pub use walk::{Disposer, TraversalEvent, TreeOperation};
pub use watch::{EnumWatchKind, EnumWatchState, WatchEngine, WatchEvent, WatchSubscription};
