//! Walk specification models and top-level error types.

use std::fmt;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

////////////////////////////////////////////////////////////////////////////////
// #region EnumsInit

/// Existing destination entry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumConflictPolicy {
    /// Always replace the destination entry.
    #[default]
    ReplaceAlways,
    /// Replace only when the destination is older than the source.
    ReplaceIfNewer,
    /// Replace when modified time or size differ.
    ReplaceIfDifferent,
    /// Keep the destination entry and skip the source entry.
    SkipExisting,
    /// Report the entry as failed.
    FailIfExisting,
}

/// Per-entry outcome of the conflict policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumReplaceDecision {
    /// Write the source entry over the destination path.
    Replace,
    /// Leave the destination untouched.
    Skip,
    /// Leave the destination untouched and report a failure.
    Fail,
}

/// The closed set of tree operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumOperationKind {
    /// Copy accepted files into the destination tree.
    Copy,
    /// Move accepted files into the destination tree.
    Move,
    /// Delete accepted files (and emptied directories).
    Delete,
    /// Report accepted files without mutation.
    ScanFiles,
    /// Report accepted directories without mutation.
    ScanDirectories,
}

impl EnumOperationKind {
    /// Whether the operation writes into a destination tree.
    pub const fn is_transfer(self) -> bool {
        matches!(self, Self::Copy | Self::Move)
    }

    /// Stable lowercase label used in logs and reports.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Move => "move",
            Self::Delete => "delete",
            Self::ScanFiles => "scan_files",
            Self::ScanDirectories => "scan_directories",
        }
    }
}

/// Classification of a visited entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnumEntryKind {
    File,
    Directory,
}

/// The concrete action taken for a visited entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnumEntryAction {
    Copied,
    Moved,
    Deleted,
    Observed,
    Skipped,
    Failed,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region WalkOptions

/// Generic entry filter: `(relative path, metadata) -> accepted`.
pub type TypeEntryFilter = Arc<dyn Fn(&Path, &Metadata) -> bool + Send + Sync>;

/// Immutable-after-build traversal configuration.
///
/// Every builder consumes and returns the value, so policies compose by plain
/// function chaining:
///
/// ```ignore
/// let options = SpecWalkOptions::default()
///     .glob(["**/*.txt", "!**/target/**"])
///     .strip()
///     .replace_old();
/// ```
#[derive(Clone, Default)]
pub struct SpecWalkOptions {
    /// Glob patterns in order of first appearance. A leading `!` negates.
    pub patterns: Vec<String>,
    /// Extra predicate AND-combined with the glob acceptance.
    pub filter: Option<TypeEntryFilter>,
    /// Maximum traversal depth below the root (`None` = unlimited).
    pub depth: Option<usize>,
    /// Number of leading segments dropped from destination paths.
    pub strip_count: usize,
    /// Extra relative directory inside the destination root.
    pub destination_sub_path: PathBuf,
    /// Conflict behavior for existing destination entries.
    pub conflict_policy: EnumConflictPolicy,
    /// Delete destination entries without a surviving source entry.
    pub if_sync: bool,
}

impl SpecWalkOptions {
    /// Add glob patterns. Duplicates and empty strings are ignored.
    pub fn glob<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for pattern in patterns {
            let pattern = pattern.as_ref();
            if !pattern.is_empty() && !self.patterns.iter().any(|p| p == pattern) {
                self.patterns.push(pattern.to_string());
            }
        }
        self
    }

    /// Limit traversal depth below the root.
    pub fn depth(mut self, depth: usize) -> Self {
        self.depth = Some(depth);
        self
    }

    /// Drop the root directory name from destination paths.
    pub fn strip(self) -> Self {
        self.strip_count(1)
    }

    /// Drop `count` leading segments from destination paths.
    pub fn strip_count(mut self, count: usize) -> Self {
        self.strip_count = count;
        self
    }

    /// Relocate all output under `relative_path` inside the destination root.
    ///
    /// Absolute paths are rejected when the operation is built.
    pub fn allocate_in(mut self, relative_path: impl AsRef<Path>) -> Self {
        self.destination_sub_path = relative_path.as_ref().to_path_buf();
        self
    }

    pub fn replace_existing(mut self) -> Self {
        self.conflict_policy = EnumConflictPolicy::ReplaceAlways;
        self
    }

    pub fn replace_old(mut self) -> Self {
        self.conflict_policy = EnumConflictPolicy::ReplaceIfNewer;
        self
    }

    pub fn replace_different(mut self) -> Self {
        self.conflict_policy = EnumConflictPolicy::ReplaceIfDifferent;
        self
    }

    pub fn skip_existing(mut self) -> Self {
        self.conflict_policy = EnumConflictPolicy::SkipExisting;
        self
    }

    pub fn stop_existing(mut self) -> Self {
        self.conflict_policy = EnumConflictPolicy::FailIfExisting;
        self
    }

    /// Make the destination an exact mirror of the filtered source.
    pub fn sync(mut self) -> Self {
        self.if_sync = true;
        self
    }

    /// Install the generic entry filter (replaces a previous one).
    pub fn take<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Path, &Metadata) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Check the fields that builders accept but a run cannot honour.
    pub fn validate(&self) -> FsResult<()> {
        if self.destination_sub_path.is_absolute() || self.destination_sub_path.has_root() {
            return Err(FsError::InvalidOption {
                field: "destination_sub_path",
                reason: format!(
                    "only relative path is acceptable: {}",
                    self.destination_sub_path.display()
                ),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for SpecWalkOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecWalkOptions")
            .field("patterns", &self.patterns)
            .field("filter", &self.filter.as_ref().map(|_| "<fn>"))
            .field("depth", &self.depth)
            .field("strip_count", &self.strip_count)
            .field("destination_sub_path", &self.destination_sub_path)
            .field("conflict_policy", &self.conflict_policy)
            .field("if_sync", &self.if_sync)
            .finish()
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Errors

/// Result type for every fallible operation of this crate.
pub type FsResult<T> = Result<T, FsError>;

/// Errors produced by traversal, watch, atomic-write and temporary-area code.
#[derive(Debug, Error)]
pub enum FsError {
    /// Generic IO failure.
    #[error("failed to {operation} {}: {source}", .path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The OS refused access.
    #[error("permission denied to {operation} {}: {source}", .path.display())]
    PermissionDenied {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// An existing entry blocks the request. Under
    /// [`EnumConflictPolicy::FailIfExisting`] `path` names the source entry.
    #[error("already exists: {}", .path.display())]
    AlreadyExists { path: PathBuf },
    /// Advisory lock is held elsewhere or unsupported.
    #[error("lock unavailable: {}", .path.display())]
    LockUnavailable { path: PathBuf },
    /// The OS watch facility has been closed.
    #[error("watch service closed")]
    WatchServiceClosed,
    /// The OS watch facility rejected a request.
    #[error("failed to watch {}: {source}", .path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
    /// Invalid glob pattern.
    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    /// Invalid option value.
    #[error("invalid option `{field}`: {reason}")]
    InvalidOption { field: &'static str, reason: String },
    /// A directory was required.
    #[error("not a directory: {}", .path.display())]
    NotADirectory { path: PathBuf },
    /// A regular file was required.
    #[error("not a file: {}", .path.display())]
    NotAFile { path: PathBuf },
    /// Copy and Move need a destination root.
    #[error("operation requires a destination directory")]
    MissingDestination,
    /// Archive codec failure.
    #[error("archive failure on {}: {source}", .path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    /// Both the atomic rename and the replace fallback failed.
    #[error(
        "failed to write {} atomically (rename: {rename}; replace: {replace})",
        .path.display()
    )]
    AtomicWriteFailed {
        path: PathBuf,
        rename: io::Error,
        #[source]
        replace: io::Error,
    },
}

impl FsError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                operation,
                path,
                source,
            },
            io::ErrorKind::AlreadyExists => Self::AlreadyExists { path },
            _ => Self::Io {
                operation,
                path,
                source,
            },
        }
    }

    pub(crate) fn watch(path: impl Into<PathBuf>, source: notify::Error) -> Self {
        Self::Watch {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn archive(path: impl Into<PathBuf>, source: zip::result::ZipError) -> Self {
        Self::Archive {
            path: path.into(),
            source,
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::error::Error;
    use std::io;
    use std::path::Path;

    use super::{EnumConflictPolicy, FsError, SpecWalkOptions};

    #[test]
    fn builders_compose_by_chaining() {
        let base = |o: SpecWalkOptions| o.glob(["**"]).strip();
        let caller = |o: SpecWalkOptions| o.replace_old().depth(3).glob(["!**.tmp", "**"]);

        let options = caller(base(SpecWalkOptions::default()));
        assert_eq!(options.patterns, vec!["**".to_string(), "!**.tmp".to_string()]);
        assert_eq!(options.strip_count, 1);
        assert_eq!(options.depth, Some(3));
        assert_eq!(options.conflict_policy, EnumConflictPolicy::ReplaceIfNewer);
        assert!(!options.if_sync);
    }

    #[test]
    fn absolute_allocation_is_rejected_on_validate() {
        let options = SpecWalkOptions::default().allocate_in(std::env::temp_dir());
        let err = options.validate().expect_err("absolute path must fail");
        assert!(matches!(err, FsError::InvalidOption { field: "destination_sub_path", .. }));

        let options = SpecWalkOptions::default().allocate_in("nested/out");
        assert!(options.validate().is_ok());
    }

    #[test]
    fn take_installs_filter() {
        let options = SpecWalkOptions::default().take(|path: &Path, _| path.ends_with("keep"));
        let filter = options.filter.clone().expect("filter installed");
        let meta = std::fs::metadata(std::env::temp_dir()).expect("metadata");
        assert!(filter(Path::new("a/keep"), &meta));
        assert!(!filter(Path::new("a/drop"), &meta));
        assert!(format!("{options:?}").contains("<fn>"));
    }

    #[test]
    fn io_helper_classifies_kinds() {
        let err = FsError::io("read", "a", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, FsError::PermissionDenied { .. }));
        assert!(err.source().is_some());

        let err = FsError::io("create", "a", io::Error::from(io::ErrorKind::AlreadyExists));
        assert!(matches!(err, FsError::AlreadyExists { .. }));

        let err = FsError::io("read", "a", io::Error::other("boom"));
        assert!(matches!(err, FsError::Io { .. }));
        assert!(err.to_string().contains("failed to read a"));
    }
}
