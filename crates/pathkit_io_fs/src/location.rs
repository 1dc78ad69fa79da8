//! `Location` tagged union and the `File` / `Directory` façades.
//!
//! Nothing here caches file-system state: every query re-stats the path.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::archive::{self, ZipFormat};
use crate::atomic::AtomicWriter;
use crate::pattern::escape_glob;
use crate::report::ReportWalk;
use crate::spec::{
    EnumEntryAction, EnumOperationKind, EnumReplaceDecision, FsError, FsResult, SpecWalkOptions,
};
use crate::util::{
    absolutize_path, copy_entry, decide_replace, move_entry, remove_file_if_present, set_modified,
};
use crate::walk::{Disposer, TreeOperation, read_dir_sorted};
use crate::watch::{WatchEngine, WatchSubscription};

////////////////////////////////////////////////////////////////////////////////
// #region Location

/// A path classified as a file or a directory when it was located.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    File(File),
    Directory(Directory),
}

/// Classify `path` by one stat call. Absent paths become files.
pub fn locate(path: impl AsRef<Path>) -> Location {
    let path = path.as_ref();
    if path.is_dir() {
        Location::Directory(Directory::new(path))
    } else {
        Location::File(File::new(path))
    }
}

impl Location {
    pub fn path(&self) -> &Path {
        match self {
            Self::File(file) => file.path(),
            Self::Directory(dir) => dir.path(),
        }
    }

    /// Stat the path again and view it as a file.
    pub fn as_file(&self) -> FsResult<File> {
        let path = self.path();
        if path.is_dir() {
            return Err(FsError::NotAFile {
                path: path.to_path_buf(),
            });
        }
        Ok(File::new(path))
    }

    /// Stat the path again and view it as a directory.
    pub fn as_directory(&self) -> FsResult<Directory> {
        let path = self.path();
        if path.exists() && !path.is_dir() {
            return Err(FsError::NotADirectory {
                path: path.to_path_buf(),
            });
        }
        Ok(Directory::new(path))
    }

    pub fn is_present(&self) -> bool {
        match self {
            Self::File(file) => file.is_present(),
            Self::Directory(dir) => dir.is_present(),
        }
    }

    pub fn is_absent(&self) -> bool {
        !self.is_present()
    }

    /// File length, or the recursive sum for a directory.
    pub fn size(&self) -> FsResult<u64> {
        match self {
            Self::File(file) => Ok(file.size()),
            Self::Directory(dir) => dir.size(),
        }
    }

    pub fn last_modified(&self) -> SystemTime {
        last_modified(self.path())
    }

    pub fn name(&self) -> String {
        file_name(self.path())
    }

    pub fn parent(&self) -> Option<Directory> {
        parent(self.path())
    }
}

impl From<File> for Location {
    fn from(file: File) -> Self {
        Self::File(file)
    }
}

impl From<Directory> for Location {
    fn from(dir: Directory) -> Self {
        Self::Directory(dir)
    }
}

fn last_modified(path: &Path) -> SystemTime {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(UNIX_EPOCH)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn parent(path: &Path) -> Option<Directory> {
    absolutize_path(path).parent().map(Directory::new)
}

/// Run `op` and turn the first failed entry into [`FsError::AlreadyExists`].
pub(crate) fn run_reporting_failures(op: &TreeOperation) -> FsResult<ReportWalk> {
    let mut path_failed: Option<PathBuf> = None;
    let report = op.subscribe(&Disposer::new(), |event| {
        if event.action == EnumEntryAction::Failed && path_failed.is_none() {
            path_failed = Some(event.location.path().to_path_buf());
        }
    })?;
    match path_failed {
        Some(path) => Err(FsError::AlreadyExists { path }),
        None => Ok(report),
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region File

/// A regular file (or link) path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct File {
    path: PathBuf,
}

impl File {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> String {
        file_name(&self.path)
    }

    /// Name without the last extension.
    pub fn base(&self) -> String {
        self.path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Last extension without the dot, empty when there is none.
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn parent(&self) -> Option<Directory> {
        parent(&self.path)
    }

    /// Present and not a directory.
    pub fn is_present(&self) -> bool {
        fs::symlink_metadata(&self.path).is_ok_and(|m| !m.is_dir())
    }

    pub fn is_absent(&self) -> bool {
        !self.is_present()
    }

    /// Length in bytes, zero when absent.
    pub fn size(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Modified time, the epoch when absent.
    pub fn last_modified(&self) -> SystemTime {
        last_modified(&self.path)
    }

    pub fn set_last_modified(&self, time: SystemTime) -> FsResult<()> {
        set_modified(&self.path, time).map_err(|e| FsError::io("set modified time", &self.path, e))
    }

    /// Create the file and its parents; existing content is kept.
    pub fn create(&self) -> FsResult<()> {
        if let Some(path_dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(path_dir).map_err(|e| FsError::io("create directory", path_dir, e))?;
        }
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map(drop)
            .map_err(|e| FsError::io("create", &self.path, e))
    }

    /// Delete the file. Returns whether something was removed.
    pub fn delete(&self) -> FsResult<bool> {
        remove_file_if_present(&self.path).map_err(|e| FsError::io("delete", &self.path, e))
    }

    /// Whole content as text, empty when absent.
    pub fn read_text(&self) -> FsResult<String> {
        match fs::read_to_string(&self.path) {
            Ok(txt) => Ok(txt),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(FsError::io("read", &self.path, e)),
        }
    }

    /// Replace the content atomically.
    pub fn write_text(&self, txt: &str) -> FsResult<()> {
        let mut writer = self.atomic_writer()?;
        writer
            .write_all(txt.as_bytes())
            .map_err(|e| FsError::io("write", &self.path, e))?;
        writer.commit()
    }

    pub fn atomic_writer(&self) -> FsResult<AtomicWriter> {
        AtomicWriter::create(&self.path)
    }

    pub fn append_writer(&self) -> FsResult<AtomicWriter> {
        AtomicWriter::append(&self.path)
    }

    /// Copy into `dir`, honouring `allocate_in` and the conflict policy.
    ///
    /// Returns the destination file, which is left untouched when skipped.
    pub fn copy_to(
        &self,
        dir: &Directory,
        build: impl FnOnce(SpecWalkOptions) -> SpecWalkOptions,
    ) -> FsResult<File> {
        let spec_options = build(SpecWalkOptions::default());
        let path_dst = self.destination_in(dir, &spec_options)?;
        self.transfer(&path_dst, &spec_options, false)
    }

    /// Move into `dir`, honouring `allocate_in` and the conflict policy.
    pub fn move_to(
        &self,
        dir: &Directory,
        build: impl FnOnce(SpecWalkOptions) -> SpecWalkOptions,
    ) -> FsResult<File> {
        let spec_options = build(SpecWalkOptions::default());
        let path_dst = self.destination_in(dir, &spec_options)?;
        self.transfer(&path_dst, &spec_options, true)
    }

    /// Copy onto an explicit destination file.
    pub fn copy_to_file(
        &self,
        file: &File,
        build: impl FnOnce(SpecWalkOptions) -> SpecWalkOptions,
    ) -> FsResult<File> {
        self.transfer(&file.path, &build(SpecWalkOptions::default()), false)
    }

    /// Move onto an explicit destination file.
    pub fn move_to_file(
        &self,
        file: &File,
        build: impl FnOnce(SpecWalkOptions) -> SpecWalkOptions,
    ) -> FsResult<File> {
        self.transfer(&file.path, &build(SpecWalkOptions::default()), true)
    }

    pub(crate) fn destination_in(
        &self,
        dir: &Directory,
        spec_options: &SpecWalkOptions,
    ) -> FsResult<PathBuf> {
        spec_options.validate()?;
        let Some(name) = self.path.file_name() else {
            return Err(FsError::NotAFile {
                path: self.path.clone(),
            });
        };
        Ok(dir.path.join(&spec_options.destination_sub_path).join(name))
    }

    fn transfer(&self, path_dst: &Path, spec_options: &SpecWalkOptions, b_move: bool) -> FsResult<File> {
        self.transfer_action(path_dst, spec_options, b_move)?;
        Ok(File::new(path_dst))
    }

    /// Copy or move onto `path_dst` under the conflict policy.
    ///
    /// A policy refusal is an [`FsError::AlreadyExists`] naming this file.
    pub(crate) fn transfer_action(
        &self,
        path_dst: &Path,
        spec_options: &SpecWalkOptions,
        b_move: bool,
    ) -> FsResult<EnumEntryAction> {
        let meta_src = match fs::symlink_metadata(&self.path) {
            Ok(meta) if meta.is_dir() => {
                return Err(FsError::NotAFile {
                    path: self.path.clone(),
                });
            }
            Ok(meta) => meta,
            Err(e) => return Err(FsError::io("inspect", &self.path, e)),
        };

        let decision = decide_replace(spec_options.conflict_policy, &meta_src, path_dst)
            .map_err(|e| FsError::io("inspect", path_dst, e))?;
        match decision {
            EnumReplaceDecision::Replace => {
                if let Some(path_dir) = path_dst.parent() {
                    fs::create_dir_all(path_dir)
                        .map_err(|e| FsError::io("create directory", path_dir, e))?;
                }
                if b_move {
                    move_entry(&self.path, &meta_src, path_dst)
                        .map_err(|e| FsError::io("move", &self.path, e))?;
                    Ok(EnumEntryAction::Moved)
                } else {
                    copy_entry(&self.path, &meta_src, path_dst)
                        .map_err(|e| FsError::io("copy", &self.path, e))?;
                    Ok(EnumEntryAction::Copied)
                }
            }
            EnumReplaceDecision::Skip => {
                debug!(src = %self.path.display(), dst = %path_dst.display(), "existing file kept");
                Ok(EnumEntryAction::Skipped)
            }
            EnumReplaceDecision::Fail => Err(FsError::AlreadyExists {
                path: self.path.clone(),
            }),
        }
    }

    /// Watch this file through its parent directory.
    pub fn observe(
        &self,
        build: impl FnOnce(SpecWalkOptions) -> SpecWalkOptions,
    ) -> FsResult<WatchSubscription> {
        let path_file = absolutize_path(&self.path);
        let Some(path_dir) = path_file.parent() else {
            return Err(FsError::NotAFile { path: path_file });
        };
        let spec_options = build(
            SpecWalkOptions::default()
                .glob([escape_glob(&self.name())])
                .depth(1),
        );
        WatchEngine::new(path_dir, spec_options)?.start()
    }

    /// Extract this zip archive into `dir`.
    pub fn unpack_to(
        &self,
        dir: &Directory,
        build: impl FnOnce(SpecWalkOptions) -> SpecWalkOptions,
    ) -> FsResult<ReportWalk> {
        archive::unpack(&ZipFormat, &self.path, &dir.path, build(SpecWalkOptions::default()))
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Directory

/// A directory path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Directory {
    path: PathBuf,
}

impl Directory {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> String {
        file_name(&self.path)
    }

    pub fn parent(&self) -> Option<Directory> {
        parent(&self.path)
    }

    pub fn is_present(&self) -> bool {
        self.path.is_dir()
    }

    pub fn is_absent(&self) -> bool {
        !self.is_present()
    }

    pub fn last_modified(&self) -> SystemTime {
        last_modified(&self.path)
    }

    pub fn file(&self, path_rel: impl AsRef<Path>) -> File {
        File::new(self.path.join(path_rel))
    }

    pub fn directory(&self, path_rel: impl AsRef<Path>) -> Directory {
        Directory::new(self.path.join(path_rel))
    }

    /// True when absent or without children.
    pub fn is_empty(&self) -> bool {
        match fs::read_dir(&self.path) {
            Ok(mut iter) => iter.next().is_none(),
            Err(_) => true,
        }
    }

    pub fn create(&self) -> FsResult<()> {
        fs::create_dir_all(&self.path).map_err(|e| FsError::io("create directory", &self.path, e))
    }

    /// Direct children, subdirectories first, each group sorted by name.
    pub fn children(&self) -> FsResult<Vec<Location>> {
        let (l_dirs, l_files) = read_dir_sorted(&self.path)?;
        let l_children = l_dirs
            .into_iter()
            .map(|e| Location::Directory(Directory::new(e.path)))
            .chain(l_files.into_iter().map(|e| Location::File(File::new(e.path))))
            .collect();
        Ok(l_children)
    }

    /// Total length of every file below this directory.
    pub fn size(&self) -> FsResult<u64> {
        let op = self.operation(EnumOperationKind::ScanFiles, None, SpecWalkOptions::default())?;
        let mut n_size = 0u64;
        op.subscribe(&Disposer::new(), |event| n_size += event.size)?;
        Ok(n_size)
    }

    /// Build a tree operation rooted here.
    pub fn operation(
        &self,
        kind: EnumOperationKind,
        destination: Option<&Directory>,
        spec_options: SpecWalkOptions,
    ) -> FsResult<TreeOperation> {
        TreeOperation::new(kind, &self.path, destination.map(Directory::path), spec_options)
    }

    /// Copy this tree into `dir`. The root name is kept unless stripped.
    pub fn copy_to(
        &self,
        dir: &Directory,
        build: impl FnOnce(SpecWalkOptions) -> SpecWalkOptions,
    ) -> FsResult<ReportWalk> {
        let op = self.operation(
            EnumOperationKind::Copy,
            Some(dir),
            build(SpecWalkOptions::default()),
        )?;
        run_reporting_failures(&op)
    }

    /// Move this tree into `dir`. The root name is kept unless stripped.
    pub fn move_to(
        &self,
        dir: &Directory,
        build: impl FnOnce(SpecWalkOptions) -> SpecWalkOptions,
    ) -> FsResult<ReportWalk> {
        let op = self.operation(
            EnumOperationKind::Move,
            Some(dir),
            build(SpecWalkOptions::default()),
        )?;
        run_reporting_failures(&op)
    }

    /// Delete the whole tree, root included.
    pub fn delete(&self) -> FsResult<ReportWalk> {
        self.delete_with(|o| o)
    }

    /// Delete the entries selected by the options.
    pub fn delete_with(
        &self,
        build: impl FnOnce(SpecWalkOptions) -> SpecWalkOptions,
    ) -> FsResult<ReportWalk> {
        self.operation(EnumOperationKind::Delete, None, build(SpecWalkOptions::default()))?
            .run()
    }

    /// Accepted files below this directory, in visit order.
    pub fn walk_files(
        &self,
        build: impl FnOnce(SpecWalkOptions) -> SpecWalkOptions,
    ) -> FsResult<Vec<File>> {
        let op = self.operation(
            EnumOperationKind::ScanFiles,
            None,
            build(SpecWalkOptions::default().strip()),
        )?;
        let mut l_files = Vec::new();
        op.subscribe(&Disposer::new(), |event| {
            if let Location::File(file) = &event.location {
                l_files.push(file.clone());
            }
        })?;
        Ok(l_files)
    }

    /// Accepted directories below this one; the root itself is left out.
    pub fn walk_directories(
        &self,
        build: impl FnOnce(SpecWalkOptions) -> SpecWalkOptions,
    ) -> FsResult<Vec<Directory>> {
        let op = self.operation(
            EnumOperationKind::ScanDirectories,
            None,
            build(SpecWalkOptions::default().strip()),
        )?;
        let mut l_dirs = Vec::new();
        op.subscribe(&Disposer::new(), |event| {
            if let Location::Directory(dir) = &event.location {
                l_dirs.push(dir.clone());
            }
        })?;
        Ok(l_dirs)
    }

    pub fn observe(
        &self,
        build: impl FnOnce(SpecWalkOptions) -> SpecWalkOptions,
    ) -> FsResult<WatchSubscription> {
        WatchEngine::new(&self.path, build(SpecWalkOptions::default()))?.start()
    }

    /// Pack the accepted files into a zip archive at `file`.
    pub fn pack_to(
        &self,
        file: &File,
        build: impl FnOnce(SpecWalkOptions) -> SpecWalkOptions,
    ) -> FsResult<ReportWalk> {
        archive::pack(&ZipFormat, &self.path, &file.path, build(SpecWalkOptions::default()))
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::{Duration, UNIX_EPOCH};

    use super::{Directory, File, Location, locate};
    use crate::spec::{FsError, SpecWalkOptions};
    use crate::testutil::{TestDir, list_files, read_text, set_mtime_secs, write_text};
    use crate::watch::EnumWatchKind;

    #[test]
    fn locate_stats_once_and_conversions_restat() {
        let test_dir = TestDir::new();
        let path_file = test_dir.path().join("file.txt");
        write_text(&path_file, "x");

        assert!(matches!(locate(test_dir.path()), Location::Directory(_)));
        let location = locate(&path_file);
        assert!(matches!(location, Location::File(_)));
        assert!(matches!(location.as_directory(), Err(FsError::NotADirectory { .. })));

        fs::remove_file(&path_file).expect("remove");
        fs::create_dir(&path_file).expect("mkdir");
        assert!(matches!(location.as_file(), Err(FsError::NotAFile { .. })));
        assert!(location.as_directory().is_ok());

        let absent = locate(test_dir.path().join("missing"));
        assert!(matches!(absent, Location::File(_)));
        assert!(absent.is_absent());
        assert_eq!(absent.last_modified(), UNIX_EPOCH);
        assert!(absent.as_directory().is_ok());
    }

    #[test]
    fn file_names_and_text() {
        let test_dir = TestDir::new();
        let file = File::new(test_dir.path().join("nested/archive.tar.gz"));
        assert_eq!(file.name(), "archive.tar.gz");
        assert_eq!(file.base(), "archive.tar");
        assert_eq!(file.extension(), "gz");
        assert_eq!(file.read_text().expect("absent reads empty"), "");
        assert_eq!(file.size(), 0);

        file.write_text("hello").expect("write");
        assert_eq!(file.read_text().expect("read"), "hello");
        assert_eq!(file.size(), 5);
        assert_eq!(
            file.parent().expect("parent").path(),
            test_dir.path().join("nested")
        );

        assert!(file.delete().expect("delete"));
        assert!(!file.delete().expect("absent delete is a no-op"));
    }

    #[test]
    fn file_create_keeps_existing_content() {
        let test_dir = TestDir::new();
        let file = File::new(test_dir.path().join("a/b/c.txt"));
        file.create().expect("create");
        assert!(file.is_present());
        file.write_text("kept").expect("write");
        file.create().expect("create again");
        assert_eq!(file.read_text().expect("read"), "kept");

        let time = UNIX_EPOCH + Duration::from_secs(3_000);
        file.set_last_modified(time).expect("set time");
        assert_eq!(file.last_modified(), time);
    }

    #[test]
    fn file_copy_and_move_honour_policy() {
        let test_dir = TestDir::new();
        let src = File::new(test_dir.path().join("src/a.txt"));
        src.write_text("new").expect("write");
        let dst_dir = Directory::new(test_dir.path().join("dst"));

        let copied = src.copy_to(&dst_dir, |o| o.allocate_in("sub")).expect("copy");
        assert_eq!(copied.path(), test_dir.path().join("dst/sub/a.txt"));
        assert_eq!(copied.read_text().expect("read"), "new");

        src.write_text("newer").expect("write");
        let err = src
            .copy_to(&dst_dir, |o| o.allocate_in("sub").stop_existing())
            .expect_err("exists");
        assert!(matches!(err, FsError::AlreadyExists { .. }));
        src.copy_to(&dst_dir, |o| o.allocate_in("sub").skip_existing())
            .expect("skip");
        assert_eq!(copied.read_text().expect("read"), "new");

        let target = File::new(test_dir.path().join("moved/b.txt"));
        let moved = src.move_to_file(&target, |o| o).expect("move");
        assert_eq!(moved, target);
        assert!(src.is_absent());
        assert_eq!(target.read_text().expect("read"), "newer");
    }

    #[test]
    fn directory_queries() {
        let test_dir = TestDir::new();
        let dir = Directory::new(test_dir.path().join("root"));
        assert!(dir.is_empty());
        write_text(&dir.path().join("b.txt"), "bb");
        write_text(&dir.path().join("a.txt"), "a");
        write_text(&dir.path().join("z/c.txt"), "ccc");

        assert!(!dir.is_empty());
        assert_eq!(dir.size().expect("size"), 6);
        let l_names: Vec<String> = dir
            .children()
            .expect("children")
            .iter()
            .map(Location::name)
            .collect();
        assert_eq!(l_names, vec!["z", "a.txt", "b.txt"]);
        assert_eq!(dir.file("z/c.txt").read_text().expect("read"), "ccc");
        assert!(dir.directory("z").is_present());
        assert_eq!(Location::from(dir.clone()).size().expect("size"), 6);
    }

    #[test]
    fn walks_leave_out_the_root() {
        let test_dir = TestDir::new();
        let dir = Directory::new(test_dir.path());
        for rel in ["a.txt", "b.bin", "d/c.txt", "d/e/f.txt"] {
            write_text(&dir.path().join(rel), rel);
        }
        let l_files = dir.walk_files(|o| o.glob(["**.txt"])).expect("walk files");
        assert_eq!(l_files.len(), 3);
        let l_dirs = dir.walk_directories(|o| o).expect("walk dirs");
        let l_names: Vec<String> = l_dirs.iter().map(Directory::name).collect();
        assert_eq!(l_names, vec!["d", "e"]);
    }

    #[test]
    fn directory_copy_reports_first_conflict() {
        let test_dir = TestDir::new();
        let src = Directory::new(test_dir.path().join("src"));
        let dst = Directory::new(test_dir.path().join("dst"));
        write_text(&src.path().join("a"), "a");
        write_text(&src.path().join("b"), "b");
        write_text(&dst.path().join("src/b"), "old");

        let err = src.copy_to(&dst, |o| o.stop_existing()).expect_err("conflict");
        match err {
            FsError::AlreadyExists { path } => assert_eq!(path, src.path().join("b")),
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(list_files(dst.path()), vec!["src/a", "src/b"]);
        assert_eq!(read_text(&dst.path().join("src/b")), "old");

        let report = src.copy_to(&dst, |o| o.replace_existing()).expect("copy");
        assert_eq!(report.cnt_copied, 2);
    }

    #[test]
    fn directory_move_and_delete() {
        let test_dir = TestDir::new();
        let src = Directory::new(test_dir.path().join("src"));
        let dst = Directory::new(test_dir.path().join("dst"));
        write_text(&src.path().join("x/y"), "y");
        set_mtime_secs(&src.path().join("x/y"), 500);

        src.move_to(&dst, |o| o.strip()).expect("move");
        assert_eq!(list_files(dst.path()), vec!["x/y"]);
        assert!(src.is_present() && src.is_empty());

        dst.delete().expect("delete");
        assert!(dst.is_absent());
    }

    #[test]
    fn file_observe_reports_only_that_file() {
        let test_dir = TestDir::new();
        let root = test_dir.path().canonicalize().expect("canonical root");
        let file = File::new(root.join("watched[1].txt"));
        file.write_text("one").expect("write");

        let sub = file.observe(|o| o).expect("observe");
        write_text(&root.join("other.txt"), "x");
        write_text(file.path(), "two");

        let time_deadline = std::time::Instant::now() + Duration::from_secs(5);
        let mut b_seen = false;
        while let Some(remaining) = time_deadline.checked_duration_since(std::time::Instant::now()) {
            let Some(event) = sub.recv_timeout(remaining) else {
                break;
            };
            assert_eq!(event.relative, std::path::Path::new("watched[1].txt"));
            if event.kind == EnumWatchKind::Modified {
                b_seen = true;
                break;
            }
        }
        assert!(b_seen);
    }

    #[test]
    fn operation_builds_tracked_runs() {
        let test_dir = TestDir::new();
        let src = Directory::new(test_dir.path().join("src"));
        write_text(&src.path().join("f"), "ff");
        let dst = Directory::new(test_dir.path().join("dst"));
        let op = src
            .operation(
                crate::spec::EnumOperationKind::Copy,
                Some(&dst),
                SpecWalkOptions::default().strip(),
            )
            .expect("operation");
        let mut n_calls = 0;
        op.track(&crate::walk::Disposer::new(), |_| n_calls += 1)
            .expect("track");
        assert!(n_calls >= 2);
        assert_eq!(list_files(dst.path()), vec!["f"]);
    }
}
