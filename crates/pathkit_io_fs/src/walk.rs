//! File-system tree traversal and tree operation orchestration.
//!
//! One depth-first walk drives every operation. Each operation kind is a
//! visitor with the same three steps (pre-visit directory, visit file,
//! post-visit directory), chosen once per run.

use std::collections::HashSet;
use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::location::{Directory, File, Location};
use crate::pattern::SpecPatternSet;
use crate::report::{Progress, ReportWalk, ReportWalkBuilder};
use crate::spec::{
    EnumConflictPolicy, EnumEntryAction, EnumEntryKind, EnumOperationKind, EnumReplaceDecision,
    FsError, FsResult, SpecWalkOptions,
};
use crate::util::{
    absolutize_path, copy_entry, decide_replace, derive_destination_path, is_dir_empty,
    is_overlap, move_entry, remove_dir_if_empty, remove_file_if_present, set_modified,
};

////////////////////////////////////////////////////////////////////////////////
// #region Cancellation

/// Shared cancellation flag checked at every traversal step.
#[derive(Debug, Clone, Default)]
pub struct Disposer {
    flag: Arc<AtomicBool>,
}

impl Disposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispose(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Events

/// One visited entry and the action taken for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalEvent {
    pub kind: EnumEntryKind,
    /// The visited entry (the source side for copy and move).
    pub location: Location,
    /// Path relative to the traversal root.
    pub relative: PathBuf,
    pub action: EnumEntryAction,
    /// File length when visited; zero for directories.
    pub size: u64,
}

struct SpecWalkContext<'a> {
    disposer: &'a Disposer,
    spec_pats: &'a SpecPatternSet,
    depth: Option<usize>,
    path_rel_prefix: &'a Path,
    builder_report: ReportWalkBuilder,
    on_event: &'a mut dyn FnMut(&TraversalEvent),
}

impl SpecWalkContext<'_> {
    fn is_cancelled(&mut self) -> bool {
        if self.disposer.is_disposed() {
            self.builder_report.mark_cancelled();
        }
        self.builder_report.is_cancelled()
    }

    fn emit(
        &mut self,
        kind: EnumEntryKind,
        path: &Path,
        path_rel: &Path,
        size: u64,
        action: EnumEntryAction,
    ) {
        let relative = path_rel
            .strip_prefix(self.path_rel_prefix)
            .unwrap_or(path_rel)
            .to_path_buf();
        let location = match kind {
            EnumEntryKind::File => Location::File(File::new(path)),
            EnumEntryKind::Directory => Location::Directory(Directory::new(path)),
        };
        self.builder_report.add_action(action);
        (self.on_event)(&TraversalEvent {
            kind,
            location,
            relative,
            action,
            size,
        });
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Traversal

struct SpecVisitEntry<'a> {
    path: &'a Path,
    path_rel: &'a Path,
    meta: &'a Metadata,
    b_is_root: bool,
}

trait TreeVisitor {
    fn pre_visit_directory(
        &mut self,
        _ctx: &mut SpecWalkContext<'_>,
        _entry: &SpecVisitEntry<'_>,
    ) -> FsResult<()> {
        Ok(())
    }

    fn visit_file(&mut self, ctx: &mut SpecWalkContext<'_>, entry: &SpecVisitEntry<'_>)
    -> FsResult<()>;

    fn post_visit_directory(
        &mut self,
        _ctx: &mut SpecWalkContext<'_>,
        _entry: &SpecVisitEntry<'_>,
    ) -> FsResult<()> {
        Ok(())
    }

    fn visits_files(&self) -> bool {
        true
    }
}

pub(crate) struct SpecDirEntry {
    pub(crate) path: PathBuf,
    pub(crate) name: std::ffi::OsString,
    pub(crate) meta: Metadata,
}

/// List a directory as `(subdirectories, files)` sorted by name.
///
/// Symbolic links are listed as files. An absent directory lists as empty.
pub(crate) fn read_dir_sorted(path_dir: &Path) -> FsResult<(Vec<SpecDirEntry>, Vec<SpecDirEntry>)> {
    let mut l_dirs = Vec::new();
    let mut l_files = Vec::new();

    let iter_entries = match fs::read_dir(path_dir) {
        Ok(iter) => iter,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((l_dirs, l_files)),
        Err(e) => return Err(FsError::io("read directory", path_dir, e)),
    };
    for entry_res in iter_entries {
        let entry = entry_res.map_err(|e| FsError::io("read directory", path_dir, e))?;
        let path_entry = entry.path();
        let meta = match entry.metadata() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(FsError::io("inspect", path_entry, e)),
        };
        let cfg_file_type = meta.file_type();
        let spec_entry = SpecDirEntry {
            path: path_entry,
            name: entry.file_name(),
            meta,
        };
        if cfg_file_type.is_dir() {
            l_dirs.push(spec_entry);
        } else if cfg_file_type.is_file() || cfg_file_type.is_symlink() {
            l_files.push(spec_entry);
        } else {
            debug!(path = %spec_entry.path.display(), "special file skipped");
        }
    }

    l_dirs.sort_by(|a, b| a.name.cmp(&b.name));
    l_files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok((l_dirs, l_files))
}

fn walk_directory<V: TreeVisitor>(
    visitor: &mut V,
    ctx: &mut SpecWalkContext<'_>,
    entry: &SpecVisitEntry<'_>,
    n_depth: usize,
) -> FsResult<()> {
    if ctx.is_cancelled() {
        return Ok(());
    }
    if !entry.path_rel.as_os_str().is_empty() && ctx.spec_pats.is_pruned(entry.path_rel) {
        debug!(path = %entry.path.display(), "subtree pruned");
        return Ok(());
    }
    visitor.pre_visit_directory(ctx, entry)?;

    if ctx.depth.is_none_or(|n| n_depth < n) {
        let (l_dirs, l_files) = read_dir_sorted(entry.path)?;
        for dir_entry in l_dirs {
            let path_rel = entry.path_rel.join(&dir_entry.name);
            let spec_entry = SpecVisitEntry {
                path: &dir_entry.path,
                path_rel: &path_rel,
                meta: &dir_entry.meta,
                b_is_root: false,
            };
            walk_directory(visitor, ctx, &spec_entry, n_depth + 1)?;
            if ctx.is_cancelled() {
                return Ok(());
            }
        }

        if visitor.visits_files() {
            for file_entry in l_files {
                if ctx.is_cancelled() {
                    return Ok(());
                }
                ctx.builder_report.add_scanned();
                let path_rel = entry.path_rel.join(&file_entry.name);
                if !ctx.spec_pats.accepts(&path_rel, Some(&file_entry.meta)) {
                    continue;
                }
                ctx.builder_report.add_matched();
                let spec_entry = SpecVisitEntry {
                    path: &file_entry.path,
                    path_rel: &path_rel,
                    meta: &file_entry.meta,
                    b_is_root: false,
                };
                visitor.visit_file(ctx, &spec_entry)?;
            }
        }
    }

    if ctx.is_cancelled() {
        return Ok(());
    }
    visitor.post_visit_directory(ctx, entry)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Visitors

struct TransferVisitor {
    b_move: bool,
    path_dir_dst: PathBuf,
    strip_count: usize,
    rule_conflict: EnumConflictPolicy,
    set_mirror: HashSet<PathBuf>,
}

impl TreeVisitor for TransferVisitor {
    fn pre_visit_directory(
        &mut self,
        _ctx: &mut SpecWalkContext<'_>,
        entry: &SpecVisitEntry<'_>,
    ) -> FsResult<()> {
        let path_dst =
            derive_destination_path(&self.path_dir_dst, entry.path_rel, self.strip_count, true);
        fs::create_dir_all(&path_dst).map_err(|e| FsError::io("create directory", &path_dst, e))
    }

    fn visit_file(
        &mut self,
        ctx: &mut SpecWalkContext<'_>,
        entry: &SpecVisitEntry<'_>,
    ) -> FsResult<()> {
        let path_dst =
            derive_destination_path(&self.path_dir_dst, entry.path_rel, self.strip_count, false);
        self.set_mirror.insert(path_dst.clone());

        let decision = decide_replace(self.rule_conflict, entry.meta, &path_dst)
            .map_err(|e| FsError::io("inspect", &path_dst, e))?;
        let enum_action = match decision {
            EnumReplaceDecision::Replace if self.b_move => {
                move_entry(entry.path, entry.meta, &path_dst)
                    .map_err(|e| FsError::io("move", entry.path, e))?;
                EnumEntryAction::Moved
            }
            EnumReplaceDecision::Replace => {
                copy_entry(entry.path, entry.meta, &path_dst)
                    .map_err(|e| FsError::io("copy", entry.path, e))?;
                EnumEntryAction::Copied
            }
            EnumReplaceDecision::Skip => EnumEntryAction::Skipped,
            EnumReplaceDecision::Fail => {
                warn!(path = %path_dst.display(), "destination already exists");
                EnumEntryAction::Failed
            }
        };
        debug!(src = %entry.path.display(), dst = %path_dst.display(), action = ?enum_action);
        ctx.emit(
            EnumEntryKind::File,
            entry.path,
            entry.path_rel,
            entry.meta.len(),
            enum_action,
        );
        Ok(())
    }

    fn post_visit_directory(
        &mut self,
        _ctx: &mut SpecWalkContext<'_>,
        entry: &SpecVisitEntry<'_>,
    ) -> FsResult<()> {
        let path_dst =
            derive_destination_path(&self.path_dir_dst, entry.path_rel, self.strip_count, true);
        match is_dir_empty(&path_dst) {
            Ok(true) if path_dst != self.path_dir_dst => {
                remove_dir_if_empty(&path_dst)
                    .map_err(|e| FsError::io("delete directory", &path_dst, e))?;
            }
            Ok(_) => {
                if let Ok(time_modified) = entry.meta.modified() {
                    set_modified(&path_dst, time_modified)
                        .map_err(|e| FsError::io("set modified time", &path_dst, e))?;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(FsError::io("read directory", &path_dst, e)),
        }

        if self.b_move && (self.strip_count == 0 || !entry.b_is_root) {
            remove_dir_if_empty(entry.path)
                .map_err(|e| FsError::io("delete directory", entry.path, e))?;
        }
        Ok(())
    }
}

struct DeleteVisitor {
    strip_count: usize,
}

impl TreeVisitor for DeleteVisitor {
    fn visit_file(
        &mut self,
        ctx: &mut SpecWalkContext<'_>,
        entry: &SpecVisitEntry<'_>,
    ) -> FsResult<()> {
        if remove_file_if_present(entry.path).map_err(|e| FsError::io("delete", entry.path, e))? {
            ctx.emit(
                EnumEntryKind::File,
                entry.path,
                entry.path_rel,
                entry.meta.len(),
                EnumEntryAction::Deleted,
            );
        }
        Ok(())
    }

    fn post_visit_directory(
        &mut self,
        ctx: &mut SpecWalkContext<'_>,
        entry: &SpecVisitEntry<'_>,
    ) -> FsResult<()> {
        if entry.b_is_root && self.strip_count != 0 {
            return Ok(());
        }
        if remove_dir_if_empty(entry.path)
            .map_err(|e| FsError::io("delete directory", entry.path, e))?
        {
            ctx.emit(
                EnumEntryKind::Directory,
                entry.path,
                entry.path_rel,
                0,
                EnumEntryAction::Deleted,
            );
        }
        Ok(())
    }
}

struct ScanFilesVisitor;

impl TreeVisitor for ScanFilesVisitor {
    fn visit_file(
        &mut self,
        ctx: &mut SpecWalkContext<'_>,
        entry: &SpecVisitEntry<'_>,
    ) -> FsResult<()> {
        ctx.emit(
            EnumEntryKind::File,
            entry.path,
            entry.path_rel,
            entry.meta.len(),
            EnumEntryAction::Observed,
        );
        Ok(())
    }
}

struct ScanDirectoriesVisitor {
    strip_count: usize,
}

impl TreeVisitor for ScanDirectoriesVisitor {
    fn pre_visit_directory(
        &mut self,
        ctx: &mut SpecWalkContext<'_>,
        entry: &SpecVisitEntry<'_>,
    ) -> FsResult<()> {
        if (self.strip_count == 0 || !entry.b_is_root)
            && ctx.spec_pats.accepts(entry.path_rel, Some(entry.meta))
        {
            ctx.builder_report.add_matched();
            ctx.emit(
                EnumEntryKind::Directory,
                entry.path,
                entry.path_rel,
                0,
                EnumEntryAction::Observed,
            );
        }
        Ok(())
    }

    fn visit_file(&mut self, _ctx: &mut SpecWalkContext<'_>, _entry: &SpecVisitEntry<'_>) -> FsResult<()> {
        Ok(())
    }

    fn visits_files(&self) -> bool {
        false
    }
}

/// Delete mirror entries that no surviving source entry maps onto.
fn sync_destination(
    ctx: &mut SpecWalkContext<'_>,
    set_mirror: &HashSet<PathBuf>,
    path_dir: &Path,
    path_rel: &Path,
    b_is_root: bool,
) -> FsResult<()> {
    let (l_dirs, l_files) = read_dir_sorted(path_dir)?;
    for dir_entry in l_dirs {
        let path_rel_sub = path_rel.join(&dir_entry.name);
        if ctx.spec_pats.is_pruned(&path_rel_sub) {
            continue;
        }
        sync_destination(ctx, set_mirror, &dir_entry.path, &path_rel_sub, false)?;
    }
    for file_entry in l_files {
        let path_rel_file = path_rel.join(&file_entry.name);
        if set_mirror.contains(&file_entry.path)
            || !ctx.spec_pats.accepts(&path_rel_file, Some(&file_entry.meta))
        {
            continue;
        }
        if remove_file_if_present(&file_entry.path)
            .map_err(|e| FsError::io("delete", &file_entry.path, e))?
        {
            debug!(path = %file_entry.path.display(), "sync removed file");
            ctx.emit(
                EnumEntryKind::File,
                &file_entry.path,
                &path_rel_file,
                file_entry.meta.len(),
                EnumEntryAction::Deleted,
            );
        }
    }
    if !b_is_root
        && remove_dir_if_empty(path_dir).map_err(|e| FsError::io("delete directory", path_dir, e))?
    {
        ctx.emit(
            EnumEntryKind::Directory,
            path_dir,
            path_rel,
            0,
            EnumEntryAction::Deleted,
        );
    }
    Ok(())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region TreeOperation

/// One configured tree operation, ready to run any number of times.
#[derive(Debug, Clone)]
pub struct TreeOperation {
    kind: EnumOperationKind,
    path_dir_src: PathBuf,
    path_dir_dst: Option<PathBuf>,
    spec_options: SpecWalkOptions,
    spec_pats: SpecPatternSet,
}

impl TreeOperation {
    /// Validate the options, compile the patterns and resolve both roots.
    ///
    /// Copy and Move require a destination; other kinds ignore it. A run
    /// rejects a destination mirror inside the source and, under sync, one
    /// enclosing the source.
    pub fn new(
        kind: EnumOperationKind,
        source: impl AsRef<Path>,
        destination: Option<&Path>,
        spec_options: SpecWalkOptions,
    ) -> FsResult<Self> {
        spec_options.validate()?;
        let spec_pats = SpecPatternSet::compile(&spec_options, kind)?;
        let path_dir_dst = match (kind.is_transfer(), destination) {
            (true, None) => return Err(FsError::MissingDestination),
            (true, Some(path)) => Some(absolutize_path(path)),
            (false, _) => None,
        };
        Ok(Self {
            kind,
            path_dir_src: absolutize_path(source.as_ref()),
            path_dir_dst,
            spec_options,
            spec_pats,
        })
    }

    pub fn kind(&self) -> EnumOperationKind {
        self.kind
    }

    pub fn source(&self) -> &Path {
        &self.path_dir_src
    }

    pub fn destination(&self) -> Option<&Path> {
        self.path_dir_dst.as_deref()
    }

    pub fn options(&self) -> &SpecWalkOptions {
        &self.spec_options
    }

    /// Matching base prefix: the root name for unstripped transfers.
    fn path_rel_prefix(&self) -> PathBuf {
        if self.kind.is_transfer() && self.spec_options.strip_count == 0 {
            self.path_dir_src.file_name().map(PathBuf::from).unwrap_or_default()
        } else {
            PathBuf::new()
        }
    }

    /// Run to completion, discarding events.
    pub fn run(&self) -> FsResult<ReportWalk> {
        self.subscribe(&Disposer::new(), |_| {})
    }

    /// Run and hand every event to `on_event` as it happens.
    ///
    /// Disposing `disposer` (from the callback or elsewhere) stops the walk at
    /// the next step; the partial report is returned with `if_cancelled` set.
    pub fn subscribe<F>(&self, disposer: &Disposer, mut on_event: F) -> FsResult<ReportWalk>
    where
        F: FnMut(&TraversalEvent),
    {
        let path_rel_prefix = self.path_rel_prefix();
        let mut ctx = SpecWalkContext {
            disposer,
            spec_pats: &self.spec_pats,
            depth: self.spec_options.depth,
            path_rel_prefix: &path_rel_prefix,
            builder_report: ReportWalkBuilder::new(self.kind),
            on_event: &mut on_event,
        };
        info!(
            operation = self.kind.as_str(),
            source = %self.path_dir_src.display(),
            "tree operation started"
        );

        let Some(meta_root) = self.inspect_root()? else {
            debug!(source = %self.path_dir_src.display(), "source root is absent");
            return Ok(ctx.builder_report.build());
        };
        let strip_count = self.spec_options.strip_count;
        let spec_root = SpecVisitEntry {
            path: &self.path_dir_src,
            path_rel: &path_rel_prefix,
            meta: &meta_root,
            b_is_root: true,
        };

        match self.kind {
            EnumOperationKind::Copy | EnumOperationKind::Move => {
                let path_dir_dst = self
                    .path_dir_dst
                    .as_deref()
                    .ok_or(FsError::MissingDestination)?
                    .join(&self.spec_options.destination_sub_path);
                let path_dir_mirror =
                    derive_destination_path(&path_dir_dst, &path_rel_prefix, strip_count, true);
                if is_overlap(&self.path_dir_src, &path_dir_mirror, self.spec_options.if_sync) {
                    return Err(FsError::InvalidOption {
                        field: "destination",
                        reason: format!(
                            "{} overlaps source {}",
                            path_dir_mirror.display(),
                            self.path_dir_src.display()
                        ),
                    });
                }

                let mut visitor = TransferVisitor {
                    b_move: self.kind == EnumOperationKind::Move,
                    path_dir_dst: path_dir_dst.clone(),
                    strip_count,
                    rule_conflict: self.spec_options.conflict_policy,
                    set_mirror: HashSet::new(),
                };
                walk_directory(&mut visitor, &mut ctx, &spec_root, 0)?;
                if self.spec_options.if_sync && !ctx.is_cancelled() && path_dir_mirror.is_dir() {
                    let path_rel_mirror = path_dir_mirror
                        .strip_prefix(&path_dir_dst)
                        .map(Path::to_path_buf)
                        .unwrap_or_default();
                    sync_destination(
                        &mut ctx,
                        &visitor.set_mirror,
                        &path_dir_mirror,
                        &path_rel_mirror,
                        true,
                    )?;
                }
            }
            EnumOperationKind::Delete => {
                walk_directory(&mut DeleteVisitor { strip_count }, &mut ctx, &spec_root, 0)?;
            }
            EnumOperationKind::ScanFiles => {
                walk_directory(&mut ScanFilesVisitor, &mut ctx, &spec_root, 0)?;
            }
            EnumOperationKind::ScanDirectories => {
                let mut visitor = ScanDirectoriesVisitor { strip_count };
                walk_directory(&mut visitor, &mut ctx, &spec_root, 0)?;
            }
        }

        let report = ctx.builder_report.build();
        info!(%report, "tree operation finished");
        Ok(report)
    }

    /// Run with a ScanFiles pre-pass for totals, publishing progress per file.
    pub fn track<F>(&self, disposer: &Disposer, mut on_progress: F) -> FsResult<ReportWalk>
    where
        F: FnMut(&Progress),
    {
        let (n_files, n_size) = self.scan_totals(disposer)?;
        let mut progress = Progress::new(n_files, n_size);
        let report = self.subscribe(disposer, |event| {
            if event.kind == EnumEntryKind::File {
                progress.update(event.location.clone(), event.size);
                on_progress(&progress);
            }
        })?;
        progress.finish();
        on_progress(&progress);
        Ok(report)
    }

    /// Count and size the files this operation would visit.
    fn scan_totals(&self, disposer: &Disposer) -> FsResult<(u64, u64)> {
        let Some(meta_root) = self.inspect_root()? else {
            return Ok((0, 0));
        };
        let path_rel_prefix = self.path_rel_prefix();
        let mut n_files = 0u64;
        let mut n_size = 0u64;
        let mut on_event = |event: &TraversalEvent| {
            n_files += 1;
            n_size += event.size;
        };
        let mut ctx = SpecWalkContext {
            disposer,
            spec_pats: &self.spec_pats,
            depth: self.spec_options.depth,
            path_rel_prefix: &path_rel_prefix,
            builder_report: ReportWalkBuilder::new(EnumOperationKind::ScanFiles),
            on_event: &mut on_event,
        };
        let spec_root = SpecVisitEntry {
            path: &self.path_dir_src,
            path_rel: &path_rel_prefix,
            meta: &meta_root,
            b_is_root: true,
        };
        walk_directory(&mut ScanFilesVisitor, &mut ctx, &spec_root, 0)?;
        Ok((n_files, n_size))
    }

    fn inspect_root(&self) -> FsResult<Option<Metadata>> {
        match fs::metadata(&self.path_dir_src) {
            Ok(meta) if meta.is_dir() => Ok(Some(meta)),
            Ok(_) => Err(FsError::NotADirectory {
                path: self.path_dir_src.clone(),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FsError::io("inspect", &self.path_dir_src, e)),
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
