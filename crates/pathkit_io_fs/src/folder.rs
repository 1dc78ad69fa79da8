//! `Folder`: a virtual directory composed of several trees and single files.
//!
//! Every entry keeps its own walk options. An operation's options are layered
//! on top of each entry's, so both pattern lists apply (includes OR-combined,
//! excludes all honoured). Entries are processed in insertion order and the
//! first failing entry ends the operation.

use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::archive::{ZipFormat, pack_with};
use crate::location::{Directory, File, Location, locate, run_reporting_failures};
use crate::pattern::SpecPatternSet;
use crate::report::{ReportWalk, ReportWalkBuilder};
use crate::spec::{EnumEntryAction, EnumOperationKind, FsError, FsResult, SpecWalkOptions};
use crate::walk::Disposer;

////////////////////////////////////////////////////////////////////////////////
// #region FolderEntry

#[derive(Debug, Clone)]
enum EnumFolderSource {
    Directory(Directory, SpecWalkOptions),
    File(File),
}

#[derive(Debug, Clone)]
struct SpecFolderEntry {
    source: EnumFolderSource,
    /// Relative directory the entry lands in below any destination.
    path_rel_alloc: PathBuf,
}

impl SpecFolderEntry {
    fn allocation(&self) -> FsResult<&Path> {
        if self.path_rel_alloc.is_absolute() || self.path_rel_alloc.has_root() {
            return Err(FsError::InvalidOption {
                field: "allocate",
                reason: format!(
                    "only relative path is acceptable: {}",
                    self.path_rel_alloc.display()
                ),
            });
        }
        Ok(&self.path_rel_alloc)
    }

    fn destination(&self, dir: &Directory) -> FsResult<Directory> {
        let path_rel_alloc = self.allocation()?;
        if path_rel_alloc.as_os_str().is_empty() {
            Ok(dir.clone())
        } else {
            Ok(dir.directory(path_rel_alloc))
        }
    }
}

fn inspect_file(file: &File) -> FsResult<Option<Metadata>> {
    match fs::symlink_metadata(file.path()) {
        Ok(meta) => Ok(Some(meta)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %file.path().display(), "absent folder entry skipped");
            Ok(None)
        }
        Err(e) => Err(FsError::io("inspect", file.path(), e)),
    }
}

/// Match a single-file entry by its name and count it.
///
/// Absent files are neither scanned nor matched.
fn select_file(
    file: &File,
    spec_options: &SpecWalkOptions,
    kind: EnumOperationKind,
    builder_report: &mut ReportWalkBuilder,
) -> FsResult<bool> {
    spec_options.validate()?;
    let spec_pats = SpecPatternSet::compile(spec_options, kind)?;
    let Some(meta) = inspect_file(file)? else {
        return Ok(false);
    };
    builder_report.add_scanned();
    if !spec_pats.accepts(Path::new(&file.name()), Some(&meta)) {
        return Ok(false);
    }
    builder_report.add_matched();
    Ok(true)
}

/// Scans leave each entry's root out unless the options strip further.
fn walk_options(spec_options: SpecWalkOptions) -> SpecWalkOptions {
    if spec_options.strip_count == 0 {
        spec_options.strip()
    } else {
        spec_options
    }
}

fn scan(
    dir: &Directory,
    kind: EnumOperationKind,
    spec_options: SpecWalkOptions,
) -> FsResult<Vec<Location>> {
    let op = dir.operation(kind, None, walk_options(spec_options))?;
    let mut l_locations = Vec::new();
    op.subscribe(&Disposer::new(), |event| l_locations.push(event.location.clone()))?;
    Ok(l_locations)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Folder

/// An ordered set of directory trees and files handled as one directory.
///
/// ```ignore
/// let report = Folder::new()
///     .add_directory(Directory::new("src"), |o| o.glob(["**.rs"]))
///     .allocate("docs", |f| f.add_path("README.md"))
///     .copy_to(&Directory::new("out"), |o| o.replace_old())?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Folder {
    l_entries: Vec<SpecFolderEntry>,
}

impl Folder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, or a whole directory tree with default options.
    pub fn add(self, location: impl Into<Location>) -> Self {
        match location.into() {
            Location::Directory(dir) => self.add_directory(dir, |o| o),
            Location::File(file) => self.push(EnumFolderSource::File(file)),
        }
    }

    /// Add whatever `path` is right now; absent paths are added as files.
    pub fn add_path(self, path: impl AsRef<Path>) -> Self {
        self.add(locate(path))
    }

    pub fn add_all<I, L>(self, locations: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<Location>,
    {
        locations
            .into_iter()
            .fold(self, |folder, location| folder.add(location))
    }

    /// Add a directory tree narrowed by its own options.
    pub fn add_directory(
        self,
        dir: Directory,
        build: impl FnOnce(SpecWalkOptions) -> SpecWalkOptions,
    ) -> Self {
        let spec_options = build(SpecWalkOptions::default());
        self.push(EnumFolderSource::Directory(dir, spec_options))
    }

    /// Add a snapshot of `folder`'s entries.
    pub fn add_folder(mut self, folder: &Folder) -> Self {
        self.l_entries.extend(folder.l_entries.iter().cloned());
        self
    }

    /// Add the entries collected by `build`, relocated under `path_rel`.
    ///
    /// Absolute paths are rejected when an operation runs.
    pub fn allocate(
        mut self,
        path_rel: impl AsRef<Path>,
        build: impl FnOnce(Folder) -> Folder,
    ) -> Self {
        let path_rel = path_rel.as_ref();
        let l_entries = build(Folder::new()).l_entries.into_iter().map(|mut entry| {
            entry.path_rel_alloc = if entry.path_rel_alloc.as_os_str().is_empty() {
                path_rel.to_path_buf()
            } else {
                path_rel.join(&entry.path_rel_alloc)
            };
            entry
        });
        self.l_entries.extend(l_entries);
        self
    }

    fn push(mut self, source: EnumFolderSource) -> Self {
        self.l_entries.push(SpecFolderEntry {
            source,
            path_rel_alloc: PathBuf::new(),
        });
        self
    }

    /// Source locations in insertion order.
    pub fn entries(&self) -> Vec<Location> {
        self.l_entries
            .iter()
            .map(|entry| match &entry.source {
                EnumFolderSource::Directory(dir, _) => Location::Directory(dir.clone()),
                EnumFolderSource::File(file) => Location::File(file.clone()),
            })
            .collect()
    }

    /// Copy every entry into `dir`. Directory entries keep their root name
    /// unless stripped; file entries land directly in their allocation.
    pub fn copy_to(
        &self,
        dir: &Directory,
        build: impl Fn(SpecWalkOptions) -> SpecWalkOptions,
    ) -> FsResult<ReportWalk> {
        self.transfer(EnumOperationKind::Copy, dir, &build)
    }

    /// Move every entry into `dir`, like [`Folder::copy_to`].
    pub fn move_to(
        &self,
        dir: &Directory,
        build: impl Fn(SpecWalkOptions) -> SpecWalkOptions,
    ) -> FsResult<ReportWalk> {
        self.transfer(EnumOperationKind::Move, dir, &build)
    }

    fn transfer(
        &self,
        kind: EnumOperationKind,
        dir: &Directory,
        build: &dyn Fn(SpecWalkOptions) -> SpecWalkOptions,
    ) -> FsResult<ReportWalk> {
        let mut builder_report = ReportWalkBuilder::new(kind);
        for entry in &self.l_entries {
            let dir_dst = entry.destination(dir)?;
            match &entry.source {
                EnumFolderSource::Directory(dir_src, spec_options) => {
                    let op = dir_src.operation(kind, Some(&dir_dst), build(spec_options.clone()))?;
                    builder_report.merge(&run_reporting_failures(&op)?);
                }
                EnumFolderSource::File(file) => {
                    let spec_options = build(SpecWalkOptions::default());
                    if !select_file(file, &spec_options, kind, &mut builder_report)? {
                        continue;
                    }
                    let path_dst = file.destination_in(&dir_dst, &spec_options)?;
                    let action = file.transfer_action(
                        &path_dst,
                        &spec_options,
                        kind == EnumOperationKind::Move,
                    )?;
                    builder_report.add_action(action);
                }
            }
        }
        let report = builder_report.build();
        info!(n_entries = self.l_entries.len(), %report, "folder operation finished");
        Ok(report)
    }

    /// Delete every entry; directory roots go too once emptied.
    pub fn delete(&self) -> FsResult<ReportWalk> {
        self.delete_with(|o| o)
    }

    /// Delete the entries selected by each entry's and these options.
    pub fn delete_with(
        &self,
        build: impl Fn(SpecWalkOptions) -> SpecWalkOptions,
    ) -> FsResult<ReportWalk> {
        let kind = EnumOperationKind::Delete;
        let mut builder_report = ReportWalkBuilder::new(kind);
        for entry in &self.l_entries {
            match &entry.source {
                EnumFolderSource::Directory(dir, spec_options) => {
                    let report = dir.operation(kind, None, build(spec_options.clone()))?.run()?;
                    builder_report.merge(&report);
                }
                EnumFolderSource::File(file) => {
                    let spec_options = build(SpecWalkOptions::default());
                    if select_file(file, &spec_options, kind, &mut builder_report)?
                        && file.delete()?
                    {
                        builder_report.add_action(EnumEntryAction::Deleted);
                    }
                }
            }
        }
        let report = builder_report.build();
        info!(n_entries = self.l_entries.len(), %report, "folder operation finished");
        Ok(report)
    }

    /// Accepted files of every entry, in entry order.
    pub fn walk_files(
        &self,
        build: impl Fn(SpecWalkOptions) -> SpecWalkOptions,
    ) -> FsResult<Vec<File>> {
        let l_pairs = self.walk_files_with_base(build)?;
        Ok(l_pairs.into_iter().map(|(_, file)| file).collect())
    }

    /// Accepted files paired with the directory they were found from: the
    /// entry root for trees, the parent for single files.
    pub fn walk_files_with_base(
        &self,
        build: impl Fn(SpecWalkOptions) -> SpecWalkOptions,
    ) -> FsResult<Vec<(Directory, File)>> {
        let kind = EnumOperationKind::ScanFiles;
        let mut builder_report = ReportWalkBuilder::new(kind);
        let mut l_pairs = Vec::new();
        for entry in &self.l_entries {
            match &entry.source {
                EnumFolderSource::Directory(dir, spec_options) => {
                    for location in scan(dir, kind, build(spec_options.clone()))? {
                        if let Location::File(file) = location {
                            l_pairs.push((dir.clone(), file));
                        }
                    }
                }
                EnumFolderSource::File(file) => {
                    let spec_options = build(SpecWalkOptions::default());
                    if !select_file(file, &spec_options, kind, &mut builder_report)? {
                        continue;
                    }
                    if let Some(base) = file.parent() {
                        l_pairs.push((base, file.clone()));
                    }
                }
            }
        }
        Ok(l_pairs)
    }

    /// Accepted directories below every tree entry; roots are left out.
    pub fn walk_directories(
        &self,
        build: impl Fn(SpecWalkOptions) -> SpecWalkOptions,
    ) -> FsResult<Vec<Directory>> {
        let l_pairs = self.walk_directories_with_base(build)?;
        Ok(l_pairs.into_iter().map(|(_, dir)| dir).collect())
    }

    pub fn walk_directories_with_base(
        &self,
        build: impl Fn(SpecWalkOptions) -> SpecWalkOptions,
    ) -> FsResult<Vec<(Directory, Directory)>> {
        let mut l_pairs = Vec::new();
        for entry in &self.l_entries {
            let EnumFolderSource::Directory(dir, spec_options) = &entry.source else {
                continue;
            };
            let l_locations = scan(
                dir,
                EnumOperationKind::ScanDirectories,
                build(spec_options.clone()),
            )?;
            for location in l_locations {
                if let Location::Directory(dir_found) = location {
                    l_pairs.push((dir.clone(), dir_found));
                }
            }
        }
        Ok(l_pairs)
    }

    /// Pack every entry into a zip archive at `file`, laid out as
    /// [`Folder::copy_to`] would lay it out.
    pub fn pack_to(
        &self,
        file: &File,
        build: impl Fn(SpecWalkOptions) -> SpecWalkOptions,
    ) -> FsResult<ReportWalk> {
        for entry in &self.l_entries {
            entry.allocation()?;
        }
        pack_with(&ZipFormat, file.path(), |packer| {
            for entry in &self.l_entries {
                let path_rel_alloc = entry.allocation()?;
                match &entry.source {
                    EnumFolderSource::Directory(dir, spec_options) => {
                        let spec_options = build(spec_options.clone());
                        packer.put_tree(dir.path(), spec_options, path_rel_alloc, true)?;
                    }
                    EnumFolderSource::File(file_src) => {
                        let spec_options = build(SpecWalkOptions::default());
                        let kind = EnumOperationKind::ScanFiles;
                        if select_file(file_src, &spec_options, kind, packer.builder_report())? {
                            let path_rel = path_rel_alloc
                                .join(&spec_options.destination_sub_path)
                                .join(file_src.name());
                            packer.put_single(file_src.path(), &path_rel)?;
                        }
                    }
                }
            }
            Ok(())
        })
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
