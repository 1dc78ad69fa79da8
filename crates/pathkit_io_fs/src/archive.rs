//! Archive codec seam and the zip codec.
//!
//! The tree code never parses archive bytes: it feeds entries into an
//! [`ArchiveSink`] and reads them back from an [`ArchiveSource`], both made by
//! an [`ArchiveFormat`].

use std::fs;
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Datelike, Local, NaiveDate, TimeZone, Timelike};
use tracing::{debug, info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::atomic::AtomicWriter;
use crate::pattern::{SpecPatternSet, to_match_path};
use crate::report::{ReportWalk, ReportWalkBuilder};
use crate::spec::{
    EnumEntryAction, EnumOperationKind, EnumReplaceDecision, FsError, FsResult, SpecWalkOptions,
};
use crate::util::{absolutize_path, decide_replace_with, derive_destination_path, set_modified};
use crate::walk::{Disposer, TreeOperation};

////////////////////////////////////////////////////////////////////////////////
// #region CodecSeam

/// Seekable byte sink an archive is written into.
pub trait ArchiveOutput: Write + Seek {}
impl<T: Write + Seek + ?Sized> ArchiveOutput for T {}

/// Seekable byte source an archive is read from.
pub trait ArchiveInput: Read + Seek {}
impl<T: Read + Seek + ?Sized> ArchiveInput for T {}

/// Metadata of one archive entry. Names are relative and `/` separated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecArchiveEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    pub modified: SystemTime,
    /// Unix permission bits, when the format records them.
    pub mode: Option<u32>,
}

/// Writable entry sink.
pub trait ArchiveSink {
    fn put(&mut self, entry: &SpecArchiveEntry, content: &mut dyn Read) -> FsResult<()>;

    /// Write the trailer; the sink is unusable afterwards.
    fn finish(self: Box<Self>) -> FsResult<()>;
}

/// Readable entry source.
pub trait ArchiveSource {
    /// Hand every entry, with a reader over its content, to `visit` in order.
    fn for_each_entry(
        &mut self,
        visit: &mut dyn FnMut(&SpecArchiveEntry, &mut dyn Read) -> FsResult<()>,
    ) -> FsResult<()>;
}

/// Factory of sinks and sources for one container format.
pub trait ArchiveFormat {
    /// `path` names the archive in errors.
    fn create_sink<'a>(
        &self,
        path: &Path,
        output: Box<dyn ArchiveOutput + 'a>,
    ) -> FsResult<Box<dyn ArchiveSink + 'a>>;

    fn open_source<'a>(
        &self,
        path: &Path,
        input: Box<dyn ArchiveInput + 'a>,
    ) -> FsResult<Box<dyn ArchiveSource + 'a>>;
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ZipCodec

/// Zip container, deflate-compressed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipFormat;

struct ZipSink<'a> {
    path: PathBuf,
    writer: ZipWriter<Box<dyn ArchiveOutput + 'a>>,
}

struct ZipSource<'a> {
    path: PathBuf,
    archive: ZipArchive<Box<dyn ArchiveInput + 'a>>,
}

impl ArchiveFormat for ZipFormat {
    fn create_sink<'a>(
        &self,
        path: &Path,
        output: Box<dyn ArchiveOutput + 'a>,
    ) -> FsResult<Box<dyn ArchiveSink + 'a>> {
        Ok(Box::new(ZipSink {
            path: path.to_path_buf(),
            writer: ZipWriter::new(output),
        }))
    }

    fn open_source<'a>(
        &self,
        path: &Path,
        input: Box<dyn ArchiveInput + 'a>,
    ) -> FsResult<Box<dyn ArchiveSource + 'a>> {
        let archive = ZipArchive::new(input).map_err(|e| FsError::archive(path, e))?;
        Ok(Box::new(ZipSource {
            path: path.to_path_buf(),
            archive,
        }))
    }
}

impl ArchiveSink for ZipSink<'_> {
    fn put(&mut self, entry: &SpecArchiveEntry, content: &mut dyn Read) -> FsResult<()> {
        let mut options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(to_zip_time(entry.modified));
        if let Some(mode) = entry.mode {
            options = options.unix_permissions(mode);
        }

        if entry.is_directory {
            return self
                .writer
                .add_directory(entry.name.as_str(), options)
                .map_err(|e| FsError::archive(&self.path, e));
        }
        self.writer
            .start_file(entry.name.as_str(), options)
            .map_err(|e| FsError::archive(&self.path, e))?;
        io::copy(content, &mut self.writer).map_err(|e| FsError::io("write", &self.path, e))?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> FsResult<()> {
        self.writer
            .finish()
            .map(drop)
            .map_err(|e| FsError::archive(&self.path, e))
    }
}

impl ArchiveSource for ZipSource<'_> {
    fn for_each_entry(
        &mut self,
        visit: &mut dyn FnMut(&SpecArchiveEntry, &mut dyn Read) -> FsResult<()>,
    ) -> FsResult<()> {
        for index in 0..self.archive.len() {
            let mut file = self
                .archive
                .by_index(index)
                .map_err(|e| FsError::archive(&self.path, e))?;
            let Some(name) = file.enclosed_name().map(|p| to_match_path(&p)) else {
                warn!(archive = %self.path.display(), entry = file.name(), "unsafe entry name skipped");
                continue;
            };
            let entry = SpecArchiveEntry {
                name,
                is_directory: file.is_dir(),
                size: file.size(),
                modified: from_zip_time(file.last_modified()),
                mode: file.unix_mode(),
            };
            visit(&entry, &mut file)?;
        }
        Ok(())
    }
}

/// Local wall-clock time, two-second resolution, 1980 at the earliest.
fn to_zip_time(time: SystemTime) -> zip::DateTime {
    let time_local: chrono::DateTime<Local> = time.into();
    u16::try_from(time_local.year())
        .ok()
        .and_then(|year| {
            zip::DateTime::from_date_and_time(
                year,
                time_local.month() as u8,
                time_local.day() as u8,
                time_local.hour() as u8,
                time_local.minute() as u8,
                time_local.second() as u8,
            )
            .ok()
        })
        .unwrap_or_default()
}

fn from_zip_time(time: zip::DateTime) -> SystemTime {
    NaiveDate::from_ymd_opt(time.year().into(), time.month().into(), time.day().into())
        .and_then(|date| {
            date.and_hms_opt(time.hour().into(), time.minute().into(), time.second().into())
        })
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(SystemTime::from)
        .unwrap_or(UNIX_EPOCH)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region PackUnpack

fn put_file(sink: &mut dyn ArchiveSink, path_file: &Path, path_rel: &Path) -> FsResult<()> {
    let meta = fs::metadata(path_file).map_err(|e| FsError::io("inspect", path_file, e))?;
    let mut file = fs::File::open(path_file).map_err(|e| FsError::io("read", path_file, e))?;

    #[cfg(unix)]
    let mode = {
        use std::os::unix::fs::PermissionsExt;
        Some(meta.permissions().mode())
    };
    #[cfg(not(unix))]
    let mode = None;

    let entry = SpecArchiveEntry {
        name: to_match_path(path_rel),
        is_directory: false,
        size: meta.len(),
        modified: meta.modified().unwrap_or(UNIX_EPOCH),
        mode,
    };
    sink.put(&entry, &mut file)
}

/// Entry sink of one archive being written, fed tree by tree.
pub(crate) struct ArchivePacker<'a> {
    sink: Box<dyn ArchiveSink + 'a>,
    path_tmp: Option<PathBuf>,
    builder_report: ReportWalkBuilder,
}

impl ArchivePacker<'_> {
    /// Pack every file a ScanFiles traversal of `path_dir_src` accepts.
    ///
    /// Entry names are `path_rel_base`, then the options' `allocate_in`, then
    /// the path relative to the root (prefixed by the root name when
    /// `b_keep_root` and unstripped), with `strip_count` applied.
    pub(crate) fn put_tree(
        &mut self,
        path_dir_src: &Path,
        spec_options: SpecWalkOptions,
        path_rel_base: &Path,
        b_keep_root: bool,
    ) -> FsResult<()> {
        let path_dir_root = absolutize_path(path_dir_src);
        // A destination inside the source must not pack its own pending content.
        let path_rel_tmp = self
            .path_tmp
            .as_deref()
            .and_then(|p| p.strip_prefix(&path_dir_root).ok())
            .map(Path::to_path_buf);
        let spec_options = match path_rel_tmp {
            Some(path_rel_tmp) => {
                let filter_prev = spec_options.filter.clone();
                spec_options.take(move |path_rel, meta| {
                    path_rel != path_rel_tmp && filter_prev.as_ref().is_none_or(|f| f(path_rel, meta))
                })
            }
            None => spec_options,
        };
        let path_rel_dst = path_rel_base.join(&spec_options.destination_sub_path);
        let strip_count = spec_options.strip_count;
        let path_rel_root = match path_dir_root.file_name() {
            Some(name) if b_keep_root && strip_count == 0 => PathBuf::from(name),
            _ => PathBuf::new(),
        };
        let op = TreeOperation::new(EnumOperationKind::ScanFiles, &path_dir_root, None, spec_options)?;

        let sink = self.sink.as_mut();
        let disposer = Disposer::new();
        let mut res_put: FsResult<()> = Ok(());
        let report = op.subscribe(&disposer, |event| {
            if res_put.is_err() {
                return;
            }
            let path_rel_src = path_rel_root.join(&event.relative);
            let path_rel = derive_destination_path(&path_rel_dst, &path_rel_src, strip_count, false);
            res_put = put_file(sink, event.location.path(), &path_rel);
            if res_put.is_err() {
                disposer.dispose();
            }
        })?;
        res_put?;
        self.builder_report.merge(&report);
        Ok(())
    }

    /// Counters of everything packed so far.
    pub(crate) fn builder_report(&mut self) -> &mut ReportWalkBuilder {
        &mut self.builder_report
    }

    /// Pack one already matched file under the relative entry name `path_rel`.
    pub(crate) fn put_single(&mut self, path_file: &Path, path_rel: &Path) -> FsResult<()> {
        put_file(self.sink.as_mut(), path_file, path_rel)?;
        self.builder_report.add_action(EnumEntryAction::Observed);
        Ok(())
    }
}

/// Write an archive at `path_file_dst` from whatever `fill` puts into it.
///
/// The archive goes through an [`AtomicWriter`], so a failed pack leaves any
/// previous archive in place.
pub(crate) fn pack_with<F>(
    format: &dyn ArchiveFormat,
    path_file_dst: &Path,
    fill: F,
) -> FsResult<ReportWalk>
where
    F: FnOnce(&mut ArchivePacker<'_>) -> FsResult<()>,
{
    let mut writer = AtomicWriter::create(path_file_dst)?;
    let path_archive = writer.path().to_path_buf();
    let path_tmp = writer.temporary_path().map(Path::to_path_buf);

    let builder_report = {
        let sink = format.create_sink(&path_archive, Box::new(&mut writer))?;
        let mut packer = ArchivePacker {
            sink,
            path_tmp,
            builder_report: ReportWalkBuilder::new(EnumOperationKind::ScanFiles),
        };
        fill(&mut packer)?;
        let ArchivePacker {
            sink,
            builder_report,
            ..
        } = packer;
        sink.finish()?;
        builder_report
    };
    writer.commit()?;

    let report = builder_report.build();
    info!(archive = %path_archive.display(), %report, "archive packed");
    Ok(report)
}

/// Pack every file a ScanFiles traversal of `path_dir_src` accepts.
///
/// Entry names are relative to the root. The archive is written through an
/// [`AtomicWriter`], so a failed pack leaves any previous archive in place.
pub fn pack(
    format: &dyn ArchiveFormat,
    path_dir_src: &Path,
    path_file_dst: &Path,
    spec_options: SpecWalkOptions,
) -> FsResult<ReportWalk> {
    pack_with(format, path_file_dst, |packer| {
        packer.put_tree(path_dir_src, spec_options, Path::new(""), false)
    })
}

/// Extract the entries the pattern set accepts into `path_dir_dst`.
///
/// Entry names play the role of relative paths; the generic filter is not
/// consulted because entries carry no file-system metadata. The first entry
/// rejected by the conflict policy is reported as [`FsError::AlreadyExists`]
/// after the extraction completes.
pub fn unpack(
    format: &dyn ArchiveFormat,
    path_file_src: &Path,
    path_dir_dst: &Path,
    spec_options: SpecWalkOptions,
) -> FsResult<ReportWalk> {
    spec_options.validate()?;
    let spec_pats = SpecPatternSet::compile(&spec_options, EnumOperationKind::ScanFiles)?;
    let path_dir_root = absolutize_path(path_dir_dst).join(&spec_options.destination_sub_path);
    let strip_count = spec_options.strip_count;

    let file = fs::File::open(path_file_src).map_err(|e| FsError::io("read", path_file_src, e))?;
    let mut source = format.open_source(path_file_src, Box::new(file))?;
    let mut builder_report = ReportWalkBuilder::new(EnumOperationKind::Copy);
    let mut path_failed: Option<PathBuf> = None;

    source.for_each_entry(&mut |entry, content| {
        let path_rel = Path::new(&entry.name);
        let b_pruned = path_rel
            .ancestors()
            .skip(usize::from(!entry.is_directory))
            .filter(|p| !p.as_os_str().is_empty())
            .any(|p| spec_pats.is_pruned(p));
        if b_pruned {
            return Ok(());
        }

        if entry.is_directory {
            let path_dst = derive_destination_path(&path_dir_root, path_rel, strip_count, true);
            return fs::create_dir_all(&path_dst)
                .map_err(|e| FsError::io("create directory", &path_dst, e));
        }

        builder_report.add_scanned();
        if !spec_pats.accepts_path(path_rel) {
            return Ok(());
        }
        builder_report.add_matched();

        let path_dst = derive_destination_path(&path_dir_root, path_rel, strip_count, false);
        let decision =
            decide_replace_with(spec_options.conflict_policy, entry.modified, entry.size, &path_dst)
                .map_err(|e| FsError::io("inspect", &path_dst, e))?;
        match decision {
            EnumReplaceDecision::Replace => {
                extract_entry(entry, content, &path_dst)?;
                builder_report.add_action(EnumEntryAction::Copied);
            }
            EnumReplaceDecision::Skip => builder_report.add_action(EnumEntryAction::Skipped),
            EnumReplaceDecision::Fail => {
                warn!(path = %path_dst.display(), "destination already exists");
                builder_report.add_action(EnumEntryAction::Failed);
                path_failed.get_or_insert_with(|| path_file_src.join(path_rel));
            }
        }
        Ok(())
    })?;

    let report = builder_report.build();
    info!(archive = %path_file_src.display(), %report, "archive unpacked");
    match path_failed {
        Some(path) => Err(FsError::AlreadyExists { path }),
        None => Ok(report),
    }
}

fn extract_entry(entry: &SpecArchiveEntry, content: &mut dyn Read, path_dst: &Path) -> FsResult<()> {
    if let Some(path_dir) = path_dst.parent() {
        fs::create_dir_all(path_dir).map_err(|e| FsError::io("create directory", path_dir, e))?;
    }
    if fs::symlink_metadata(path_dst).is_ok_and(|m| m.file_type().is_symlink()) {
        fs::remove_file(path_dst).map_err(|e| FsError::io("delete", path_dst, e))?;
    }
    let mut file = fs::File::create(path_dst).map_err(|e| FsError::io("create", path_dst, e))?;
    io::copy(content, &mut file).map_err(|e| FsError::io("write", path_dst, e))?;
    drop(file);

    #[cfg(unix)]
    if let Some(mode) = entry.mode {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path_dst, fs::Permissions::from_mode(mode))
            .map_err(|e| FsError::io("set permissions", path_dst, e))?;
    }
    set_modified(path_dst, entry.modified)
        .map_err(|e| FsError::io("set modified time", path_dst, e))?;
    debug!(path = %path_dst.display(), "entry extracted");
    Ok(())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
