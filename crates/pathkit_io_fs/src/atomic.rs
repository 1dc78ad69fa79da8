//! Write-to-temp-then-rename file writer.
//!
//! Readers of the destination see the complete old content or the complete
//! new content. Writes land in `<name>.<random>.atomic` beside the
//! destination; [`AtomicWriter::commit`] swaps it in.

use std::ffi::OsString;
use std::fs;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::spec::{FsError, FsResult};
use crate::util::{absolutize_path, remove_file_if_present};

/// Path of the hard-link backup kept for `path_file`.
pub fn backup_path(path_file: &Path) -> PathBuf {
    let mut name: OsString = path_file.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

/// Buffered replacement of one destination file.
///
/// Dropping the writer without [`commit`](Self::commit) discards everything
/// written so far and leaves the destination untouched.
#[derive(Debug)]
pub struct AtomicWriter {
    path_file_dst: PathBuf,
    file_tmp: Option<NamedTempFile>,
}

impl AtomicWriter {
    /// Start a writer whose content replaces the destination.
    pub fn create(path_file: impl AsRef<Path>) -> FsResult<Self> {
        Self::open(path_file.as_ref(), false)
    }

    /// Start a writer seeded with the current destination content.
    pub fn append(path_file: impl AsRef<Path>) -> FsResult<Self> {
        Self::open(path_file.as_ref(), true)
    }

    fn open(path_file: &Path, b_append: bool) -> FsResult<Self> {
        let path_file_dst = absolutize_path(path_file);
        let (Some(path_dir), Some(name)) = (path_file_dst.parent(), path_file_dst.file_name())
        else {
            return Err(FsError::NotAFile {
                path: path_file_dst,
            });
        };
        fs::create_dir_all(path_dir).map_err(|e| FsError::io("create directory", path_dir, e))?;

        let mut file_tmp = tempfile::Builder::new()
            .prefix(&format!("{}.", name.to_string_lossy()))
            .suffix(".atomic")
            .tempfile_in(path_dir)
            .map_err(|e| FsError::io("create temporary file", path_dir, e))?;

        if b_append {
            match fs::File::open(&path_file_dst) {
                Ok(mut file_src) => {
                    io::copy(&mut file_src, file_tmp.as_file_mut())
                        .map_err(|e| FsError::io("read", &path_file_dst, e))?;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(FsError::io("read", &path_file_dst, e)),
            }
        }

        Ok(Self {
            path_file_dst,
            file_tmp: Some(file_tmp),
        })
    }

    /// Destination this writer will replace.
    pub fn path(&self) -> &Path {
        &self.path_file_dst
    }

    /// Temporary file currently receiving writes.
    pub fn temporary_path(&self) -> Option<&Path> {
        self.file_tmp.as_ref().map(NamedTempFile::path)
    }

    /// Flush, lock, back up, then rename the temporary file onto the destination.
    ///
    /// Falls back to a plain copy when the rename fails; when both fail the
    /// temporary file is removed and both causes are returned.
    pub fn commit(mut self) -> FsResult<()> {
        let Some(mut file_tmp) = self.file_tmp.take() else {
            return Ok(());
        };
        let path_dst = self.path_file_dst.clone();
        file_tmp
            .flush()
            .and_then(|_| file_tmp.as_file().sync_all())
            .map_err(|e| FsError::io("flush", file_tmp.path(), e))?;

        let _file_lock = lock_destination(&path_dst);
        link_backup(&path_dst);

        let err_persist = match file_tmp.persist(&path_dst) {
            Ok(_) => {
                debug!(path = %path_dst.display(), "atomic write committed");
                return Ok(());
            }
            Err(e) => e,
        };
        let tempfile::PersistError {
            error: err_rename,
            file: file_tmp,
        } = err_persist;
        debug!(path = %path_dst.display(), error = %err_rename, "rename failed, replacing by copy");

        let res_replace = fs::copy(file_tmp.path(), &path_dst);
        let path_tmp = file_tmp.path().to_path_buf();
        if let Err(e) = file_tmp.close() {
            warn!(path = %path_tmp.display(), error = %e, "failed to remove temporary file");
        }
        match res_replace {
            Ok(_) => Ok(()),
            Err(err_replace) => Err(FsError::AtomicWriteFailed {
                path: path_dst,
                rename: err_rename,
                replace: err_replace,
            }),
        }
    }
}

/// Best-effort exclusive lock on an existing destination.
fn lock_destination(path_dst: &Path) -> Option<fs::File> {
    let file = fs::File::open(path_dst).ok()?;
    match fs2::FileExt::try_lock_exclusive(&file) {
        Ok(()) => Some(file),
        Err(e) => {
            debug!(path = %path_dst.display(), error = %e, "destination lock unavailable");
            None
        }
    }
}

/// Best-effort `<dst>.bak` hard link to the current destination.
fn link_backup(path_dst: &Path) {
    if !path_dst.is_file() {
        return;
    }
    let path_backup = backup_path(path_dst);
    let res = remove_file_if_present(&path_backup).and_then(|_| fs::hard_link(path_dst, &path_backup));
    if let Err(e) = res {
        debug!(path = %path_backup.display(), error = %e, "backup link skipped");
    }
}

impl Write for AtomicWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file_tmp.as_mut() {
            Some(file_tmp) => file_tmp.write(buf),
            None => Err(io::Error::other("atomic writer already committed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file_tmp.as_mut() {
            Some(file_tmp) => file_tmp.flush(),
            None => Ok(()),
        }
    }
}

impl Seek for AtomicWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self.file_tmp.as_mut() {
            Some(file_tmp) => file_tmp.seek(pos),
            None => Err(io::Error::other("atomic writer already committed")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Write;
    use std::path::Path;

    use super::{AtomicWriter, backup_path};
    use crate::spec::FsError;
    use crate::testutil::{TestDir, read_text, write_text};

    fn leftover_temporaries(path_dir: &Path) -> usize {
        fs::read_dir(path_dir)
            .expect("read dir")
            .filter(|e| {
                e.as_ref()
                    .map(|e| e.file_name().to_string_lossy().ends_with(".atomic"))
                    .unwrap_or(false)
            })
            .count()
    }

    #[test]
    fn readers_never_see_uncommitted_content() {
        let test_dir = TestDir::new();
        let path_file = test_dir.path().join("file.txt");

        let mut writer = AtomicWriter::create(&path_file).expect("writer");
        writer.write_all(b"ok").expect("write");
        writer.commit().expect("commit");

        let mut writer = AtomicWriter::create(&path_file).expect("writer");
        writer.write_all(b"failed").expect("write");
        writer.flush().expect("flush");
        assert_eq!(read_text(&path_file), "ok");
        assert!(writer.temporary_path().is_some_and(|p| p.exists()));

        drop(writer);
        assert_eq!(read_text(&path_file), "ok");
        assert_eq!(leftover_temporaries(test_dir.path()), 0);
    }

    #[test]
    fn commit_keeps_hard_link_backup() {
        let test_dir = TestDir::new();
        let path_file = test_dir.path().join("file.txt");
        write_text(&path_file, "old");

        let mut writer = AtomicWriter::create(&path_file).expect("writer");
        writer.write_all(b"new").expect("write");
        writer.commit().expect("commit");

        assert_eq!(read_text(&path_file), "new");
        assert_eq!(read_text(&backup_path(&path_file)), "old");
    }

    #[test]
    fn append_starts_from_current_content() {
        let test_dir = TestDir::new();
        let path_file = test_dir.path().join("nested/log.txt");

        let mut writer = AtomicWriter::append(&path_file).expect("writer");
        writer.write_all(b"a").expect("write");
        writer.commit().expect("commit");

        let mut writer = AtomicWriter::append(&path_file).expect("writer");
        writer.write_all(b"b").expect("write");
        writer.commit().expect("commit");
        assert_eq!(read_text(&path_file), "ab");
    }

    #[test]
    fn failed_replace_chains_both_causes_and_cleans_up() {
        let test_dir = TestDir::new();
        let path_target = test_dir.path().join("occupied");
        write_text(&path_target.join("child"), "x");

        let mut writer = AtomicWriter::create(&path_target).expect("writer");
        writer.write_all(b"data").expect("write");
        let err = writer.commit().expect_err("directory cannot be replaced");
        assert!(matches!(err, FsError::AtomicWriteFailed { .. }));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(leftover_temporaries(test_dir.path()), 0);
        assert_eq!(read_text(&path_target.join("child")), "x");
    }
}
