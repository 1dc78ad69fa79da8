use std::fs::{self, Metadata};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::spec::{EnumConflictPolicy, EnumReplaceDecision};

////////////////////////////////////////////////////////////////////////////////
// #region PathUtilities

fn _normalize_path(path: &Path) -> PathBuf {
    if let Ok(resolved) = fs::canonicalize(path) {
        return resolved;
    }
    absolutize_path(path)
}

pub(crate) fn absolutize_path(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Whether `dst` lies inside `src`, or `src` inside `dst` when `b_sync`.
///
/// A sync pass deletes unmatched destination entries, so under sync a
/// destination enclosing the source would eat the source itself.
pub(crate) fn is_overlap(src: &Path, dst: &Path, b_sync: bool) -> bool {
    let src_resolved = _normalize_path(src);
    let dst_resolved = _normalize_path(dst);
    dst_resolved.starts_with(&src_resolved) || (b_sync && src_resolved.starts_with(&dst_resolved))
}

/// Derive the mirrored destination of a relative path.
///
/// `strip_count` above one drops `strip_count - 1` leading segments. A file
/// always keeps its own name; a directory may collapse onto the root.
///
/// ```ignore
/// let path = derive_destination_path(Path::new("/out"), Path::new("a/b/c.txt"), 2, false);
/// assert_eq!(path, Path::new("/out/b/c.txt"));
/// ```
pub(crate) fn derive_destination_path(
    path_dir_dst: &Path,
    path_rel: &Path,
    strip_count: usize,
    b_is_dir: bool,
) -> PathBuf {
    let l_parts: Vec<Component<'_>> = path_rel
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    let n_drop_max = if b_is_dir {
        l_parts.len()
    } else {
        l_parts.len().saturating_sub(1)
    };
    let n_drop = strip_count.saturating_sub(1).min(n_drop_max);

    let mut path_dst = path_dir_dst.to_path_buf();
    for part in &l_parts[n_drop..] {
        path_dst.push(part.as_os_str());
    }
    path_dst
}

pub(crate) fn is_dir_empty(path_dir: &Path) -> io::Result<bool> {
    Ok(fs::read_dir(path_dir)?.next().is_none())
}

/// Remove a file or link; an absent path counts as removed.
pub(crate) fn remove_file_if_present(path_file: &Path) -> io::Result<bool> {
    match fs::remove_file(path_file) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remove a directory only when it has no children.
pub(crate) fn remove_dir_if_empty(path_dir: &Path) -> io::Result<bool> {
    match is_dir_empty(path_dir) {
        Ok(true) => {}
        Ok(false) => return Ok(false),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    }
    match fs::remove_dir(path_dir) {
        Ok(()) => Ok(true),
        Err(e) if matches!(
            e.kind(),
            io::ErrorKind::NotFound | io::ErrorKind::DirectoryNotEmpty
        ) =>
        {
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ConflictPolicy

/// Modified time in whole milliseconds since the epoch (negative before it).
pub(crate) fn modified_millis(meta: &Metadata) -> io::Result<i128> {
    Ok(system_time_millis(meta.modified()?))
}

pub(crate) fn system_time_millis(time: SystemTime) -> i128 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i128,
        Err(e) => -(e.duration().as_millis() as i128),
    }
}

/// Decide what happens to an existing destination entry.
pub(crate) fn decide_replace(
    rule_conflict: EnumConflictPolicy,
    meta_src: &Metadata,
    path_dst: &Path,
) -> io::Result<EnumReplaceDecision> {
    decide_replace_with(rule_conflict, meta_src.modified()?, meta_src.len(), path_dst)
}

/// [`decide_replace`] for sources known only by modified time and length.
pub(crate) fn decide_replace_with(
    rule_conflict: EnumConflictPolicy,
    time_modified_src: SystemTime,
    len_src: u64,
    path_dst: &Path,
) -> io::Result<EnumReplaceDecision> {
    let meta_dst = match fs::symlink_metadata(path_dst) {
        Ok(v) => v,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(EnumReplaceDecision::Replace),
        Err(e) => return Err(e),
    };
    let n_millis_src = system_time_millis(time_modified_src);

    let b_replace = match rule_conflict {
        EnumConflictPolicy::ReplaceAlways => true,
        EnumConflictPolicy::ReplaceIfNewer => modified_millis(&meta_dst)? < n_millis_src,
        EnumConflictPolicy::ReplaceIfDifferent => {
            modified_millis(&meta_dst)? != n_millis_src || meta_dst.len() != len_src
        }
        EnumConflictPolicy::SkipExisting => false,
        EnumConflictPolicy::FailIfExisting => return Ok(EnumReplaceDecision::Fail),
    };
    Ok(if b_replace {
        EnumReplaceDecision::Replace
    } else {
        EnumReplaceDecision::Skip
    })
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region FileTransfer

pub(crate) fn create_symbolic_link(path_src: &Path, path_dst: &Path) -> io::Result<()> {
    let target = fs::read_link(path_src)?;

    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(&target, path_dst)
    }
    #[cfg(windows)]
    {
        use std::os::windows::fs::{symlink_dir, symlink_file};
        if path_src.is_dir() {
            symlink_dir(&target, path_dst)
        } else {
            symlink_file(&target, path_dst)
        }
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = (target, path_dst);
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "Symbolic links are unsupported on this platform",
        ))
    }
}

/// Replace `path_file_dst` with a copy of `path_file_src`, links copied as links.
pub(crate) fn copy_entry(path_file_src: &Path, meta_src: &Metadata, path_file_dst: &Path) -> io::Result<()> {
    // Never write through an existing link at the destination.
    if fs::symlink_metadata(path_file_dst).is_ok_and(|m| m.file_type().is_symlink()) {
        remove_file_if_present(path_file_dst)?;
    }
    if meta_src.file_type().is_symlink() {
        remove_file_if_present(path_file_dst)?;
        return create_symbolic_link(path_file_src, path_file_dst);
    }
    copy_file_with_metadata(path_file_src, path_file_dst)
}

/// Rename, falling back to copy + delete across volumes.
pub(crate) fn move_entry(path_file_src: &Path, meta_src: &Metadata, path_file_dst: &Path) -> io::Result<()> {
    match fs::rename(path_file_src, path_file_dst) {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::debug!(
                src = %path_file_src.display(),
                dst = %path_file_dst.display(),
                error = %e,
                "rename failed, falling back to copy"
            );
            copy_entry(path_file_src, meta_src, path_file_dst)?;
            remove_file_if_present(path_file_src)?;
            Ok(())
        }
    }
}

pub(crate) fn copy_file_with_metadata(
    path_file_src: &Path,
    path_file_dst: &Path,
) -> Result<(), io::Error> {
    fs::copy(path_file_src, path_file_dst)?;
    apply_metadata(path_file_src, path_file_dst)
}

fn apply_metadata(path_file_src: &Path, path_file_dst: &Path) -> Result<(), io::Error> {
    use filetime::{FileTime, set_file_times};

    let stat_src = fs::metadata(path_file_src)?;
    fs::set_permissions(path_file_dst, stat_src.permissions())?;

    let file_time_access = FileTime::from_last_access_time(&stat_src);
    let file_time_modify = FileTime::from_last_modification_time(&stat_src);
    set_file_times(path_file_dst, file_time_access, file_time_modify)?;

    #[cfg(target_os = "linux")]
    copy_xattrs_linux(path_file_src, path_file_dst);
    Ok(())
}

#[cfg(target_os = "linux")]
fn copy_xattrs_linux(path_file_src: &Path, path_file_dst: &Path) {
    let iter_xattr_names = match xattr::list(path_file_src) {
        Ok(v) => v,
        Err(_) => return,
    };

    for name in iter_xattr_names {
        let Some(raw_value) = xattr::get(path_file_src, &name).ok().flatten() else {
            continue;
        };
        if let Err(e) = xattr::set(path_file_dst, &name, &raw_value) {
            tracing::debug!(path = %path_file_dst.display(), error = %e, "xattr not copied");
        }
    }
}

pub(crate) fn set_modified(path: &Path, time: SystemTime) -> io::Result<()> {
    filetime::set_file_mtime(path, filetime::FileTime::from_system_time(time))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use filetime::{FileTime, set_file_mtime};

    use super::{decide_replace, derive_destination_path, is_overlap, remove_dir_if_empty};
    use crate::spec::{EnumConflictPolicy, EnumReplaceDecision};
    use crate::testutil::{TestDir, write_text};

    #[test]
    fn derive_destination_path_strips_leading_segments() {
        let root = Path::new("/out");
        let rel = Path::new("R/a/b.txt");
        assert_eq!(derive_destination_path(root, rel, 0, false), Path::new("/out/R/a/b.txt"));
        assert_eq!(derive_destination_path(root, rel, 1, false), Path::new("/out/R/a/b.txt"));
        assert_eq!(derive_destination_path(root, rel, 2, false), Path::new("/out/a/b.txt"));
        assert_eq!(derive_destination_path(root, rel, 9, false), Path::new("/out/b.txt"));
        assert_eq!(derive_destination_path(root, Path::new("R/a"), 9, true), Path::new("/out"));
    }

    #[test]
    fn replace_if_newer_compares_milliseconds() {
        let test_dir = TestDir::new();
        let path_src = test_dir.path().join("src.txt");
        let path_dst = test_dir.path().join("dst.txt");
        write_text(&path_src, "src");
        write_text(&path_dst, "dst");

        set_file_mtime(&path_src, FileTime::from_unix_time(10, 0)).expect("mtime");
        set_file_mtime(&path_dst, FileTime::from_unix_time(20, 0)).expect("mtime");
        let meta_src = fs::metadata(&path_src).expect("meta");
        let decision = decide_replace(EnumConflictPolicy::ReplaceIfNewer, &meta_src, &path_dst);
        assert_eq!(decision.expect("decide"), EnumReplaceDecision::Skip);

        // Sub-millisecond differences are ignored.
        set_file_mtime(&path_dst, FileTime::from_unix_time(10, 400)).expect("mtime");
        let decision = decide_replace(EnumConflictPolicy::ReplaceIfDifferent, &meta_src, &path_dst);
        assert_eq!(decision.expect("decide"), EnumReplaceDecision::Skip);

        set_file_mtime(&path_dst, FileTime::from_unix_time(0, 0)).expect("mtime");
        let decision = decide_replace(EnumConflictPolicy::ReplaceIfNewer, &meta_src, &path_dst);
        assert_eq!(decision.expect("decide"), EnumReplaceDecision::Replace);
    }

    #[test]
    fn absent_destination_is_always_replaced() {
        let test_dir = TestDir::new();
        let path_src = test_dir.path().join("src.txt");
        write_text(&path_src, "src");
        let meta_src = fs::metadata(&path_src).expect("meta");
        let path_dst = test_dir.path().join("missing.txt");

        for rule in [EnumConflictPolicy::SkipExisting, EnumConflictPolicy::FailIfExisting] {
            let decision = decide_replace(rule, &meta_src, &path_dst).expect("decide");
            assert_eq!(decision, EnumReplaceDecision::Replace);
        }
        let decision = decide_replace(EnumConflictPolicy::FailIfExisting, &meta_src, &path_src);
        assert_eq!(decision.expect("decide"), EnumReplaceDecision::Fail);
    }

    #[test]
    fn remove_dir_if_empty_keeps_populated_directories() {
        let test_dir = TestDir::new();
        let path_dir = test_dir.path().join("dir");
        write_text(&path_dir.join("file"), "x");
        assert!(!remove_dir_if_empty(&path_dir).expect("remove"));
        fs::remove_file(path_dir.join("file")).expect("remove file");
        assert!(remove_dir_if_empty(&path_dir).expect("remove"));
        assert!(!remove_dir_if_empty(&path_dir).expect("absent is no-op"));
    }

    #[test]
    fn enclosing_destination_overlaps_only_under_sync() {
        let test_dir = TestDir::new();
        let path_inner = test_dir.path().join("inner");
        assert!(is_overlap(test_dir.path(), &path_inner, false));
        assert!(is_overlap(test_dir.path(), test_dir.path(), false));
        assert!(!is_overlap(&path_inner, test_dir.path(), false));
        assert!(is_overlap(&path_inner, test_dir.path(), true));
        assert!(!is_overlap(&path_inner, &test_dir.path().join("other"), true));
    }

    #[test]
    fn replace_if_different_compares_length_when_times_match() {
        let test_dir = TestDir::new();
        let path_src = test_dir.path().join("src");
        let path_dst = test_dir.path().join("dst");
        write_text(&path_src, "longer source");
        write_text(&path_dst, "short");
        set_file_mtime(&path_src, FileTime::from_unix_time(100, 0)).expect("mtime");
        set_file_mtime(&path_dst, FileTime::from_unix_time(100, 0)).expect("mtime");

        let rule = EnumConflictPolicy::ReplaceIfDifferent;
        let meta_src = fs::metadata(&path_src).expect("meta");
        let decision = decide_replace(rule, &meta_src, &path_dst).expect("decide");
        assert_eq!(decision, EnumReplaceDecision::Replace);

        write_text(&path_dst, "same length!!");
        set_file_mtime(&path_dst, FileTime::from_unix_time(100, 0)).expect("mtime");
        let decision = decide_replace(rule, &meta_src, &path_dst).expect("decide");
        assert_eq!(decision, EnumReplaceDecision::Skip);
    }
}
