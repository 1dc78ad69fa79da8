//! Process-scoped temporary area with cross-process stale reclaim.
//!
//! Layout: `<root>/<prefix><random>/` per process, guarded by an advisory
//! lock on the `lock` sentinel inside it. A sub-directory whose sentinel can
//! be locked by someone else belongs to a dead process.

use std::env;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use once_cell::sync::OnceCell;
use rand::Rng;
use rand::distr::Alphanumeric;
use tracing::{debug, info, warn};

use crate::location::{Directory, File};
use crate::spec::{FsError, FsResult};

/// Overrides [`SpecTemporaryConfig::path_dir_root`].
pub const ENV_TMPDIR: &str = "PATHKIT_TMPDIR";

const NAME_LOCK: &str = "lock";
const LEN_SUFFIX: usize = 12;

////////////////////////////////////////////////////////////////////////////////
// #region TemporaryConfig

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecTemporaryConfig {
    /// Shared root holding one sub-directory per process.
    pub path_dir_root: PathBuf,
    /// Name prefix of process sub-directories.
    pub prefix: String,
    /// Minimum age before another process's sub-directory may be reclaimed.
    pub stale_after: Duration,
}

impl Default for SpecTemporaryConfig {
    fn default() -> Self {
        Self {
            path_dir_root: env::temp_dir().join("pathkit"),
            prefix: "temporary".to_string(),
            stale_after: Duration::from_secs(60 * 60),
        }
    }
}

impl SpecTemporaryConfig {
    /// Defaults, with the root taken from `PATHKIT_TMPDIR` when set.
    pub fn from_env() -> Self {
        let mut spec_config = Self::default();
        if let Some(value) = env::var_os(ENV_TMPDIR).filter(|v| !v.is_empty()) {
            spec_config.path_dir_root = PathBuf::from(value);
        }
        spec_config
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region TemporaryArea

#[derive(Debug)]
struct SpecProcessDir {
    path_dir: PathBuf,
    file_lock: fs::File,
}

/// Allocator of fresh, unique, empty files and directories.
///
/// The startup protocol (root creation, stale reclaim, own sub-directory and
/// lock) runs once, on first use.
#[derive(Debug)]
pub struct TemporaryArea {
    spec_config: SpecTemporaryConfig,
    process_dir: OnceCell<SpecProcessDir>,
}

impl TemporaryArea {
    pub fn new(spec_config: SpecTemporaryConfig) -> Self {
        Self {
            spec_config,
            process_dir: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &SpecTemporaryConfig {
        &self.spec_config
    }

    fn process_dir(&self) -> FsResult<&SpecProcessDir> {
        self.process_dir
            .get_or_try_init(|| initialize(&self.spec_config))
    }

    /// This process's sub-directory.
    pub fn path(&self) -> FsResult<&Path> {
        Ok(&self.process_dir()?.path_dir)
    }

    /// Create a new empty file under a fresh random name.
    pub fn allocate_file(&self) -> FsResult<File> {
        let path_dir = &self.process_dir()?.path_dir;
        let path_file = create_unique(path_dir, "", |path| {
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .map(drop)
        })?;
        Ok(File::new(path_file))
    }

    /// Create a new empty directory under a fresh random name.
    pub fn allocate_directory(&self) -> FsResult<Directory> {
        let path_dir = &self.process_dir()?.path_dir;
        let path_sub = create_unique(path_dir, "", |path| fs::create_dir(path))?;
        Ok(Directory::new(path_sub))
    }

    /// Release the lock and remove this process's sub-directory.
    ///
    /// A later allocation starts a new sub-directory.
    pub fn dispose_all(&mut self) -> FsResult<()> {
        let Some(process_dir) = self.process_dir.take() else {
            return Ok(());
        };
        let SpecProcessDir {
            path_dir,
            file_lock,
        } = process_dir;
        if let Err(e) = fs2::FileExt::unlock(&file_lock) {
            debug!(path = %path_dir.display(), error = %e, "sentinel unlock failed");
        }
        drop(file_lock);
        match fs::remove_dir_all(&path_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(FsError::io("delete directory", &path_dir, e)),
        }
        info!(path = %path_dir.display(), "temporary area disposed");
        Ok(())
    }
}

impl Drop for TemporaryArea {
    fn drop(&mut self) {
        if let Err(e) = self.dispose_all() {
            warn!(error = %e, "failed to dispose temporary area");
        }
    }
}

fn random_suffix() -> String {
    let mut rng = rand::rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric) as char)
        .take(LEN_SUFFIX)
        .collect()
}

/// Draw random names until `create` succeeds on an unused one.
fn create_unique(
    path_dir: &Path,
    prefix: &str,
    create: impl Fn(&Path) -> io::Result<()>,
) -> FsResult<PathBuf> {
    loop {
        let path_entry = path_dir.join(format!("{prefix}{}", random_suffix()));
        match create(&path_entry) {
            Ok(()) => return Ok(path_entry),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(FsError::io("create", &path_entry, e)),
        }
    }
}

fn initialize(spec_config: &SpecTemporaryConfig) -> FsResult<SpecProcessDir> {
    let path_dir_root = &spec_config.path_dir_root;
    fs::create_dir_all(path_dir_root)
        .map_err(|e| FsError::io("create directory", path_dir_root, e))?;
    reclaim_stale(spec_config)?;

    let path_dir = create_unique(path_dir_root, &spec_config.prefix, |path| fs::create_dir(path))?;
    let path_lock = path_dir.join(NAME_LOCK);
    let file_lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path_lock)
        .map_err(|e| FsError::io("create", &path_lock, e))?;
    fs2::FileExt::try_lock_exclusive(&file_lock)
        .map_err(|_| FsError::LockUnavailable { path: path_lock })?;

    info!(path = %path_dir.display(), "temporary area ready");
    Ok(SpecProcessDir {
        path_dir,
        file_lock,
    })
}

/// Schedule deletion of old sub-directories whose owner is gone.
fn reclaim_stale(spec_config: &SpecTemporaryConfig) -> FsResult<()> {
    let path_dir_root = &spec_config.path_dir_root;
    let iter_entries =
        fs::read_dir(path_dir_root).map_err(|e| FsError::io("read directory", path_dir_root, e))?;
    let time_now = SystemTime::now();

    for entry in iter_entries.flatten() {
        let path_dir = entry.path();
        let b_candidate = entry.file_name().to_string_lossy().starts_with(&spec_config.prefix)
            && entry.file_type().is_ok_and(|t| t.is_dir());
        if !b_candidate {
            continue;
        }
        let b_stale = entry
            .metadata()
            .and_then(|m| m.modified())
            .is_ok_and(|t| time_now.duration_since(t).unwrap_or_default() >= spec_config.stale_after);
        if !b_stale {
            continue;
        }

        let path_lock = path_dir.join(NAME_LOCK);
        match OpenOptions::new().write(true).open(&path_lock) {
            Ok(file_lock) => {
                if fs2::FileExt::try_lock_exclusive(&file_lock).is_err() {
                    debug!(path = %path_dir.display(), "temporary directory still owned");
                    continue;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                debug!(path = %path_lock.display(), error = %e, "sentinel not inspectable");
                continue;
            }
        }

        debug!(path = %path_dir.display(), "reclaiming stale temporary directory");
        rayon::spawn(move || {
            if let Err(e) = fs::remove_dir_all(&path_dir) {
                warn!(path = %path_dir.display(), error = %e, "stale temporary directory not removed");
            }
        });
    }
    Ok(())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
