use std::fs;
use std::path::Path;
use std::sync::Once;
use std::time::SystemTime;

use filetime::{FileTime, set_file_mtime};
use pathkit_log::{EnumLogFormat, SpecLogConfig, init_logging};
use tempfile::TempDir;

static INIT_LOGGING: Once = Once::new();

/// Route library warnings to the console once per test binary.
fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let spec_config = SpecLogConfig {
            level: "warn".to_string(),
            format: EnumLogFormat::Pretty,
        };
        let _ = init_logging(&spec_config);
    });
}

/// Scratch directory removed on drop.
pub(crate) struct TestDir {
    inner: TempDir,
}

impl TestDir {
    pub(crate) fn new() -> Self {
        init_test_logging();
        let inner = tempfile::Builder::new()
            .prefix("pathkit_fs_test_")
            .tempdir()
            .expect("create test dir");
        Self { inner }
    }

    pub(crate) fn path(&self) -> &Path {
        self.inner.path()
    }
}

pub(crate) fn write_text(path: &Path, txt: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(path, txt).expect("write file");
}

pub(crate) fn read_text(path: &Path) -> String {
    fs::read_to_string(path).expect("read file")
}

pub(crate) fn set_mtime_secs(path: &Path, secs: i64) {
    set_file_mtime(path, FileTime::from_unix_time(secs, 0)).expect("set mtime");
}

/// Sorted `/`-separated relative paths of every file below `root`.
pub(crate) fn list_files(root: &Path) -> Vec<String> {
    fn collect(root: &Path, dir: &Path, out: &mut Vec<String>) {
        for entry in fs::read_dir(dir).expect("read dir") {
            let path = entry.expect("entry").path();
            if path.is_dir() {
                collect(root, &path, out);
            } else {
                let rel = path.strip_prefix(root).expect("under root");
                out.push(crate::pattern::to_match_path(rel));
            }
        }
    }
    let mut out = Vec::new();
    if root.exists() {
        collect(root, root, &mut out);
    }
    out.sort();
    out
}

pub(crate) fn mtime(path: &Path) -> SystemTime {
    fs::metadata(path).expect("metadata").modified().expect("mtime")
}
