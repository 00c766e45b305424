//! On-disk store for the downloadable face model.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

const APP_DIR: &str = "deepscan";

#[derive(Error, Debug)]
pub enum ModelStoreError {
    #[error("no user cache directory on this platform")]
    NoCacheDir,
    #[error("cannot create model cache {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("cannot save model to {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Called with `(bytes_so_far, total_bytes)`; `total_bytes` is 0 when unknown.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send>;

/// A cache directory, plus an optional read-only bundle directory that is
/// consulted when the cache misses.
#[derive(Debug, Clone)]
pub struct ModelStore {
    cache_dir: PathBuf,
    bundle_dir: Option<PathBuf>,
}

impl ModelStore {
    /// Store rooted in the per-user cache:
    /// `~/Library/Application Support/deepscan/models` on macOS,
    /// `$XDG_CACHE_HOME/deepscan/models` on Linux and
    /// `%LOCALAPPDATA%\deepscan\models` on Windows.
    pub fn user_cache() -> Result<Self, ModelStoreError> {
        let root = if cfg!(target_os = "macos") {
            dirs::data_dir()
        } else {
            dirs::cache_dir()
        };
        root.map(|r| Self::at(r.join(APP_DIR).join("models")))
            .ok_or(ModelStoreError::NoCacheDir)
    }

    pub fn at(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            bundle_dir: None,
        }
    }

    pub fn with_bundle(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bundle_dir = Some(dir.into());
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Existing copy of `name`, cache first.
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        std::iter::once(self.cache_dir.as_path())
            .chain(self.bundle_dir.as_deref())
            .map(|dir| dir.join(name))
            .find(|path| path.is_file())
    }

    /// Path to `name`, downloading it from `url` into the cache on a miss.
    pub fn ensure(
        &self,
        name: &str,
        url: &str,
        progress: Option<ProgressFn>,
    ) -> Result<PathBuf, ModelStoreError> {
        if let Some(path) = self.locate(name) {
            log::debug!("Using model {}", path.display());
            return Ok(path);
        }

        fs::create_dir_all(&self.cache_dir).map_err(|source| ModelStoreError::CreateDir {
            path: self.cache_dir.clone(),
            source,
        })?;
        let dest = self.cache_dir.join(name);
        log::info!("Fetching {name} from {url}");
        fetch(url, &dest, progress)?;
        Ok(dest)
    }
}

/// Download into `<dest>.part` and rename on success, so a partial file is
/// never mistaken for a cached model.
fn fetch(url: &str, dest: &Path, progress: Option<ProgressFn>) -> Result<(), ModelStoreError> {
    let staging = dest.with_extension("part");
    let outcome = stream_into(url, &staging, progress).and_then(|()| {
        fs::rename(&staging, dest).map_err(|source| ModelStoreError::Save {
            path: dest.to_path_buf(),
            source,
        })
    });
    if outcome.is_err() {
        let _ = fs::remove_file(&staging);
    }
    outcome
}

fn stream_into(
    url: &str,
    staging: &Path,
    progress: Option<ProgressFn>,
) -> Result<(), ModelStoreError> {
    let save_err = |source| ModelStoreError::Save {
        path: staging.to_path_buf(),
        source,
    };

    let mut response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|source| ModelStoreError::Fetch {
            url: url.to_string(),
            source,
        })?;
    let total = response.content_length().unwrap_or(0);

    let file = File::create(staging).map_err(save_err)?;
    let mut sink = Tally {
        inner: BufWriter::new(file),
        written: 0,
        total,
        progress,
    };
    io::copy(&mut response, &mut sink).map_err(save_err)?;
    sink.flush().map_err(save_err)
}

/// Writer that reports the running byte count after every write.
struct Tally<W> {
    inner: W,
    written: u64,
    total: u64,
    progress: Option<ProgressFn>,
}

impl<W: Write> Write for Tally<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        if let Some(report) = &self.progress {
            report(self.written, self.total);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
