//! Download-once content cache
//!
//! Artifacts are streamed into a temp file next to their final name and
//! committed with a rename, so a reader of the final path sees either no
//! file or a complete one.

use crate::cache::fetch::Fetcher;
use crate::config::schema::CacheConfig;
use crate::error::{UtahError, UtahResult};
use chrono::{DateTime, Local};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Prefix of in-flight download files inside the cache root
pub const TEMP_PREFIX: &str = ".utahtmp-";

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// State of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryState {
    /// Neither the final file nor a temp file exists
    Absent,
    /// A temp file exists but nothing has been committed yet
    InProgress,
    /// The final file exists
    Present,
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::InProgress => write!(f, "in-progress"),
            Self::Present => write!(f, "present"),
        }
    }
}

/// A file found in the cache root
#[derive(Debug, Clone, Serialize)]
pub struct CachedFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<DateTime<Local>>,
    /// Leftover from an interrupted download
    pub temporary: bool,
}

/// Content cache rooted at a single directory
#[derive(Clone)]
pub struct CacheStore {
    root: PathBuf,
    fetcher: Arc<dyn Fetcher>,
}

impl CacheStore {
    /// Create a cache store from config
    pub fn new(config: &CacheConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            root: config.root.clone(),
            fetcher,
        }
    }

    /// Cache root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an entry name to its final path under the cache root
    pub fn entry_path(&self, name: &str) -> UtahResult<PathBuf> {
        validate_entry_name(name)?;
        Ok(self.root.join(name))
    }

    /// Current state of an entry
    pub fn entry_state(&self, name: &str) -> UtahResult<EntryState> {
        let path = self.entry_path(name)?;
        if path.exists() {
            return Ok(EntryState::Present);
        }

        let in_progress = match fs::read_dir(&self.root) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .any(|e| is_temp_file_for(&e.file_name().to_string_lossy(), name)),
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                return Err(UtahError::cache_io(
                    format!("reading cache directory {}", self.root.display()),
                    e,
                ))
            }
        };

        Ok(if in_progress {
            EntryState::InProgress
        } else {
            EntryState::Absent
        })
    }

    /// Download `url` into the cache as `name`, unless `name` is already there
    ///
    /// An existing file is trusted as-is, even if it is empty.
    pub async fn fetch(&self, url: &str, name: &str) -> UtahResult<PathBuf> {
        self.fetch_verified(url, name, None).await
    }

    /// Like `fetch`, additionally checking a fresh download's SHA-256
    /// before it is committed
    pub async fn fetch_verified(
        &self,
        url: &str,
        name: &str,
        expected_sha256: Option<&str>,
    ) -> UtahResult<PathBuf> {
        let dest = self.entry_path(name)?;
        let store = self.clone();
        let url = url.to_string();
        let name = name.to_string();
        let expected = expected_sha256.map(|s| s.trim().to_ascii_lowercase());

        tokio::task::spawn_blocking(move || {
            store.fetch_blocking(&url, &name, &dest, expected.as_deref())
        })
        .await
        .map_err(|e| UtahError::Internal(format!("download task failed: {}", e)))?
    }

    fn fetch_blocking(
        &self,
        url: &str,
        name: &str,
        dest: &Path,
        expected_sha256: Option<&str>,
    ) -> UtahResult<PathBuf> {
        create_cache_dir(&self.root)?;

        if dest.exists() {
            info!("Cached file {} already exists", name);
            return Ok(dest.to_path_buf());
        }

        info!("Downloading {} to {}", url, dest.display());
        let mut body = self.fetcher.open(url)?;

        let temp_path = self.root.join(temp_file_name(name));
        let mut temp = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .map_err(|e| {
                UtahError::cache_io(format!("creating temp file {}", temp_path.display()), e)
            })?;

        let (bytes, digest) = copy_hashing(url, &mut body, &mut temp, &temp_path)?;
        temp.sync_all()
            .map_err(|e| UtahError::cache_io(format!("syncing {}", temp_path.display()), e))?;
        drop(temp);
        debug!("Wrote {} bytes to {}", bytes, temp_path.display());

        if let Some(expected) = expected_sha256 {
            if digest != expected {
                return Err(UtahError::ChecksumMismatch {
                    url: url.to_string(),
                    expected: expected.to_string(),
                    actual: digest,
                });
            }
        }

        fs::rename(&temp_path, dest).map_err(|e| {
            UtahError::cache_io(
                format!("renaming {} to {}", temp_path.display(), dest.display()),
                e,
            )
        })?;

        info!("Cached {} ({} bytes)", name, bytes);
        Ok(dest.to_path_buf())
    }

    /// List artifacts and leftover temp files, sorted by name
    pub async fn list(&self) -> UtahResult<Vec<CachedFile>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || list_blocking(&root))
            .await
            .map_err(|e| UtahError::Internal(format!("cache listing task failed: {}", e)))?
    }

    /// Remove temp files left behind by interrupted downloads
    pub async fn sweep_temp_files(&self) -> UtahResult<usize> {
        let mut removed = 0;
        for file in self.list().await?.into_iter().filter(|f| f.temporary) {
            tokio::fs::remove_file(&file.path).await.map_err(|e| {
                UtahError::cache_io(format!("removing {}", file.path.display()), e)
            })?;
            debug!("Removed stale temp file {}", file.path.display());
            removed += 1;
        }
        Ok(removed)
    }
}

/// Fresh temp file name for an entry, unique per writer
pub(crate) fn temp_file_name(name: &str) -> String {
    format!("{}{}-{}", TEMP_PREFIX, name, Uuid::new_v4().simple())
}

/// Whether `file_name` was produced by `temp_file_name(name)`
fn is_temp_file_for(file_name: &str, name: &str) -> bool {
    file_name
        .strip_prefix(TEMP_PREFIX)
        .and_then(|rest| rest.strip_prefix(name))
        .and_then(|rest| rest.strip_prefix('-'))
        .map(|id| id.len() == 32 && id.bytes().all(|b| b.is_ascii_hexdigit()))
        .unwrap_or(false)
}

fn validate_entry_name(name: &str) -> UtahResult<()> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name == "." || name == ".." {
        Some("name refers to a directory")
    } else if name.contains('/') || name.contains('\\') {
        Some("name must not contain a path separator")
    } else if name.starts_with(TEMP_PREFIX) {
        Some("name uses the reserved temp file prefix")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(UtahError::InvalidEntryName {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

fn create_cache_dir(root: &Path) -> UtahResult<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder
        .create(root)
        .map_err(|e| UtahError::cache_io(format!("creating {}", root.display()), e))
}

/// Stream `body` into `out`, hashing as we go.
///
/// Read failures are network errors, write failures are cache errors.
fn copy_hashing(
    url: &str,
    body: &mut dyn Read,
    out: &mut File,
    out_path: &Path,
) -> UtahResult<(u64, String)> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = match body.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(
                    "Download of {} interrupted, leaving {}",
                    url,
                    out_path.display()
                );
                return Err(UtahError::Network {
                    url: url.to_string(),
                    reason: e.to_string(),
                });
            }
        };
        hasher.update(&buf[..n]);
        out.write_all(&buf[..n])
            .map_err(|e| UtahError::cache_io(format!("writing {}", out_path.display()), e))?;
        total += n as u64;
    }

    Ok((total, hex::encode(hasher.finalize())))
}

fn list_blocking(root: &Path) -> UtahResult<Vec<CachedFile>> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => {
            return Err(UtahError::cache_io(
                format!("reading cache directory {}", root.display()),
                e,
            ))
        }
    };

    let mut files = vec![];
    for entry in entries {
        let entry = entry.map_err(|e| UtahError::cache_io("reading cache entry", e))?;
        let metadata = entry
            .metadata()
            .map_err(|e| UtahError::cache_io(format!("stat {}", entry.path().display()), e))?;
        if !metadata.is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        files.push(CachedFile {
            temporary: name.starts_with(TEMP_PREFIX),
            name,
            path: entry.path(),
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Local>::from),
        });
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Serves a fixed body and counts how often it was asked to
    struct CountingFetcher {
        body: Vec<u8>,
        opens: AtomicUsize,
    }

    impl CountingFetcher {
        fn new(body: &[u8]) -> Arc<Self> {
            Arc::new(Self {
                body: body.to_vec(),
                opens: AtomicUsize::new(0),
            })
        }

        fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }
    }

    impl Fetcher for CountingFetcher {
        fn open(&self, _url: &str) -> UtahResult<Box<dyn Read + Send>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Cursor::new(self.body.clone())))
        }
    }

    /// Yields some bytes, then fails like a dropped connection
    struct BrokenBody {
        sent: bool,
    }

    impl Read for BrokenBody {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.sent {
                return Err(io::Error::new(ErrorKind::ConnectionReset, "connection reset"));
            }
            self.sent = true;
            let chunk = b"partial";
            buf[..chunk.len()].copy_from_slice(chunk);
            Ok(chunk.len())
        }
    }

    struct BrokenFetcher;

    impl Fetcher for BrokenFetcher {
        fn open(&self, _url: &str) -> UtahResult<Box<dyn Read + Send>> {
            Ok(Box::new(BrokenBody { sent: false }))
        }
    }

    struct RefusingFetcher;

    impl Fetcher for RefusingFetcher {
        fn open(&self, url: &str) -> UtahResult<Box<dyn Read + Send>> {
            Err(UtahError::HttpStatus {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    fn store(dir: &TempDir, fetcher: Arc<dyn Fetcher>) -> CacheStore {
        CacheStore::new(
            &CacheConfig {
                root: dir.path().join("cache"),
            },
            fetcher,
        )
    }

    #[tokio::test]
    async fn fetch_downloads_once() {
        let dir = TempDir::new().unwrap();
        let fetcher = CountingFetcher::new(b"image bytes");
        let cache = store(&dir, fetcher.clone());

        let first = cache.fetch("http://example.invalid/a.img", "a.img").await.unwrap();
        let second = cache.fetch("http://example.invalid/a.img", "a.img").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fetcher.opens(), 1);
        assert_eq!(fs::read(&first).unwrap(), b"image bytes");
    }

    #[tokio::test]
    async fn existing_file_is_trusted_even_if_empty() {
        let dir = TempDir::new().unwrap();
        let fetcher = CountingFetcher::new(b"fresh bytes");
        let cache = store(&dir, fetcher.clone());
        fs::create_dir_all(cache.root()).unwrap();
        fs::write(cache.root().join("a.img"), b"").unwrap();

        let path = cache.fetch("http://example.invalid/a.img", "a.img").await.unwrap();

        assert_eq!(fetcher.opens(), 0);
        assert_eq!(fs::read(&path).unwrap(), b"");
    }

    #[test]
    fn temp_files_of_other_entries_do_not_count() {
        let dir = TempDir::new().unwrap();
        let cache = store(&dir, CountingFetcher::new(b""));
        fs::create_dir_all(cache.root()).unwrap();
        fs::write(cache.root().join(".utahtmp-a.img-old-1234"), b"x").unwrap();
        fs::write(cache.root().join(temp_file_name("a.img-old")), b"x").unwrap();

        assert_eq!(cache.entry_state("a.img").unwrap(), EntryState::Absent);
        assert_eq!(cache.entry_state("a.img-old").unwrap(), EntryState::InProgress);
    }

    #[tokio::test]
    async fn interrupted_download_leaves_no_final_file() {
        let dir = TempDir::new().unwrap();
        let cache = store(&dir, Arc::new(BrokenFetcher));

        let err = cache
            .fetch("http://example.invalid/a.img", "a.img")
            .await
            .unwrap_err();

        assert!(matches!(err, UtahError::Network { .. }));
        assert!(!cache.root().join("a.img").exists());
        assert_eq!(cache.entry_state("a.img").unwrap(), EntryState::InProgress);

        // The leftover is reported and can be swept
        let files = cache.list().await.unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].temporary);
        assert_eq!(fs::read(&files[0].path).unwrap(), b"partial");

        assert_eq!(cache.sweep_temp_files().await.unwrap(), 1);
        assert_eq!(cache.entry_state("a.img").unwrap(), EntryState::Absent);
    }

    #[tokio::test]
    async fn http_error_propagates_without_temp_file() {
        let dir = TempDir::new().unwrap();
        let cache = store(&dir, Arc::new(RefusingFetcher));

        let err = cache
            .fetch("http://example.invalid/a.img", "a.img")
            .await
            .unwrap_err();

        assert!(matches!(err, UtahError::HttpStatus { status: 404, .. }));
        assert!(cache.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn checksum_is_verified_before_commit() {
        let dir = TempDir::new().unwrap();
        let cache = store(&dir, CountingFetcher::new(b"image bytes"));

        let err = cache
            .fetch_verified("http://example.invalid/a.img", "a.img", Some("00ff"))
            .await
            .unwrap_err();

        match err {
            UtahError::ChecksumMismatch { expected, actual, .. } => {
                assert_eq!(expected, "00ff");
                assert_eq!(actual, hex::encode(Sha256::digest(b"image bytes")));
            }
            other => panic!("expected checksum mismatch, got {:?}", other),
        }
        assert!(!cache.root().join("a.img").exists());
    }

    #[tokio::test]
    async fn matching_checksum_commits() {
        let dir = TempDir::new().unwrap();
        let cache = store(&dir, CountingFetcher::new(b"image bytes"));
        let digest = hex::encode(Sha256::digest(b"image bytes")).to_ascii_uppercase();

        let path = cache
            .fetch_verified("http://example.invalid/a.img", "a.img", Some(&digest))
            .await
            .unwrap();

        assert_eq!(cache.entry_state("a.img").unwrap(), EntryState::Present);
        assert_eq!(fs::read(path).unwrap(), b"image bytes");
    }

    #[test]
    fn rejects_unsafe_entry_names() {
        let dir = TempDir::new().unwrap();
        let cache = store(&dir, CountingFetcher::new(b""));

        for name in ["", ".", "..", "../etc/passwd", "a/b.img", ".utahtmp-a.img-1"] {
            assert!(
                matches!(
                    cache.entry_path(name),
                    Err(UtahError::InvalidEntryName { .. })
                ),
                "{name:?} should be rejected"
            );
        }
        assert_eq!(
            cache.entry_path("trusty.img").unwrap(),
            dir.path().join("cache").join("trusty.img")
        );
    }

    #[tokio::test]
    async fn list_of_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let cache = store(&dir, CountingFetcher::new(b""));

        assert!(cache.list().await.unwrap().is_empty());
        assert_eq!(cache.entry_state("a.img").unwrap(), EntryState::Absent);
    }
}
