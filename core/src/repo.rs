//! Repository-level entry point.
//!
//! [`RepoIndex`] hands out [`SourceFileIndex`]es for tracked files. Each
//! request reads the file, and an index built from the same bytes is served
//! from memory. Otherwise the file is parsed, stale provider metadata is
//! resolved, and a new index is built on the blocking pool. Concurrent
//! requests for the same file contents share one build.

use crate::cache::MetadataCache;
use crate::cache::content_hash;
use crate::config::RepoIndexConfig;
use crate::error::IndexError;
use crate::error::Result;
use crate::single_flight::SingleFlight;
use crate::source_file::SourceFileIndex;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use tracing::debug;
use tracing::info;
use tracing::warn;
use typescope_ast::PythonParser;
use typescope_persistence::CacheStore;
use walkdir::WalkDir;

type BuildKey = (String, String);
type BuildResult = Result<Arc<SourceFileIndex>>;

/// Counters describing how requests were served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepoIndexStats {
    /// Indices built from scratch.
    pub builds: u64,
    /// Requests answered from the in-memory memo.
    pub memo_hits: u64,
    /// Requests that waited on a build started by another request.
    pub coalesced: u64,
    /// Builds currently running.
    pub in_flight: usize,
    pub memoized: usize,
    pub tracked_files: usize,
}

/// Index over every tracked Python file below a repository root.
///
/// Cloning is cheap; clones share the memo, the metadata cache and the
/// in-flight builds.
#[derive(Clone)]
pub struct RepoIndex {
    inner: Arc<Inner>,
}

struct Inner {
    root: PathBuf,
    config: RepoIndexConfig,
    cache: MetadataCache,
    parser: PythonParser,
    tracked: RwLock<Vec<String>>,
    memo: Mutex<LruCache<String, Arc<SourceFileIndex>>>,
    flights: SingleFlight<BuildKey, BuildResult>,
    builds: AtomicU64,
    memo_hits: AtomicU64,
    coalesced: AtomicU64,
}

impl RepoIndex {
    /// Open `root` with the configuration found in its `.typescope.toml`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let config = RepoIndexConfig::load(root)?;
        Self::with_config(root, config)
    }

    pub fn with_config(root: impl AsRef<Path>, config: RepoIndexConfig) -> Result<Self> {
        let given = root.as_ref();
        let root = given.canonicalize().map_err(|e| IndexError::io(given, &e))?;
        let store = CacheStore::open(&config.cache_base_dir(), &root, config.compression.into())?;
        let cache = MetadataCache::new(root.clone(), store, config.providers());
        let tracked = enumerate_tracked(&root, &config);
        let capacity = NonZeroUsize::new(config.memo_capacity).unwrap_or(NonZeroUsize::MIN);
        info!(
            root = %root.display(),
            files = tracked.len(),
            cache = %cache.store().dir().display(),
            "opened repository index"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                root,
                config,
                cache,
                parser: PythonParser::new(),
                tracked: RwLock::new(tracked),
                memo: Mutex::new(LruCache::new(capacity)),
                flights: SingleFlight::new(),
                builds: AtomicU64::new(0),
                memo_hits: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn config(&self) -> &RepoIndexConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.inner.cache
    }

    /// Tracked files as sorted `/`-separated paths relative to the root.
    pub fn tracked_files(&self) -> Vec<String> {
        self.inner.tracked_snapshot()
    }

    /// Rescan the repository for tracked files and return how many there are.
    ///
    /// Memoized indices are dropped when the set of tracked files changed.
    pub fn refresh(&self) -> usize {
        let tracked = enumerate_tracked(&self.inner.root, &self.inner.config);
        let count = tracked.len();
        let changed = {
            let mut current = self
                .inner
                .tracked
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let changed = *current != tracked;
            *current = tracked;
            changed
        };
        if changed {
            info!(files = count, "tracked files changed, dropping memoized indices");
            self.inner.lock_memo().clear();
        }
        count
    }

    /// True when provider metadata no longer matches the tracked files.
    pub fn is_stale(&self) -> Result<bool> {
        self.inner.cache.is_stale(&self.inner.tracked_snapshot())
    }

    /// The index of `path`, which may be absolute below the root or relative
    /// to it.
    pub async fn get(&self, path: impl AsRef<Path>) -> Result<Arc<SourceFileIndex>> {
        let relative = self.inner.normalize(path.as_ref())?;
        if !self.inner.is_tracked(&relative) {
            return Err(IndexError::UntrackedFile(relative));
        }

        let full = self.inner.root.join(&relative);
        let bytes = tokio::fs::read(&full)
            .await
            .map_err(|e| IndexError::io(&full, &e))?;
        let hash = content_hash(&bytes);

        if let Some(index) = self.inner.memoized(&relative, &hash) {
            self.inner.memo_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(index);
        }

        let inner = Arc::clone(&self.inner);
        let key = (relative.clone(), hash.clone());
        let (result, computed) = self
            .inner
            .flights
            .run(key, || inner.build(relative, bytes, hash))
            .await;
        if !computed {
            self.inner.coalesced.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Forget the memoized index of `path`. Returns whether one was held.
    pub fn invalidate(&self, path: impl AsRef<Path>) -> Result<bool> {
        let relative = self.inner.normalize(path.as_ref())?;
        Ok(self.inner.lock_memo().pop(&relative).is_some())
    }

    pub fn invalidate_all(&self) {
        self.inner.lock_memo().clear();
    }

    pub fn stats(&self) -> RepoIndexStats {
        RepoIndexStats {
            builds: self.inner.builds.load(Ordering::Relaxed),
            memo_hits: self.inner.memo_hits.load(Ordering::Relaxed),
            coalesced: self.inner.coalesced.load(Ordering::Relaxed),
            in_flight: self.inner.flights.in_flight(),
            memoized: self.inner.lock_memo().len(),
            tracked_files: self.inner.tracked_snapshot().len(),
        }
    }
}

impl std::fmt::Debug for RepoIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoIndex")
            .field("root", &self.inner.root)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Inner {
    fn tracked_snapshot(&self) -> Vec<String> {
        self.tracked
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn is_tracked(&self, relative: &str) -> bool {
        self.tracked
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .binary_search_by(|path| path.as_str().cmp(relative))
            .is_ok()
    }

    fn lock_memo(&self) -> MutexGuard<'_, LruCache<String, Arc<SourceFileIndex>>> {
        self.memo.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn memoized(&self, relative: &str, hash: &str) -> Option<Arc<SourceFileIndex>> {
        let mut memo = self.lock_memo();
        let index = memo.get(relative)?;
        if index.content_hash() == hash {
            return Some(Arc::clone(index));
        }
        debug!(path = relative, "file changed since it was indexed");
        memo.pop(relative);
        None
    }

    /// `/`-separated path of `path` relative to the root.
    fn normalize(&self, path: &Path) -> Result<String> {
        let outside = || IndexError::OutsideRoot(path.display().to_string());
        let relative = if path.is_absolute() {
            match path.strip_prefix(&self.root) {
                Ok(relative) => relative.to_path_buf(),
                Err(_) => {
                    let canonical = path.canonicalize().map_err(|_| outside())?;
                    canonical
                        .strip_prefix(&self.root)
                        .map_err(|_| outside())?
                        .to_path_buf()
                }
            }
        } else {
            path.to_path_buf()
        };

        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return Err(outside()),
            }
        }
        if parts.is_empty() {
            return Err(outside());
        }
        Ok(parts.join("/"))
    }

    async fn build(self: Arc<Self>, relative: String, bytes: Vec<u8>, hash: String) -> BuildResult {
        let this = Arc::clone(&self);
        let path = relative.clone();
        let tree = tokio::task::spawn_blocking(move || {
            let source = String::from_utf8(bytes).map_err(|e| IndexError::Io {
                path: path.clone(),
                message: e.to_string(),
            })?;
            this.parser
                .parse_module(&source)
                .map_err(|e| IndexError::parse(&path, e))
        })
        .await??;

        let tracked = self.tracked_snapshot();
        let this = Arc::clone(&self);
        let resolving = tokio::task::spawn_blocking(move || this.cache.resolve(&tracked));
        let resolution = match self.config.provider_timeout() {
            Some(limit) => match tokio::time::timeout(limit, resolving).await {
                Ok(joined) => joined??,
                Err(_) => {
                    warn!(path = %relative, ?limit, "provider resolution timed out");
                    return Err(IndexError::ProviderTimeout(limit));
                }
            },
            None => resolving.await??,
        };
        if resolution.is_recomputed() {
            info!(path = %relative, "provider metadata recomputed, dropping memoized indices");
            self.lock_memo().clear();
        }

        let this = Arc::clone(&self);
        let path = relative.clone();
        let index = tokio::task::spawn_blocking(move || {
            let metadata = this.cache.metadata_for(&tree, &path, &hash)?;
            SourceFileIndex::build(path, hash, &tree, &metadata, &this.parser)
        })
        .await??;

        let index = Arc::new(index);
        self.lock_memo().put(relative.clone(), Arc::clone(&index));
        self.builds.fetch_add(1, Ordering::Relaxed);
        debug!(path = %relative, nodes = index.len(), "built file index");
        Ok(index)
    }
}

fn enumerate_tracked(root: &Path, config: &RepoIndexConfig) -> Vec<String> {
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !config.skips_dir(&entry.file_name().to_string_lossy())
        });

    let mut tracked = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !config.tracks(entry.path()) {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            let parts: Vec<String> = relative
                .components()
                .map(|part| part.as_os_str().to_string_lossy().into_owned())
                .collect();
            tracked.push(parts.join("/"));
        }
    }
    tracked.sort();
    tracked
}
