//! Content-hash gated metadata cache
//!
//! Provider output is persisted in a [`CacheStore`] under three kinds of keys:
//!
//! * `repo/<provider>`: output of a repository-scoped provider for every
//!   tracked file, stamped with the repository fingerprint it was computed
//!   for;
//! * `file/<provider>/<path>`: output of a file-scoped provider for one file,
//!   stamped with that file's content hash;
//! * `manifest`: the repository fingerprint recorded once every
//!   repository-scoped provider has been resolved for it.
//!
//! The fingerprint hashes the path and content hash of every tracked file, so
//! changing any byte of any tracked file invalidates all repository-scoped
//! entries at once.

use crate::error::IndexError;
use crate::error::Result;
use crate::facts::NodeMetadata;
use crate::providers::MetadataProvider;
use crate::providers::NodeAnnotation;
use crate::providers::ProviderOutput;
use crate::providers::ProviderScope;
use crate::providers::attach_annotations;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::Digest;
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use tracing::debug;
use tracing::info;
use tracing::warn;
use typescope_ast::SyntaxTree;
use typescope_persistence::CacheStore;

const MANIFEST_KEY: &str = "manifest";

/// Fingerprint input for a tracked file that can no longer be read.
const UNREADABLE: &str = "unreadable";

/// Hex SHA-256 of a file's bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Content hashes of the tracked files and the fingerprint over all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoFingerprint {
    pub files: BTreeMap<String, String>,
    pub fingerprint: String,
}

impl RepoFingerprint {
    /// Files that cannot be read contribute a fixed marker instead of a hash.
    pub fn compute(root: &Path, paths: &[String]) -> Result<Self> {
        let mut files = BTreeMap::new();
        for path in paths {
            let full = root.join(path);
            let hash = match fs::read(&full) {
                Ok(bytes) => content_hash(&bytes),
                Err(e) => {
                    debug!(path = %path, error = %e, "tracked file is unreadable");
                    UNREADABLE.to_string()
                }
            };
            files.insert(path.clone(), hash);
        }
        let mut hasher = Sha256::new();
        for (path, hash) in &files {
            hasher.update(path.as_bytes());
            hasher.update([0]);
            hasher.update(hash.as_bytes());
            hasher.update([b'\n']);
        }
        Ok(Self {
            files,
            fingerprint: format!("{:x}", hasher.finalize()),
        })
    }
}

/// Outcome of [`MetadataCache::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Every repository-scoped entry matched the live fingerprint.
    Fresh,
    /// The listed providers were recomputed.
    Recomputed(Vec<String>),
}

impl Resolution {
    pub const fn is_recomputed(&self) -> bool {
        matches!(self, Self::Recomputed(_))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RepoEntry {
    fingerprint: String,
    output: ProviderOutput,
}

#[derive(Debug, Serialize, Deserialize)]
struct FileEntry {
    content_hash: String,
    annotations: Vec<NodeAnnotation>,
}

pub struct MetadataCache {
    root: PathBuf,
    store: CacheStore,
    providers: Vec<Arc<dyn MetadataProvider>>,
    resolving: Mutex<()>,
}

impl MetadataCache {
    pub fn new(root: impl Into<PathBuf>, store: CacheStore, providers: Vec<Arc<dyn MetadataProvider>>) -> Self {
        Self {
            root: root.into(),
            store,
            providers,
            resolving: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn provider_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.providers.iter().map(|provider| provider.id())
    }

    fn repo_key(provider: &str) -> String {
        format!("repo/{provider}")
    }

    fn file_key(provider: &str, path: &str) -> String {
        format!("file/{provider}/{path}")
    }

    /// Read an entry, treating unreadable contents as absent.
    fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get_value(key) {
            Ok(value) => Ok(value),
            Err(e) if e.is_corruption() => {
                warn!(key, error = %e, "discarding corrupt cache entry");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// True when the tracked files no longer match the fingerprint recorded by
    /// the last successful resolution.
    pub fn is_stale(&self, paths: &[String]) -> Result<bool> {
        let live = RepoFingerprint::compute(&self.root, paths)?;
        Ok(self.load::<String>(MANIFEST_KEY)?.as_deref() != Some(live.fingerprint.as_str()))
    }

    /// Bring every repository-scoped provider up to date with `paths`.
    ///
    /// Providers whose entry already matches the live fingerprint are kept.
    /// All outdated providers are computed before anything is written, so a
    /// failing provider leaves the store untouched.
    pub fn resolve(&self, paths: &[String]) -> Result<Resolution> {
        let _guard = self.resolving.lock().unwrap_or_else(PoisonError::into_inner);
        let live = RepoFingerprint::compute(&self.root, paths)?;

        let mut computed = Vec::new();
        for provider in &self.providers {
            if provider.scope() != ProviderScope::Repository {
                continue;
            }
            let key = Self::repo_key(provider.id());
            if let Some(entry) = self.load::<RepoEntry>(&key)?
                && entry.fingerprint == live.fingerprint
            {
                continue;
            }
            info!(provider = provider.id(), files = paths.len(), "computing repository metadata");
            let output = provider.compute(&self.root, paths)?;
            computed.push((provider.id().to_string(), key, output));
        }

        for (_, key, output) in &computed {
            let entry = RepoEntry {
                fingerprint: live.fingerprint.clone(),
                output: output.clone(),
            };
            self.store.put_value(key, &entry)?;
        }
        if !computed.is_empty() || self.load::<String>(MANIFEST_KEY)?.as_deref() != Some(live.fingerprint.as_str()) {
            self.store.put_value(MANIFEST_KEY, &live.fingerprint)?;
        }

        if computed.is_empty() {
            Ok(Resolution::Fresh)
        } else {
            Ok(Resolution::Recomputed(
                computed.into_iter().map(|(id, _, _)| id).collect(),
            ))
        }
    }

    /// Annotations of one provider for `path`.
    ///
    /// Repository-scoped providers are resolved first when stale; file-scoped
    /// providers are recomputed when the file's content hash changed.
    pub fn get(&self, provider: &str, path: &str, tracked: &[String]) -> Result<Vec<NodeAnnotation>> {
        let Some(found) = self.providers.iter().find(|p| p.id() == provider) else {
            return Ok(Vec::new());
        };
        match found.scope() {
            ProviderScope::Repository => {
                if self.is_stale(tracked)? {
                    self.resolve(tracked)?;
                }
                self.repo_annotations(provider, path)
            }
            ProviderScope::File => {
                let full = self.root.join(path);
                let bytes = fs::read(&full).map_err(|e| IndexError::io(&full, &e))?;
                self.file_annotations(found.as_ref(), path, &content_hash(&bytes))
            }
        }
    }

    fn repo_annotations(&self, provider: &str, path: &str) -> Result<Vec<NodeAnnotation>> {
        Ok(self
            .load::<RepoEntry>(&Self::repo_key(provider))?
            .map(|entry| entry.output.annotations(path).to_vec())
            .unwrap_or_default())
    }

    fn file_annotations(&self, provider: &dyn MetadataProvider, path: &str, hash: &str) -> Result<Vec<NodeAnnotation>> {
        let key = Self::file_key(provider.id(), path);
        if let Some(entry) = self.load::<FileEntry>(&key)?
            && entry.content_hash == hash
        {
            return Ok(entry.annotations);
        }
        debug!(provider = provider.id(), path, "computing file metadata");
        let annotations = provider
            .compute(&self.root, &[path.to_string()])?
            .annotations(path)
            .to_vec();
        let entry = FileEntry {
            content_hash: hash.to_string(),
            annotations,
        };
        self.store.put_value(&key, &entry)?;
        Ok(entry.annotations)
    }

    /// Metadata of every provider for the file parsed into `tree`.
    ///
    /// Expects [`resolve`](Self::resolve) to have run for the current
    /// fingerprint; `hash` is the content hash of the parsed text.
    pub fn metadata_for(&self, tree: &SyntaxTree, path: &str, hash: &str) -> Result<NodeMetadata> {
        let mut metadata = NodeMetadata::default();
        for provider in &self.providers {
            let annotations = match provider.scope() {
                ProviderScope::Repository => self.repo_annotations(provider.id(), path)?,
                ProviderScope::File => self.file_annotations(provider.as_ref(), path, hash)?,
            };
            attach_annotations(tree, &annotations, &mut metadata);
        }
        Ok(metadata)
    }

    /// Drop every persisted entry of this repository.
    pub fn clear(&self) -> Result<usize> {
        Ok(self.store.clear()?)
    }
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("root", &self.root)
            .field("store", &self.store.dir())
            .field("providers", &self.provider_ids().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::facts::QualifiedName;
    use crate::providers::FactKind;
    use crate::providers::FactValue;
    use crate::providers::QualifiedNameProvider;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;
    use typescope_ast::CodePosition;
    use typescope_ast::CodeRange;
    use typescope_persistence::CompressionLevel;

    /// Counts calls and optionally fails.
    struct CountingProvider {
        scope: ProviderScope,
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingProvider {
        fn new(scope: ProviderScope, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                scope,
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    impl MetadataProvider for CountingProvider {
        fn id(&self) -> &str {
            match (self.scope, self.fail) {
                (_, true) => "failing",
                (ProviderScope::Repository, _) => "counting-repo",
                (ProviderScope::File, _) => "counting-file",
            }
        }

        fn fact(&self) -> FactKind {
            FactKind::QualifiedName
        }

        fn scope(&self) -> ProviderScope {
            self.scope
        }

        fn compute(&self, _root: &Path, paths: &[String]) -> std::result::Result<ProviderOutput, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError::failed("failing", "boom"));
            }
            let mut output = ProviderOutput::default();
            for path in paths {
                output.files.insert(
                    path.clone(),
                    vec![NodeAnnotation {
                        range: CodeRange::new(CodePosition::new(1, 0), CodePosition::new(1, 1)),
                        kind: None,
                        value: FactValue::QualifiedNames(vec![QualifiedName::local(path.clone())]),
                    }],
                );
            }
            Ok(output)
        }
    }

    struct Fixture {
        repo: TempDir,
        _cache: TempDir,
        store: CacheStore,
        paths: Vec<String>,
    }

    fn fixture() -> Fixture {
        let repo = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        fs::write(repo.path().join("a.py"), "a = 1\n").unwrap();
        fs::write(repo.path().join("b.py"), "b = 2\n").unwrap();
        let store = CacheStore::open(cache.path(), repo.path(), CompressionLevel::Fast).unwrap();
        Fixture {
            repo,
            _cache: cache,
            store,
            paths: vec!["a.py".to_string(), "b.py".to_string()],
        }
    }

    #[test]
    fn test_fingerprint_tracks_every_byte() {
        let fx = fixture();
        let before = RepoFingerprint::compute(fx.repo.path(), &fx.paths).unwrap();
        let again = RepoFingerprint::compute(fx.repo.path(), &fx.paths).unwrap();
        assert_eq!(before, again);

        fs::write(fx.repo.path().join("b.py"), "b = 3\n").unwrap();
        let after = RepoFingerprint::compute(fx.repo.path(), &fx.paths).unwrap();
        assert_ne!(before.fingerprint, after.fingerprint);
        assert_eq!(before.files["a.py"], after.files["a.py"]);
    }

    #[test]
    fn test_fingerprint_marks_missing_files() {
        let fx = fixture();
        let before = RepoFingerprint::compute(fx.repo.path(), &fx.paths).unwrap();
        fs::remove_file(fx.repo.path().join("b.py")).unwrap();

        let after = RepoFingerprint::compute(fx.repo.path(), &fx.paths).unwrap();
        assert_ne!(before.fingerprint, after.fingerprint);
        assert_eq!(after.files["b.py"], UNREADABLE);
        assert_eq!(before.files["a.py"], after.files["a.py"]);

        let provider = CountingProvider::new(ProviderScope::Repository, false);
        let cache = MetadataCache::new(fx.repo.path(), fx.store.clone(), vec![provider.clone()]);
        assert!(cache.resolve(&fx.paths).unwrap().is_recomputed());
        assert!(!cache.is_stale(&fx.paths).unwrap());
    }

    #[test]
    fn test_resolve_then_fresh_then_stale() {
        let fx = fixture();
        let provider = CountingProvider::new(ProviderScope::Repository, false);
        let cache = MetadataCache::new(fx.repo.path(), fx.store.clone(), vec![provider.clone()]);

        assert!(cache.is_stale(&fx.paths).unwrap());
        assert_eq!(
            cache.resolve(&fx.paths).unwrap(),
            Resolution::Recomputed(vec!["counting-repo".to_string()])
        );
        assert!(!cache.is_stale(&fx.paths).unwrap());
        assert_eq!(cache.resolve(&fx.paths).unwrap(), Resolution::Fresh);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        // One byte in one file invalidates the entry for every file.
        fs::write(fx.repo.path().join("a.py"), "a = 2\n").unwrap();
        assert!(cache.is_stale(&fx.paths).unwrap());
        let annotations = cache.get("counting-repo", "b.py", &fx.paths).unwrap();
        assert_eq!(annotations.len(), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_entries_survive_a_new_cache_instance() {
        let fx = fixture();
        let first = CountingProvider::new(ProviderScope::Repository, false);
        MetadataCache::new(fx.repo.path(), fx.store.clone(), vec![first.clone()])
            .resolve(&fx.paths)
            .unwrap();

        let second = CountingProvider::new(ProviderScope::Repository, false);
        let cache = MetadataCache::new(fx.repo.path(), fx.store.clone(), vec![second.clone()]);
        assert_eq!(cache.resolve(&fx.paths).unwrap(), Resolution::Fresh);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failing_provider_leaves_store_untouched() {
        let fx = fixture();
        let good = CountingProvider::new(ProviderScope::Repository, false);
        let bad = CountingProvider::new(ProviderScope::Repository, true);
        let cache = MetadataCache::new(fx.repo.path(), fx.store.clone(), vec![good, bad]);

        let err = cache.resolve(&fx.paths).unwrap_err();
        assert!(matches!(err, IndexError::Provider(_)));
        assert!(!fx.store.contains(MANIFEST_KEY));
        assert!(!fx.store.contains("repo/counting-repo"));
        assert!(cache.is_stale(&fx.paths).unwrap());
    }

    #[test]
    fn test_file_scoped_entries_follow_content_hash() {
        let fx = fixture();
        let provider = CountingProvider::new(ProviderScope::File, false);
        let cache = MetadataCache::new(fx.repo.path(), fx.store.clone(), vec![provider.clone()]);

        cache.get("counting-file", "a.py", &fx.paths).unwrap();
        cache.get("counting-file", "a.py", &fx.paths).unwrap();
        cache.get("counting-file", "b.py", &fx.paths).unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

        fs::write(fx.repo.path().join("b.py"), "b = 4\n").unwrap();
        cache.get("counting-file", "a.py", &fx.paths).unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        cache.get("counting-file", "b.py", &fx.paths).unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_corrupt_entries_are_recomputed() {
        let fx = fixture();
        let provider = CountingProvider::new(ProviderScope::Repository, false);
        let cache = MetadataCache::new(fx.repo.path(), fx.store.clone(), vec![provider.clone()]);
        cache.resolve(&fx.paths).unwrap();

        fx.store.put("repo/counting-repo", b"not bincode").unwrap();
        assert_eq!(
            cache.resolve(&fx.paths).unwrap(),
            Resolution::Recomputed(vec!["counting-repo".to_string()])
        );
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_metadata_for_attaches_names() {
        let fx = fixture();
        let cache = MetadataCache::new(
            fx.repo.path(),
            fx.store.clone(),
            vec![Arc::new(QualifiedNameProvider::new())],
        );
        cache.resolve(&fx.paths).unwrap();

        let source = fs::read_to_string(fx.repo.path().join("a.py")).unwrap();
        let tree = typescope_ast::PythonParser::new().parse_module(&source).unwrap();
        let metadata = cache
            .metadata_for(&tree, "a.py", &content_hash(source.as_bytes()))
            .unwrap();
        let names: Vec<&Vec<QualifiedName>> = metadata.names.values().collect();
        assert_eq!(names, vec![&vec![QualifiedName::local("a.a")]]);
    }
}
