use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use typescope_core::CodePosition;
use typescope_core::IndexError;
use typescope_core::NameOrigin;
use typescope_core::NodeId;
use typescope_core::NodeKind;
use typescope_core::QualifiedName;
use typescope_core::RepoIndex;
use typescope_core::RepoIndexConfig;
use typescope_core::Resolution;
use typescope_core::config::PyreConfig;

struct Fixture {
    repo: TempDir,
    cache: TempDir,
}

impl Fixture {
    fn new(files: &[(&str, &str)]) -> Self {
        let repo = TempDir::new().unwrap();
        for (path, contents) in files {
            write(repo.path(), path, contents);
        }
        Self {
            repo,
            cache: TempDir::new().unwrap(),
        }
    }

    fn config(&self) -> RepoIndexConfig {
        RepoIndexConfig {
            cache_dir: Some(self.cache.path().to_path_buf()),
            ..RepoIndexConfig::default()
        }
    }

    fn open(&self) -> RepoIndex {
        RepoIndex::with_config(self.repo.path(), self.config()).unwrap()
    }

    fn write(&self, path: &str, contents: &str) {
        write(self.repo.path(), path, contents);
    }
}

fn write(root: &Path, path: &str, contents: &str) {
    let full = root.join(path);
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(full, contents).unwrap();
}

fn pos(line: usize, column: usize) -> CodePosition {
    CodePosition::new(line, column)
}

#[tokio::test]
async fn test_function_name_lookup() {
    let fixture = Fixture::new(&[("module.py", "def foo(x): return x + 1\n")]);
    let index = fixture.open();
    let file = index.get("module.py").await.unwrap();

    let node = file.minimal_node_at(pos(1, 4)).unwrap();
    assert_eq!(node.kind, NodeKind::Identifier);
    assert_eq!(node.field, Some("name"));
    assert_eq!(file.text_of(node), "foo");
    assert_eq!(
        node.qualified_name,
        Some(QualifiedName::new("module.foo", NameOrigin::Local))
    );

    let ancestors: Vec<NodeKind> = file.ancestors_of(node).map(|fact| fact.kind).collect();
    assert!(ancestors.contains(&NodeKind::FunctionDefinition));
}

#[tokio::test]
async fn test_empty_file_has_no_facts() {
    let fixture = Fixture::new(&[("empty.py", "")]);
    let index = fixture.open();
    let file = index.get("empty.py").await.unwrap();
    assert!(file.is_empty());
    assert!(file.nodes_at(pos(1, 0)).is_empty());
    assert!(file.minimal_node_at(pos(1, 0)).is_none());
    assert_eq!(file.text_at(pos(1, 0), pos(1, 10)), "");
}

#[tokio::test]
async fn test_syntax_error_is_isolated_to_its_file() {
    let fixture = Fixture::new(&[("broken.py", "def broken(:\n"), ("ok.py", "value = 1\n")]);
    let index = fixture.open();

    let err = index.get("broken.py").await.unwrap_err();
    assert!(err.is_parse_error(), "unexpected error {err:?}");
    let IndexError::Parse { path, line, .. } = err else {
        unreachable!();
    };
    assert_eq!(path, "broken.py");
    assert_eq!(line, 1);

    let ok = index.get("ok.py").await.unwrap();
    let value = ok.minimal_node_at(pos(1, 0)).unwrap();
    assert_eq!(value.qualified_name, Some(QualifiedName::local("ok.value")));
}

#[tokio::test]
async fn test_rebuild_from_cache_is_identical() {
    let fixture = Fixture::new(&[
        ("pkg/__init__.py", "from pkg.util import helper\n"),
        ("pkg/util.py", "def helper(items):\n    return [i * 2 for i in items]\n"),
    ]);
    let first = fixture.open().get("pkg/util.py").await.unwrap();

    let reopened = fixture.open();
    assert!(!reopened.is_stale().unwrap());
    assert_eq!(
        reopened.cache().resolve(&reopened.tracked_files()).unwrap(),
        Resolution::Fresh
    );
    let second = reopened.get("pkg/util.py").await.unwrap();
    assert_eq!(first.facts(), second.facts());
    assert_eq!(first.content_hash(), second.content_hash());
}

#[tokio::test]
async fn test_one_byte_change_invalidates_repository_metadata() {
    let fixture = Fixture::new(&[("a.py", "A = 1\n"), ("b.py", "from a import A\nB = A\n")]);
    let index = fixture.open();
    index.get("a.py").await.unwrap();
    index.get("b.py").await.unwrap();
    assert!(!index.is_stale().unwrap());
    assert_eq!(index.stats().memoized, 2);

    fixture.write("a.py", "A = 2\n");
    assert!(index.is_stale().unwrap());

    index.get("a.py").await.unwrap();
    assert!(!index.is_stale().unwrap());
    assert_eq!(index.stats().memoized, 1);

    index.get("b.py").await.unwrap();
    assert_eq!(index.stats().builds, 4);
}

#[tokio::test]
async fn test_occurrences_are_symmetric() {
    let fixture = Fixture::new(&[("m.py", "x = 1\nprint(x)\nx += 2\n\ndef f():\n    return x\n")]);
    let index = fixture.open();
    let file = index.get("m.py").await.unwrap();

    let name = QualifiedName::local("m.x");
    let occurrences: BTreeSet<NodeId> = file.occurrences_of(&name).iter().map(|fact| fact.id).collect();
    assert_eq!(occurrences.len(), 4);

    for id in &occurrences {
        let fact = file.fact(*id).unwrap();
        assert_eq!(file.text_of(fact), "x");
        let again: BTreeSet<NodeId> = file.occurrences_of_node(fact).iter().map(|fact| fact.id).collect();
        assert_eq!(again, occurrences);
    }

    let print = file.minimal_node_at(pos(2, 0)).unwrap();
    assert_eq!(print.qualified_name, Some(QualifiedName::builtin("builtins.print")));
    assert!(!file.occurrences_of_node(print).iter().any(|fact| occurrences.contains(&fact.id)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_one_build() {
    let fixture = Fixture::new(&[("m.py", "def f(a, b):\n    return a + b\n")]);
    let index = fixture.open();

    let requests = (0..8).map(|_| index.get("m.py"));
    let results = futures::future::join_all(requests).await;
    let indices: Vec<Arc<_>> = results.into_iter().map(Result::unwrap).collect();

    assert!(indices.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    let stats = index.stats();
    assert_eq!(stats.builds, 1);
    assert_eq!(stats.coalesced + stats.memo_hits, 7);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn test_failing_provider_leaves_cache_untouched() {
    let fixture = Fixture::new(&[("m.py", "x = 1\n")]);
    let config = RepoIndexConfig {
        pyre: PyreConfig {
            enabled: true,
            command: "typescope-missing-pyre".to_string(),
        },
        ..fixture.config()
    };
    let index = RepoIndex::with_config(fixture.repo.path(), config).unwrap();

    let err = index.get("m.py").await.unwrap_err();
    assert!(matches!(err, IndexError::Provider(_)), "unexpected error {err:?}");
    assert!(!index.cache().store().contains("manifest"));
    assert!(!index.cache().store().contains("repo/qualified-names"));
    assert!(index.is_stale().unwrap());
    assert_eq!(index.stats().builds, 0);
}

#[tokio::test]
async fn test_absolute_paths_and_text() {
    let fixture = Fixture::new(&[("pkg/mod.py", "def foo(x):\n    return x + 1\n")]);
    let index = fixture.open();
    let file = index.get(index.root().join("pkg/mod.py")).await.unwrap();
    assert_eq!(file.path(), "pkg/mod.py");
    assert_eq!(file.text_at(pos(1, 8), pos(2, 10)), "x):\n    return");

    let param = file.minimal_node_at(pos(1, 8)).unwrap();
    assert_eq!(param.qualified_name, Some(QualifiedName::local("pkg.mod.foo.<locals>.x")));
}

#[tokio::test]
async fn test_undecodable_sibling_does_not_block_other_files() {
    let fixture = Fixture::new(&[("ok.py", "value = 1\n")]);
    fs::write(fixture.repo.path().join("latin1.py"), b"s = '\xe9'\n").unwrap();
    let index = fixture.open();
    assert_eq!(index.tracked_files(), vec!["latin1.py", "ok.py"]);

    let ok = index.get("ok.py").await.unwrap();
    let value = ok.minimal_node_at(pos(1, 0)).unwrap();
    assert_eq!(value.qualified_name, Some(QualifiedName::local("ok.value")));

    let err = index.get("latin1.py").await.unwrap_err();
    assert!(matches!(err, IndexError::Io { .. }), "unexpected error {err:?}");
}

#[tokio::test]
async fn test_deleted_sibling_does_not_block_other_files() {
    let fixture = Fixture::new(&[("ok.py", "value = 1\n"), ("gone.py", "x = 1\n")]);
    let index = fixture.open();
    fs::remove_file(fixture.repo.path().join("gone.py")).unwrap();

    assert!(index.is_stale().unwrap());
    let ok = index.get("ok.py").await.unwrap();
    assert_eq!(ok.path(), "ok.py");
    assert!(!index.is_stale().unwrap());

    assert!(matches!(index.get("gone.py").await, Err(IndexError::Io { .. })));
    assert_eq!(index.refresh(), 1);
    assert!(index.is_stale().unwrap());
    index.get("ok.py").await.unwrap();
    assert!(!index.is_stale().unwrap());
}
