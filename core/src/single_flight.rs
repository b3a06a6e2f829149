use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Collapses concurrent computations of the same key into one.
///
/// The first caller for a key runs the computation; callers arriving while it
/// is in flight wait for and share its result. Once it completes the key is
/// forgotten, so a later call computes again.
pub(crate) struct SingleFlight<K, V> {
    calls: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            calls: DashMap::new(),
        }
    }

    /// Returns the shared value and whether this call computed it.
    pub(crate) async fn run<F, Fut>(&self, key: K, compute: F) -> (V, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let cell = self
            .calls
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let mut computed = false;
        let value = cell
            .get_or_init(|| {
                computed = true;
                compute()
            })
            .await
            .clone();

        self.calls
            .remove_if(&key, |_, current| Arc::ptr_eq(current, &cell));
        (value, computed)
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.calls.len()
    }
}
