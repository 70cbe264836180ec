use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::Arc;
use tokio::sync::watch;

/// Tracks fetches currently underway so identical concurrent requests share one.
///
/// The first caller for a key becomes the leader and performs the fetch. Every later
/// caller for the same key becomes a follower and waits for the leader's result.
pub struct InflightTracker<T> {
    pending: DashMap<u64, watch::Receiver<Option<T>>>,
}

/// Outcome of [`InflightTracker::join`].
pub enum Join<T: Clone> {
    Leader(FetchGuard<T>),
    Follower(Follower<T>),
}

/// Held by the leader. Publishing happens through [`FetchGuard::complete`]; dropping it
/// without completing releases the key and wakes followers empty-handed.
pub struct FetchGuard<T: Clone> {
    key: u64,
    tx: watch::Sender<Option<T>>,
    tracker: Arc<InflightTracker<T>>,
}

pub struct Follower<T> {
    rx: watch::Receiver<Option<T>>,
}

impl<T: Clone> Default for InflightTracker<T> {
    fn default() -> Self {
        Self { pending: DashMap::new() }
    }
}

impl<T: Clone> InflightTracker<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(self: &Arc<Self>, key: u64) -> Join<T> {
        match self.pending.entry(key) {
            Entry::Occupied(entry) => Join::Follower(Follower { rx: entry.get().clone() }),
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                entry.insert(rx);
                Join::Leader(FetchGuard { key, tx, tracker: Arc::clone(self) })
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<T: Clone> FetchGuard<T> {
    /// Hands the result to every follower and releases the key.
    pub fn complete(self, value: T) {
        // send_replace stores the value even when no follower is subscribed yet
        self.tx.send_replace(Some(value));
    }
}

impl<T: Clone> Drop for FetchGuard<T> {
    fn drop(&mut self) {
        self.tracker.pending.remove(&self.key);
    }
}

impl<T: Clone> Follower<T> {
    /// Waits for the leader. `None` means the leader gave up without a result and
    /// the caller should try again.
    pub async fn wait(mut self) -> Option<T> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        }
    }
}
