/*!
 * Thread-safe expiring key/value store
 *
 * Backs every memoized lookup in the crate. Expiry runs on one maintenance
 * thread per cache draining a min-heap of deadlines, rather than one OS
 * timer per key; per-key generation counters give the same semantics
 * (setting a key replaces its pending expiry, deleting absorbs it).
 *
 * The cache is a pure performance layer: everything stored here must also
 * be derivable, more slowly, without it.
 */

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default entry lifetime
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

// Idle wait when no deadline is pending
const IDLE_WAIT: Duration = Duration::from_secs(5);

enum Signal {
    /// A deadline was added or moved; recompute the next wakeup
    Touched,
    Shutdown,
}

struct Entry<V> {
    value: V,
    generation: u64,
    expires_at: Instant,
}

#[derive(PartialEq, Eq)]
struct Deadline {
    at: Instant,
    generation: u64,
    key: String,
}

impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.at
            .cmp(&other.at)
            .then(self.generation.cmp(&other.generation))
    }
}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct Table<V> {
    entries: HashMap<String, Entry<V>>,
    deadlines: BinaryHeap<Reverse<Deadline>>,
    next_generation: u64,
}

impl<V> Table<V> {
    /// Remove entries whose deadline has passed and whose generation still
    /// matches (a stale heap entry means the key was rewritten or deleted
    /// since it was scheduled). Returns the next pending deadline.
    fn sweep(&mut self, now: Instant) -> Option<Instant> {
        while let Some(Reverse(head)) = self.deadlines.peek() {
            if head.at > now {
                return Some(head.at);
            }
            let head = self.deadlines.pop().expect("peeked entry exists").0;
            if let Some(entry) = self.entries.get(&head.key) {
                if entry.generation == head.generation {
                    self.entries.remove(&head.key);
                }
            }
        }
        None
    }
}

/// Expiring key/value store, safe for concurrent use.
///
/// Values are cloned out on `get`; wrap large values in `Arc`.
pub struct TtlCache<V> {
    table: Arc<Mutex<Table<V>>>,
    ttl: Duration,
    signal_tx: Sender<Signal>,
    maintainer: Option<JoinHandle<()>>,
}

impl<V: Clone + Send + 'static> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        let table = Arc::new(Mutex::new(Table {
            entries: HashMap::new(),
            deadlines: BinaryHeap::new(),
            next_generation: 0,
        }));
        let (signal_tx, signal_rx) = unbounded();
        let maintainer = {
            let table = Arc::clone(&table);
            thread::Builder::new()
                .name("ttl-cache-expiry".to_string())
                .spawn(move || maintain(table, signal_rx))
                .expect("spawn cache maintenance thread")
        };
        TtlCache {
            table,
            ttl,
            signal_tx,
            maintainer: Some(maintainer),
        }
    }

    pub fn with_default_ttl() -> Self {
        TtlCache::new(DEFAULT_TTL)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fetch a live entry. Absent and expired keys both return `None`;
    /// absence is ordinary control flow here, never an error.
    pub fn get(&self, key: &str) -> Option<V> {
        let table = self.table.lock().expect("cache lock poisoned");
        let entry = table.entries.get(key)?;
        // Lazy expiry check: an entry past its deadline is invisible even
        // if the maintenance thread has not swept it yet
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Store a value. Overwriting a live key resets its expiry clock;
    /// the previously scheduled expiry is superseded by the new generation.
    pub fn set(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let expires_at = Instant::now() + self.ttl;
        {
            let mut table = self.table.lock().expect("cache lock poisoned");
            let generation = table.next_generation;
            table.next_generation += 1;
            table.deadlines.push(Reverse(Deadline {
                at: expires_at,
                generation,
                key: key.clone(),
            }));
            table.entries.insert(
                key,
                Entry {
                    value,
                    generation,
                    expires_at,
                },
            );
        }
        // Wake the maintainer outside the lock
        let _ = self.signal_tx.send(Signal::Touched);
    }

    /// Remove a key. The pending heap entry becomes stale and is absorbed
    /// when the maintainer reaches it.
    pub fn delete(&self, key: &str) -> Option<V> {
        let mut table = self.table.lock().expect("cache lock poisoned");
        table.entries.remove(key).map(|e| e.value)
    }

    /// Drop every entry and pending deadline.
    pub fn clear(&self) {
        let mut table = self.table.lock().expect("cache lock poisoned");
        table.entries.clear();
        table.deadlines.clear();
    }

    pub fn len(&self) -> usize {
        let mut table = self.table.lock().expect("cache lock poisoned");
        // Count only live entries
        table.sweep(Instant::now());
        table.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> Drop for TtlCache<V> {
    fn drop(&mut self) {
        let _ = self.signal_tx.send(Signal::Shutdown);
        if let Some(handle) = self.maintainer.take() {
            let _ = handle.join();
        }
    }
}

fn maintain<V>(table: Arc<Mutex<Table<V>>>, signal_rx: Receiver<Signal>) {
    loop {
        let next = {
            let mut table = table.lock().expect("cache lock poisoned");
            table.sweep(Instant::now())
        };
        let wait = match next {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None => IDLE_WAIT,
        };
        match signal_rx.recv_timeout(wait) {
            Ok(Signal::Touched) => continue,
            Ok(Signal::Shutdown) => break,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Build a deterministic cache key from a query's shape, so repeated
/// identical queries land in the same slot.
pub fn shape_key(tag: &str, kinds: &[&str], root: Option<&crate::types::ObjectRef>, desc: &str) -> String {
    let root = root.map(|r| r.to_string()).unwrap_or_default();
    format!("{}|{}|{}|{}", tag, kinds.join(","), root, desc)
}
