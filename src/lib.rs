/*!
 * Periscope - client-side access layer for remote object-inventory APIs
 *
 * Direct field access over the wire costs one round trip per property, so
 * this crate provides:
 * - Batched property queries with two-phase filter-then-fetch narrowing
 * - A thread-safe TTL cache behind every memoized lookup
 * - A blocking long-poll change-notification loop, driving both live
 *   property watches and waits on asynchronous server-side operations
 * - A path-indexed property tree for partially-fetched remote objects
 * - Name⇄path resolution over hierarchical container graphs
 *
 * The connection bootstrap, guest command helpers, and CLI surface live
 * outside this crate; they hand in a `Session` implementation and consume
 * the query and cache primitives exposed here.
 */

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod pathmap;
pub mod query;
pub mod session;
pub mod tree;
pub mod types;

// Re-export commonly used types
pub use cache::TtlCache;
pub use config::{ClientConfig, LogLevel};
pub use error::{PeriscopeError, Result};
pub use monitor::{monitor, wait_for_completion, wait_for_completion_with};
pub use pathmap::PathMaps;
pub use query::{sort_by_name_order, Candidates, NameMap, ObjectProps, PropertySpec, QueryEngine};
pub use session::{FilterHandle, Session, ViewHandle};
pub use tree::{PropertyTree, TreeError, TreeValue};
pub use types::{
    ChangeKind, ChangeRecord, CompletionReport, MatchMode, ObjectContent, ObjectRef, PropRecord,
    PropValue, TaskOutcome, TaskState, UpdateBatch,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
