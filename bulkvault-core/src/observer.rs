//! Lifecycle callbacks for storage events.

use crate::record::FileRecord;

/// Observer of storage lifecycle events.
///
/// Implementations are registered once at construction via
/// [`BulkStorage::with_observer`](crate::storage::BulkStorage::with_observer)
/// and receive callbacks from the mutation path. All methods default to
/// no-ops so implementors pick only the events they care about.
///
/// # Examples
///
/// ```rust
/// use bulkvault_core::observer::StorageObserver;
/// use bulkvault_core::record::FileRecord;
///
/// struct CountingObserver;
///
/// impl StorageObserver for CountingObserver {
///     fn on_added(&self, record: &FileRecord) {
///         println!("stored blob {}", record.uuid);
///     }
/// }
/// ```
pub trait StorageObserver: Send + Sync {
    /// Called after a blob has been fully written and its record appended.
    fn on_added(&self, _record: &FileRecord) {}

    /// Called after a failed `add` has been rolled back.
    fn on_aborted(&self) {}

    /// Called when the storage is closed; `code` 0 is a clean close.
    fn on_finish(&self, _code: i32) {}
}
