//! Target selection across several storage containers.
//!
//! Deployments that shard blobs over multiple containers pick a target
//! per add from usage snapshots. The policy lives here, outside the
//! engine: the engine never knows its siblings.

/// How a pool picks the target container for the next blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoragePolicy {
    /// Prefer the fullest container that is still under its limits.
    Fill,
    /// Prefer the least full container that is under its limits.
    Spread,
}

/// Usage snapshot of one container, measured against its limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageUsage {
    /// Bytes currently occupied by blob regions.
    pub used_bytes: u64,
    /// Number of stored blobs.
    pub file_count: usize,
    /// Capacity limit in bytes.
    pub max_size_bytes: u64,
    /// Limit on the number of stored blobs.
    pub max_file_count: usize,
}

impl StorageUsage {
    /// Returns `true` if this container can accept another blob.
    #[must_use]
    pub const fn has_room(&self) -> bool {
        self.used_bytes < self.max_size_bytes && self.file_count < self.max_file_count
    }
}

/// Picks the index of the target container for the next blob, or `None`
/// if every container is at its limits.
///
/// `Fill` prefers the fullest fitting container, `Spread` the least full;
/// ties are broken by file count in the same direction, then by the lower
/// index.
#[must_use]
pub fn select_target(storages: &[StorageUsage], policy: StoragePolicy) -> Option<usize> {
    let mut best: Option<(usize, &StorageUsage)> = None;

    for (i, usage) in storages.iter().enumerate() {
        if !usage.has_room() {
            continue;
        }
        let better = match best {
            None => true,
            Some((_, current)) => match policy {
                StoragePolicy::Fill => {
                    usage.used_bytes > current.used_bytes
                        || (usage.used_bytes == current.used_bytes
                            && usage.file_count > current.file_count)
                }
                StoragePolicy::Spread => {
                    usage.used_bytes < current.used_bytes
                        || (usage.used_bytes == current.used_bytes
                            && usage.file_count < current.file_count)
                }
            },
        };
        if better {
            best = Some((i, usage));
        }
    }

    best.map(|(i, _)| i)
}

// =============================================================================
// Tests
// =============================================================================
