use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// How committed trie nodes move out of memory and when history is reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PruningMode {
    /// Archive: every commit flushes synchronously, nothing is ever deleted.
    None,
    /// Batches stay in the dirty cache up to a byte budget or a commit-count
    /// boundary, then flush; roots falling out of the retention window have
    /// their exclusively-owned nodes deleted.
    Hybrid,
    /// Never flushes: the dirty cache is the store. For ephemeral workloads.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruningConfig {
    pub mode: PruningMode,
    /// Dirty-cache byte budget; exceeding it forces a flush (Hybrid) or an
    /// eviction of out-of-window batches (Memory).
    pub max_dirty_bytes: usize,
    /// Commits between forced flushes.
    pub persistence_interval: u64,
    /// Commit-count boundary after which buffered batches must flush.
    pub pruning_boundary: u64,
    /// Number of most recent roots guaranteed to stay resolvable.
    pub retention_window: u64,
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self::archive()
    }
}

impl PruningConfig {
    pub fn archive() -> Self {
        PruningConfig {
            mode: PruningMode::None,
            max_dirty_bytes: 0,
            persistence_interval: 1,
            pruning_boundary: 0,
            retention_window: u64::MAX,
        }
    }

    pub fn hybrid(max_dirty_bytes: usize, pruning_boundary: u64, retention_window: u64) -> Self {
        PruningConfig {
            mode: PruningMode::Hybrid,
            max_dirty_bytes,
            persistence_interval: u64::MAX,
            pruning_boundary,
            retention_window,
        }
    }

    pub fn in_memory(max_dirty_bytes: usize, retention_window: u64) -> Self {
        PruningConfig {
            mode: PruningMode::Memory,
            max_dirty_bytes,
            persistence_interval: u64::MAX,
            pruning_boundary: 0,
            retention_window,
        }
    }

    /// Rejects contradictory settings before any data is touched.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.persistence_interval == 0 {
            return Err(StoreError::InvalidConfig(
                "persistence_interval must be at least 1".into(),
            ));
        }
        match self.mode {
            PruningMode::None => {
                if self.pruning_boundary != 0 {
                    return Err(StoreError::InvalidConfig(
                        "archive mode flushes synchronously, pruning_boundary must be 0".into(),
                    ));
                }
            }
            PruningMode::Hybrid => {
                if self.retention_window == 0 {
                    return Err(StoreError::InvalidConfig(
                        "Hybrid pruning with a zero retention window would delete live roots"
                            .into(),
                    ));
                }
                // a root must be flushed before it can be unpinned
                if self.pruning_boundary > self.retention_window {
                    return Err(StoreError::InvalidConfig(format!(
                        "pruning_boundary ({}) exceeds retention_window ({}), roots would leave \
                         the window before ever being flushed",
                        self.pruning_boundary, self.retention_window
                    )));
                }
            }
            PruningMode::Memory => {
                if self.retention_window == 0 {
                    return Err(StoreError::InvalidConfig(
                        "Memory mode with a zero retention window would drop live roots".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Pass-through tuning for the backing store engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendOptions {
    /// Sync the write-ahead log on every batch (durability over latency).
    pub sync_writes: bool,
    pub write_buffer_size: usize,
    pub compression: bool,
    pub max_background_jobs: i32,
}

impl Default for BackendOptions {
    fn default() -> Self {
        BackendOptions {
            sync_writes: false,
            write_buffer_size: 64 * 1024 * 1024,
            compression: true,
            max_background_jobs: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_defaults_are_valid() {
        assert!(PruningConfig::archive().validate().is_ok());
    }

    #[test]
    fn boundary_larger_than_window_is_rejected() {
        let config = PruningConfig::hybrid(1 << 20, 128, 64);
        assert!(matches!(
            config.validate(),
            Err(StoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn archive_with_boundary_is_rejected() {
        let mut config = PruningConfig::archive();
        config.pruning_boundary = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_retention_hybrid_is_rejected() {
        let config = PruningConfig::hybrid(1 << 20, 0, 0);
        assert!(config.validate().is_err());
    }
}
