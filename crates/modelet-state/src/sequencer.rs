//! Ordering of scheduler commands per model version

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use modelet_core::{ModeletError, ModeletResult};

/// Remembers the last tick admitted for each versioned model key
#[derive(Default)]
pub struct CommandSequencer {
    last_applied: DashMap<String, u64>,
}

impl CommandSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a command with `tick` for `key`, rejecting ticks older than the
    /// last one admitted
    pub fn admit(&self, key: &str, tick: u64) -> ModeletResult<()> {
        match self.last_applied.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let last_applied = *entry.get();
                if tick < last_applied {
                    return Err(ModeletError::OutOfOrder {
                        key: key.to_string(),
                        tick,
                        last_applied,
                    });
                }
                entry.insert(tick);
            }
            Entry::Vacant(entry) => {
                entry.insert(tick);
            }
        }
        Ok(())
    }

    pub fn last_applied(&self, key: &str) -> Option<u64> {
        self.last_applied.get(key).map(|tick| *tick)
    }
}
