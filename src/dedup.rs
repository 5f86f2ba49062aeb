/// dedup.rs — Signal deduplication
///
/// Suppresses re-emitting the same key inside a cooldown window. The
/// default key is (symbol, action): per-direction, so a LONG emission does
/// not suppress a subsequent SHORT on the same symbol. The auto-trade path
/// runs its own instance keyed (user, symbol, action) so broadcast and
/// entry cooldowns cannot starve each other. Stale entries are overwritten
/// in place, never evicted.

use std::hash::Hash;
use std::sync::{Arc, Mutex};

use ahash::AHashMap;
use chrono::{DateTime, Duration, Utc};

use crate::clock::Clock;
use crate::models::Side;

pub struct SignalDeduplicator<K = (String, Side)> {
    cooldown: Duration,
    clock: Arc<dyn Clock>,
    last_emitted: Mutex<AHashMap<K, DateTime<Utc>>>,
}

impl<K: Eq + Hash> SignalDeduplicator<K> {
    pub fn new(cooldown_secs: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            cooldown: Duration::seconds(cooldown_secs),
            clock,
            last_emitted: Mutex::new(AHashMap::new()),
        }
    }

    /// Check-and-record in one step: returns `false` (suppress) when the
    /// key was emitted inside the cooldown window, otherwise records now
    /// as the key's last emission and returns `true`.
    pub fn should_emit(&self, key: K) -> bool {
        let now = self.clock.now();
        let mut map = self.last_emitted.lock().expect("cooldown map poisoned");

        if let Some(&last) = map.get(&key) {
            if now - last < self.cooldown {
                return false;
            }
        }
        map.insert(key, now);
        true
    }
}
