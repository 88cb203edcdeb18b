use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::constants::is_valid_user_id;
use crate::error::{CoreError, Result};

/// Order-independent key for two distinct users. Displays as `low_high`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey {
    low: String,
    high: String,
}

impl PairKey {
    pub fn new(a: &str, b: &str) -> Result<Self> {
        for id in [a, b] {
            if !is_valid_user_id(id) {
                return Err(CoreError::validation(format!("invalid user id '{}'", id)));
            }
        }
        if a == b {
            return Err(CoreError::validation("a pair needs two distinct users"));
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        Ok(Self {
            low: low.to_string(),
            high: high.to_string(),
        })
    }

    /// Resolves a raw room key on behalf of one of its members. Ids may contain
    /// underscores, so the split is anchored on the caller's own id.
    pub fn parse_for(raw: &str, member: &str) -> Result<Self> {
        let peer = raw
            .strip_prefix(member)
            .and_then(|rest| rest.strip_prefix('_'))
            .or_else(|| raw.strip_suffix(member).and_then(|rest| rest.strip_suffix('_')))
            .ok_or_else(|| {
                CoreError::validation(format!("'{}' is not a member of room '{}'", member, raw))
            })?;

        let key = Self::new(member, peer)?;
        if key.to_string() != raw {
            return Err(CoreError::validation(format!("room '{}' is not canonical", raw)));
        }
        Ok(key)
    }

    pub fn low(&self) -> &str {
        &self.low
    }

    pub fn high(&self) -> &str {
        &self.high
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.low == user_id || self.high == user_id
    }

    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        if self.low == user_id {
            Some(&self.high)
        } else if self.high == user_id {
            Some(&self.low)
        } else {
            None
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.low, self.high)
    }
}

/// Pair-scoped mutex. Used for the like→match transition, the buzz
/// check-and-stamp and meet session transitions alike.
#[derive(Debug, Default)]
pub struct PairLocks {
    locks: DashMap<PairKey, Arc<Mutex<()>>>,
}

impl PairLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, pair: &PairKey) -> OwnedMutexGuard<()> {
        // The map guard must be released before awaiting.
        let mutex = Arc::clone(&self.locks.entry(pair.clone()).or_default());
        mutex.lock_owned().await
    }

    /// Drops entries nobody holds or waits on. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        before.saturating_sub(self.locks.len())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Short-lived per-pair stamp: at most one pass per `window`.
#[derive(Debug)]
pub struct CooldownGate {
    window: Duration,
    stamps: DashMap<PairKey, Instant>,
}

impl CooldownGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            stamps: DashMap::new(),
        }
    }

    /// Stamps the pair if the window has elapsed, otherwise returns the remaining wait.
    pub fn try_stamp(&self, pair: &PairKey) -> std::result::Result<(), Duration> {
        let now = Instant::now();
        match self.stamps.entry(pair.clone()) {
            Entry::Occupied(mut entry) => {
                let elapsed = now.duration_since(*entry.get());
                if elapsed < self.window {
                    return Err(self.window - elapsed);
                }
                entry.insert(now);
                Ok(())
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                Ok(())
            }
        }
    }

    /// Undo a stamp when the guarded operation failed
    pub fn clear(&self, pair: &PairKey) {
        self.stamps.remove(pair);
    }

    pub fn prune(&self) {
        let window = self.window;
        self.stamps.retain(|_, at| at.elapsed() < window);
    }
}
