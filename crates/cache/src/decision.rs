//! Cache invalidation decisions
//!
//! The engine keeps an in-process history of the last fingerprint seen for
//! every cache key. Given a fresh fingerprint and whether the cached value
//! exists on disk, it decides what to do:
//!
//! | value exists | key seen before | policy / fingerprint        | action               |
//! |--------------|-----------------|-----------------------------|----------------------|
//! | no           | -               | -                           | `create_cache`       |
//! | yes          | no              | -                           | `read_cache_trusted` |
//! | yes          | yes             | `trust_cache && !clobber`   | `read_cache_trusted` |
//! | yes          | yes             | same fingerprint, `!clobber`| `read_cache_verified`|
//! | yes          | yes             | otherwise                   | `overwrite_cache`    |
//!
//! A value found on disk the first time a key is seen is trusted: nothing is
//! known about how it was produced. [`FirstUse::VerifyRecorded`] tightens this
//! by comparing against the fingerprint stored in the artifact, when there is one.

use crate::fingerprint::Fingerprint;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// What the decision engine knew about a key when it decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Nothing stored at the value location
    NoCacheFile,
    /// A value exists and the key has a recorded fingerprint
    CacheFileKnownFingerprint,
    /// A value exists but the key was never seen in this process
    CacheFileUnknownFingerprint,
}

/// Action to take for a cached computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheAction {
    /// Compute and write a new value
    #[serde(rename = "create_cache")]
    Create,
    /// Read the stored value without checking it
    #[serde(rename = "read_cache_trusted")]
    ReadTrusted,
    /// Read the stored value, whose fingerprint matched
    #[serde(rename = "read_cache_verified")]
    ReadVerified,
    /// Remove the stored value, then compute and write a new one
    #[serde(rename = "overwrite_cache")]
    Overwrite,
}

impl CacheAction {
    /// Stable string form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create_cache",
            Self::ReadTrusted => "read_cache_trusted",
            Self::ReadVerified => "read_cache_verified",
            Self::Overwrite => "overwrite_cache",
        }
    }

    /// Whether the action reads a stored value
    #[must_use]
    pub const fn is_read(self) -> bool {
        matches!(self, Self::ReadTrusted | Self::ReadVerified)
    }
}

impl fmt::Display for CacheAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How to treat a value found on disk for a key never seen before
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FirstUse {
    /// Trust it
    #[default]
    Trust,
    /// Compare against the fingerprint recorded in its artifact, if any
    VerifyRecorded,
}

/// Knobs steering a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecisionPolicy {
    /// Read known keys without comparing fingerprints
    pub trust_cache: bool,
    /// Always recompute existing values
    pub clobber: bool,
    /// Treatment of values found on first sight
    pub first_use: FirstUse,
}

/// Result of one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// What was known
    pub state: CacheState,
    /// What to do
    pub action: CacheAction,
}

#[derive(Debug, Default)]
struct FingerprintHistory {
    tokens: BTreeMap<String, Fingerprint>,
    actions: BTreeMap<String, CacheAction>,
    last: Option<(String, CacheAction)>,
}

/// Maps computation fingerprints to cache actions
#[derive(Debug, Default)]
pub struct DecisionEngine {
    history: Mutex<FingerprintHistory>,
}

impl DecisionEngine {
    /// Engine with an empty history
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide what to do for `key` and record the outcome
    ///
    /// `recorded` is the fingerprint stored alongside the existing value, used
    /// only under [`FirstUse::VerifyRecorded`].
    pub fn evaluate(
        &self,
        key: &str,
        fingerprint: &Fingerprint,
        exists: bool,
        policy: DecisionPolicy,
        recorded: Option<&Fingerprint>,
    ) -> Decision {
        let mut history = self.history.lock();
        let known = history.tokens.get(key);

        let (state, action) = match (exists, known) {
            (false, _) => (CacheState::NoCacheFile, CacheAction::Create),
            (true, None) => {
                let action = match (policy.first_use, recorded) {
                    (FirstUse::VerifyRecorded, Some(r)) if r != fingerprint => {
                        CacheAction::Overwrite
                    }
                    _ => CacheAction::ReadTrusted,
                };
                (CacheState::CacheFileUnknownFingerprint, action)
            }
            (true, Some(stored)) => {
                let action = if policy.trust_cache && !policy.clobber {
                    CacheAction::ReadTrusted
                } else if stored == fingerprint && !policy.clobber {
                    CacheAction::ReadVerified
                } else {
                    CacheAction::Overwrite
                };
                (CacheState::CacheFileKnownFingerprint, action)
            }
        };

        if action != CacheAction::ReadVerified {
            history.tokens.insert(key.to_string(), fingerprint.clone());
        }
        history.actions.insert(key.to_string(), action);
        history.last = Some((key.to_string(), action));
        tracing::debug!(key, ?state, action = %action, "Cache decision");
        Decision { state, action }
    }

    /// Last action taken for `key`
    #[must_use]
    pub fn last_action(&self, key: &str) -> Option<CacheAction> {
        self.history.lock().actions.get(key).copied()
    }

    /// Fingerprint recorded for `key`
    #[must_use]
    pub fn fingerprint_for(&self, key: &str) -> Option<Fingerprint> {
        self.history.lock().tokens.get(key).cloned()
    }

    /// Most recent decision, cleared on read
    pub fn take_last(&self) -> Option<(String, CacheAction)> {
        self.history.lock().last.take()
    }

    /// Drop everything known about `key`
    pub fn forget(&self, key: &str) {
        let mut history = self.history.lock();
        history.tokens.remove(key);
        history.actions.remove(key);
        if history.last.as_ref().is_some_and(|(k, _)| k == key) {
            history.last = None;
        }
    }

    /// Drop the whole history
    pub fn clear(&self) {
        *self.history.lock() = FingerprintHistory::default();
    }
}
