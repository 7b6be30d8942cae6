//! In-progress tracking for material updates.
//!
//! At most one update cycle runs per material fingerprint in this process.
//! A second [`InProgressTracker::begin`] for a fingerprint that is already
//! updating is rejected at once; it never waits.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::trace;

use crate::error::{Error, Result};
use crate::material::Fingerprint;

/// Tracks which materials are currently being updated.
#[derive(Debug, Clone, Default)]
pub struct InProgressTracker {
    updating: Arc<DashMap<Fingerprint, DateTime<Utc>>>,
}

impl InProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the update slot for `fingerprint`.
    ///
    /// The returned token releases the slot when dropped or passed to
    /// [`end`](Self::end).
    pub fn begin(&self, fingerprint: &Fingerprint) -> Result<InProgressToken> {
        match self.updating.entry(fingerprint.clone()) {
            Entry::Occupied(_) => Err(Error::AlreadyInProgress {
                fingerprint: fingerprint.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(Utc::now());
                trace!("Update of {} started", fingerprint.short());
                Ok(InProgressToken {
                    fingerprint: fingerprint.clone(),
                    updating: Arc::clone(&self.updating),
                })
            }
        }
    }

    /// Release the slot held by `token`.
    pub fn end(&self, token: InProgressToken) {
        drop(token);
    }

    pub fn is_in_progress(&self, fingerprint: &Fingerprint) -> bool {
        self.updating.contains_key(fingerprint)
    }

    /// Fingerprints currently updating, with the time each update started.
    pub fn in_progress(&self) -> Vec<(Fingerprint, DateTime<Utc>)> {
        let mut entries: Vec<_> = self
            .updating
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        entries.sort();
        entries
    }
}

/// Proof that an update is running. Dropping it ends the update.
#[derive(Debug)]
pub struct InProgressToken {
    fingerprint: Fingerprint,
    updating: Arc<DashMap<Fingerprint, DateTime<Utc>>>,
}

impl InProgressToken {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

impl Drop for InProgressToken {
    fn drop(&mut self) {
        self.updating.remove(&self.fingerprint);
        trace!("Update of {} finished", self.fingerprint.short());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn fingerprint(value: &str) -> Fingerprint {
        Fingerprint::new(value)
    }

    #[test]
    fn test_second_begin_is_rejected() {
        let tracker = InProgressTracker::new();
        let token = tracker.begin(&fingerprint("a")).unwrap();

        let second = tracker.begin(&fingerprint("a"));
        assert!(matches!(second, Err(Error::AlreadyInProgress { .. })));
        assert!(tracker.is_in_progress(&fingerprint("a")));

        tracker.end(token);
        assert!(!tracker.is_in_progress(&fingerprint("a")));
        assert!(tracker.begin(&fingerprint("a")).is_ok());
    }

    #[test]
    fn test_different_fingerprints_are_independent() {
        let tracker = InProgressTracker::new();
        let _a = tracker.begin(&fingerprint("a")).unwrap();
        let _b = tracker.begin(&fingerprint("b")).unwrap();
        assert_eq!(tracker.in_progress().len(), 2);
    }

    #[test]
    fn test_dropping_token_releases_slot() {
        let tracker = InProgressTracker::new();
        {
            let _token = tracker.begin(&fingerprint("a")).unwrap();
            assert!(tracker.is_in_progress(&fingerprint("a")));
        }
        assert!(!tracker.is_in_progress(&fingerprint("a")));
    }

    #[test]
    fn test_at_most_one_concurrent_begin_succeeds() {
        let tracker = InProgressTracker::new();
        let threads = 16;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let tracker = tracker.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    tracker.begin(&fingerprint("shared"))
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        assert!(tracker.is_in_progress(&fingerprint("shared")));
    }
}
