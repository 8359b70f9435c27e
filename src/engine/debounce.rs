//! Trailing-edge debounce keyed by field instance.
//!
//! The debouncer owns no timer thread: the UI loop asks for [`Debouncer::next_deadline`]
//! to size its poll timeout and collects expired actions with [`Debouncer::due`].
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Pending<A> {
    deadline: Instant,
    action: A,
}

pub struct Debouncer<A> {
    pending: HashMap<String, Pending<A>>,
}

impl<A> Default for Debouncer<A> {
    fn default() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }
}

impl<A> Debouncer<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `action` to fire `delay` after `now`. A pending action under the same key
    /// is discarded and handed back; it never fires.
    pub fn schedule_at(
        &mut self,
        key: impl Into<String>,
        now: Instant,
        delay: Duration,
        action: A,
    ) -> Option<A> {
        self.pending
            .insert(
                key.into(),
                Pending {
                    deadline: now + delay,
                    action,
                },
            )
            .map(|p| p.action)
    }

    /// Remove and return every action whose deadline has passed, earliest first.
    pub fn due(&mut self, now: Instant) -> Vec<(String, A)> {
        let keys: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(k, _)| k.clone())
            .collect();
        let mut fired: Vec<(Instant, String, A)> = keys
            .into_iter()
            .filter_map(|k| {
                let p = self.pending.remove(&k)?;
                Some((p.deadline, k, p.action))
            })
            .collect();
        fired.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        fired.into_iter().map(|(_, k, a)| (k, a)).collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    pub fn cancel(&mut self, key: &str) -> Option<A> {
        self.pending.remove(key).map(|p| p.action)
    }

    /// Drop every pending action whose key matches; returns how many were dropped.
    pub fn cancel_where(&mut self, mut pred: impl FnMut(&str) -> bool) -> usize {
        let before = self.pending.len();
        self.pending.retain(|k, _| !pred(k));
        before - self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
