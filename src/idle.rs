//! Idle registry: released clients waiting to be reused
//!
//! Entries are kept in release order, most recent last. Reuse is LIFO so the
//! warmest connection goes out first; expiry is per entry and independent of
//! the waiter queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::AbortHandle;

use crate::client::ClientId;

/// A released client and its expiry timer
pub(crate) struct IdleEntry<C> {
    pub id: ClientId,
    pub client: Arc<C>,
    pub released_at: Instant,
    token: u64,
    timer: Option<AbortHandle>,
}

impl<C> IdleEntry<C> {
    pub fn new(id: ClientId, client: Arc<C>, token: u64, timer: Option<AbortHandle>) -> Self {
        Self {
            id,
            client,
            released_at: Instant::now(),
            token,
            timer,
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.released_at.elapsed()
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

pub(crate) struct IdleRegistry<C> {
    entries: Vec<IdleEntry<C>>,
    next_token: u64,
}

impl<C> IdleRegistry<C> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_token: 0,
        }
    }

    /// Token identifying the next entry's expiry timer
    pub fn next_token(&mut self) -> u64 {
        self.next_token = self.next_token.wrapping_add(1);
        self.next_token
    }

    pub fn push(&mut self, entry: IdleEntry<C>) {
        debug_assert!(!self.contains(entry.id), "client {} already idle", entry.id);
        self.entries.push(entry);
    }

    /// Take the most recently released client, cancelling its timer
    pub fn pop_latest(&mut self) -> Option<IdleEntry<C>> {
        let mut entry = self.entries.pop()?;
        entry.cancel_timer();
        Some(entry)
    }

    /// Remove a client, cancelling its timer
    pub fn remove(&mut self, id: ClientId) -> Option<IdleEntry<C>> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        let mut entry = self.entries.remove(index);
        entry.cancel_timer();
        Some(entry)
    }

    /// Remove the entry whose timer `token` fired. A client that was reused
    /// and released again since carries a newer token and stays.
    pub fn take_expired(&mut self, id: ClientId, token: u64) -> Option<IdleEntry<C>> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.id == id && entry.token == token)?;
        let mut entry = self.entries.remove(index);
        entry.timer = None;
        Some(entry)
    }

    pub fn drain(&mut self) -> Vec<IdleEntry<C>> {
        let mut entries: Vec<_> = self.entries.drain(..).collect();
        for entry in &mut entries {
            entry.cancel_timer();
        }
        entries
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
