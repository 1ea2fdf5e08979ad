use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::models::update::{Inbox, Session, Update};
use crate::services::coordinator::FellowshipError;

/// Identifies one fetch call so it can be cancelled while parked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchId(Uuid);

impl FetchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FetchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FetchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type FetchReply = oneshot::Sender<Result<Update, FellowshipError>>;

/// A fetch that found nothing to report and is waiting to be woken.
pub struct PendingFetch {
    pub id: FetchId,
    /// `None` means every member counts as new.
    pub baseline: Option<Instant>,
    pub reply: FetchReply,
}

/// Server-side state for one session.
pub struct Member {
    identity: String,
    created_at: Instant,
    last_seen_at: Instant,
    /// Latest fetch start; unlike `last_seen_at` this is never rolled back.
    last_active_at: Instant,
    last_fetch: Option<FetchId>,
    /// `last_seen_at` as it was before `last_fetch` began.
    last_baseline: Instant,
    inbox: Inbox,
    pending: VecDeque<PendingFetch>,
}

impl Member {
    pub fn new(identity: String, now: Instant, fetch: FetchId) -> Self {
        Self {
            identity,
            created_at: now,
            last_seen_at: now,
            last_active_at: now,
            last_fetch: Some(fetch),
            last_baseline: now,
            inbox: Inbox::new(),
            pending: VecDeque::new(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    #[cfg(test)]
    fn last_seen_at(&self) -> Instant {
        self.last_seen_at
    }

    /// Record the start of a fetch and return the previous `last_seen_at`,
    /// which becomes that fetch's membership baseline.
    pub fn begin_fetch(&mut self, fetch: FetchId, now: Instant) -> Instant {
        let baseline = self.last_seen_at;
        self.last_baseline = baseline;
        self.last_seen_at = now;
        self.last_active_at = now;
        self.last_fetch = Some(fetch);
        baseline
    }

    pub fn push_message(&mut self, from: Session, message: String) {
        self.inbox.entry(from).or_default().push(message);
    }

    pub fn has_messages(&self) -> bool {
        !self.inbox.is_empty()
    }

    pub fn take_inbox(&mut self) -> Inbox {
        std::mem::take(&mut self.inbox)
    }

    /// Put back messages whose waiter went away before it could take them.
    /// Restored messages stay ahead of anything that arrived since.
    pub fn restore_inbox(&mut self, messages: Inbox) {
        for (from, mut restored) in messages {
            let entry = self.inbox.entry(from).or_default();
            restored.append(entry);
            *entry = restored;
        }
    }

    pub fn defer(&mut self, fetch: PendingFetch) {
        self.pending.push_back(fetch);
    }

    /// Oldest waiter whose caller is still listening. Abandoned waiters
    /// encountered on the way are dropped and forgotten.
    pub fn pop_waiter(&mut self) -> Option<PendingFetch> {
        while let Some(fetch) = self.pending.pop_front() {
            if !fetch.reply.is_closed() {
                return Some(fetch);
            }
            self.forget(fetch.id);
        }
        None
    }

    /// Remove one parked fetch without disturbing the order of the rest.
    pub fn cancel(&mut self, fetch: FetchId) -> Option<PendingFetch> {
        let index = self.pending.iter().position(|pending| pending.id == fetch)?;
        let cancelled = self.pending.remove(index)?;
        self.forget(cancelled.id);
        Some(cancelled)
    }

    /// Undo the bookkeeping of a fetch that never reached its caller.
    ///
    /// If it was the most recent fetch, `last_seen_at` goes back to its
    /// baseline so the next fetch still reports members that joined meanwhile.
    pub fn forget(&mut self, fetch: FetchId) {
        if self.last_fetch != Some(fetch) {
            return;
        }
        self.last_seen_at = self.last_baseline;
        self.last_fetch = None;
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn take_waiters(&mut self) -> VecDeque<PendingFetch> {
        std::mem::take(&mut self.pending)
    }

    pub fn is_idle(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_active_at) >= ttl
    }
}
