//! Notification send queue
//!
//! At most one entry is queued per session; further arrivals coalesce into
//! the pending entry until it is dispatched. Draining walks the queue from
//! the head and dispatches the first eligible entry: eligible means the
//! session no longer exists, has no pacing configured, or its pacing
//! window has elapsed. Entries for destroyed sessions are still delivered
//! so the controller's next read observes the closed socket.
//!
//! [`SendQueue`] holds the pure bookkeeping; [`Notifier`] is the task that
//! owns it, fed by an unbounded channel so the relay never blocks on
//! notification work.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::notify::NotifyClient;
use crate::registry::SessionRegistry;

/// One queued notification. The URL is prebuilt at enqueue time so the
/// entry stays deliverable after its session is destroyed.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub session_id: String,
    pub url: String,
}

/// Coalescing, paced queue of pending notifications.
#[derive(Debug, Default)]
pub struct SendQueue {
    entries: VecDeque<QueueEntry>,
    pending: HashSet<String>,
    last_sent: HashMap<String, Instant>,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry unless its session already has one queued.
    /// Returns false when the entry coalesced away.
    pub fn enqueue(&mut self, entry: QueueEntry) -> bool {
        if self.pending.contains(&entry.session_id) {
            return false;
        }
        self.pending.insert(entry.session_id.clone());
        self.entries.push_back(entry);
        true
    }

    /// Remove and return the first eligible entry, recording its dispatch
    /// time. `pace_of` returns the session's current pace, or `None` when
    /// the session no longer exists.
    pub fn pop_eligible(
        &mut self,
        now: Instant,
        pace_of: impl Fn(&str) -> Option<Duration>,
    ) -> Option<QueueEntry> {
        let index = self
            .entries
            .iter()
            .position(|entry| self.eligible_at(entry, now, &pace_of) <= now)?;

        let entry = self.entries.remove(index)?;
        self.pending.remove(&entry.session_id);
        if pace_of(&entry.session_id).is_some() {
            self.last_sent.insert(entry.session_id.clone(), now);
        } else {
            self.last_sent.remove(&entry.session_id);
        }
        Some(entry)
    }

    /// Earliest instant at which any queued entry becomes eligible.
    pub fn next_eligible_at(
        &self,
        now: Instant,
        pace_of: impl Fn(&str) -> Option<Duration>,
    ) -> Option<Instant> {
        self.entries
            .iter()
            .map(|entry| self.eligible_at(entry, now, &pace_of))
            .min()
    }

    fn eligible_at(
        &self,
        entry: &QueueEntry,
        now: Instant,
        pace_of: &impl Fn(&str) -> Option<Duration>,
    ) -> Instant {
        match pace_of(&entry.session_id) {
            // Session destroyed: deliver the final notification immediately
            None => now,
            Some(pace) if pace.is_zero() => now,
            Some(pace) => match self.last_sent.get(&entry.session_id) {
                Some(last) => *last + pace,
                None => now,
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Background task that owns the send queue and dispatches notifications.
pub struct Notifier {
    rx: mpsc::UnboundedReceiver<QueueEntry>,
    queue: SendQueue,
    registry: SessionRegistry,
    client: NotifyClient,
    cancel: CancellationToken,
}

impl Notifier {
    /// Spawn the notifier. The returned sender is the enqueue side; the
    /// token stops the task after one final drain of whatever is queued.
    pub fn spawn(
        registry: SessionRegistry,
        client: NotifyClient,
        cancel: CancellationToken,
    ) -> (mpsc::UnboundedSender<QueueEntry>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let notifier = Self {
            rx,
            queue: SendQueue::new(),
            registry,
            client,
            cancel,
        };
        let handle = tokio::spawn(notifier.run());
        (tx, handle)
    }

    async fn run(mut self) {
        loop {
            let wake = self
                .queue
                .next_eligible_at(Instant::now(), |id| self.registry.notify_pace(id));

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                entry = self.rx.recv() => match entry {
                    Some(entry) => {
                        if !self.queue.enqueue(entry) {
                            debug!("notification coalesced into pending entry");
                        }
                    }
                    None => break,
                },
                _ = sleep_until_opt(wake) => {
                    let eligible = self
                        .queue
                        .pop_eligible(Instant::now(), |id| self.registry.notify_pace(id));
                    if let Some(entry) = eligible {
                        self.client.send(&entry.url).await;
                    }
                }
            }
        }

        // Shutdown: deliver remaining (final) notifications once. Sessions
        // are gone by the time the daemon cancels us, so pacing no longer
        // applies.
        while let Ok(entry) = self.rx.try_recv() {
            self.queue.enqueue(entry);
        }
        let now = Instant::now();
        while let Some(entry) = self.queue.pop_eligible(now, |_| None) {
            self.client.send(&entry.url).await;
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
