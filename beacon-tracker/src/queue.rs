//! Bounded event queue with durable overflow.
//!
//! Pending events live in a bounded in-memory deque. When it grows past its
//! limit, the oldest entries are promoted one at a time into the
//! [`DurableOverflowStore`]; when that store is full its oldest entry is
//! dropped. A flush sends durable entries first, then in-memory ones, as a
//! single batch and acknowledges them only after the collector accepts it.
//!
//! Every entry carries a monotonically increasing sequence number. A flush
//! remembers the highest number it sent and, on success, removes exactly
//! the entries at or below it, so events enqueued while the request was in
//! flight are kept for the next flush.
//!
//! The acknowledged watermark is also kept in memory. If the overflow store
//! cannot be rewritten after a flush, its acknowledged prefix is hidden from
//! later flushes and swept on the next successful write.

use crate::config::TrackerConfig;
use crate::transport::EventTransport;
use beacon_storage::{DurableOverflowStore, StoredEvent};
use beacon_types::Event;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Result of a flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending; no request was made.
    Empty,
    /// The collector accepted a batch of this many events.
    Sent { events: usize },
    /// The request failed; every event is still queued.
    Failed,
    /// The collector refused the batch for good; its events were dropped.
    Dropped { events: usize },
    /// Another flush was already in flight.
    InFlight,
}

struct QueueState {
    pending: VecDeque<StoredEvent>,
    overflow: DurableOverflowStore,
    next_seq: u64,
    /// Highest sequence number the collector has accepted.
    acked_through: Option<u64>,
}

impl QueueState {
    fn is_live(&self, seq: u64) -> bool {
        self.acked_through.is_none_or(|through| seq > through)
    }

    /// Overflow entries not yet acknowledged, oldest first.
    fn live_overflow(&self) -> impl Iterator<Item = &StoredEvent> {
        self.overflow.records().filter(move |r| self.is_live(r.seq))
    }

    /// Drops acknowledged entries still sitting in the overflow store.
    fn sweep_acknowledged(&mut self) {
        let Some(through) = self.acked_through else {
            return;
        };
        if let Err(e) = self.overflow.remove_through(through) {
            warn!("failed to clear flushed events from overflow store: {e}");
        }
    }

    /// Moves the oldest pending entries into the overflow store until the
    /// in-memory queue is back within `limit`.
    ///
    /// Each entry is written to disk before it leaves memory, and both
    /// happen under the queue lock, so no observer sees it twice or not at
    /// all. A failed write abandons promotion for this round.
    fn promote_overflow(&mut self, limit: usize) {
        self.sweep_acknowledged();
        while self.pending.len() > limit {
            let Some(oldest) = self.pending.front().cloned() else {
                break;
            };
            match self.overflow.append(oldest) {
                Ok(evicted) => {
                    self.pending.pop_front();
                    if let Some(evicted) = evicted {
                        debug!(
                            "overflow store full, dropped oldest event (seq {})",
                            evicted.seq
                        );
                    }
                }
                Err(e) => {
                    warn!("failed to promote event to overflow store: {e}");
                    break;
                }
            }
        }
    }

    fn acknowledge(&mut self, through: u64) {
        self.pending.retain(|r| r.seq > through);
        self.acked_through = Some(self.acked_through.map_or(through, |t| t.max(through)));
        self.sweep_acknowledged();
    }
}

/// The pending-event queue shared by the tracker, scheduler and heartbeats.
pub struct EventQueue {
    state: Mutex<QueueState>,
    transport: Arc<dyn EventTransport>,
    /// Held for the duration of a flush so at most one batch is in flight.
    flush_gate: tokio::sync::Mutex<()>,
    queue_limit: usize,
}

impl EventQueue {
    pub fn new(
        overflow: DurableOverflowStore,
        transport: Arc<dyn EventTransport>,
        queue_limit: usize,
    ) -> Self {
        let next_seq = overflow.last_seq().map_or(0, |s| s + 1);
        if !overflow.is_empty() {
            info!(
                "restored {} events from overflow store {}",
                overflow.count(),
                overflow.path().display()
            );
        }
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                overflow,
                next_seq,
                acked_through: None,
            }),
            transport,
            flush_gate: tokio::sync::Mutex::new(()),
            queue_limit,
        }
    }

    /// Opens the overflow store named by `config` and builds a queue over it.
    pub fn open(config: &TrackerConfig, transport: Arc<dyn EventTransport>) -> Self {
        let overflow =
            DurableOverflowStore::open_or_empty(config.storage_path(), config.storage_size_limit);
        Self::new(overflow, transport, config.queue_size_limit)
    }

    /// Adds an event, spilling the oldest entries to disk if over the limit.
    pub fn enqueue(&self, event: Event) {
        let mut state = self.lock_state();
        let seq = state.next_seq;
        state.next_seq += 1;
        debug!("enqueuing {} event (seq {seq})", event.action_name());
        state.pending.push_back(StoredEvent { seq, event });
        if state.pending.len() > self.queue_limit {
            debug!("queue size exceeded, expelling oldest event to overflow store");
            state.promote_overflow(self.queue_limit);
        }
    }

    /// Sends every pending event as one batch.
    ///
    /// Transient errors are logged and reported as [`FlushOutcome::Failed`];
    /// the events stay queued for the next attempt. A permanent rejection
    /// drops the batch, since resending it can only fail the same way.
    pub async fn flush(&self) -> FlushOutcome {
        let Ok(_gate) = self.flush_gate.try_lock() else {
            debug!("flush already in flight, skipping");
            return FlushOutcome::InFlight;
        };

        let (batch, through) = {
            let state = self.lock_state();
            let records: Vec<&StoredEvent> =
                state.live_overflow().chain(state.pending.iter()).collect();
            let through = records.iter().map(|r| r.seq).max();
            let batch: Vec<Event> = records.into_iter().map(|r| r.event.clone()).collect();
            (batch, through)
        };

        let Some(through) = through else {
            return FlushOutcome::Empty;
        };

        info!("flushing {} events", batch.len());
        match self.transport.send(&batch).await {
            Ok(()) => {
                self.lock_state().acknowledge(through);
                FlushOutcome::Sent {
                    events: batch.len(),
                }
            }
            Err(e) if e.is_transient() => {
                warn!("flush of {} events failed, will retry: {e}", batch.len());
                FlushOutcome::Failed
            }
            Err(e) => {
                warn!("collector refused {} events, dropping them: {e}", batch.len());
                self.lock_state().acknowledge(through);
                FlushOutcome::Dropped {
                    events: batch.len(),
                }
            }
        }
    }

    /// Events waiting in memory.
    pub fn pending_count(&self) -> usize {
        self.lock_state().pending.len()
    }

    /// Events waiting in the overflow store.
    pub fn stored_count(&self) -> usize {
        self.lock_state().live_overflow().count()
    }

    pub fn is_empty(&self) -> bool {
        let state = self.lock_state();
        state.pending.is_empty() && state.live_overflow().next().is_none()
    }

    /// Snapshot of the overflow store contents, oldest first.
    pub fn stored_events(&self) -> Vec<Event> {
        self.lock_state()
            .live_overflow()
            .map(|r| r.event.clone())
            .collect()
    }

    /// Snapshot of the in-memory queue, oldest first.
    pub fn pending_events(&self) -> Vec<Event> {
        self.lock_state()
            .pending
            .iter()
            .map(|r| r.event.clone())
            .collect()
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
