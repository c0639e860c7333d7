mod support;

use beacon_storage::{DurableOverflowStore, STORAGE_FILE_NAME};
use beacon_tracker::{EventQueue, FlushOutcome};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use support::*;
use tempfile::TempDir;

#[test]
fn new_queue_is_empty() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir, RecordingTransport::new(), 50, 100);
    assert!(queue.is_empty());
    assert_eq!(queue.pending_count(), 0);
    assert_eq!(queue.stored_count(), 0);
}

#[test]
fn stays_in_memory_up_to_limit() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir, RecordingTransport::new(), 50, 100);
    for n in 0..50 {
        queue.enqueue(pageview(n));
    }
    assert_eq!(queue.pending_count(), 50);
    assert_eq!(queue.stored_count(), 0);
    assert!(!dir.path().join("events.json").exists());
}

#[test]
fn fifty_first_event_moves_oldest_to_storage() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir, RecordingTransport::new(), 50, 100);
    for n in 0..51 {
        queue.enqueue(pageview(n));
    }
    assert_eq!(queue.pending_count(), 50);
    assert_eq!(queue.stored_count(), 1);
    assert_eq!(queue.stored_events(), vec![pageview(0)]);
    assert_eq!(queue.pending_events().first(), Some(&pageview(1)));
}

#[test]
fn storage_overflow_drops_oldest_stored_event() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir, RecordingTransport::new(), 2, 3);
    for n in 0..7 {
        queue.enqueue(pageview(n));
    }
    // Events 0 and 1 were evicted; 2..=4 on disk, 5..=6 in memory.
    assert_eq!(
        queue.stored_events(),
        vec![pageview(2), pageview(3), pageview(4)]
    );
    assert_eq!(queue.pending_events(), vec![pageview(5), pageview(6)]);
}

#[tokio::test]
async fn flush_of_empty_queue_makes_no_request() {
    let dir = TempDir::new().unwrap();
    let transport = RecordingTransport::new();
    let queue = open_queue(&dir, transport.clone(), 50, 100);
    assert_eq!(queue.flush().await, FlushOutcome::Empty);
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn flush_sends_stored_then_memory_and_clears_both() {
    let dir = TempDir::new().unwrap();
    let transport = RecordingTransport::new();
    let queue = open_queue(&dir, transport.clone(), 50, 100);
    for n in 0..51 {
        queue.enqueue(pageview(n));
    }

    assert_eq!(queue.flush().await, FlushOutcome::Sent { events: 51 });

    let batches = transport.batches();
    assert_eq!(batches.len(), 1);
    let expected: Vec<_> = (0..51).map(pageview).collect();
    assert_eq!(batches[0], expected);

    assert!(queue.is_empty());
    let on_disk = DurableOverflowStore::open(dir.path().join("events.json"), 100).unwrap();
    assert!(on_disk.is_empty());
}

#[tokio::test]
async fn failed_flush_keeps_everything_for_retry() {
    let dir = TempDir::new().unwrap();
    let transport = RecordingTransport::failing();
    let queue = open_queue(&dir, transport.clone(), 2, 100);
    for n in 0..4 {
        queue.enqueue(pageview(n));
    }

    assert_eq!(queue.flush().await, FlushOutcome::Failed);
    assert_eq!(queue.stored_count(), 2);
    assert_eq!(queue.pending_count(), 2);

    transport.set_failing(false);
    assert_eq!(queue.flush().await, FlushOutcome::Sent { events: 4 });
    let batches = transport.batches();
    assert_eq!(batches[0], batches[1]);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn events_enqueued_during_flush_go_out_next_time() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(GatedTransport::default());
    let queue = Arc::new(open_queue(&dir, transport.clone(), 2, 100));
    for n in 0..3 {
        queue.enqueue(pageview(n));
    }

    let in_flight = tokio::spawn({
        let queue = queue.clone();
        async move { queue.flush().await }
    });
    transport.entered.notified().await;

    // Enough new events to push some of the in-flight ones to disk.
    for n in 3..6 {
        queue.enqueue(pageview(n));
    }
    assert_eq!(queue.flush().await, FlushOutcome::InFlight);

    transport.release.notify_one();
    assert_eq!(in_flight.await.unwrap(), FlushOutcome::Sent { events: 3 });

    let remaining: Vec<_> = queue
        .stored_events()
        .into_iter()
        .chain(queue.pending_events())
        .collect();
    assert_eq!(remaining, vec![pageview(3), pageview(4), pageview(5)]);

    let next = tokio::spawn({
        let queue = queue.clone();
        async move { queue.flush().await }
    });
    transport.entered.notified().await;
    transport.release.notify_one();
    assert_eq!(next.await.unwrap(), FlushOutcome::Sent { events: 3 });
    assert!(queue.is_empty());
}

#[tokio::test]
async fn stored_events_survive_restart() {
    let dir = TempDir::new().unwrap();
    {
        let queue = open_queue(&dir, RecordingTransport::new(), 1, 100);
        for n in 0..3 {
            queue.enqueue(pageview(n));
        }
        assert_eq!(queue.stored_count(), 2);
        // In-memory event 2 is lost with the process.
    }

    let transport = RecordingTransport::new();
    let queue = open_queue(&dir, transport.clone(), 1, 100);
    assert_eq!(queue.stored_count(), 2);

    queue.enqueue(pageview(9));
    assert_eq!(queue.flush().await, FlushOutcome::Sent { events: 3 });
    assert_eq!(
        transport.batches()[0],
        vec![pageview(0), pageview(1), pageview(9)]
    );
}

#[tokio::test]
async fn permanently_rejected_batch_is_dropped() {
    let dir = TempDir::new().unwrap();
    let transport = RecordingTransport::rejecting(400);
    let queue = open_queue(&dir, transport.clone(), 2, 100);
    for n in 0..4 {
        queue.enqueue(pageview(n));
    }

    assert_eq!(queue.flush().await, FlushOutcome::Dropped { events: 4 });
    assert!(queue.is_empty());
    assert_eq!(queue.flush().await, FlushOutcome::Empty);
    assert_eq!(transport.call_count(), 1);
}

/// Replaces the store file with a non-empty directory so every atomic
/// rename onto it fails.
fn block_store(dir: &TempDir) {
    let path = dir.path().join("events.json");
    if path.is_file() {
        std::fs::remove_file(&path).unwrap();
    }
    std::fs::create_dir_all(path.join("blocker")).unwrap();
}

fn unblock_store(dir: &TempDir) {
    std::fs::remove_dir_all(dir.path().join("events.json")).unwrap();
}

#[tokio::test]
async fn failed_promotion_keeps_event_in_memory() {
    let dir = TempDir::new().unwrap();
    let transport = RecordingTransport::new();
    let queue = open_queue(&dir, transport.clone(), 2, 100);
    block_store(&dir);

    for n in 0..3 {
        queue.enqueue(pageview(n));
    }
    assert_eq!(queue.pending_count(), 3);
    assert_eq!(queue.stored_count(), 0);

    unblock_store(&dir);
    assert_eq!(queue.flush().await, FlushOutcome::Sent { events: 3 });
    assert_eq!(transport.batches()[0], vec![pageview(0), pageview(1), pageview(2)]);
    assert_eq!(queue.flush().await, FlushOutcome::Empty);
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn failed_clear_after_flush_does_not_resend() {
    let dir = TempDir::new().unwrap();
    let transport = RecordingTransport::new();
    let queue = open_queue(&dir, transport.clone(), 1, 100);
    for n in 0..3 {
        queue.enqueue(pageview(n));
    }
    assert_eq!(queue.stored_count(), 2);

    block_store(&dir);
    assert_eq!(queue.flush().await, FlushOutcome::Sent { events: 3 });
    assert!(queue.is_empty());
    assert_eq!(queue.flush().await, FlushOutcome::Empty);

    // Promotion still fails; the new events wait in memory.
    queue.enqueue(pageview(3));
    queue.enqueue(pageview(4));
    assert_eq!(queue.flush().await, FlushOutcome::Sent { events: 2 });
    assert_eq!(transport.batches()[1], vec![pageview(3), pageview(4)]);

    // Once writable again, the stale prefix is swept before the next append.
    unblock_store(&dir);
    queue.enqueue(pageview(5));
    queue.enqueue(pageview(6));
    let on_disk = DurableOverflowStore::open(dir.path().join("events.json"), 100).unwrap();
    assert_eq!(on_disk.read_all(), vec![pageview(5)]);
    assert_eq!(queue.stored_events(), vec![pageview(5)]);
    assert_eq!(transport.call_count(), 2);
}

#[test]
fn open_uses_config_paths_and_limits() {
    let dir = TempDir::new().unwrap();
    let mut config = beacon_tracker::TrackerConfig::new(SITE_ID, 10, dir.path());
    config.queue_size_limit = 1;
    let queue = EventQueue::open(&config, RecordingTransport::new());
    queue.enqueue(pageview(0));
    queue.enqueue(pageview(1));
    assert_eq!(queue.stored_count(), 1);
    assert!(dir.path().join(STORAGE_FILE_NAME).exists());
}

#[test]
fn unreadable_store_starts_empty() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(STORAGE_FILE_NAME), b"garbage").unwrap();
    let config = beacon_tracker::TrackerConfig::new(SITE_ID, 10, dir.path());
    let queue = EventQueue::open(&config, RecordingTransport::new());
    assert!(queue.is_empty());
}

mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn totals_stay_within_both_limits(
            queue_limit in 1usize..6,
            storage_limit in 1usize..6,
            enqueues in 0usize..40,
        ) {
            let dir = TempDir::new().unwrap();
            let queue = open_queue(&dir, RecordingTransport::new(), queue_limit, storage_limit);
            for n in 0..enqueues {
                queue.enqueue(pageview(n));
                prop_assert!(queue.pending_count() <= queue_limit);
                prop_assert!(queue.stored_count() <= storage_limit);
            }
            // Exactly the newest events are retained, in order.
            let kept: Vec<_> = queue
                .stored_events()
                .into_iter()
                .chain(queue.pending_events())
                .collect();
            let first = enqueues.saturating_sub(queue_limit + storage_limit);
            let expected: Vec<_> = (first..enqueues).map(pageview).collect();
            prop_assert_eq!(kept, expected);
        }
    }
}
