//! Ordering guarantees under arbitrary arrival order

use std::sync::Arc;

use follower_maze::dispatch::Ingest;
use follower_maze::registry::RegistryConfig;
use follower_maze::reorder::InsertOutcome;
use follower_maze::{
    ClientRegistry, Dispatcher, Event, ReorderBuffer, ReorderConfig, Sequencer, Stats,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// All orderings of `items` (Heap's algorithm)
fn permutations(items: &[u64]) -> Vec<Vec<u64>> {
    fn heap(k: usize, items: &mut Vec<u64>, out: &mut Vec<Vec<u64>>) {
        if k == 1 {
            out.push(items.clone());
            return;
        }
        heap(k - 1, items, out);
        for i in 0..k - 1 {
            if k % 2 == 0 {
                items.swap(i, k - 1);
            } else {
                items.swap(0, k - 1);
            }
            heap(k - 1, items, out);
        }
    }

    let mut items = items.to_vec();
    let mut out = Vec::new();
    heap(items.len(), &mut items, &mut out);
    out
}

/// Deterministic shuffle so failures are reproducible
fn shuffled(len: u64, seed: u64) -> Vec<u64> {
    let mut ids: Vec<u64> = (1..=len).collect();
    let mut state = seed;
    for i in (1..ids.len()).rev() {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let j = (state >> 33) as usize % (i + 1);
        ids.swap(i, j);
    }
    ids
}

fn sequencer() -> (Sequencer, ClientRegistry) {
    let stats = Arc::new(Stats::new());
    let registry = ClientRegistry::new(RegistryConfig::default(), Arc::clone(&stats));
    let dispatcher = Dispatcher::new(registry.clone(), Arc::clone(&stats));
    let config = ReorderConfig {
        max_gap_wait: None,
        ..ReorderConfig::default()
    };
    (Sequencer::new(config, dispatcher, stats), registry)
}

fn ingest(line: &str) -> Ingest {
    Ingest {
        event: Event::parse(line).unwrap(),
        source: CancellationToken::new(),
    }
}

#[test]
fn test_every_permutation_releases_in_order() {
    let perms = permutations(&[1, 2, 3, 4, 5, 6]);
    assert_eq!(perms.len(), 720);

    for perm in perms {
        let mut buffer = ReorderBuffer::new(ReorderConfig::default());
        let now = Instant::now();
        let mut released = Vec::new();

        for id in &perm {
            let event = Event::parse(&format!("{id}|B")).unwrap();
            let (outcome, release) = buffer.insert(event, now).unwrap();
            assert_eq!(outcome, InsertOutcome::Accepted);
            assert!(release.skipped.is_none());
            released.extend(release.events.iter().map(|e| e.sequence_id));
        }

        assert_eq!(released, vec![1, 2, 3, 4, 5, 6], "arrival order {perm:?}");
        assert!(buffer.is_empty());
        assert_eq!(buffer.last_released(), 6);
    }
}

#[test]
fn test_replayed_ids_never_release_twice() {
    let mut buffer = ReorderBuffer::new(ReorderConfig::default());
    let now = Instant::now();
    let mut released = Vec::new();

    for id in shuffled(50, 7).into_iter().chain(shuffled(50, 11)) {
        let event = Event::parse(&format!("{id}|B")).unwrap();
        let (_, release) = buffer.insert(event, now).unwrap();
        released.extend(release.events.iter().map(|e| e.sequence_id));
    }

    assert_eq!(released, (1..=50).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_client_sees_notifications_in_sequence_order() {
    let (mut sequencer, registry) = sequencer();
    let (client, server) = tokio::io::duplex(64 * 1024);
    registry.register(1, None, server);

    for id in shuffled(200, 42) {
        sequencer.ingest(ingest(&format!("{id}|B")));
    }

    let mut lines = BufReader::new(client).lines();
    for expected in 1..=200u64 {
        let line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(line, format!("{expected}|B"));
    }
}

#[tokio::test]
async fn test_graph_state_independent_of_arrival_order() {
    // 1 follows 2, unfollows, follows again; 3 follows 2 and unfollows
    let script = [
        "1|F|1|2", "2|F|3|2", "3|U|1|2", "4|U|3|2", "5|F|1|2", "6|F|4|2", "7|U|4|9",
    ];

    for seed in [1, 2, 3, 5, 8, 13] {
        let (mut sequencer, _registry) = sequencer();
        for pos in shuffled(script.len() as u64, seed) {
            sequencer.ingest(ingest(script[pos as usize - 1]));
        }

        let graph = sequencer.dispatcher().graph();
        let graph = graph.read();
        let mut followers = graph.followers_of(2);
        followers.sort_unstable();
        assert_eq!(followers, vec![1, 4], "seed {seed}");
        assert_eq!(graph.edge_count(), 2);
    }
}

#[tokio::test]
async fn test_status_updates_follow_graph_at_release_time() {
    let (mut sequencer, registry) = sequencer();
    let (client, server) = tokio::io::duplex(4096);
    registry.register(1, None, server);

    // Status 2 is before the follow and must not reach client 1
    for line in ["4|S|5", "3|F|1|5", "1|B", "2|S|5", "5|U|1|5", "6|S|5", "7|B"] {
        sequencer.ingest(ingest(line));
    }

    let mut lines = BufReader::new(client).lines();
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "1|B");
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "4|S|5");
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "7|B");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_broadcast_exactly_once_while_sessions_churn() {
    const BROADCASTS: u64 = 300;

    let (mut sequencer, registry) = sequencer();
    let mut stable = Vec::new();
    for id in 1..=3 {
        let (client, server) = tokio::io::duplex(64 * 1024);
        registry.register(id, None, server);
        stable.push(BufReader::new(client).lines());
    }

    let stop = CancellationToken::new();
    let (started_tx, started_rx) = tokio::sync::oneshot::channel();
    let churn = {
        let registry = registry.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            let mut started = Some(started_tx);
            let mut cycles = 0u64;
            while !stop.is_cancelled() {
                for id in 100..110 {
                    let (_client, server) = tokio::io::duplex(1024);
                    registry.register(id, None, server);
                    if let Some(started) = started.take() {
                        let _ = started.send(());
                    }
                    tokio::task::yield_now().await;
                    registry.unregister(id);
                }
                cycles += 1;
            }
            cycles
        })
    };
    started_rx.await.unwrap();

    for id in shuffled(BROADCASTS, 99) {
        sequencer.ingest(ingest(&format!("{id}|B")));
        tokio::task::yield_now().await;
    }
    stop.cancel();
    assert!(churn.await.unwrap() > 0);

    for lines in &mut stable {
        for expected in 1..=BROADCASTS {
            let line = lines.next_line().await.unwrap().unwrap();
            assert_eq!(line, format!("{expected}|B"));
        }
    }
    assert_eq!(registry.len(), 3);
}

