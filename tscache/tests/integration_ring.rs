//! Integration tests for chunk ring behavior.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tscache::config::CacheConfig;
use tscache::error::PushError;
use tscache::ring::ChunkRing;
use tscache::sink::{ChunkSlots, NullSink};

fn ring(span: u32, chunks: usize) -> ChunkRing {
    ChunkRing::new("it", CacheConfig::new(span, chunks).unwrap(), Arc::new(NullSink))
}

/// Deterministic pseudo-random gaps so the test covers sparse and dense runs.
fn timestamps(seed: u64, count: usize) -> Vec<u32> {
    let mut state = seed;
    let mut ts = 1_700_000_000u32;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
        let gap = u32::try_from((state >> 33) % 90).unwrap();
        ts += gap;
        out.push(ts);
    }
    out
}

#[test]
fn test_range_query_completeness() {
    let span = 60;
    let ring = ring(span, 5);
    let pushed = timestamps(7, 400);
    for (i, &ts) in pushed.iter().enumerate() {
        ring.push(ts, f64::from(u32::try_from(i).unwrap())).unwrap();
    }

    let (oldest, newest) = ring.get_info();
    let retained: Vec<(u32, f64)> = ring.get(oldest, newest + 1).collect();

    // Everything retained comes from the last five non-empty buckets.
    let mut by_bucket: HashMap<u32, usize> = HashMap::new();
    for &(ts, _) in &retained {
        *by_bucket.entry(ts - ts % span).or_default() += 1;
    }
    assert_eq!(by_bucket.len(), 5);

    for (from, to) in [(oldest, newest + 1), (oldest + 30, newest - 30), (oldest + 100, oldest + 101)] {
        let got: Vec<(u32, f64)> = ring.get(from, to).collect();
        let expected: Vec<(u32, f64)> = pushed
            .iter()
            .enumerate()
            .filter(|&(_, &ts)| ts >= oldest && ts >= from && ts < to)
            .map(|(i, &ts)| (ts, f64::from(u32::try_from(i).unwrap())))
            .collect();
        assert_eq!(got, expected, "range {from}..{to}");
    }
}

#[test]
fn test_chunks_visited_in_time_order() {
    let ring = ring(10, 4);
    for ts in timestamps(3, 200) {
        ring.push(ts, 0.0).unwrap();
    }

    let bounds = ring.chunk_bounds();
    assert_eq!(bounds.len(), 4);
    assert!(bounds.windows(2).all(|w| w[0].t0 < w[1].t0));
    assert_eq!(bounds.iter().filter(|b| !b.closed).count(), 1);
    assert!(!bounds.last().unwrap().closed);

    let got: Vec<u32> = ring.get(0, u32::MAX).map(|(ts, _)| ts).collect();
    assert!(got.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_stale_rejection_leaves_state_unchanged() {
    let ring = ring(60, 3);
    for ts in [100, 200, 300] {
        ring.push(ts, 1.0).unwrap();
    }
    let bounds = ring.chunk_bounds();
    let info = ring.get_info();
    let pos = ring.current_pos();

    for late in [0, 59, 100, 239] {
        let err = ring.push(late, 2.0).unwrap_err();
        assert!(err.is_stale(), "{late}: {err}");
    }

    assert_eq!(ring.chunk_bounds(), bounds);
    assert_eq!(ring.get_info(), info);
    assert_eq!(ring.current_pos(), pos);
}

#[test]
fn test_eviction_boundary() {
    let ring = ring(60, 2);
    for ts in [10, 70, 130, 190] {
        ring.push(ts, 1.0).unwrap();
    }

    let (oldest, _) = ring.get_info();
    assert_eq!(oldest, 130);
    assert_eq!(ring.get(0, oldest).count(), 0);
    assert_eq!(ring.get(10, 71).count(), 0);
}

#[test]
fn test_sink_receives_every_closed_chunk_once() {
    let slots = Arc::new(ChunkSlots::new());
    let ring = ChunkRing::new("it", CacheConfig::new(10, 3).unwrap(), slots.clone());
    for ts in 0..100 {
        ring.push(ts, f64::from(ts)).unwrap();
    }

    let closed = slots.pop_all("it");
    let t0s: Vec<u32> = closed.iter().map(|c| c.t0()).collect();
    assert_eq!(t0s, (0..9).map(|i| i * 10).collect::<Vec<_>>());
    assert!(closed.iter().all(|c| c.len() == 10 && c.is_closed()));

    // Closed chunks keep answering after eviction from the ring.
    let samples: Vec<(u32, f64)> = closed[0].iter().collect();
    assert_eq!(samples.first(), Some(&(0, 0.0)));
    assert_eq!(samples.last(), Some(&(9, 9.0)));
}

#[test]
fn test_closed_chunk_rejects_push() {
    let ring = ring(60, 3);
    ring.push(1, 1.0).unwrap();
    assert!(ring.close());

    assert!(matches!(ring.push(2, 2.0), Err(PushError::ChunkClosed(_))));
    assert_eq!(ring.get_info(), (1, 1));
}

#[test]
fn test_concurrent_readers_with_single_writer() {
    let ring = Arc::new(ring(10, 4));
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let ring = Arc::clone(&ring);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut queries = 0u64;
                while !done.load(Ordering::Acquire) {
                    let (oldest, newest) = ring.get_info();
                    assert!(oldest <= newest);

                    let samples: Vec<(u32, f64)> = ring.get(0, u32::MAX).collect();
                    // The writer pushes value == timestamp in increasing order,
                    // so any consistent snapshot is strictly increasing.
                    assert!(samples.windows(2).all(|w| w[0].0 < w[1].0));
                    assert!(samples.iter().all(|&(ts, v)| f64::from(ts) == v));
                    assert!(ring.len() <= 4);
                    queries += 1;
                }
                queries
            })
        })
        .collect();

    for ts in 1..20_000u32 {
        ring.push(ts, f64::from(ts)).unwrap();
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        reader.join().unwrap();
    }

    let (oldest, newest) = ring.get_info();
    assert_eq!(newest, 19_999);
    assert_eq!(oldest, 19_960);
}
