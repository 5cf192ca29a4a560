//! Integration tests for the series registry and closed-chunk sinks.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tscache::config::CacheConfig;
use tscache::error::{CacheError, PushError};
use tscache::registry::SeriesRegistry;
use tscache::ring::PushOutcome;
use tscache::sink::{ChannelSink, ChunkSlots, NullSink};

#[test]
fn test_parallel_producers_on_distinct_series() {
    let slots = Arc::new(ChunkSlots::new());
    let registry = Arc::new(SeriesRegistry::new(CacheConfig::new(10, 4).unwrap(), slots.clone()));

    let producers: Vec<_> = (0..8)
        .map(|p| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let series = format!("disk.io{{dev=sd{p}}}");
                for ts in 0..1_000u32 {
                    registry.push(&series, ts, f64::from(ts * p)).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    assert_eq!(registry.len(), 8);
    for p in 0..8u32 {
        let series = format!("disk.io{{dev=sd{p}}}");
        assert_eq!(registry.info(&series), Some((960, 999)));

        let samples: Vec<(u32, f64)> = registry.query(&series, 0, u32::MAX).collect();
        assert_eq!(samples.len(), 40);
        assert!(samples.iter().all(|&(ts, v)| v == f64::from(ts * p)));

        // 100 buckets, the last still open.
        assert_eq!(slots.pop_all(&series).len(), 99);
    }

    let stats = registry.stats();
    assert_eq!(stats.series, 8);
    assert_eq!(stats.pushes, 8_000);
    assert_eq!(stats.rotations, 8 * 99);
    assert_eq!(stats.evictions, 8 * 96);
    assert_eq!(stats.stale_samples, 0);
}

#[test]
fn test_parallel_producers_on_one_series() {
    let registry = Arc::new(SeriesRegistry::new(CacheConfig::new(100, 8).unwrap(), Arc::new(NullSink)));

    // Every producer writes into the same bucket, so all pushes are accepted.
    let producers: Vec<_> = (0..4u32)
        .map(|p| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for i in 0..250u32 {
                    registry.push("shared", p * 25 + i % 25, f64::from(p)).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let ring = registry.ring("shared").unwrap();
    assert_eq!(ring.len(), 1);
    assert_eq!(registry.query("shared", 0, 100).count(), 1_000);

    let mut per_producer: HashMap<u64, usize> = HashMap::new();
    for (_, v) in registry.query("shared", 0, 100) {
        *per_producer.entry(v.to_bits()).or_default() += 1;
    }
    assert_eq!(per_producer.len(), 4);
    assert!(per_producer.values().all(|&n| n == 250));
}

#[test]
fn test_channel_sink_consumer_thread() {
    let (sink, rx) = ChannelSink::new();
    let registry = SeriesRegistry::new(CacheConfig::new(60, 2).unwrap(), Arc::new(sink));

    let consumer = thread::spawn(move || {
        let mut persisted: Vec<(String, u32, Vec<(u32, f64)>)> = Vec::new();
        for closed in rx {
            let samples = closed.chunk.iter().collect();
            persisted.push((closed.series_id, closed.chunk.t0(), samples));
        }
        persisted
    });

    for ts in (0..600).step_by(20) {
        registry.push("net.rx", ts, f64::from(ts)).unwrap();
    }
    assert!(registry.remove("net.rx"));
    drop(registry);

    let persisted = consumer.join().unwrap();
    let t0s: Vec<u32> = persisted.iter().map(|(_, t0, _)| *t0).collect();
    assert_eq!(t0s, vec![0, 60, 120, 180, 240, 300, 360, 420, 480, 540]);
    assert!(persisted.iter().all(|(id, _, _)| id == "net.rx"));

    // Every accepted sample reached the consumer exactly once.
    let all: Vec<u32> = persisted.iter().flat_map(|(_, _, s)| s.iter().map(|&(ts, _)| ts)).collect();
    assert_eq!(all, (0..600).step_by(20).collect::<Vec<_>>());
}

#[test]
fn test_remove_during_pushes_loses_nothing() {
    let slots = Arc::new(ChunkSlots::new());
    let registry = Arc::new(SeriesRegistry::new(CacheConfig::new(5, 3).unwrap(), slots.clone()));
    let done = Arc::new(AtomicBool::new(false));

    let remover = {
        let registry = Arc::clone(&registry);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut removed = 0u32;
            while !done.load(Ordering::Acquire) {
                if registry.remove("flappy") {
                    removed += 1;
                }
                thread::yield_now();
            }
            removed
        })
    };

    let pushes = 20_000u32;
    for ts in 0..pushes {
        registry.push("flappy", ts, f64::from(ts)).unwrap();
    }
    done.store(true, Ordering::Release);
    remover.join().unwrap();
    registry.remove("flappy");

    // Every accepted sample sits in exactly one closed chunk.
    let mut seen: Vec<u32> = slots
        .drain()
        .into_iter()
        .flat_map(|(_, chunks)| chunks)
        .flat_map(|chunk| chunk.iter().map(|(ts, _)| ts).collect::<Vec<_>>())
        .collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..pushes).collect::<Vec<_>>());
}

#[test]
fn test_late_samples_counted_not_stored() {
    let registry = SeriesRegistry::new(CacheConfig::new(60, 3).unwrap(), Arc::new(NullSink));

    assert_eq!(registry.push("s", 10, 1.0).unwrap(), PushOutcome::Started);
    assert_eq!(
        registry.push("s", 70, 2.0).unwrap(),
        PushOutcome::Rotated { evicted: false }
    );

    let err = registry.push("s", 20, 3.0).unwrap_err();
    assert!(matches!(err, CacheError::Push(PushError::StaleSample { bucket: 0, .. })));

    // Same bucket, earlier timestamp: accepted.
    assert_eq!(registry.push("s", 61, 4.0).unwrap(), PushOutcome::Appended);

    assert_eq!(registry.query("s", 0, 200).collect_all(), vec![(10, 1.0), (70, 2.0), (61, 4.0)]);
    assert_eq!(registry.stats().stale_samples, 1);
}

#[test]
fn test_flags_are_per_series() {
    let registry = SeriesRegistry::new(CacheConfig::default(), Arc::new(NullSink));
    registry.push("a", 1, 1.0).unwrap();
    registry.push("b", 1, 1.0).unwrap();

    assert!(registry.set_flag("a", 3));
    assert_eq!(registry.flag("a"), Some(3));
    assert_eq!(registry.flag("b"), Some(0));
    assert_eq!(registry.flag("c"), None);
    assert!(!registry.set_flag("c", 1));
}

#[test]
fn test_config_file_drives_registry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");
    std::fs::write(&path, r#"{ "span_seconds": 30, "num_chunks": 2 }"#).unwrap();

    let config = CacheConfig::load(&path).unwrap();
    let registry = SeriesRegistry::new(config, Arc::new(NullSink));
    for ts in [0, 30, 60, 90] {
        registry.push("s", ts, 0.0).unwrap();
    }

    assert_eq!(registry.info("s"), Some((60, 90)));
    assert_eq!(registry.ring("s").unwrap().capacity(), 2);
}
