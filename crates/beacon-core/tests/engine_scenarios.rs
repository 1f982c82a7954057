//! End-to-end engine scenarios on a paused clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use beacon_core::{
    observer_fn, BeaconEngine, BeaconEvent, EngineConfig, EventKind, ObserverError, RawRecord,
};

const NS: &str = "f7826da6-4fa2-4e98-8024-bc5b71e0893e";

type Log = Arc<Mutex<Vec<(EventKind, u16, u64)>>>;

fn record(minor: i64, rssi: i64) -> RawRecord {
    RawRecord {
        namespace: NS.to_string(),
        major: 100,
        minor,
        rssi,
        tx_power: Some(-59),
        timestamp_ms: None,
    }
}

async fn engine_with_log(config: EngineConfig) -> (BeaconEngine, Log) {
    let engine = BeaconEngine::new(config).unwrap();
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    engine
        .subscribe(observer_fn("log", move |event: &BeaconEvent| {
            sink.lock().unwrap().push((
                event.kind,
                event.identifier.minor,
                event.timestamp.as_millis(),
            ));
            Ok(())
        }))
        .await;
    engine.start().await.unwrap();
    (engine, log)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn kinds(log: &Log) -> Vec<EventKind> {
    log.lock().unwrap().iter().map(|(kind, _, _)| *kind).collect()
}

#[tokio::test(start_paused = true)]
async fn test_enter_then_exit_after_silence() {
    let (engine, log) = engine_with_log(EngineConfig::default()).await;

    for second in 0..3 {
        if second > 0 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        engine.ingest(&record(1, -60)).unwrap();
    }
    settle().await;
    assert_eq!(*log.lock().unwrap(), vec![(EventKind::Enter, 1, 2000)]);

    tokio::time::sleep(Duration::from_secs(11)).await;
    let events = log.lock().unwrap().clone();
    assert_eq!(events.len(), 2);
    let (kind, minor, at) = events[1];
    assert_eq!((kind, minor), (EventKind::Exit, 1));
    assert!((12_000..=12_500).contains(&at), "exit at {at}ms");

    engine.stop().await;
    assert_eq!(kinds(&log), vec![EventKind::Enter, EventKind::Exit]);
}

#[tokio::test(start_paused = true)]
async fn test_two_sightings_are_not_enough() {
    let (engine, log) = engine_with_log(EngineConfig::default()).await;

    engine.ingest(&record(1, -60)).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    engine.ingest(&record(1, -60)).unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    engine.stop().await;
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reenter_after_exit() {
    let (engine, log) = engine_with_log(EngineConfig::default()).await;

    for _ in 0..3 {
        engine.ingest(&record(2, -70)).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    tokio::time::sleep(Duration::from_secs(12)).await;
    for _ in 0..3 {
        engine.ingest(&record(2, -70)).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    engine.stop().await;

    assert_eq!(
        kinds(&log),
        vec![
            EventKind::Enter,
            EventKind::Exit,
            EventKind::Enter,
            EventKind::Exit
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_updates_are_rate_limited() {
    let (engine, log) = engine_with_log(EngineConfig::default()).await;

    for tick in 0..=30 {
        if tick > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        engine.ingest(&record(3, -65)).unwrap();
    }
    settle().await;

    let events = log.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            (EventKind::Enter, 3, 200),
            (EventKind::Update, 3, 1200),
            (EventKind::Update, 3, 2200),
        ]
    );
    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_brief_gap_does_not_exit() {
    let (engine, log) = engine_with_log(EngineConfig::default()).await;

    for _ in 0..3 {
        engine.ingest(&record(4, -60)).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    // Past the soft timeout but short of the hard one.
    tokio::time::sleep(Duration::from_secs(7)).await;
    engine.ingest(&record(4, -60)).unwrap();
    settle().await;

    let snapshot = engine.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].status, beacon_core::PresenceStatus::Present);
    assert!(!kinds(&log).contains(&EventKind::Exit));
    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_malformed_records_never_reach_observers() {
    let (engine, log) = engine_with_log(EngineConfig::default()).await;

    for _ in 0..10 {
        assert!(engine
            .ingest(&RawRecord {
                namespace: "not-a-namespace".into(),
                ..record(5, -60)
            })
            .is_err());
        assert!(engine.ingest(&record(70_000, -60)).is_err());
        assert!(engine.ingest(&record(5, 15)).is_err());
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    engine.stop().await;

    assert!(log.lock().unwrap().is_empty());
    assert_eq!(engine.stats().rejected(), 30);
}

#[tokio::test(start_paused = true)]
async fn test_failing_observer_does_not_block_others() {
    let (engine, log) = engine_with_log(EngineConfig::default()).await;
    let mut failures = engine.observer_errors();
    engine
        .subscribe(observer_fn("broken", |_: &BeaconEvent| {
            Err(ObserverError::failed("sink unavailable"))
        }))
        .await;

    for _ in 0..3 {
        engine.ingest(&record(6, -60)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    engine.stop().await;

    assert_eq!(kinds(&log), vec![EventKind::Enter, EventKind::Exit]);
    let failure = failures.try_recv().unwrap();
    assert_eq!(failure.observer, "broken");
    assert_eq!(engine.stats().observer_failures, 2);
}

#[tokio::test(start_paused = true)]
async fn test_restart_begins_with_empty_state() {
    let (engine, _log) = engine_with_log(EngineConfig::default()).await;
    for _ in 0..3 {
        engine.ingest(&record(7, -60)).unwrap();
    }
    settle().await;
    assert_eq!(engine.snapshot().await.unwrap().len(), 1);

    engine.stop().await;
    engine.start().await.unwrap();
    assert!(engine.snapshot().await.unwrap().is_empty());
    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_ends_subscriptions_across_restart() {
    let (engine, before) = engine_with_log(EngineConfig::default()).await;
    for _ in 0..3 {
        engine.ingest(&record(8, -60)).unwrap();
    }
    settle().await;
    engine.stop().await;
    assert_eq!(kinds(&before), vec![EventKind::Enter, EventKind::Exit]);

    let after: Log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&after);
    engine
        .subscribe(observer_fn("after-restart", move |event: &BeaconEvent| {
            sink.lock().unwrap().push((
                event.kind,
                event.identifier.minor,
                event.timestamp.as_millis(),
            ));
            Ok(())
        }))
        .await;
    engine.start().await.unwrap();
    for _ in 0..3 {
        engine.ingest(&record(8, -60)).unwrap();
    }
    settle().await;
    engine.stop().await;

    // Observers registered before the first stop hear nothing more.
    assert_eq!(kinds(&before), vec![EventKind::Enter, EventKind::Exit]);
    assert_eq!(kinds(&after), vec![EventKind::Enter, EventKind::Exit]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_during_sweeps() {
    let config = EngineConfig {
        eviction_sweep_interval: Duration::from_millis(5),
        ..EngineConfig::default()
    };
    let (engine, log) = engine_with_log(config).await;

    let producers: Vec<_> = (0..8u16)
        .map(|minor| {
            let handle = engine.handle();
            tokio::spawn(async move {
                for _ in 0..50 {
                    handle.ingest(&record(i64::from(minor), -60)).unwrap();
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }

    let snapshot = engine.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 8);
    assert!(engine.stats().sweeps > 0);
    engine.stop().await;

    let stats = engine.stats();
    assert_eq!(stats.ingested, 400);
    assert_eq!(stats.processed, 400);
    let events = log.lock().unwrap().clone();
    for minor in 0..8u16 {
        let per_beacon: Vec<_> = events
            .iter()
            .filter(|(kind, id, _)| *id == minor && *kind != EventKind::Update)
            .map(|(kind, _, _)| *kind)
            .collect();
        assert_eq!(per_beacon, vec![EventKind::Enter, EventKind::Exit], "beacon {minor}");
    }
}
