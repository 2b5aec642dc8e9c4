//! Many sessions against one engine

mod common;

use common::{engine, payload, FaultAfterSource, GatedSource, ScriptedScorer, POISON};
use std::time::Duration;
use sase_streamscan::{AdmissionPolicy, EngineConfig, FaultKind, ScanRequest, ScanStatus};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stats_consistent_under_concurrent_sessions() {
    let mut config = EngineConfig::default();
    config.max_concurrent_scans = 16;
    let (engine, log) = engine(config, ScriptedScorer::marker(0.9, 0.1));

    let tasks: Vec<_> = (0..60)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let marker = (i % 3 == 0).then_some(0);
                let data = payload(1024 + i * 10, marker);
                engine
                    .scan_bytes(ScanRequest::file(format!("f{i}")), data)
                    .await
            })
        })
        .collect();

    let mut expected_bytes = 0;
    let mut blocked = 0;
    for task in tasks {
        let result = task.await.unwrap();
        expected_bytes += result.bytes_scanned;
        blocked += u64::from(result.blocked);
    }

    let stats = engine.stats();
    assert_eq!(stats.total_scans, 60);
    assert_eq!(blocked, 20);
    assert_eq!(stats.threats_blocked, 20);
    assert_eq!(stats.clean_scans, 40);
    assert_eq!(stats.total_bytes_scanned, expected_bytes);
    engine.flush_sink().await;
    assert_eq!(log.len(), 60);
    assert_eq!(engine.status().active_scans, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scorer_fault_isolated_to_its_session() {
    let (engine, _) = engine(EngineConfig::default(), ScriptedScorer::faulty(0.97));

    let mut poisoned = vec![0u8; 2048];
    poisoned[700] = POISON;

    let bad = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.scan_bytes(ScanRequest::file("bad"), poisoned).await })
    };
    let threat = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .scan_bytes(ScanRequest::file("threat"), payload(2048, Some(1024)))
                .await
        })
    };
    let clean = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.scan_bytes(ScanRequest::file("clean"), vec![0u8; 2048]).await })
    };

    let bad = bad.await.unwrap();
    let threat = threat.await.unwrap();
    let clean = clean.await.unwrap();

    assert_eq!(bad.status, ScanStatus::Error);
    assert_eq!(bad.details.error.unwrap().kind, FaultKind::Scorer);
    assert!(threat.blocked);
    assert_eq!(clean.status, ScanStatus::Clean);

    let stats = engine.stats();
    assert_eq!(stats.total_scans, 2);
    assert_eq!(stats.threats_blocked, 1);
    assert_eq!(stats.errored_scans, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_source_fault_mid_stream_isolated() {
    let (engine, _) = engine(EngineConfig::default(), ScriptedScorer::marker(0.97, 0.1));

    let broken = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .scan(ScanRequest::url("http://dl.test/reset"), FaultAfterSource::new(3, 512))
                .await
        })
    };
    let threat = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .scan_bytes(ScanRequest::file("threat"), payload(2048, Some(1024)))
                .await
        })
    };
    let clean = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.scan_bytes(ScanRequest::file("clean"), vec![0u8; 2048]).await })
    };

    let broken = broken.await.unwrap();
    let threat = threat.await.unwrap();
    let clean = clean.await.unwrap();

    assert_eq!(broken.status, ScanStatus::Error);
    assert_eq!(broken.probability, 0.0);
    assert!(!broken.blocked);
    assert_eq!(broken.bytes_scanned, 1536);
    assert_eq!(broken.details.error.unwrap().kind, FaultKind::ChunkSource);

    assert_eq!(threat.status, ScanStatus::ThreatDetected);
    assert!(threat.details.early_termination);
    assert_eq!(threat.probability, 0.97);
    assert_eq!(threat.bytes_scanned, 1536);

    assert_eq!(clean.status, ScanStatus::Clean);
    assert_eq!(clean.probability, 0.1);
    assert_eq!(clean.bytes_scanned, 2048);

    let stats = engine.stats();
    assert_eq!(stats.total_scans, 2);
    assert_eq!(stats.threats_blocked, 1);
    assert_eq!(stats.clean_scans, 1);
    assert_eq!(stats.errored_scans, 1);
    assert_eq!(stats.total_bytes_scanned, 1536 + 2048);
}

#[tokio::test]
async fn test_reject_when_at_capacity() {
    let mut config = EngineConfig::default();
    config.max_concurrent_scans = 1;
    config.admission = AdmissionPolicy::Reject;
    let (engine, _) = engine(config, ScriptedScorer::constant(0.0));

    let (held, release) = GatedSource::new();
    let first = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.scan(ScanRequest::file("slow"), held).await })
    };
    while engine.status().active_scans == 0 {
        tokio::task::yield_now().await;
    }

    let rejected = engine.scan_bytes(ScanRequest::file("next"), vec![0u8; 10]).await;
    assert_eq!(rejected.status, ScanStatus::Error);
    assert_eq!(rejected.details.error.unwrap().kind, FaultKind::Overloaded);

    release.send(()).unwrap();
    assert_eq!(first.await.unwrap().status, ScanStatus::Clean);

    let stats = engine.stats();
    assert_eq!(stats.total_scans, 1);
    assert_eq!(stats.errored_scans, 1);
}

#[tokio::test]
async fn test_wait_admission_queues() {
    let mut config = EngineConfig::default();
    config.max_concurrent_scans = 1;
    let (engine, _) = engine(config, ScriptedScorer::constant(0.0));

    let (held, release) = GatedSource::new();
    let first = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.scan(ScanRequest::file("slow"), held).await })
    };
    while engine.status().active_scans == 0 {
        tokio::task::yield_now().await;
    }

    let queued = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.scan_bytes(ScanRequest::file("queued"), vec![0u8; 10]).await })
    };
    tokio::task::yield_now().await;
    assert!(!queued.is_finished());

    tokio::time::sleep(Duration::from_millis(300)).await;
    release.send(()).unwrap();
    assert_eq!(first.await.unwrap().status, ScanStatus::Clean);

    // time spent waiting for a permit is not scan time
    let queued = queued.await.unwrap();
    assert_eq!(queued.status, ScanStatus::Clean);
    assert!(queued.scan_time_ms < 250.0, "scan_time_ms = {}", queued.scan_time_ms);
    assert_eq!(engine.stats().total_scans, 2);
}
