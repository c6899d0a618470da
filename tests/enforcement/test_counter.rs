// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Rolling window counting and write failure handling

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fabstir_content_guard::enforcement::{
    CounterError, InMemoryEventStore, PortError, ViolationCounter, ViolationEvent,
    ViolationEventStore,
};
use fabstir_content_guard::{BlockSource, GuardMetrics};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn reasons() -> Vec<String> {
    vec!["self_harm".to_string()]
}

struct ToggleStore {
    inner: InMemoryEventStore,
    fail_writes: AtomicBool,
}

#[async_trait]
impl ViolationEventStore for ToggleStore {
    async fn append(&self, event: ViolationEvent) -> Result<(), PortError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PortError::Storage("disk full".to_string()));
        }
        self.inner.append(event).await
    }

    async fn count_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<u64, PortError> {
        self.inner.count_since(user_id, since).await
    }

    async fn reset(&self, user_id: &str) -> Result<(), PortError> {
        self.inner.reset(user_id).await
    }
}

#[tokio::test]
async fn test_window_slides_with_query_time() {
    let counter = ViolationCounter::with_window(
        Arc::new(InMemoryEventStore::new()),
        chrono::Duration::milliseconds(200),
    );
    counter.increment("u1", BlockSource::LocalPattern, &reasons()).await.unwrap();
    counter.increment("u1", BlockSource::LocalPattern, &reasons()).await.unwrap();
    assert_eq!(counter.count("u1").await.unwrap(), 2);

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert_eq!(counter.count("u1").await.unwrap(), 0);
    assert_eq!(
        counter.increment("u1", BlockSource::LocalPattern, &reasons()).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_default_window_is_a_day() {
    let counter = ViolationCounter::new(Arc::new(InMemoryEventStore::new()));
    assert_eq!(counter.window(), chrono::Duration::hours(24));
}

#[tokio::test]
async fn test_concurrent_increments_are_all_counted() {
    let counter = Arc::new(ViolationCounter::new(Arc::new(InMemoryEventStore::new())));
    let mut handles = Vec::new();
    for _ in 0..25 {
        let counter = counter.clone();
        handles.push(tokio::spawn(async move {
            counter
                .increment("u1", BlockSource::ExternalService, &reasons())
                .await
                .unwrap()
        }));
    }

    let mut seen = Vec::new();
    for handle in handles {
        seen.push(handle.await.unwrap());
    }
    assert_eq!(counter.count("u1").await.unwrap(), 25);
    assert_eq!(seen.iter().max(), Some(&25));
}

#[tokio::test]
async fn test_write_failure_streak_and_recovery() {
    let store = Arc::new(ToggleStore {
        inner: InMemoryEventStore::new(),
        fail_writes: AtomicBool::new(true),
    });
    let metrics = Arc::new(GuardMetrics::new().unwrap());
    let counter = ViolationCounter::new(store.clone()).with_metrics(metrics.clone());

    // A failed write still yields the stored count
    assert_eq!(counter.increment("u1", BlockSource::LocalPattern, &reasons()).await.unwrap(), 0);
    assert_eq!(counter.increment("u1", BlockSource::LocalPattern, &reasons()).await.unwrap(), 0);
    assert_eq!(counter.consecutive_write_failures(), 2);
    assert_eq!(metrics.counter_write_failures.get(), 2);

    store.fail_writes.store(false, Ordering::SeqCst);
    assert_eq!(counter.increment("u1", BlockSource::LocalPattern, &reasons()).await.unwrap(), 1);
    assert_eq!(counter.consecutive_write_failures(), 0);
}

#[tokio::test]
async fn test_record_surfaces_write_error() {
    let store = Arc::new(ToggleStore {
        inner: InMemoryEventStore::new(),
        fail_writes: AtomicBool::new(true),
    });
    let counter = ViolationCounter::new(store);
    let err = counter
        .record(ViolationEvent::now("u1", BlockSource::LocalPattern, &reasons()))
        .await
        .unwrap_err();
    assert!(matches!(err, CounterError::Write { ref user_id, .. } if user_id == "u1"));
}
