#![allow(clippy::disallowed_methods)]

use std::error::Error;

use forge_core::{JobEvent, JobId};
use forge_scheduler::EventBus;

fn started(id: &str) -> JobEvent {
    JobEvent::started(JobId::from(id))
}

#[tokio::test]
async fn test_full_subscriber_only_loses_its_own_events() -> Result<(), Box<dyn Error>> {
    let bus = EventBus::new(2);
    let mut stalled = bus.subscribe();
    let mut reader = bus.subscribe();

    let mut received = Vec::new();
    for i in 0..5 {
        bus.publish(started(&format!("job-{i}")));
        if let Some(event) = reader.recv().await {
            received.push(event);
        }
    }

    assert_eq!(received.len(), 5);
    assert_eq!(received[4].job_id(), &JobId::from("job-4"));

    // The stalled subscriber kept the first two and missed the rest.
    let mut kept = Vec::new();
    while let Some(event) = stalled.try_recv() {
        kept.push(event.job_id().clone());
    }
    assert_eq!(kept, vec![JobId::from("job-0"), JobId::from("job-1")]);
    assert_eq!(bus.subscriber_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_subscriber_count_tracks_unsubscribe() -> Result<(), Box<dyn Error>> {
    let bus = EventBus::new(4);
    let a = bus.subscribe();
    let b = bus.subscribe();
    let c = bus.subscribe();
    assert_eq!(bus.subscriber_count(), 3);

    bus.publish(started("x"));
    assert_eq!(bus.subscriber_count(), 3);

    assert!(bus.unsubscribe(b.id()));
    assert_eq!(bus.subscriber_count(), 2);
    assert!(!bus.unsubscribe(b.id()));
    assert_eq!(bus.subscriber_count(), 2);

    assert!(bus.unsubscribe(a.id()));
    assert!(bus.unsubscribe(c.id()));
    assert_eq!(bus.subscriber_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_unsubscribed_handle_gets_nothing_new() -> Result<(), Box<dyn Error>> {
    let bus = EventBus::new(4);
    let mut sub = bus.subscribe();

    bus.publish(started("before"));
    bus.unsubscribe(sub.id());
    bus.publish(started("after"));

    assert_eq!(sub.recv().await.map(|e| e.job_id().clone()), Some(JobId::from("before")));
    assert!(sub.recv().await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_publish_leaves_subscriber_count_alone() -> Result<(), Box<dyn Error>> {
    let bus = EventBus::new(1);
    let mut kept = bus.subscribe();
    let stalled = bus.subscribe();
    assert_eq!(bus.subscriber_count(), 2);

    // The second publish overflows both queues; nobody is removed.
    bus.publish(started("a"));
    bus.publish(started("b"));
    assert_eq!(bus.subscriber_count(), 2);

    drop(stalled);
    assert_eq!(bus.subscriber_count(), 1);

    bus.publish(started("c"));
    assert_eq!(bus.subscriber_count(), 1);

    assert_eq!(kept.try_recv().map(|e| e.job_id().clone()), Some(JobId::from("a")));
    assert!(bus.unsubscribe(kept.id()));
    assert_eq!(bus.subscriber_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_publish_without_subscribers() -> Result<(), Box<dyn Error>> {
    let bus = EventBus::new(1);
    bus.publish(JobEvent::failed(JobId::from("lonely"), "nobody listens"));
    assert_eq!(bus.subscriber_count(), 0);
    Ok(())
}
