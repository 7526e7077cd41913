#![allow(clippy::disallowed_methods)]

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use forge_core::JobId;
use forge_scheduler::{JobQueue, QueueError, QueuedJob};

fn job(id: &str) -> QueuedJob {
    QueuedJob::new(JobId::from(id), serde_json::Map::new())
}

#[tokio::test]
async fn test_dequeue_is_fifo() -> Result<(), Box<dyn Error>> {
    let queue = JobQueue::new(10);
    let ids = ["j1", "j2", "j3", "j4", "j5"];
    for id in ids {
        queue.enqueue(job(id)).await?;
    }
    assert_eq!(queue.len(), 5);

    for id in ids {
        let next = queue.dequeue().await?;
        assert_eq!(next.job_id, JobId::from(id));
        queue.finish(&next.job_id);
    }
    assert!(queue.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_try_enqueue_rejects_when_full() -> Result<(), Box<dyn Error>> {
    let queue = JobQueue::new(2);
    queue.try_enqueue(job("a"))?;
    queue.try_enqueue(job("b").with_priority(5))?;

    let rejected = queue.try_enqueue(job("c"));
    assert!(matches!(rejected, Err(QueueError::Full(id)) if id == JobId::from("c")));
    assert_eq!(queue.len(), 2);

    let first = queue.dequeue().await?;
    assert_eq!(first.job_id, JobId::from("a"));
    queue.try_enqueue(job("c"))?;
    Ok(())
}

#[tokio::test]
async fn test_enqueue_waits_for_room() -> Result<(), Box<dyn Error>> {
    let queue = Arc::new(JobQueue::new(1));
    queue.enqueue(job("first")).await?;

    let producer = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.enqueue(job("second")).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!producer.is_finished());

    assert_eq!(queue.dequeue().await?.job_id, JobId::from("first"));
    producer.await??;
    assert_eq!(queue.dequeue().await?.job_id, JobId::from("second"));
    Ok(())
}

#[tokio::test]
async fn test_cancel_before_dequeue_skips_job() -> Result<(), Box<dyn Error>> {
    let queue = JobQueue::new(10);
    queue.enqueue(job("keep-1")).await?;
    queue.enqueue(job("drop")).await?;
    queue.enqueue(job("keep-2")).await?;

    // Idempotent.
    queue.request_cancel(&JobId::from("drop"));
    queue.request_cancel(&JobId::from("drop"));

    assert_eq!(queue.dequeue().await?.job_id, JobId::from("keep-1"));
    assert_eq!(queue.dequeue().await?.job_id, JobId::from("keep-2"));
    assert_eq!(queue.take_discarded(), vec![JobId::from("drop")]);
    assert!(!queue.is_cancelled(&JobId::from("drop")));

    assert!(queue.dequeue_timeout(Duration::from_millis(20)).await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_is_cancelled_does_not_clear_marker() -> Result<(), Box<dyn Error>> {
    let queue = JobQueue::new(10);
    queue.enqueue(job("running")).await?;
    let running = queue.dequeue().await?;

    queue.request_cancel(&running.job_id);
    assert!(queue.is_cancelled(&running.job_id));
    assert!(queue.is_cancelled(&running.job_id));

    queue.finish(&running.job_id);
    assert!(!queue.is_cancelled(&running.job_id));
    Ok(())
}

#[tokio::test]
async fn test_cancel_of_unknown_id_does_not_leak() -> Result<(), Box<dyn Error>> {
    let queue = JobQueue::new(10);
    let stray = JobId::new();

    queue.request_cancel(&stray);
    assert!(queue.is_cancelled(&stray));

    queue.enqueue(job("unrelated")).await?;
    let next = queue.dequeue().await?;
    assert_eq!(next.job_id, JobId::from("unrelated"));

    assert!(!queue.is_cancelled(&stray));
    assert!(queue.take_discarded().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_dequeue_timeout_on_empty_queue() -> Result<(), Box<dyn Error>> {
    let queue = JobQueue::new(4);
    assert_eq!(queue.capacity(), 4);

    let started = std::time::Instant::now();
    assert!(queue.dequeue_timeout(Duration::from_millis(30)).await.is_none());
    assert!(started.elapsed() >= Duration::from_millis(30));

    queue.enqueue(job("late")).await?;
    let got = queue.dequeue_timeout(Duration::from_millis(30)).await;
    assert_eq!(got.map(|j| j.job_id), Some(JobId::from("late")));
    Ok(())
}
