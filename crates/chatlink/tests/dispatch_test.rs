//! Queue-to-pool dispatch behavior

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chatlink::queue::{DispatchLoop, OpenGate, WorkQueue};
use chatlink::worker::{WorkerPool, WorkerPoolConfig};

use common::{wait_until, RecordingHandler};

fn started_pool(name: &str, min: usize, max: usize) -> WorkerPool {
    let pool = WorkerPool::new(WorkerPoolConfig::new(name).with_workers(min, max))
        .expect("valid pool config");
    pool.start().expect("pool starts");
    pool
}

#[test_log::test(tokio::test)]
async fn test_single_worker_preserves_enqueue_order() {
    let queue = Arc::new(WorkQueue::new("outbound"));
    let pool = started_pool("outbound", 1, 1);
    let handler = Arc::new(RecordingHandler::<String>::new());

    for item in ["A", "B", "C"] {
        assert!(queue.enqueue(item.to_string()));
    }

    let dispatch = DispatchLoop::spawn(
        Arc::clone(&queue),
        pool.clone(),
        Arc::new(OpenGate),
        handler.clone(),
    );

    wait_until(|| handler.count() == 3).await;
    assert_eq!(*handler.items.lock(), vec!["A", "B", "C"]);
    assert_eq!(queue.size(), 0);

    dispatch.shutdown().await;
    pool.shutdown().await.expect("pool drains");
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_never_exceeds_max_workers() {
    let queue = Arc::new(WorkQueue::new("rest"));
    let pool = started_pool("rest", 1, 3);
    let handler = Arc::new(RecordingHandler::<u32>::with_work(Duration::from_millis(100)));

    let dispatch = DispatchLoop::spawn(
        Arc::clone(&queue),
        pool.clone(),
        Arc::new(OpenGate),
        handler.clone(),
    );

    for i in 0..30u32 {
        queue.enqueue(i);
    }

    let sampler = {
        let pool = pool.clone();
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            let mut peak = 0;
            while handler.count() < 30 {
                peak = peak.max(pool.total_workers());
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            peak
        })
    };

    wait_until(|| handler.count() == 30).await;
    let peak_workers = sampler.await.expect("sampler finished");

    assert!(handler.max_active.load(Ordering::SeqCst) <= 3);
    assert!(peak_workers <= 3, "pool grew to {peak_workers} workers");

    let mut handled = handler.items.lock().clone();
    handled.sort_unstable();
    assert_eq!(handled, (0..30).collect::<Vec<_>>());

    dispatch.shutdown().await;
    pool.shutdown().await.expect("pool drains");
}

#[tokio::test(start_paused = true)]
async fn test_enqueue_during_dispatch_is_picked_up() {
    let queue = Arc::new(WorkQueue::new("inbound"));
    let pool = started_pool("inbound", 2, 2);
    let handler = Arc::new(RecordingHandler::<u32>::with_work(Duration::from_millis(50)));

    let dispatch = DispatchLoop::spawn(
        Arc::clone(&queue),
        pool.clone(),
        Arc::new(OpenGate),
        handler.clone(),
    );

    queue.enqueue(1u32);
    tokio::time::sleep(Duration::from_millis(10)).await;
    queue.enqueue(2);
    tokio::time::sleep(Duration::from_secs(1)).await;
    queue.enqueue(3);

    wait_until(|| handler.count() == 3).await;
    assert!(!dispatch.is_finished());

    dispatch.shutdown().await;
    pool.shutdown().await.expect("pool drains");
}

#[tokio::test]
async fn test_closed_queue_stops_dispatch() {
    let queue: Arc<WorkQueue<u32>> = Arc::new(WorkQueue::new("outbound"));
    let pool = started_pool("outbound", 1, 1);
    let handler = Arc::new(RecordingHandler::<u32>::new());

    let dispatch = DispatchLoop::spawn(
        Arc::clone(&queue),
        pool.clone(),
        Arc::new(OpenGate),
        handler.clone(),
    );

    queue.close();
    wait_until(|| dispatch.is_finished()).await;
    assert!(!queue.enqueue(7));

    pool.shutdown().await.expect("pool drains");
}
