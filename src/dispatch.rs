//! Inbound dispatcher.
//!
//! One FIFO queue and at most one worker per group: strict ordering inside
//! a group, parallelism across groups. Workers are lazily spawned, take a
//! semaphore permit before processing (hard cap on concurrency), time out
//! when idle, and survive handler panics. Bounded queues drop their oldest
//! message on overflow and count the drop.

use crate::models::InboundMessage;
use crate::observability::Counters;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, warn};

const IDLE_GRACE: Duration = Duration::from_secs(30);
const HANDLER_DEADLINE: Duration = Duration::from_secs(30);

/// The per-message pipeline entry point the dispatcher drives.
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, msg: InboundMessage);
}

/// Object-safe submit capability for the transport ingress.
pub trait InboundSubmit: Send + Sync {
    fn submit_inbound(&self, msg: InboundMessage);
}

impl<H: MessageHandler> InboundSubmit for Arc<Dispatcher<H>> {
    fn submit_inbound(&self, msg: InboundMessage) {
        self.submit(msg);
    }
}

struct GroupQueue {
    queue: Arc<Mutex<VecDeque<InboundMessage>>>,
    wake: Arc<Notify>,
    worker_running: bool,
}

pub struct Dispatcher<H: MessageHandler> {
    handler: Arc<H>,
    groups: Arc<Mutex<HashMap<String, GroupQueue>>>,
    permits: Arc<Semaphore>,
    queue_depth: usize,
    counters: Arc<Counters>,
    accepting: Arc<std::sync::atomic::AtomicBool>,
}

impl<H: MessageHandler> Dispatcher<H> {
    pub fn new(
        handler: Arc<H>,
        max_workers: usize,
        queue_depth: usize,
        counters: Arc<Counters>,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler,
            groups: Arc::new(Mutex::new(HashMap::new())),
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
            queue_depth: queue_depth.max(1),
            counters,
            accepting: Arc::new(std::sync::atomic::AtomicBool::new(true)),
        })
    }

    /// Enqueue and return immediately. Overflow drops the oldest queued
    /// message for the group.
    pub fn submit(self: &Arc<Self>, msg: InboundMessage) {
        use std::sync::atomic::Ordering;
        if !self.accepting.load(Ordering::SeqCst) {
            Counters::bump(&self.counters.messages_dropped);
            debug!(group = %msg.group_jid, "dispatcher draining, message dropped");
            return;
        }

        let group_jid = msg.group_jid.clone();
        let mut groups = self.groups.lock();
        let entry = groups.entry(group_jid.clone()).or_insert_with(|| GroupQueue {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            wake: Arc::new(Notify::new()),
            worker_running: false,
        });

        {
            let mut queue = entry.queue.lock();
            if queue.len() >= self.queue_depth {
                queue.pop_front();
                Counters::bump(&self.counters.messages_dropped);
                warn!(group = %group_jid, "group queue full, dropped oldest message");
            }
            queue.push_back(msg);
        }
        entry.wake.notify_one();

        if !entry.worker_running {
            entry.worker_running = true;
            let queue = entry.queue.clone();
            let wake = entry.wake.clone();
            let dispatcher = self.clone();
            tokio::spawn(async move {
                dispatcher.worker_loop(group_jid, queue, wake).await;
            });
        }
    }

    /// Stop accepting new messages; queued work is abandoned by workers
    /// as they finish the message in flight.
    pub fn drain(&self) {
        self.accepting
            .store(false, std::sync::atomic::Ordering::SeqCst);
    }

    async fn worker_loop(
        self: Arc<Self>,
        group_jid: String,
        queue: Arc<Mutex<VecDeque<InboundMessage>>>,
        wake: Arc<Notify>,
    ) {
        // The permit caps concurrent group workers; groups past the cap
        // wait here for capacity.
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        loop {
            let next = queue.lock().pop_front();
            let Some(msg) = next else {
                // Idle: wait for more work, exit after the grace period.
                let waited =
                    tokio::time::timeout(IDLE_GRACE, wake.notified()).await;
                if waited.is_ok() {
                    continue;
                }
                let mut groups = self.groups.lock();
                // Re-check under the map lock so a submit racing the
                // timeout still has a worker.
                if queue.lock().is_empty() {
                    if let Some(entry) = groups.get_mut(&group_jid) {
                        entry.worker_running = false;
                    }
                    drop(permit);
                    debug!(group = %group_jid, "idle group worker reclaimed");
                    return;
                }
                continue;
            };

            let message_id = msg.message_id.clone();
            let handler = self.handler.clone();
            // A panic inside the handler must not kill the worker; run it
            // in its own task and inspect the join result.
            let result = tokio::time::timeout(
                HANDLER_DEADLINE,
                tokio::spawn(async move { handler.handle(msg).await }),
            )
            .await;

            match result {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    Counters::bump(&self.counters.handler_failures);
                    error!(
                        message_id = %message_id,
                        group = %group_jid,
                        error = %join_err,
                        "message handler panicked"
                    );
                }
                Err(_) => {
                    Counters::bump(&self.counters.handler_failures);
                    warn!(
                        message_id = %message_id,
                        group = %group_jid,
                        "message handler deadline exceeded"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingHandler {
        seen: Mutex<Vec<String>>,
        concurrent: AtomicUsize,
        max_concurrent: AtomicUsize,
        delay: Duration,
    }

    impl RecordingHandler {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                concurrent: AtomicUsize::new(0),
                max_concurrent: AtomicUsize::new(0),
                delay,
            })
        }
    }

    #[async_trait::async_trait]
    impl MessageHandler for RecordingHandler {
        async fn handle(&self, msg: InboundMessage) {
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(now, Ordering::SeqCst);
            if msg.text == "panic" {
                self.concurrent.fetch_sub(1, Ordering::SeqCst);
                panic!("boom");
            }
            tokio::time::sleep(self.delay).await;
            self.seen.lock().push(msg.message_id.clone());
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn msg(group: &str, id: &str, text: &str) -> InboundMessage {
        InboundMessage {
            message_id: id.into(),
            group_jid: group.into(),
            group_name: group.into(),
            sender_jid: "sender@jid".into(),
            sender_name: None,
            text: text.into(),
            attachments: Vec::new(),
            timestamp_ms: Utc::now().timestamp_millis(),
            raw: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn per_group_fifo_order() {
        let handler = RecordingHandler::new(Duration::from_millis(5));
        let dispatcher = Dispatcher::new(handler.clone(), 8, 64, Counters::new());

        for i in 0..10 {
            dispatcher.submit(msg("g1", &format!("m{i}"), "hello"));
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        let seen = handler.seen.lock().clone();
        let expected: Vec<String> = (0..10).map(|i| format!("m{i}")).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn worker_cap_bounds_concurrency() {
        let handler = RecordingHandler::new(Duration::from_millis(30));
        let dispatcher = Dispatcher::new(handler.clone(), 2, 64, Counters::new());

        for g in 0..6 {
            dispatcher.submit(msg(&format!("g{g}"), &format!("m{g}"), "hello"));
        }
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(handler.seen.lock().len(), 6);
        assert!(handler.max_concurrent.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn panic_does_not_stop_the_worker() {
        let handler = RecordingHandler::new(Duration::from_millis(1));
        let counters = Counters::new();
        let dispatcher = Dispatcher::new(handler.clone(), 4, 64, counters.clone());

        dispatcher.submit(msg("g1", "m1", "panic"));
        dispatcher.submit(msg("g1", "m2", "hello"));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(handler.seen.lock().clone(), vec!["m2".to_string()]);
        assert_eq!(counters.snapshot().handler_failures, 1);
    }

    #[tokio::test]
    async fn overflow_drops_oldest() {
        let handler = RecordingHandler::new(Duration::from_millis(50));
        let counters = Counters::new();
        // Depth 2: while the worker sleeps on m0, m1..m3 overflow.
        let dispatcher = Dispatcher::new(handler.clone(), 1, 2, counters.clone());

        dispatcher.submit(msg("g1", "m0", "hello"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        dispatcher.submit(msg("g1", "m1", "hello"));
        dispatcher.submit(msg("g1", "m2", "hello"));
        dispatcher.submit(msg("g1", "m3", "hello"));
        tokio::time::sleep(Duration::from_millis(400)).await;

        let seen = handler.seen.lock().clone();
        assert!(seen.contains(&"m0".to_string()));
        assert!(seen.contains(&"m3".to_string()));
        assert!(!seen.contains(&"m1".to_string()));
        assert_eq!(counters.snapshot().messages_dropped, 1);
    }

    #[tokio::test]
    async fn drain_stops_accepting() {
        let handler = RecordingHandler::new(Duration::from_millis(1));
        let counters = Counters::new();
        let dispatcher = Dispatcher::new(handler.clone(), 4, 64, counters.clone());

        dispatcher.drain();
        dispatcher.submit(msg("g1", "m1", "hello"));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(handler.seen.lock().is_empty());
        assert_eq!(counters.snapshot().messages_dropped, 1);
    }
}
