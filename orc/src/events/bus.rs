//! Event Bus - bounded fan-out of typed events
//!
//! Each subscriber owns a bounded queue drained by its consumer. Publishing
//! never blocks: when a subscriber's queue is full the oldest event is
//! dropped for that subscriber and its dropped counter is incremented.
//! Slow subscribers therefore cannot stall the pipeline or each other.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::debug;

use super::types::Event;
use crate::domain::TaskId;

/// Default per-subscriber buffer capacity (events)
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// Interest filter declared at subscription time
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Only events for this task; None matches all tasks
    pub task: Option<TaskId>,
    /// Only these event kinds (`Event::kind` names); None matches all
    pub kinds: Option<HashSet<&'static str>>,
}

impl EventFilter {
    /// Match everything
    pub fn all() -> Self {
        Self::default()
    }

    /// Match a single task
    pub fn for_task(task_id: TaskId) -> Self {
        Self {
            task: Some(task_id),
            kinds: None,
        }
    }

    /// Restrict to the given event kinds
    pub fn with_kinds<I: IntoIterator<Item = &'static str>>(mut self, kinds: I) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    fn matches(&self, event: &Event) -> bool {
        if let Some(task) = &self.task
            && event.task_id() != task
        {
            return false;
        }
        if let Some(kinds) = &self.kinds
            && !kinds.contains(event.kind())
        {
            return false;
        }
        true
    }
}

/// Shared state between a subscriber slot and its Subscription handle
struct SubQueue {
    buf: Mutex<VecDeque<Event>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl SubQueue {
    fn push(&self, event: Event) {
        let mut buf = self.buf.lock().unwrap();
        if buf.len() >= self.capacity {
            buf.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        buf.push_back(event);
        drop(buf);
        self.notify.notify_one();
    }
}

struct SubscriberSlot {
    id: u64,
    filter: EventFilter,
    queue: Arc<SubQueue>,
}

/// Central event bus
pub struct EventBus {
    subscribers: Mutex<Vec<SubscriberSlot>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            capacity,
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Publish an event to all matching subscribers. Never blocks.
    pub fn publish(&self, event: Event) {
        debug!(kind = event.kind(), task_id = %event.task_id(), "EventBus::publish");
        let subscribers = self.subscribers.lock().unwrap();
        for slot in subscribers.iter() {
            if slot.filter.matches(&event) {
                slot.queue.push(event.clone());
            }
        }
    }

    /// Subscribe with an interest filter and the default buffer capacity
    pub fn subscribe(self: &Arc<Self>, filter: EventFilter) -> Subscription {
        self.subscribe_with_capacity(filter, self.capacity)
    }

    /// Subscribe with an explicit buffer capacity
    pub fn subscribe_with_capacity(self: &Arc<Self>, filter: EventFilter, capacity: usize) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubQueue {
            buf: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        self.subscribers.lock().unwrap().push(SubscriberSlot {
            id,
            filter,
            queue: Arc::clone(&queue),
        });

        debug!(subscriber_id = id, capacity, "EventBus::subscribe");
        Subscription {
            id,
            queue,
            bus: Arc::downgrade(self),
        }
    }

    /// Remove a subscriber. Idempotent and safe from any context.
    fn unsubscribe(&self, id: u64) {
        let mut subscribers = self.subscribers.lock().unwrap();
        if let Some(pos) = subscribers.iter().position(|s| s.id == id) {
            let slot = subscribers.swap_remove(pos);
            slot.queue.closed.store(true, Ordering::Release);
            slot.queue.notify.notify_one();
            debug!(subscriber_id = id, "EventBus::unsubscribe");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Receiving side of a subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    queue: Arc<SubQueue>,
    bus: std::sync::Weak<EventBus>,
}

impl Subscription {
    /// Receive the next event, waiting if the queue is empty.
    /// Returns None once the subscription is closed and drained.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            if let Some(event) = self.queue.buf.lock().unwrap().pop_front() {
                return Some(event);
            }
            if self.queue.closed.load(Ordering::Acquire) {
                return None;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Non-blocking receive
    pub fn try_recv(&mut self) -> Option<Event> {
        self.queue.buf.lock().unwrap().pop_front()
    }

    /// Events dropped for this subscriber due to overflow
    pub fn dropped_count(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    /// Detach from the bus. Idempotent; also runs on drop.
    pub fn close(&self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskStatus;

    fn status_event(seq: u64, status: TaskStatus) -> Event {
        Event::TaskStatusChanged {
            task_id: TaskId::from_seq(seq),
            status,
        }
    }

    fn tick(task: u64, message: &str) -> Event {
        Event::ProgressTick {
            task_id: TaskId::from_seq(task),
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = Arc::new(EventBus::with_default_capacity());
        let mut sub = bus.subscribe(EventFilter::all());

        bus.publish(status_event(1, TaskStatus::Running));

        let event = sub.recv().await.unwrap();
        assert_eq!(event.kind(), "task.status");
        assert_eq!(event.task_id().as_str(), "TASK-0001");
    }

    #[tokio::test]
    async fn test_publish_with_no_subscribers_is_fine() {
        let bus = Arc::new(EventBus::with_default_capacity());
        bus.publish(status_event(1, TaskStatus::Running));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_task_filter() {
        let bus = Arc::new(EventBus::with_default_capacity());
        let mut sub = bus.subscribe(EventFilter::for_task(TaskId::from_seq(1)));

        bus.publish(tick(2, "other task"));
        bus.publish(tick(1, "mine"));

        let event = sub.recv().await.unwrap();
        assert_eq!(event.task_id().as_str(), "TASK-0001");
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_kind_filter() {
        let bus = Arc::new(EventBus::with_default_capacity());
        let mut sub = bus.subscribe(EventFilter::all().with_kinds(["task.status"]));

        bus.publish(tick(1, "ignored"));
        bus.publish(status_event(1, TaskStatus::Paused));

        let event = sub.recv().await.unwrap();
        assert_eq!(event.kind(), "task.status");
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest_and_counts() {
        let bus = Arc::new(EventBus::with_default_capacity());
        let mut sub = bus.subscribe_with_capacity(EventFilter::all(), 3);

        for i in 0..5 {
            bus.publish(tick(1, &format!("m{}", i)));
        }

        assert_eq!(sub.dropped_count(), 2);

        let mut received = Vec::new();
        while let Some(event) = sub.try_recv() {
            if let Event::ProgressTick { message, .. } = event {
                received.push(message);
            }
        }
        // Oldest two (m0, m1) were dropped
        assert_eq!(received, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_affect_others() {
        let bus = Arc::new(EventBus::with_default_capacity());
        let mut slow = bus.subscribe_with_capacity(EventFilter::all(), 2);
        let mut fast = bus.subscribe_with_capacity(EventFilter::all(), 100);

        for i in 0..10 {
            bus.publish(tick(1, &format!("m{}", i)));
        }

        // Fast subscriber got everything, in order
        let mut fast_msgs = Vec::new();
        while let Some(Event::ProgressTick { message, .. }) = fast.try_recv() {
            fast_msgs.push(message);
        }
        assert_eq!(fast_msgs.len(), 10);
        assert_eq!(fast_msgs[0], "m0");
        assert_eq!(fast_msgs[9], "m9");

        // Slow subscriber kept only the newest two
        assert_eq!(slow.dropped_count(), 8);
        let mut slow_msgs = Vec::new();
        while let Some(Event::ProgressTick { message, .. }) = slow.try_recv() {
            slow_msgs.push(message);
        }
        assert_eq!(slow_msgs, vec!["m8", "m9"]);
    }

    #[tokio::test]
    async fn test_per_task_order_preserved() {
        let bus = Arc::new(EventBus::with_default_capacity());
        let mut sub = bus.subscribe(EventFilter::all());

        for i in 0..20 {
            bus.publish(tick(1, &format!("a{}", i)));
            bus.publish(tick(2, &format!("b{}", i)));
        }

        let mut a_seen = Vec::new();
        let mut b_seen = Vec::new();
        while let Some(Event::ProgressTick { task_id, message }) = sub.try_recv() {
            match task_id.as_str() {
                "TASK-0001" => a_seen.push(message),
                _ => b_seen.push(message),
            }
        }
        let expected_a: Vec<_> = (0..20).map(|i| format!("a{}", i)).collect();
        let expected_b: Vec<_> = (0..20).map(|i| format!("b{}", i)).collect();
        assert_eq!(a_seen, expected_a);
        assert_eq!(b_seen, expected_b);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let bus = Arc::new(EventBus::with_default_capacity());
        let sub = bus.subscribe(EventFilter::all());
        assert_eq!(bus.subscriber_count(), 1);

        sub.close();
        sub.close();
        assert_eq!(bus.subscriber_count(), 0);

        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_recv_returns_none_after_close() {
        let bus = Arc::new(EventBus::with_default_capacity());
        let mut sub = bus.subscribe(EventFilter::all());

        bus.publish(tick(1, "last"));
        bus.unsubscribe(sub.id);

        // Drains the remaining event, then reports closure
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
    }
}
