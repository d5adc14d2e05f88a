//! Time-event scheduler.
//!
//! Pending events sit in a min-heap keyed by `(fire_at, seq)`, so the
//! earliest deadline is always on top and events sharing a deadline fire in
//! the order they were scheduled. The run loop sleeps until the top
//! deadline; scheduling an earlier event wakes it through a [`Notify`].
//!
//! Each deadline is also pinned to a monotonic [`Instant`] when the event is
//! scheduled, so wall-clock adjustments after that point do not shift it.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use timecast_core::{now_in, time_until};
use timecast_protocol::{Delivery, Payload};

use crate::broker::ChannelBroker;

/// A scheduled delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeEvent {
    /// Unique identifier, returned to the scheduling client.
    pub id: String,
    /// Channel the payload is published on.
    pub channel: String,
    /// When the event fires.
    pub fire_at: DateTime<Tz>,
    /// When the event was scheduled.
    pub scheduled_at: DateTime<Tz>,
    /// Payload delivered to subscribers.
    pub payload: Payload,
}

impl TimeEvent {
    /// The message subscribers receive when the event fires.
    pub fn into_delivery(self) -> Delivery {
        Delivery::TimeEvent {
            event_id: self.id,
            channel: self.channel,
            fire_at: self.fire_at.fixed_offset(),
            scheduled_at: self.scheduled_at.fixed_offset(),
            payload: self.payload,
        }
    }
}

/// Heap entry. Ordering is reversed so `BinaryHeap` pops the earliest first.
#[derive(Debug)]
struct QueuedEvent {
    fire_at: DateTime<Utc>,
    seq: u64,
    deadline: Instant,
    event: TimeEvent,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
struct EventQueue {
    heap: BinaryHeap<QueuedEvent>,
    next_seq: u64,
}

impl EventQueue {
    /// Pushes an event, returning true if it became the earliest.
    fn push(&mut self, event: TimeEvent) -> bool {
        let seq = self.next_seq;
        self.next_seq += 1;

        let fire_at = event.fire_at.with_timezone(&Utc);
        let deadline = Instant::now() + time_until(&fire_at);
        self.heap.push(QueuedEvent {
            fire_at,
            seq,
            deadline,
            event,
        });

        self.heap.peek().is_some_and(|top| top.seq == seq)
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|top| top.deadline)
    }

    /// Pops every event due at `now`, earliest first.
    fn pop_due(&mut self, now: Instant) -> Vec<TimeEvent> {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|top| top.deadline <= now) {
            if let Some(entry) = self.heap.pop() {
                due.push(entry.event);
            }
        }
        due
    }
}

/// Holds pending time events and publishes each one when it comes due.
#[derive(Debug)]
pub struct TimeEventScheduler {
    queue: Mutex<EventQueue>,
    wakeup: Notify,
    broker: Arc<ChannelBroker>,
    timezone: Tz,
}

impl TimeEventScheduler {
    /// Creates a scheduler publishing through `broker`.
    pub fn new(broker: Arc<ChannelBroker>, timezone: Tz) -> Self {
        Self {
            queue: Mutex::new(EventQueue::default()),
            wakeup: Notify::new(),
            broker,
            timezone,
        }
    }

    /// Timezone event times are reported in.
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Builds the event that [`schedule`](Self::schedule) would queue,
    /// without queueing it.
    pub fn prepare(
        &self,
        fire_at: DateTime<Tz>,
        channel: impl Into<String>,
        payload: Payload,
    ) -> TimeEvent {
        TimeEvent {
            id: Uuid::new_v4().to_string(),
            channel: channel.into(),
            fire_at: fire_at.with_timezone(&self.timezone),
            scheduled_at: now_in(self.timezone),
            payload,
        }
    }

    /// Queues a prepared event.
    ///
    /// A deadline already in the past fires on the next loop iteration.
    pub async fn submit(&self, event: TimeEvent) {
        info!(
            event_id = %event.id,
            channel = %event.channel,
            fire_at = %event.fire_at,
            "Time event scheduled"
        );

        let earliest = self.queue.lock().await.push(event);
        if earliest {
            self.wakeup.notify_one();
        }
    }

    /// Queues `payload` for publication on `channel` at `fire_at`.
    pub async fn schedule(
        &self,
        fire_at: DateTime<Tz>,
        channel: impl Into<String>,
        payload: Payload,
    ) -> TimeEvent {
        let event = self.prepare(fire_at, channel, payload);
        self.submit(event.clone()).await;
        event
    }

    /// Number of events waiting to fire.
    pub async fn pending_count(&self) -> usize {
        self.queue.lock().await.heap.len()
    }

    /// Runs the firing loop until `shutdown` completes.
    ///
    /// Pending events are discarded on shutdown.
    pub async fn run<S>(&self, shutdown: S)
    where
        S: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        debug!(timezone = %self.timezone, "Scheduler started");

        loop {
            let next = self.queue.lock().await.next_deadline();

            match next {
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => self.fire_due().await,
                        _ = self.wakeup.notified() => {}
                        _ = &mut shutdown => break,
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.wakeup.notified() => {}
                        _ = &mut shutdown => break,
                    }
                }
            }
        }

        let dropped = self.pending_count().await;
        if dropped > 0 {
            warn!(pending = dropped, "Scheduler stopped with pending events");
        } else {
            debug!("Scheduler stopped");
        }
    }

    async fn fire_due(&self) {
        let due = self.queue.lock().await.pop_due(Instant::now());

        for event in due {
            let lateness = Utc::now().signed_duration_since(event.fire_at.with_timezone(&Utc));
            let event_id = event.id.clone();
            let channel = event.channel.clone();

            let delivered = self
                .broker
                .publish(&channel, event.into_delivery().into());

            info!(
                event_id = %event_id,
                channel = %channel,
                delivered,
                late_ms = lateness.num_milliseconds().max(0),
                "Time event fired"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use timecast_protocol::ServerMessage;
    use tokio::sync::mpsc;

    fn payload(n: i64) -> Payload {
        json!({"n": n}).as_object().cloned().unwrap()
    }

    fn in_secs(secs: i64) -> DateTime<Tz> {
        now_in(Tz::UTC) + chrono::Duration::seconds(secs)
    }

    fn fired_n(message: ServerMessage) -> i64 {
        match message {
            ServerMessage::Delivery(Delivery::TimeEvent { payload, .. }) => {
                payload["n"].as_i64().unwrap()
            }
            other => panic!("expected time event, got {other:?}"),
        }
    }

    fn setup() -> (Arc<TimeEventScheduler>, mpsc::Receiver<ServerMessage>) {
        let broker = Arc::new(ChannelBroker::new());
        let (tx, rx) = mpsc::channel(64);
        broker.subscribe("alarms", 1, tx);
        (Arc::new(TimeEventScheduler::new(broker, Tz::UTC)), rx)
    }

    #[test]
    fn queue_orders_by_deadline_then_insertion() {
        let mut queue = EventQueue::default();
        let later = in_secs(-5);
        let sooner = in_secs(-10);

        let event = |n: i64, at: DateTime<Tz>| TimeEvent {
            id: n.to_string(),
            channel: "c".into(),
            fire_at: at,
            scheduled_at: at,
            payload: payload(n),
        };

        assert!(queue.push(event(1, later)));
        assert!(!queue.push(event(2, later)));
        assert!(queue.push(event(3, sooner)));

        let ids: Vec<_> = queue
            .pop_due(Instant::now())
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["3", "1", "2"]);
        assert!(queue.next_deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn events_fire_in_deadline_order() {
        let (scheduler, mut rx) = setup();
        let runner = scheduler.clone();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            runner
                .run(async {
                    let _ = stop_rx.await;
                })
                .await
        });

        scheduler.schedule(in_secs(3), "alarms", payload(3)).await;
        scheduler.schedule(in_secs(1), "alarms", payload(1)).await;
        scheduler.schedule(in_secs(2), "alarms", payload(2)).await;
        assert_eq!(scheduler.pending_count().await, 3);

        for expected in 1..=3 {
            let message = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(fired_n(message), expected);
        }
        assert_eq!(scheduler.pending_count().await, 0);

        stop_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_event_preempts_current_wait() {
        let (scheduler, mut rx) = setup();
        let runner = scheduler.clone();
        tokio::spawn(async move { runner.run(std::future::pending()).await });

        scheduler.schedule(in_secs(3600), "alarms", payload(1)).await;
        tokio::task::yield_now().await;
        scheduler.schedule(in_secs(1), "alarms", payload(2)).await;

        let started = Instant::now();
        let message = tokio::time::timeout(Duration::from_secs(60), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fired_n(message), 2);
        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(scheduler.pending_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn past_deadline_fires_immediately() {
        let (scheduler, mut rx) = setup();
        let runner = scheduler.clone();
        tokio::spawn(async move { runner.run(std::future::pending()).await });

        let event = scheduler.schedule(in_secs(-30), "alarms", payload(9)).await;
        let message = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();

        match message {
            ServerMessage::Delivery(Delivery::TimeEvent {
                event_id, channel, ..
            }) => {
                assert_eq!(event_id, event.id);
                assert_eq!(channel, "alarms");
            }
            other => panic!("expected time event, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn event_without_subscribers_is_dropped() {
        let broker = Arc::new(ChannelBroker::new());
        let scheduler = Arc::new(TimeEventScheduler::new(broker, Tz::UTC));
        let runner = scheduler.clone();
        tokio::spawn(async move { runner.run(std::future::pending()).await });

        scheduler.schedule(in_secs(1), "void", payload(1)).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(scheduler.pending_count().await, 0);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (scheduler, _rx) = setup();
        scheduler.schedule(in_secs(3600), "alarms", payload(1)).await;
        tokio::time::timeout(Duration::from_secs(1), scheduler.run(async {}))
            .await
            .unwrap();
        assert_eq!(scheduler.pending_count().await, 1);
    }

    #[tokio::test]
    async fn scheduled_event_is_reported_in_configured_timezone() {
        let broker = Arc::new(ChannelBroker::new());
        let scheduler = TimeEventScheduler::new(broker, chrono_tz::Asia::Tokyo);
        let fire_at = now_in(Tz::UTC) + chrono::Duration::seconds(60);
        let event = scheduler.schedule(fire_at, "c", Payload::new()).await;

        assert_eq!(event.fire_at.timezone(), chrono_tz::Asia::Tokyo);
        assert_eq!(event.fire_at, fire_at);
        assert!(!event.id.is_empty());
    }
}
