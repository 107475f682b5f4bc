//! Broadcast hub and per-connection bounded queues

use crate::broadcast::frame::{EventFrame, SubscriptionFilter};
use crate::error::{LadderError, Result};
use crate::metrics::MetricsCollector;
use crate::types::{ConnectionId, DomainEvent};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// One live connection's queue
#[derive(Debug)]
struct ConnectionQueue {
    id: ConnectionId,
    filter: SubscriptionFilter,
    capacity: usize,
    frames: Mutex<VecDeque<Arc<EventFrame>>>,
    dropped: AtomicU64,
    closed: AtomicBool,
    notify: Notify,
    metrics: Arc<MetricsCollector>,
}

impl ConnectionQueue {
    /// Must be called with the frames lock held. Once closed, the gauge
    /// label belongs to nobody and must not be recreated.
    fn record_depth(&self, depth: usize) {
        if !self.closed.load(Ordering::Acquire) {
            self.metrics.record_queue_depth(self.id, depth);
        }
    }

    /// Append a frame, evicting the oldest when full. Returns true if a
    /// frame was evicted.
    fn push(&self, frame: Arc<EventFrame>) -> Result<bool> {
        let mut frames = self
            .frames
            .lock()
            .map_err(|_| LadderError::lock_poisoned("connection queue"))?;

        let mut evicted = false;
        if frames.len() >= self.capacity {
            frames.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            evicted = true;
        }
        frames.push_back(frame);
        self.record_depth(frames.len());
        drop(frames);

        self.notify.notify_one();
        Ok(evicted)
    }

    fn pop(&self) -> Option<Arc<EventFrame>> {
        let mut frames = self.frames.lock().ok()?;
        let frame = frames.pop_front()?;
        self.record_depth(frames.len());
        Some(frame)
    }

    fn len(&self) -> usize {
        self.frames.lock().map(|frames| frames.len()).unwrap_or(0)
    }

    fn close(&self) {
        if let Ok(mut frames) = self.frames.lock() {
            self.closed.store(true, Ordering::Release);
            frames.clear();
        } else {
            self.closed.store(true, Ordering::Release);
        }
        self.notify.notify_one();
    }
}

/// Result of one publish call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Connections the frame was queued on
    pub delivered: usize,
    /// Frames evicted to make room
    pub evicted: usize,
}

/// Hub-wide counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub connections: usize,
    pub published_total: u64,
    pub dropped_total: u64,
}

#[derive(Debug)]
struct HubInner {
    connections: RwLock<HashMap<ConnectionId, Arc<ConnectionQueue>>>,
    next_id: AtomicU64,
    capacity: usize,
    published_total: AtomicU64,
    dropped_total: AtomicU64,
    metrics: Arc<MetricsCollector>,
}

impl HubInner {
    fn remove(&self, id: ConnectionId) {
        let removed = match self.connections.write() {
            Ok(mut connections) => connections.remove(&id),
            Err(_) => {
                warn!("Connection registry lock poisoned while removing {}", id);
                None
            }
        };
        if let Some(queue) = removed {
            queue.close();
            self.metrics.record_connection_closed(id);
            info!(
                "Live connection {} closed ({} events dropped over its lifetime)",
                id,
                queue.dropped.load(Ordering::Relaxed)
            );
        }
    }
}

/// Fan-out of domain events to live connections
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl BroadcastHub {
    /// Create a hub whose connections buffer at most `capacity` frames each
    pub fn new(capacity: usize, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                connections: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                published_total: AtomicU64::new(0),
                dropped_total: AtomicU64::new(0),
                metrics,
            }),
        }
    }

    /// Register a connection; dropping the returned handle unsubscribes it
    pub fn subscribe(&self, filter: SubscriptionFilter) -> Result<Subscription> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(ConnectionQueue {
            id,
            filter,
            capacity: self.inner.capacity,
            frames: Mutex::new(VecDeque::with_capacity(self.inner.capacity)),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
            metrics: self.inner.metrics.clone(),
        });

        let total = {
            let mut connections = self
                .inner
                .connections
                .write()
                .map_err(|_| LadderError::lock_poisoned("connection registry"))?;
            connections.insert(id, queue.clone());
            connections.len()
        };

        self.inner.metrics.record_connection_opened(id);
        info!("Live connection {} subscribed ({} total)", id, total);

        Ok(Subscription {
            queue,
            hub: self.inner.clone(),
        })
    }

    /// Remove a connection and discard whatever it still had queued
    pub fn unsubscribe(&self, id: ConnectionId) {
        self.inner.remove(id);
    }

    /// Queue an event on every matching connection without waiting on any of them
    pub fn publish(&self, event: &DomainEvent) -> Result<PublishOutcome> {
        let frame = Arc::new(EventFrame::from_event(event)?);

        // Snapshot the targets so no registry lock is held while queuing
        let targets: Vec<Arc<ConnectionQueue>> = {
            let connections = self
                .inner
                .connections
                .read()
                .map_err(|_| LadderError::lock_poisoned("connection registry"))?;
            connections
                .values()
                .filter(|queue| queue.filter.matches(event))
                .cloned()
                .collect()
        };

        let mut outcome = PublishOutcome::default();
        for queue in targets {
            let evicted = queue.push(frame.clone())?;
            outcome.delivered += 1;
            if evicted {
                outcome.evicted += 1;
                self.inner.metrics.record_dropped_event();
                debug!("Connection {} queue full, evicted oldest frame", queue.id);
            }
        }

        self.inner.published_total.fetch_add(1, Ordering::Relaxed);
        self.inner
            .dropped_total
            .fetch_add(outcome.evicted as u64, Ordering::Relaxed);
        self.inner.metrics.record_published_event(event.kind());

        debug!(
            "Published {} event to {} connections ({} evictions)",
            event.kind().as_str(),
            outcome.delivered,
            outcome.evicted
        );
        Ok(outcome)
    }

    /// Close every connection, e.g. on shutdown
    pub fn close_all(&self) {
        let ids: Vec<ConnectionId> = match self.inner.connections.read() {
            Ok(connections) => connections.keys().copied().collect(),
            Err(_) => return,
        };
        for id in ids {
            self.inner.remove(id);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.inner
            .connections
            .read()
            .map(|connections| connections.len())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.connection_count(),
            published_total: self.inner.published_total.load(Ordering::Relaxed),
            dropped_total: self.inner.dropped_total.load(Ordering::Relaxed),
        }
    }
}

/// Handle held by one live connection
#[derive(Debug)]
pub struct Subscription {
    queue: Arc<ConnectionQueue>,
    hub: Arc<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> ConnectionId {
        self.queue.id
    }

    /// Next queued frame without waiting
    pub fn try_recv(&self) -> Option<Arc<EventFrame>> {
        self.queue.pop()
    }

    /// Wait for the next frame; `None` once the connection has been closed
    pub async fn recv(&self) -> Option<Arc<EventFrame>> {
        loop {
            if self.queue.closed.load(Ordering::Acquire) {
                return None;
            }
            if let Some(frame) = self.queue.pop() {
                return Some(frame);
            }
            self.queue.notify.notified().await;
        }
    }

    /// Frames evicted from this connection's queue so far
    pub fn dropped_count(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_closed(&self) -> bool {
        self.queue.closed.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.remove(self.queue.id);
    }
}
