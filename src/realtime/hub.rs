use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::observability::metrics::Metrics;
use crate::realtime::events::RealtimeEvent;

/// Logical publish/subscribe destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    User(Uuid),
    Driver(Uuid),
    Order(Uuid),
    OnlineDrivers,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::User(id) => write!(f, "user:{id}"),
            Channel::Driver(id) => write!(f, "driver:{id}"),
            Channel::Order(id) => write!(f, "order:{id}"),
            Channel::OnlineDrivers => f.write_str("online-drivers"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Envelope {
    pub channel: Channel,
    pub event: RealtimeEvent,
}

/// Outbound queue of one connection.
pub type EventSink = mpsc::Sender<Envelope>;

type Members = HashMap<u64, EventSink>;

struct HubInner {
    channels: DashMap<Channel, Members>,
    online_drivers: DashMap<Uuid, u64>,
    next_subscriber: AtomicU64,
}

impl HubInner {
    fn add(&self, channel: Channel, sink: EventSink) -> u64 {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.channels.entry(channel).or_default().insert(id, sink);
        id
    }

    fn remove(&self, channel: Channel, id: u64) {
        let now_empty = match self.channels.get_mut(&channel) {
            Some(mut members) => {
                members.remove(&id);
                members.is_empty()
            }
            None => false,
        };

        if now_empty {
            self.channels.remove_if(&channel, |_, members| members.is_empty());
        }
    }
}

/// Fan-out of realtime events to per-user, per-driver, per-order and
/// online-driver channels. Cloning shares the same registry.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
    metrics: Metrics,
}

impl BroadcastHub {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            inner: Arc::new(HubInner {
                channels: DashMap::new(),
                online_drivers: DashMap::new(),
                next_subscriber: AtomicU64::new(1),
            }),
            metrics,
        }
    }

    /// Registers `sink` on `channel` until the returned handle is
    /// unsubscribed or dropped.
    pub fn subscribe(&self, channel: Channel, sink: EventSink) -> Subscription {
        let id = self.inner.add(channel, sink);
        debug!(%channel, subscriber = id, "subscribed");
        Subscription {
            hub: self.inner.clone(),
            channel,
            id,
        }
    }

    /// Delivers to every current member of `channel` without waiting.
    /// Returns the number of queues that accepted the event.
    pub fn publish(&self, channel: Channel, event: RealtimeEvent) -> usize {
        self.metrics
            .realtime_events_total
            .with_label_values(&[event.name()])
            .inc();

        let Some(members) = self.inner.channels.get(&channel) else {
            return 0;
        };

        let mut delivered = 0;
        for (subscriber, sink) in members.iter() {
            let envelope = Envelope {
                channel,
                event: event.clone(),
            };
            match sink.try_send(envelope) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(%channel, subscriber, event = event.name(), "subscriber queue full; event dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(%channel, subscriber, "subscriber gone");
                }
            }
        }

        delivered
    }

    pub fn member_count(&self, channel: Channel) -> usize {
        self.inner
            .channels
            .get(&channel)
            .map(|members| members.len())
            .unwrap_or(0)
    }

    /// Adds the driver to the online set and the shared channel. A second
    /// join replaces the earlier connection's membership. Returns the id of
    /// the new membership.
    pub fn join_online_pool(&self, driver_id: Uuid, sink: EventSink) -> u64 {
        let id = self.inner.add(Channel::OnlineDrivers, sink);
        if let Some(previous) = self.inner.online_drivers.insert(driver_id, id) {
            self.inner.remove(Channel::OnlineDrivers, previous);
        }
        self.refresh_online_gauge();
        id
    }

    /// Returns whether the driver was in the pool.
    pub fn leave_online_pool(&self, driver_id: Uuid) -> bool {
        let removed = self.inner.online_drivers.remove(&driver_id);
        self.finish_leave(removed)
    }

    /// Leaves only if `membership` is still the driver's current one, so a
    /// superseded connection cannot evict its replacement.
    pub fn leave_online_pool_if(&self, driver_id: Uuid, membership: u64) -> bool {
        let removed = self
            .inner
            .online_drivers
            .remove_if(&driver_id, |_, current| *current == membership);
        self.finish_leave(removed)
    }

    fn finish_leave(&self, removed: Option<(Uuid, u64)>) -> bool {
        if let Some((_, id)) = removed {
            self.inner.remove(Channel::OnlineDrivers, id);
        }
        self.refresh_online_gauge();
        removed.is_some()
    }

    fn refresh_online_gauge(&self) {
        self.metrics
            .online_drivers
            .set(self.inner.online_drivers.len() as i64);
    }

    pub fn is_in_online_pool(&self, driver_id: Uuid) -> bool {
        self.inner.online_drivers.contains_key(&driver_id)
    }

    pub fn online_driver_ids(&self) -> Vec<Uuid> {
        self.inner
            .online_drivers
            .iter()
            .map(|entry| *entry.key())
            .collect()
    }
}

/// Membership of one sink on one channel.
pub struct Subscription {
    hub: Arc<HubInner>,
    channel: Channel,
    id: u64,
}

impl Subscription {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.remove(self.channel, self.id);
    }
}
