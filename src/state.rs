use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::collaborators::notify::{LogNotifier, NotificationSender};
use crate::collaborators::routing::{HaversineRouting, RoutingService};
use crate::config::Config;
use crate::engine::locks::KeyedLocks;
use crate::models::driver::Driver;
use crate::models::earning::Earning;
use crate::models::history::StatusHistoryEntry;
use crate::models::order::Order;
use crate::models::otp::{OtpAttempt, OtpTarget};
use crate::models::user::User;
use crate::observability::metrics::Metrics;
use crate::realtime::hub::BroadcastHub;

pub struct AppState {
    pub config: Config,
    pub users: DashMap<Uuid, User>,
    pub drivers: DashMap<Uuid, Driver>,
    pub orders: DashMap<Uuid, Order>,
    pub history: DashMap<Uuid, Vec<StatusHistoryEntry>>,
    pub earnings: DashMap<Uuid, Earning>,
    pub otps: DashMap<OtpTarget, Vec<OtpAttempt>>,
    pub order_locks: KeyedLocks,
    pub driver_locks: KeyedLocks,
    pub hub: BroadcastHub,
    pub routing: Arc<dyn RoutingService>,
    pub notifier: Arc<dyn NotificationSender>,
    pub metrics: Metrics,
    order_sequence: AtomicU64,
}

impl AppState {
    pub fn new(
        config: Config,
        routing: Arc<dyn RoutingService>,
        notifier: Arc<dyn NotificationSender>,
    ) -> Self {
        let metrics = Metrics::new();
        let lock_wait = Duration::from_millis(config.lock_wait_ms);

        Self {
            users: DashMap::new(),
            drivers: DashMap::new(),
            orders: DashMap::new(),
            history: DashMap::new(),
            earnings: DashMap::new(),
            otps: DashMap::new(),
            order_locks: KeyedLocks::new("order", lock_wait),
            driver_locks: KeyedLocks::new("driver", lock_wait),
            hub: BroadcastHub::new(metrics.clone()),
            routing,
            notifier,
            metrics,
            order_sequence: AtomicU64::new(0),
            config,
        }
    }

    /// State wired to the built-in collaborators: straight-line routing and
    /// log-only notifications.
    pub fn from_config(config: Config) -> Self {
        let routing = Arc::new(HaversineRouting::new(config.average_speed_kmh));
        Self::new(config, routing, Arc::new(LogNotifier))
    }

    pub fn next_order_number(&self, now: DateTime<Utc>) -> String {
        let sequence = self.order_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("ORD-{}-{:05}", now.format("%Y%m%d"), sequence)
    }

    pub fn order(&self, order_id: Uuid) -> Option<Order> {
        self.orders.get(&order_id).map(|entry| entry.value().clone())
    }

    pub fn driver(&self, driver_id: Uuid) -> Option<Driver> {
        self.drivers.get(&driver_id).map(|entry| entry.value().clone())
    }

    pub fn user(&self, user_id: Uuid) -> Option<User> {
        self.users.get(&user_id).map(|entry| entry.value().clone())
    }

    pub fn active_order_for_driver(&self, driver_id: Uuid) -> Option<Uuid> {
        self.orders
            .iter()
            .find(|entry| {
                let order = entry.value();
                order.driver_id == Some(driver_id) && order.status.is_active()
            })
            .map(|entry| *entry.key())
    }

    pub fn history_for(&self, order_id: Uuid) -> Vec<StatusHistoryEntry> {
        self.history
            .get(&order_id)
            .map(|entries| entries.value().clone())
            .unwrap_or_default()
    }
}
