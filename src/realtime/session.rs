use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::presence;
use crate::error::AppError;
use crate::models::caller::{CallerContext, Role};
use crate::models::driver::GeoPoint;
use crate::realtime::events::RealtimeEvent;
use crate::realtime::hub::{Channel, Envelope, EventSink, Subscription};
use crate::realtime::location;
use crate::state::AppState;

/// Inbound realtime messages.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    GoOnline,
    GoOffline,
    SubscribeOrder {
        order_id: Uuid,
    },
    UnsubscribeOrder {
        order_id: Uuid,
    },
    LocationPing {
        #[serde(default)]
        order_id: Option<Uuid>,
        lat: f64,
        lng: f64,
    },
}

/// One realtime connection: its personal channel, the order channels it
/// tracks, and, for drivers, its presence in the online pool.
pub struct Session {
    state: Arc<AppState>,
    caller: CallerContext,
    sink: EventSink,
    personal: Subscription,
    orders: HashMap<Uuid, Subscription>,
    pool_membership: Option<u64>,
}

impl Session {
    pub fn open(
        state: Arc<AppState>,
        caller: CallerContext,
        sink: EventSink,
    ) -> Result<Self, AppError> {
        let personal_channel = match caller.role {
            Role::User if state.users.contains_key(&caller.id) => Channel::User(caller.id),
            Role::Driver if state.drivers.contains_key(&caller.id) => Channel::Driver(caller.id),
            _ => {
                return Err(AppError::NotFound(format!(
                    "{} {} not found",
                    caller.role, caller.id
                )));
            }
        };

        let personal = state.hub.subscribe(personal_channel, sink.clone());
        info!(caller_id = %caller.id, role = %caller.role, "realtime session opened");

        Ok(Self {
            state,
            caller,
            sink,
            personal,
            orders: HashMap::new(),
            pool_membership: None,
        })
    }

    pub fn caller(&self) -> CallerContext {
        self.caller
    }

    pub fn tracked_orders(&self) -> Vec<Uuid> {
        self.orders.keys().copied().collect()
    }

    pub async fn handle(&mut self, message: ClientMessage) -> Result<(), AppError> {
        match message {
            ClientMessage::GoOnline => {
                self.require_driver()?;
                let membership =
                    presence::go_online(&self.state, self.caller.id, self.sink.clone())?;
                self.pool_membership = Some(membership);
            }
            ClientMessage::GoOffline => {
                self.require_driver()?;
                presence::go_offline(&self.state, self.caller.id)?;
                self.pool_membership = None;
            }
            ClientMessage::SubscribeOrder { order_id } => self.track_order(order_id)?,
            ClientMessage::UnsubscribeOrder { order_id } => {
                if let Some(subscription) = self.orders.remove(&order_id) {
                    subscription.unsubscribe();
                }
            }
            ClientMessage::LocationPing { order_id, lat, lng } => {
                self.require_driver()?;
                location::record_ping(&self.state, self.caller.id, order_id, GeoPoint { lat, lng })
                    .await?;
            }
        }
        Ok(())
    }

    /// Parses and handles one text frame. Failures are answered with an
    /// `error` event on this connection.
    pub async fn handle_text(&mut self, text: &str) {
        let result = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle(message).await,
            Err(err) => Err(AppError::Validation(format!("unrecognized message: {err}"))),
        };

        if let Err(err) = result {
            debug!(caller_id = %self.caller.id, error = %err, "realtime message rejected");
            self.reply_error(&err);
        }
    }

    fn reply_error(&self, err: &AppError) {
        let envelope = Envelope {
            channel: self.personal.channel(),
            event: RealtimeEvent::Error {
                code: err.code().to_string(),
                message: err.message(),
            },
        };
        if self.sink.try_send(envelope).is_err() {
            warn!(caller_id = %self.caller.id, "could not deliver error event");
        }
    }

    fn require_driver(&self) -> Result<(), AppError> {
        if self.caller.role != Role::Driver {
            return Err(AppError::Forbidden("drivers only".to_string()));
        }
        Ok(())
    }

    fn track_order(&mut self, order_id: Uuid) -> Result<(), AppError> {
        let order = self
            .state
            .order(order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        let allowed = match self.caller.role {
            Role::User => order.user_id == self.caller.id,
            Role::Driver => order.driver_id == Some(self.caller.id),
        };
        if !allowed {
            return Err(AppError::Forbidden(
                "not a party to this order".to_string(),
            ));
        }

        if !self.orders.contains_key(&order_id) {
            let subscription = self
                .state
                .hub
                .subscribe(Channel::Order(order_id), self.sink.clone());
            self.orders.insert(order_id, subscription);
        }
        Ok(())
    }

    /// Ends the session: every subscription is released and a driver this
    /// connection brought online is forced offline.
    pub fn close(self) {
        let Session {
            state,
            caller,
            personal,
            orders,
            pool_membership,
            ..
        } = self;

        drop(orders);
        personal.unsubscribe();

        if let Some(membership) = pool_membership {
            if let Err(err) = presence::disconnect(&state, caller.id, membership) {
                warn!(driver_id = %caller.id, error = %err, "failed to mark driver offline");
            }
        }
        info!(caller_id = %caller.id, role = %caller.role, "realtime session closed");
    }
}
