//! Logical client identity and inbound command dispatch.

use crate::broker::destination::parse_destination;
use crate::broker::store::BrokerStore;
use crate::net::transport::Transport;
use crate::protocol::{headers, Command, Frame};
use crate::session::subscription::Subscription;
use crate::session::{AlreadyAttached, ProtocolViolation};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A reconnectable client identity. A session can outlive its connection:
/// it is created on CONNECT, detached when the transport drops, and removed
/// by the store's cleanup pass once the idle timeout elapses.
pub struct Session {
    id: String,
    client_id: Mutex<Option<String>>,
    subscriptions: Mutex<HashMap<String, Arc<Subscription>>>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    disconnected_at: Mutex<Option<Instant>>,
}

impl Session {
    pub fn new(id: String) -> Arc<Self> {
        Arc::new(Self {
            id,
            client_id: Mutex::new(None),
            subscriptions: Mutex::new(HashMap::new()),
            transport: Mutex::new(None),
            // Counts as idle until a connection attaches.
            disconnected_at: Mutex::new(Some(Instant::now())),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn client_id(&self) -> Option<String> {
        self.client_id.lock().clone()
    }

    pub fn set_client_id(&self, client_id: impl Into<String>) {
        *self.client_id.lock() = Some(client_id.into());
    }

    /// Attach a connection's transport. Fails if another connection is
    /// already attached; a session has at most one.
    pub fn attach(&self, transport: Arc<dyn Transport>) -> Result<(), AlreadyAttached> {
        let mut slot = self.transport.lock();
        if slot.is_some() {
            return Err(AlreadyAttached);
        }
        *slot = Some(transport);
        *self.disconnected_at.lock() = None;
        Ok(())
    }

    /// Drop the attached transport and start the idle clock. The session
    /// stays resolvable for reconnection until the store evicts it.
    pub fn detach(&self) {
        *self.transport.lock() = None;
        *self.disconnected_at.lock() = Some(Instant::now());
    }

    pub fn is_attached(&self) -> bool {
        self.transport.lock().is_some()
    }

    /// Send a frame to the attached connection. Frames to a detached
    /// session are dropped.
    pub fn send_frame(&self, frame: Frame) {
        if let Some(transport) = self.transport.lock().as_ref() {
            transport.send(frame);
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    pub fn subscription(&self, id: &str) -> Option<Arc<Subscription>> {
        self.subscriptions.lock().get(id).cloned()
    }

    /// Eviction criterion: no attached connection AND the idle timeout has
    /// elapsed since it was marked disconnected.
    pub fn eligible_for_removal(&self, now: Instant, idle_timeout: Duration) -> bool {
        match *self.disconnected_at.lock() {
            Some(since) => now.duration_since(since) >= idle_timeout,
            None => false,
        }
    }

    /// Detach every subscription from its destination and clear the map.
    pub fn dispose(&self, store: &BrokerStore) {
        let subscriptions: Vec<_> = self.subscriptions.lock().drain().collect();
        for (_, sub) in subscriptions {
            if let Some(dest) = store.find_destination(sub.destination()) {
                dest.remove_subscription(&sub);
            }
        }
    }

    /// Dispatch an application frame. Violations come back as
    /// [`ProtocolViolation`]; the connection decides whether the error is
    /// fatal to the link based on the violation's severity.
    pub fn process_frame(
        self: &Arc<Self>,
        store: &BrokerStore,
        frame: &Frame,
    ) -> Result<(), ProtocolViolation> {
        let Some(command) = frame.command() else {
            return Err(ProtocolViolation::fatal(format!(
                "unknown command {}",
                frame.command
            )));
        };
        match command {
            Command::Send => self.handle_send(store, frame),
            Command::Subscribe => self.handle_subscribe(store, frame),
            Command::Unsubscribe => self.handle_unsubscribe(store, frame),
            Command::Ack => self.handle_ack(frame),
            Command::Nack => {
                // Redelivery policy is not implemented; tolerate the frame
                // so well-behaved clients are not cut off.
                tracing::debug!(session = %self.id, "ignoring NACK");
                self.send_receipt_if_requested(frame);
                Ok(())
            }
            Command::Begin | Command::Commit | Command::Abort => Err(ProtocolViolation::tolerated(
                format!("{command} is not implemented"),
            )),
            other => Err(ProtocolViolation::fatal(format!(
                "unexpected {other} frame from client"
            ))),
        }
    }

    fn handle_send(
        self: &Arc<Self>,
        store: &BrokerStore,
        frame: &Frame,
    ) -> Result<(), ProtocolViolation> {
        let Some(path) = frame.header(headers::DESTINATION) else {
            return Err(ProtocolViolation::tolerated(
                "SEND requires a destination header",
            ));
        };
        let (name, broadcast) = parse_destination(path);
        let mut message = frame.clone();
        message.command = Command::Message.name().to_string();
        // Receipts are hop-local; the forwarded copy must not carry one.
        message.headers.remove(headers::RECEIPT);
        store.route_frame(&name, message, broadcast);
        self.send_receipt_if_requested(frame);
        Ok(())
    }

    fn handle_subscribe(
        self: &Arc<Self>,
        store: &BrokerStore,
        frame: &Frame,
    ) -> Result<(), ProtocolViolation> {
        let id = frame.header(headers::ID).unwrap_or_default();
        if id.is_empty() {
            return Err(ProtocolViolation::fatal("SUBSCRIBE requires an id header"));
        }
        let path = frame.header(headers::DESTINATION).unwrap_or_default();
        if path.is_empty() {
            return Err(ProtocolViolation::fatal(
                "SUBSCRIBE requires a destination header",
            ));
        }
        if self.subscriptions.lock().contains_key(id) {
            return Err(ProtocolViolation::fatal(format!(
                "subscription id {id} is already in use"
            )));
        }
        let (name, _) = parse_destination(path);
        let auto_ack = frame.header(headers::ACK) != Some("client");
        let subscription = Subscription::new(id, name.clone(), auto_ack, self);
        self.subscriptions
            .lock()
            .insert(id.to_string(), Arc::clone(&subscription));
        store.attach_subscription(&name, &subscription);
        tracing::debug!(session = %self.id, subscription = id, destination = %name, "subscribed");
        self.send_receipt_if_requested(frame);
        Ok(())
    }

    fn handle_unsubscribe(
        self: &Arc<Self>,
        store: &BrokerStore,
        frame: &Frame,
    ) -> Result<(), ProtocolViolation> {
        let id = frame.header(headers::ID).unwrap_or_default();
        let Some(subscription) = self.subscriptions.lock().remove(id) else {
            return Err(ProtocolViolation::fatal(format!(
                "UNSUBSCRIBE names unknown subscription id {id:?}"
            )));
        };
        if let Some(destination) = store.find_destination(subscription.destination()) {
            destination.remove_subscription(&subscription);
        }
        tracing::debug!(session = %self.id, subscription = id, "unsubscribed");
        self.send_receipt_if_requested(frame);
        Ok(())
    }

    fn handle_ack(self: &Arc<Self>, frame: &Frame) -> Result<(), ProtocolViolation> {
        let Some(subscription_id) = frame.header(headers::SUBSCRIPTION) else {
            return Err(ProtocolViolation::fatal(
                "ACK requires a subscription header",
            ));
        };
        let Some(message_id) = frame
            .header(headers::MESSAGE_ID)
            .and_then(|v| v.parse::<u64>().ok())
        else {
            return Err(ProtocolViolation::fatal(
                "ACK requires an integer message-id header",
            ));
        };
        let Some(subscription) = self.subscription(subscription_id) else {
            return Err(ProtocolViolation::fatal(format!(
                "ACK names unknown subscription id {subscription_id:?}"
            )));
        };
        subscription.acknowledge(message_id);
        self.send_receipt_if_requested(frame);
        Ok(())
    }

    fn send_receipt_if_requested(&self, frame: &Frame) {
        if let Some(receipt) = frame.header(headers::RECEIPT) {
            self.send_frame(Frame::receipt(receipt));
        }
    }
}
