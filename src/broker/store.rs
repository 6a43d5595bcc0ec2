//! Shared broker state: the session and destination registries plus the
//! periodic maintenance passes that keep them bounded.

use crate::broker::destination::Destination;
use crate::protocol::{headers, Command, Frame};
use crate::session::session::Session;
use crate::session::subscription::Subscription;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How long a detached session stays resolvable before eviction.
    pub session_idle_timeout: Duration,
    /// Topic that periodic status reports are broadcast to.
    pub status_destination: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            session_idle_timeout: Duration::from_secs(300),
            status_destination: "status".to_string(),
        }
    }
}

/// What one cleanup pass removed; reported in the maintenance log line.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub sessions_evicted: usize,
    pub frames_expired: usize,
    pub destinations_pruned: usize,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.sessions_evicted == 0 && self.frames_expired == 0 && self.destinations_pruned == 0
    }
}

pub struct BrokerStore {
    config: StoreConfig,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    destinations: Mutex<HashMap<String, Arc<Destination>>>,
}

impl BrokerStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
            destinations: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn create_session(&self) -> Arc<Session> {
        let id = Uuid::new_v4().to_string();
        let session = Session::new(id.clone());
        self.sessions.lock().insert(id, Arc::clone(&session));
        session
    }

    pub fn find_session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().get(id).cloned()
    }

    pub fn remove_session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().remove(id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Find-or-create a destination by bare name.
    pub fn destination(&self, name: &str) -> Arc<Destination> {
        let mut destinations = self.destinations.lock();
        match destinations.get(name) {
            Some(dest) => Arc::clone(dest),
            None => {
                let dest = Destination::new(name);
                destinations.insert(name.to_string(), Arc::clone(&dest));
                dest
            }
        }
    }

    pub fn find_destination(&self, name: &str) -> Option<Arc<Destination>> {
        self.destinations.lock().get(name).cloned()
    }

    /// Route a SEND to `name`, re-resolving the registry entry if cleanup
    /// closed the destination between lookup and delivery.
    pub fn route_frame(&self, name: &str, frame: Frame, broadcast: bool) {
        if broadcast {
            self.destination(name).publish_frame(frame);
            return;
        }
        let mut frame = frame;
        loop {
            frame = match self.destination(name).add_frame(frame) {
                None => return,
                Some(rejected) => rejected,
            };
        }
    }

    /// Attach a subscription to `name`, re-resolving the registry entry if
    /// cleanup closed the destination between lookup and attach. Returns
    /// the destination the subscription ended up on.
    pub fn attach_subscription(
        &self,
        name: &str,
        subscription: &Arc<Subscription>,
    ) -> Arc<Destination> {
        loop {
            let destination = self.destination(name);
            if destination.add_subscription(Arc::clone(subscription)) {
                return destination;
            }
        }
    }

    pub fn destination_count(&self) -> usize {
        self.destinations.lock().len()
    }

    /// One maintenance pass with the clocks injected for testability:
    /// `now` drives session-idle eviction, `wall` drives message expiry.
    ///
    /// Eviction candidates are snapshotted first and re-checked under the
    /// lock before removal, so a session that reattaches mid-pass survives.
    pub fn cleanup_at(&self, now: Instant, wall: DateTime<Utc>) -> CleanupReport {
        let mut report = CleanupReport::default();

        let candidates: Vec<Arc<Session>> = {
            let sessions = self.sessions.lock();
            sessions
                .values()
                .filter(|s| s.eligible_for_removal(now, self.config.session_idle_timeout))
                .cloned()
                .collect()
        };
        for session in candidates {
            let removed = {
                let mut sessions = self.sessions.lock();
                if session.eligible_for_removal(now, self.config.session_idle_timeout) {
                    sessions.remove(session.id())
                } else {
                    None
                }
            };
            if let Some(session) = removed {
                tracing::info!(session = %session.id(), "evicting idle session");
                session.dispose(self);
                report.sessions_evicted += 1;
            }
        }

        let destinations: Vec<Arc<Destination>> =
            self.destinations.lock().values().cloned().collect();
        for destination in destinations {
            report.frames_expired += destination.remove_expired(wall);
        }

        // close_if_unused marks the destination closed in the same step
        // that approves its removal, so a handle resolved before the prune
        // cannot accept frames or subscriptions afterwards.
        let mut destinations = self.destinations.lock();
        let before = destinations.len();
        destinations.retain(|_, dest| !dest.close_if_unused());
        report.destinations_pruned = before - destinations.len();

        report
    }

    pub fn cleanup_once(&self) -> CleanupReport {
        self.cleanup_at(Instant::now(), Utc::now())
    }

    /// Broadcast a status report to the configured destination, but only
    /// when someone is actually listening there.
    pub fn publish_status(&self) {
        let Some(destination) = self.find_destination(&self.config.status_destination) else {
            return;
        };
        if destination.subscription_count() == 0 {
            return;
        }
        let mut body = String::new();
        {
            let sessions = self.sessions.lock();
            body.push_str(&format!("sessions: {}\n", sessions.len()));
            for session in sessions.values() {
                body.push_str(&format!(
                    "  {} attached={} subscriptions={}\n",
                    session.id(),
                    session.is_attached(),
                    session.subscription_count()
                ));
            }
        }
        {
            let destinations = self.destinations.lock();
            body.push_str(&format!("destinations: {}\n", destinations.len()));
            for dest in destinations.values() {
                body.push_str(&format!(
                    "  {} subscribers={} pending={}\n",
                    dest.name(),
                    dest.subscription_count(),
                    dest.pending_count()
                ));
            }
        }
        let frame = Frame::new(Command::Message)
            .with_header(
                headers::DESTINATION,
                format!("/topic/{}", self.config.status_destination),
            )
            .with_header(headers::CONTENT_TYPE, "text/plain")
            .with_body(Bytes::from(body));
        destination.publish_frame(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::transport::Transport;
    use crate::session::subscription::Subscription;

    struct NullTransport;

    impl Transport for NullTransport {
        fn connected(&self) -> bool {
            true
        }

        fn send(&self, _frame: Frame) {}

        fn since_last_send(&self) -> Duration {
            Duration::ZERO
        }

        fn shutdown(&self) {}
    }

    fn store_with_timeout(timeout: Duration) -> BrokerStore {
        BrokerStore::new(StoreConfig {
            session_idle_timeout: timeout,
            ..StoreConfig::default()
        })
    }

    #[test]
    fn sessions_are_created_with_unique_ids() {
        let store = BrokerStore::new(StoreConfig::default());
        let a = store.create_session();
        let b = store.create_session();
        assert_ne!(a.id(), b.id());
        assert_eq!(store.session_count(), 2);
        assert!(store.find_session(a.id()).is_some());
    }

    #[test]
    fn destination_is_find_or_create() {
        let store = BrokerStore::new(StoreConfig::default());
        let first = store.destination("orders");
        let second = store.destination("orders");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.destination_count(), 1);
    }

    #[test]
    fn cleanup_evicts_only_idle_detached_sessions() {
        let store = store_with_timeout(Duration::from_secs(300));
        let idle = store.create_session();
        let _also_idle = store.create_session();

        // Nothing is old enough yet.
        let report = store.cleanup_at(Instant::now(), Utc::now());
        assert_eq!(report.sessions_evicted, 0);

        let later = Instant::now() + Duration::from_secs(301);
        let report = store.cleanup_at(later, Utc::now());
        assert_eq!(report.sessions_evicted, 2);
        assert!(store.find_session(idle.id()).is_none());
    }

    #[test]
    fn cleanup_skips_attached_sessions() {
        let store = store_with_timeout(Duration::ZERO);
        let session = store.create_session();
        session.attach(Arc::new(NullTransport)).unwrap();
        let report = store.cleanup_at(Instant::now() + Duration::from_secs(1), Utc::now());
        assert_eq!(report.sessions_evicted, 0);
        assert!(store.find_session(session.id()).is_some());
    }

    #[test]
    fn cleanup_prunes_unused_destinations_but_keeps_backlogs() {
        let store = BrokerStore::new(StoreConfig::default());
        let empty = store.destination("empty");
        assert!(empty.is_unused());
        let busy = store.destination("busy");
        busy.add_frame(Frame::new(Command::Message));
        let report = store.cleanup_at(Instant::now(), Utc::now());
        assert_eq!(report.destinations_pruned, 1);
        assert!(store.find_destination("empty").is_none());
        assert!(store.find_destination("busy").is_some());
    }

    #[test]
    fn subscription_survives_a_cleanup_racing_the_attach() {
        let store = BrokerStore::new(StoreConfig::default());
        let stale = store.destination("orders");

        // Cleanup runs between the lookup and the attach and prunes the
        // still-unused destination.
        let report = store.cleanup_at(Instant::now(), Utc::now());
        assert_eq!(report.destinations_pruned, 1);

        let session = store.create_session();
        let sub = Subscription::new("sub-1", "orders", false, &session);
        assert!(!stale.add_subscription(Arc::clone(&sub)));

        let live = store.attach_subscription("orders", &sub);
        assert!(!Arc::ptr_eq(&stale, &live));
        store.route_frame("orders", Frame::new(Command::Message), false);
        assert_eq!(sub.last_message_id(), 1);
        assert_eq!(live.pending_count(), 0);
    }

    #[test]
    fn status_is_only_published_to_listeners() {
        let store = BrokerStore::new(StoreConfig::default());
        // No destination at all: nothing happens.
        store.publish_status();
        assert!(store.find_destination("status").is_none());

        let session = store.create_session();
        let sub = Subscription::new("sub-1", "status", false, &session);
        store.destination("status").add_subscription(Arc::clone(&sub));
        store.publish_status();
        assert_eq!(sub.last_message_id(), 1);
    }
}
