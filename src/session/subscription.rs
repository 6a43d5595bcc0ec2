//! One client's registration against one destination.

use crate::protocol::{headers, Frame};
use crate::session::session::Session;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

/// Tracks per-subscription message ids and unacknowledged deliveries.
///
/// Message ids are strictly increasing from 1 and never reused. The
/// unacknowledged buffer is only populated when the subscription is not
/// auto-acknowledging (`ack: client`).
pub struct Subscription {
    id: String,
    destination: String,
    auto_ack: bool,
    session: Weak<Session>,
    state: Mutex<SubscriptionState>,
}

#[derive(Default)]
struct SubscriptionState {
    last_message_id: u64,
    last_acknowledged: u64,
    unacked: BTreeMap<u64, Frame>,
}

impl Subscription {
    pub fn new(
        id: impl Into<String>,
        destination: impl Into<String>,
        auto_ack: bool,
        session: &Arc<Session>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            destination: destination.into(),
            auto_ack,
            session: Arc::downgrade(session),
            state: Mutex::new(SubscriptionState::default()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Destination name this subscription is attached to (prefix stripped).
    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn auto_ack(&self) -> bool {
        self.auto_ack
    }

    /// Stamp the next message id and the subscription id onto `frame`,
    /// forward it through the owning session's send path, and buffer it
    /// when the client acknowledges explicitly.
    ///
    /// Id assignment and buffering happen in one lock scope: concurrent
    /// deliveries must not be able to acknowledge an id before the frame
    /// carrying it is buffered.
    pub fn send_frame(&self, mut frame: Frame) {
        {
            let mut state = self.state.lock();
            state.last_message_id += 1;
            let message_id = state.last_message_id;
            frame.set_header(headers::MESSAGE_ID, message_id.to_string());
            frame.set_header(headers::SUBSCRIPTION, self.id.clone());
            if !self.auto_ack {
                state.unacked.insert(message_id, frame.clone());
            }
        }
        if let Some(session) = self.session.upgrade() {
            session.send_frame(frame);
        }
    }

    /// Cumulative acknowledge: drop every buffered entry with id at or
    /// below `message_id` and advance the watermark. Re-acknowledging an
    /// already-acknowledged id is a no-op.
    pub fn acknowledge(&self, message_id: u64) {
        let mut state = self.state.lock();
        if message_id <= state.last_acknowledged {
            return;
        }
        let keep = state.unacked.split_off(&(message_id + 1));
        state.unacked = keep;
        state.last_acknowledged = message_id;
    }

    pub fn last_acknowledged(&self) -> u64 {
        self.state.lock().last_acknowledged
    }

    /// Message ids still awaiting acknowledgment, in id order.
    pub fn unacknowledged_ids(&self) -> Vec<u64> {
        self.state.lock().unacked.keys().copied().collect()
    }

    pub fn last_message_id(&self) -> u64 {
        self.state.lock().last_message_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Command, Frame};
    use crate::session::session::Session;

    fn client_ack_subscription() -> (Arc<Session>, Arc<Subscription>) {
        let session = Session::new("s-test".to_string());
        let sub = Subscription::new("sub-1", "orders", false, &session);
        (session, sub)
    }

    fn message() -> Frame {
        Frame::new(Command::Message).with_header(headers::DESTINATION, "orders")
    }

    #[test]
    fn message_ids_are_contiguous_from_one() {
        let (_session, sub) = client_ack_subscription();
        for _ in 0..5 {
            sub.send_frame(message());
        }
        assert_eq!(sub.unacknowledged_ids(), vec![1, 2, 3, 4, 5]);
        assert_eq!(sub.last_message_id(), 5);
    }

    #[test]
    fn acknowledge_is_cumulative() {
        let (_session, sub) = client_ack_subscription();
        for _ in 0..5 {
            sub.send_frame(message());
        }
        sub.acknowledge(3);
        assert_eq!(sub.unacknowledged_ids(), vec![4, 5]);
        assert_eq!(sub.last_acknowledged(), 3);
    }

    #[test]
    fn reacknowledging_lower_id_is_a_noop() {
        let (_session, sub) = client_ack_subscription();
        for _ in 0..5 {
            sub.send_frame(message());
        }
        sub.acknowledge(3);
        sub.acknowledge(2);
        assert_eq!(sub.unacknowledged_ids(), vec![4, 5]);
        assert_eq!(sub.last_acknowledged(), 3);
    }

    #[test]
    fn concurrent_deliveries_never_strand_entries_below_the_watermark() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let session = Session::new("s-test".to_string());
        let sub = Subscription::new("sub-1", "orders", false, &session);
        let done = Arc::new(AtomicBool::new(false));

        let senders: Vec<_> = (0..2)
            .map(|_| {
                let sub = Arc::clone(&sub);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        sub.send_frame(Frame::new(Command::Message));
                    }
                })
            })
            .collect();
        let acker = {
            let sub = Arc::clone(&sub);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    sub.acknowledge(sub.last_message_id());
                    // The watermark only grows, so every id snapshotted
                    // after reading it must sit above it.
                    let watermark = sub.last_acknowledged();
                    let ids = sub.unacknowledged_ids();
                    assert!(ids.iter().all(|&id| id > watermark));
                }
            })
        };
        for sender in senders {
            sender.join().unwrap();
        }
        done.store(true, Ordering::Release);
        acker.join().unwrap();

        assert_eq!(sub.last_message_id(), 1000);
        sub.acknowledge(sub.last_message_id());
        assert!(sub.unacknowledged_ids().is_empty());
    }

    #[test]
    fn auto_ack_subscription_buffers_nothing() {
        let session = Session::new("s-test".to_string());
        let sub = Subscription::new("sub-1", "orders", true, &session);
        sub.send_frame(message());
        assert!(sub.unacknowledged_ids().is_empty());
        assert_eq!(sub.last_message_id(), 1);
    }
}
