//! Named delivery targets: queues and topics.

use crate::protocol::{headers, Frame};
use crate::session::subscription::Subscription;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::collections::VecDeque;
use std::sync::Arc;

const TOPIC_PREFIX: &str = "/topic/";
const QUEUE_PREFIX: &str = "/queue/";

/// Split a destination path into its bare name and delivery mode.
/// `/topic/` paths broadcast; `/queue/` paths (and bare names) deliver to a
/// single subscriber with backlog buffering.
pub fn parse_destination(path: &str) -> (String, bool) {
    if let Some(name) = path.strip_prefix(TOPIC_PREFIX) {
        (name.to_string(), true)
    } else if let Some(name) = path.strip_prefix(QUEUE_PREFIX) {
        (name.to_string(), false)
    } else {
        (path.to_string(), false)
    }
}

/// Render an expiry timestamp in the wire format carried by the `expires`
/// header. The format sorts lexicographically in time order, so expiry
/// checks are plain string comparisons.
pub fn format_expiry(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

/// A named destination. One instance serves both delivery modes: SEND frames
/// pick queue or broadcast behavior per frame, based on the path they used.
pub struct Destination {
    name: String,
    inner: Mutex<DestinationInner>,
}

#[derive(Default)]
struct DestinationInner {
    subscriptions: Vec<Arc<Subscription>>,
    pending: VecDeque<Frame>,
    /// Set when cleanup removes the destination from the registry. A
    /// closed destination refuses new work so a handle resolved before
    /// the prune cannot strand subscribers or frames on an orphan.
    closed: bool,
}

impl Destination {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            inner: Mutex::new(DestinationInner::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue delivery: exactly one subscriber receives the frame, chosen at
    /// random. With no subscribers the frame joins the FIFO backlog. A
    /// destination already closed by cleanup hands the frame back so the
    /// caller can re-resolve a live registry entry.
    pub fn add_frame(&self, frame: Frame) -> Option<Frame> {
        let target = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Some(frame);
            }
            match inner.subscriptions.choose(&mut rand::thread_rng()) {
                Some(sub) => Arc::clone(sub),
                None => {
                    inner.pending.push_back(frame);
                    return None;
                }
            }
        };
        target.send_frame(frame);
        None
    }

    /// Topic delivery: every subscriber receives its own copy. With no
    /// subscribers the frame is dropped.
    pub fn publish_frame(&self, frame: Frame) {
        let targets: Vec<_> = self.inner.lock().subscriptions.to_vec();
        if targets.is_empty() {
            tracing::trace!(destination = %self.name, "dropping broadcast with no subscribers");
            return;
        }
        for target in targets {
            target.send_frame(frame.clone());
        }
    }

    /// Register a subscription and drain the entire backlog to it, oldest
    /// first. Returns false without attaching when the destination was
    /// closed by cleanup. The drain happens outside the lock so delivery
    /// cannot deadlock against a concurrent publish.
    pub fn add_subscription(&self, subscription: Arc<Subscription>) -> bool {
        let backlog: Vec<_> = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return false;
            }
            inner.subscriptions.push(Arc::clone(&subscription));
            inner.pending.drain(..).collect()
        };
        for frame in backlog {
            subscription.send_frame(frame);
        }
        true
    }

    pub fn remove_subscription(&self, subscription: &Arc<Subscription>) {
        self.inner
            .lock()
            .subscriptions
            .retain(|sub| !Arc::ptr_eq(sub, subscription));
    }

    /// Discard backlog frames whose `expires` header is at or before `now`.
    /// Frames without the header never expire. Returns the discard count.
    pub fn remove_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = format_expiry(now);
        let mut inner = self.inner.lock();
        let before = inner.pending.len();
        inner.pending.retain(|frame| {
            frame
                .header(headers::EXPIRES)
                .map(|expires| expires > cutoff.as_str())
                .unwrap_or(true)
        });
        before - inner.pending.len()
    }

    /// Reclaimable: nothing subscribed and nothing buffered.
    pub fn is_unused(&self) -> bool {
        let inner = self.inner.lock();
        inner.subscriptions.is_empty() && inner.pending.is_empty()
    }

    /// Atomically close the destination if it is unused. Cleanup calls
    /// this under the registry lock while pruning, so lookup-then-attach
    /// callers holding a stale handle get refused instead of attaching
    /// to an orphan.
    pub fn close_if_unused(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.subscriptions.is_empty() && inner.pending.is_empty() {
            inner.closed = true;
            true
        } else {
            false
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.lock().subscriptions.len()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Command;
    use crate::session::session::Session;
    use chrono::TimeZone;

    fn message(text: &str) -> Frame {
        Frame::new(Command::Message)
            .with_header(headers::DESTINATION, "orders")
            .with_body(bytes::Bytes::from(text.to_string()))
    }

    fn subscription(id: &str) -> (Arc<Session>, Arc<Subscription>) {
        let session = Session::new(format!("s-{id}"));
        let sub = Subscription::new(id, "orders", false, &session);
        (session, sub)
    }

    #[test]
    fn parse_destination_strips_prefixes() {
        assert_eq!(parse_destination("/topic/news"), ("news".to_string(), true));
        assert_eq!(
            parse_destination("/queue/orders"),
            ("orders".to_string(), false)
        );
        assert_eq!(parse_destination("orders"), ("orders".to_string(), false));
    }

    #[test]
    fn queue_frames_buffer_until_first_subscriber() {
        let dest = Destination::new("orders");
        dest.add_frame(message("a"));
        dest.add_frame(message("b"));
        dest.add_frame(message("c"));
        assert_eq!(dest.pending_count(), 3);

        let (_session, sub) = subscription("sub-1");
        dest.add_subscription(Arc::clone(&sub));
        assert_eq!(dest.pending_count(), 0);
        // Backlog drained in FIFO order with contiguous ids from 1.
        assert_eq!(sub.unacknowledged_ids(), vec![1, 2, 3]);
    }

    #[test]
    fn queue_delivers_to_exactly_one_subscriber() {
        let dest = Destination::new("orders");
        let (_s1, sub1) = subscription("sub-1");
        let (_s2, sub2) = subscription("sub-2");
        dest.add_subscription(Arc::clone(&sub1));
        dest.add_subscription(Arc::clone(&sub2));
        for _ in 0..20 {
            dest.add_frame(message("x"));
        }
        let delivered = sub1.last_message_id() + sub2.last_message_id();
        assert_eq!(delivered, 20);
        assert_eq!(dest.pending_count(), 0);
    }

    #[test]
    fn broadcast_reaches_every_subscriber_and_drops_with_none() {
        let dest = Destination::new("news");
        dest.publish_frame(message("lost"));
        assert_eq!(dest.pending_count(), 0);

        let (_s1, sub1) = subscription("sub-1");
        let (_s2, sub2) = subscription("sub-2");
        dest.add_subscription(Arc::clone(&sub1));
        dest.add_subscription(Arc::clone(&sub2));
        dest.publish_frame(message("hello"));
        assert_eq!(sub1.last_message_id(), 1);
        assert_eq!(sub2.last_message_id(), 1);
    }

    #[test]
    fn removed_subscription_no_longer_receives() {
        let dest = Destination::new("orders");
        let (_s1, sub1) = subscription("sub-1");
        dest.add_subscription(Arc::clone(&sub1));
        dest.remove_subscription(&sub1);
        dest.add_frame(message("after"));
        assert_eq!(sub1.last_message_id(), 0);
        assert_eq!(dest.pending_count(), 1);
        assert!(!dest.is_unused());
    }

    #[test]
    fn closed_destination_refuses_new_work() {
        let dest = Destination::new("orders");
        assert!(dest.close_if_unused());

        let (_session, sub) = subscription("sub-1");
        assert!(!dest.add_subscription(Arc::clone(&sub)));
        assert_eq!(dest.subscription_count(), 0);

        let rejected = dest.add_frame(message("x"));
        assert!(rejected.is_some());
        assert_eq!(dest.pending_count(), 0);
    }

    #[test]
    fn busy_destination_does_not_close() {
        let dest = Destination::new("orders");
        dest.add_frame(message("pending"));
        assert!(!dest.close_if_unused());
        // Still open: a subscriber attaches and drains the backlog.
        let (_session, sub) = subscription("sub-1");
        assert!(dest.add_subscription(Arc::clone(&sub)));
        assert_eq!(sub.last_message_id(), 1);
    }

    #[test]
    fn expired_backlog_frames_are_discarded() {
        let dest = Destination::new("orders");
        let past = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let future = Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap();
        dest.add_frame(message("stale").with_header(headers::EXPIRES, format_expiry(past)));
        dest.add_frame(message("fresh").with_header(headers::EXPIRES, format_expiry(future)));
        dest.add_frame(message("forever"));
        let removed = dest.remove_expired(Utc::now());
        assert_eq!(removed, 1);
        assert_eq!(dest.pending_count(), 2);
    }

    #[test]
    fn expiry_format_sorts_chronologically() {
        let earlier = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 11, 3, 8, 30, 0).unwrap();
        assert!(format_expiry(earlier) < format_expiry(later));
        assert_eq!(format_expiry(earlier), "20240601T120000Z");
    }
}
