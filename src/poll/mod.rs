//! Per-recipient notification mailbox.
//!
//! The server enqueues notifications (transfer requests, expiry warnings,
//! ...) for a registrar; the registrar fetches them with `poll op="req"` and
//! removes each one with `poll op="ack"`.
//!
//! ```text
//!   put ──> [ m1 | m2 | m3 ] ──> get  (oldest, no side effect)
//!                 ^
//!                 └── delete(id)  (only removal path)
//! ```
//!
//! Queues are keyed by recipient; `None` is the default queue. Ordering is
//! FIFO within one recipient and independent across recipients. A logged-in
//! client is served from its own queue merged with the default queue in
//! enqueue order (see [`PollQueue::deliverable`]). Emptied mailboxes are
//! dropped.

mod handler;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::codec::DecodeError;
use crate::protocol::{Extensions, Payload};

pub use handler::PollHandler;

/// Poll queue failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    /// Nothing to deliver.
    #[error("No messages queued")]
    QueueEmpty,

    /// No message with this id for the recipient.
    #[error("Message {0} not found")]
    NotFound(String),
}

/// What a registrar is told.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Human-readable text
    pub message: String,
    /// Language of `message`
    pub lang: String,
    /// Object data delivered as `resData`
    pub res_data: Option<Box<dyn Payload>>,
    /// Extensions delivered with the message
    pub extensions: Extensions,
}

impl Notification {
    /// Text-only notification in English.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            lang: "en".to_string(),
            res_data: None,
            extensions: Extensions::new(),
        }
    }

    /// Attach object data.
    pub fn with_res_data(mut self, data: impl Payload) -> Self {
        self.res_data = Some(Box::new(data));
        self
    }

    /// Attach an extension.
    pub fn with_extension(mut self, extension: impl Payload) -> Result<Self, DecodeError> {
        self.extensions.insert(Box::new(extension))?;
        Ok(self)
    }

    /// Set the message language.
    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }
}

/// A queued notification.
#[derive(Debug, Clone, PartialEq)]
pub struct PollMessage {
    /// Process-unique decimal id
    pub id: String,
    /// Enqueue order across all recipients
    pub sequence: u64,
    /// Recipient key (`None` is the default queue)
    pub recipient: Option<String>,
    /// Object service the notification concerns
    pub object_ns: String,
    /// Content
    pub notification: Notification,
    /// When it was enqueued
    pub queued_at: DateTime<Utc>,
}

/// Result of a `get`: the oldest visible message and how many are visible.
#[derive(Debug, Clone, PartialEq)]
pub struct PolledMessage {
    /// Oldest message passing the filter
    pub message: PollMessage,
    /// Messages passing the filter, including this one
    pub count: usize,
}

/// Restricts which object namespaces a caller can see.
///
/// A session sees only notifications for the services it negotiated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollFilter {
    namespaces: Option<Vec<String>>,
}

impl PollFilter {
    /// No restriction.
    pub fn all() -> Self {
        Self::default()
    }

    /// Only messages for these object namespaces.
    pub fn namespaces<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            namespaces: Some(namespaces.into_iter().map(Into::into).collect()),
        }
    }

    /// Whether a message for `object_ns` passes.
    pub fn allows(&self, object_ns: &str) -> bool {
        self.namespaces
            .as_ref()
            .map_or(true, |allowed| allowed.iter().any(|ns| ns == object_ns))
    }
}

type Mailbox = Arc<Mutex<VecDeque<PollMessage>>>;

/// Recipient-keyed FIFO mailboxes.
///
/// Lock order is map then mailbox. `put` holds the map read lock while it
/// pushes so a concurrent prune cannot orphan the mailbox it writes to.
#[derive(Debug, Default)]
pub struct PollQueue {
    mailboxes: RwLock<HashMap<Option<String>, Mailbox>>,
    next_id: AtomicU64,
}

impl PollQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn mailbox(&self, recipient: Option<&str>) -> Option<Mailbox> {
        self.mailboxes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&recipient.map(str::to_string))
            .cloned()
    }

    /// Drop the recipient's mailbox if it holds nothing.
    fn prune(&self, recipient: Option<&str>) {
        let mut mailboxes = self.mailboxes.write().unwrap_or_else(PoisonError::into_inner);
        let key = recipient.map(str::to_string);
        let empty = mailboxes
            .get(&key)
            .is_some_and(|m| m.lock().unwrap_or_else(PoisonError::into_inner).is_empty());
        if empty {
            mailboxes.remove(&key);
        }
    }

    /// Enqueue a notification; returns its id.
    pub fn put(&self, recipient: Option<&str>, object_ns: &str, notification: Notification) -> String {
        let sequence = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let id = sequence.to_string();
        let message = PollMessage {
            id: id.clone(),
            sequence,
            recipient: recipient.map(str::to_string),
            object_ns: object_ns.to_string(),
            notification,
            queued_at: Utc::now(),
        };

        let key = recipient.map(str::to_string);
        {
            let mailboxes = self.mailboxes.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(mailbox) = mailboxes.get(&key) {
                mailbox.lock().unwrap_or_else(PoisonError::into_inner).push_back(message);
                tracing::debug!(recipient = ?recipient, id = %id, "Queued poll message");
                return id;
            }
        }
        self.mailboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(message);

        tracing::debug!(recipient = ?recipient, id = %id, "Queued poll message");
        id
    }

    /// Oldest message visible through the filter. Does not remove it.
    pub fn get(&self, recipient: Option<&str>, filter: &PollFilter) -> Result<PolledMessage, PollError> {
        let mailbox = self.mailbox(recipient).ok_or(PollError::QueueEmpty)?;
        let queue = mailbox.lock().unwrap_or_else(PoisonError::into_inner);

        let mut visible = queue.iter().filter(|m| filter.allows(&m.object_ns));
        let first = visible.next().ok_or(PollError::QueueEmpty)?.clone();
        let count = 1 + visible.count();
        Ok(PolledMessage {
            message: first,
            count,
        })
    }

    /// Remove the message with `id`; returns how many visible messages remain.
    pub fn delete(&self, recipient: Option<&str>, id: &str, filter: &PollFilter) -> Result<usize, PollError> {
        let not_found = || PollError::NotFound(id.to_string());
        let mailbox = self.mailbox(recipient).ok_or_else(not_found)?;
        let (remaining, emptied) = {
            let mut queue = mailbox.lock().unwrap_or_else(PoisonError::into_inner);
            let position = queue
                .iter()
                .position(|m| m.id == id && filter.allows(&m.object_ns))
                .ok_or_else(not_found)?;
            queue.remove(position);
            let remaining = queue.iter().filter(|m| filter.allows(&m.object_ns)).count();
            (remaining, queue.is_empty())
        };
        if emptied {
            self.prune(recipient);
        }

        tracing::debug!(recipient = ?recipient, id = %id, "Acknowledged poll message");
        Ok(remaining)
    }

    /// Oldest message for a logged-in client across its own queue and the
    /// default queue; the count covers both.
    ///
    /// With no client id only the default queue is consulted.
    pub fn deliverable(&self, client_id: Option<&str>, filter: &PollFilter) -> Result<PolledMessage, PollError> {
        if client_id.is_none() {
            return self.get(None, filter);
        }
        match (self.get(client_id, filter), self.get(None, filter)) {
            (Ok(own), Ok(shared)) => {
                let count = own.count + shared.count;
                let message = if own.message.sequence <= shared.message.sequence {
                    own.message
                } else {
                    shared.message
                };
                Ok(PolledMessage { message, count })
            },
            (Ok(polled), Err(_)) | (Err(_), Ok(polled)) => Ok(polled),
            (Err(e), Err(_)) => Err(e),
        }
    }

    /// Acknowledge `id` from the client's own queue or, failing that, the
    /// default queue. Returns the visible messages left across both.
    pub fn acknowledge(&self, client_id: Option<&str>, id: &str, filter: &PollFilter) -> Result<usize, PollError> {
        if client_id.is_none() {
            return self.delete(None, id, filter);
        }
        match self.delete(client_id, id, filter) {
            Ok(_) => {},
            Err(PollError::NotFound(_)) => {
                self.delete(None, id, filter)?;
            },
            Err(e) => return Err(e),
        }
        Ok(self.deliverable(client_id, filter).map_or(0, |polled| polled.count))
    }

    /// Drop every message for the recipient; returns how many were removed.
    pub fn purge(&self, recipient: Option<&str>) -> usize {
        let removed = self.mailbox(recipient).map_or(0, |mailbox| {
            let mut queue = mailbox.lock().unwrap_or_else(PoisonError::into_inner);
            let removed = queue.len();
            queue.clear();
            removed
        });
        self.prune(recipient);
        removed
    }

    /// Messages queued for the recipient, unfiltered.
    pub fn len(&self, recipient: Option<&str>) -> usize {
        self.mailbox(recipient).map_or(0, |mailbox| {
            mailbox.lock().unwrap_or_else(PoisonError::into_inner).len()
        })
    }

    /// Whether nothing is queued for the recipient.
    pub fn is_empty(&self, recipient: Option<&str>) -> bool {
        self.len(recipient) == 0
    }

    /// Recipients with at least one queued message.
    pub fn recipients(&self) -> usize {
        self.mailboxes.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMAIN: &str = "urn:ietf:params:xml:ns:domain-1.0";
    const HOST: &str = "urn:ietf:params:xml:ns:host-1.0";

    #[test]
    fn test_fifo_per_recipient() {
        let queue = PollQueue::new();
        let a1 = queue.put(Some("a"), DOMAIN, Notification::new("a1"));
        let b1 = queue.put(Some("b"), DOMAIN, Notification::new("b1"));
        let a2 = queue.put(Some("a"), DOMAIN, Notification::new("a2"));

        let all = PollFilter::all();
        let polled = queue.get(Some("a"), &all).unwrap();
        assert_eq!(polled.message.id, a1);
        assert_eq!(polled.count, 2);

        // get has no side effect
        assert_eq!(queue.get(Some("a"), &all).unwrap().message.id, a1);

        assert_eq!(queue.delete(Some("a"), &a1, &all).unwrap(), 1);
        assert_eq!(queue.get(Some("a"), &all).unwrap().message.id, a2);
        assert_eq!(queue.get(Some("b"), &all).unwrap().message.id, b1);
    }

    #[test]
    fn test_ids_are_unique_decimal() {
        let queue = PollQueue::new();
        let ids: Vec<String> = (0..5)
            .map(|i| queue.put(None, DOMAIN, Notification::new(format!("m{i}"))))
            .collect();
        for id in &ids {
            assert!(id.parse::<u64>().is_ok());
        }
        let mut sorted = ids.clone();
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len());
    }

    #[test]
    fn test_delete_is_scoped_to_recipient() {
        let queue = PollQueue::new();
        let id = queue.put(Some("a"), DOMAIN, Notification::new("a1"));

        assert_eq!(
            queue.delete(Some("b"), &id, &PollFilter::all()),
            Err(PollError::NotFound(id.clone()))
        );
        assert_eq!(queue.len(Some("a")), 1);
    }

    #[test]
    fn test_filter_hides_messages() {
        let queue = PollQueue::new();
        let host = queue.put(Some("a"), HOST, Notification::new("host"));
        let domain = queue.put(Some("a"), DOMAIN, Notification::new("domain"));

        let domains_only = PollFilter::namespaces([DOMAIN]);
        let polled = queue.get(Some("a"), &domains_only).unwrap();
        assert_eq!(polled.message.id, domain);
        assert_eq!(polled.count, 1);

        assert!(matches!(
            queue.delete(Some("a"), &host, &domains_only),
            Err(PollError::NotFound(_))
        ));
        assert_eq!(queue.len(Some("a")), 2);
    }

    #[test]
    fn test_empty_and_purge() {
        let queue = PollQueue::new();
        assert_eq!(queue.get(None, &PollFilter::all()), Err(PollError::QueueEmpty));

        queue.put(None, DOMAIN, Notification::new("x"));
        queue.put(None, DOMAIN, Notification::new("y"));
        assert_eq!(queue.purge(None), 2);
        assert!(queue.is_empty(None));
        assert_eq!(queue.purge(Some("nobody")), 0);
    }

    #[test]
    fn test_emptied_mailboxes_are_dropped() {
        let queue = PollQueue::new();
        let all = PollFilter::all();
        let a1 = queue.put(Some("a"), DOMAIN, Notification::new("a1"));
        let a2 = queue.put(Some("a"), DOMAIN, Notification::new("a2"));
        queue.put(Some("b"), DOMAIN, Notification::new("b1"));
        assert_eq!(queue.recipients(), 2);

        queue.delete(Some("a"), &a1, &all).unwrap();
        assert_eq!(queue.recipients(), 2);
        queue.delete(Some("a"), &a2, &all).unwrap();
        assert_eq!(queue.recipients(), 1);

        assert_eq!(queue.purge(Some("b")), 1);
        assert_eq!(queue.recipients(), 0);

        // A dropped mailbox is recreated on the next put.
        let a3 = queue.put(Some("a"), DOMAIN, Notification::new("a3"));
        assert_eq!(queue.get(Some("a"), &all).unwrap().message.id, a3);
    }

    #[test]
    fn test_default_queue_merges_in_enqueue_order() {
        let queue = PollQueue::new();
        let all = PollFilter::all();
        let shared1 = queue.put(None, DOMAIN, Notification::new("shared1"));
        let own = queue.put(Some("a"), DOMAIN, Notification::new("own"));
        let shared2 = queue.put(None, DOMAIN, Notification::new("shared2"));

        let polled = queue.deliverable(Some("a"), &all).unwrap();
        assert_eq!(polled.message.id, shared1);
        assert_eq!(polled.count, 3);

        assert_eq!(queue.acknowledge(Some("a"), &shared1, &all).unwrap(), 2);
        assert_eq!(queue.deliverable(Some("a"), &all).unwrap().message.id, own);
        assert_eq!(queue.acknowledge(Some("a"), &own, &all).unwrap(), 1);
        assert_eq!(queue.deliverable(Some("a"), &all).unwrap().message.id, shared2);
        assert_eq!(queue.acknowledge(Some("a"), &shared2, &all).unwrap(), 0);
        assert_eq!(queue.deliverable(Some("a"), &all), Err(PollError::QueueEmpty));
    }

    #[test]
    fn test_acknowledge_never_reaches_other_recipients() {
        let queue = PollQueue::new();
        let id = queue.put(Some("b"), DOMAIN, Notification::new("b1"));
        assert_eq!(
            queue.acknowledge(Some("a"), &id, &PollFilter::all()),
            Err(PollError::NotFound(id))
        );
        assert_eq!(queue.len(Some("b")), 1);
    }
}
