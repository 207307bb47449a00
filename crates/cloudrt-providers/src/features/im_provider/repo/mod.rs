use chrono::{DateTime, Utc};
use cloudrt_core::RawError;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, RwLock};

/// Where a message lands: a single user or a group channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImTarget {
    Receiver(String),
    Channel(String),
}

impl ImTarget {
    pub fn name(&self) -> &str {
        match self {
            ImTarget::Receiver(name) | ImTarget::Channel(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredMessage {
    pub message_id: String,
    pub service_name: String,
    pub setting_id: String,
    pub target: ImTarget,
    pub body: String,
    pub metadata: BTreeMap<String, String>,
    pub sent_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
pub trait ImDeliveryRepository: Send + Sync {
    fn deliver(&self, message: &DeliveredMessage) -> Result<(), RawError>;
    fn delivered_to(&self, target: &ImTarget) -> Result<Vec<DeliveredMessage>, RawError>;
}

/// Messages kept per target before the oldest are evicted.
pub const DEFAULT_MAX_INBOX: usize = 1000;

/// In-memory mailbox store used by the IM provider.
///
/// Each mailbox holds at most `max_inbox` messages; delivering past the cap
/// drops the oldest entry.
pub struct InMemoryImRepository {
    mailboxes: Arc<RwLock<HashMap<ImTarget, VecDeque<DeliveredMessage>>>>,
    max_inbox: usize,
}

impl InMemoryImRepository {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_INBOX)
    }

    /// A cap of zero is treated as one.
    pub fn with_capacity(max_inbox: usize) -> Self {
        Self {
            mailboxes: Arc::new(RwLock::new(HashMap::new())),
            max_inbox: max_inbox.max(1),
        }
    }

    pub fn max_inbox(&self) -> usize {
        self.max_inbox
    }

    pub fn delivered_count(&self) -> usize {
        self.mailboxes
            .read()
            .map(|boxes| boxes.values().map(VecDeque::len).sum())
            .unwrap_or(0)
    }
}

impl Default for InMemoryImRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl ImDeliveryRepository for InMemoryImRepository {
    fn deliver(&self, message: &DeliveredMessage) -> Result<(), RawError> {
        let mut mailboxes = self
            .mailboxes
            .write()
            .map_err(|_| RawError::unknown("IM mailbox lock poisoned"))?;
        let inbox = mailboxes.entry(message.target.clone()).or_default();
        inbox.push_back(message.clone());
        while inbox.len() > self.max_inbox {
            inbox.pop_front();
        }
        Ok(())
    }

    fn delivered_to(&self, target: &ImTarget) -> Result<Vec<DeliveredMessage>, RawError> {
        let mailboxes = self
            .mailboxes
            .read()
            .map_err(|_| RawError::unknown("IM mailbox lock poisoned"))?;
        Ok(mailboxes
            .get(target)
            .map(|inbox| inbox.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(target: ImTarget, body: &str) -> DeliveredMessage {
        DeliveredMessage {
            message_id: "m-1".to_string(),
            service_name: "dingtalk".to_string(),
            setting_id: String::new(),
            target,
            body: body.to_string(),
            metadata: BTreeMap::new(),
            sent_at: Utc::now(),
        }
    }

    #[test]
    fn test_repo_deliver_and_read_back() {
        let repo = InMemoryImRepository::new();
        let alice = ImTarget::Receiver("alice".to_string());
        let ops = ImTarget::Channel("ops".to_string());

        repo.deliver(&message(alice.clone(), "hi")).unwrap();
        repo.deliver(&message(alice.clone(), "again")).unwrap();
        repo.deliver(&message(ops.clone(), "deployed")).unwrap();

        let inbox = repo.delivered_to(&alice).unwrap();
        assert_eq!(inbox.len(), 2);
        assert_eq!(inbox[1].body, "again");
        assert_eq!(repo.delivered_to(&ops).unwrap().len(), 1);
        assert_eq!(repo.delivered_count(), 3);
    }

    #[test]
    fn test_receiver_and_channel_with_same_name_are_separate() {
        let repo = InMemoryImRepository::new();
        repo.deliver(&message(ImTarget::Receiver("ops".to_string()), "dm"))
            .unwrap();

        assert!(repo
            .delivered_to(&ImTarget::Channel("ops".to_string()))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_full_mailbox_drops_oldest() {
        let repo = InMemoryImRepository::with_capacity(3);
        let bob = ImTarget::Receiver("bob".to_string());
        for n in 0..5 {
            repo.deliver(&message(bob.clone(), &format!("msg-{n}")))
                .unwrap();
        }
        repo.deliver(&message(ImTarget::Channel("ops".to_string()), "other"))
            .unwrap();

        let bodies: Vec<String> = repo
            .delivered_to(&bob)
            .unwrap()
            .into_iter()
            .map(|m| m.body)
            .collect();
        assert_eq!(bodies, vec!["msg-2", "msg-3", "msg-4"]);
        assert_eq!(repo.delivered_count(), 4);
    }

    #[test]
    fn test_zero_capacity_keeps_latest() {
        let repo = InMemoryImRepository::with_capacity(0);
        let alice = ImTarget::Receiver("alice".to_string());
        repo.deliver(&message(alice.clone(), "first")).unwrap();
        repo.deliver(&message(alice.clone(), "second")).unwrap();

        let inbox = repo.delivered_to(&alice).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].body, "second");
    }
}
