#![forbid(unsafe_code)]

/// Emitted once per committed changeset, after the transaction has been
/// applied. Observers never see individual field writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitNotification {
    pub change_set_id: String,
    pub branch: String,
    pub file_id: String,
    pub change_ids: Vec<String>,
    pub entity_ids: Vec<String>,
}

pub type SubscriptionId = u64;

type Callback = Box<dyn Fn(&CommitNotification) + Send + Sync>;

#[derive(Default)]
pub(crate) struct SubscriberSet {
    next_id: SubscriptionId,
    subscribers: Vec<(SubscriptionId, Callback)>,
}

impl SubscriberSet {
    pub(crate) fn insert(&mut self, callback: Callback) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.push((id, callback));
        id
    }

    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(existing, _)| *existing != id);
        self.subscribers.len() != before
    }

    pub(crate) fn notify(&self, notification: &CommitNotification) {
        for (_, callback) in &self.subscribers {
            callback(notification);
        }
    }
}
