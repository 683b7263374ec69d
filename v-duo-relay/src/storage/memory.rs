use std::collections::{BTreeSet, HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use super::{AppendOutcome, PersistenceGateway, ReadOutcome, StorageResult};
use crate::domain::{DeliveryStatus, Identity, RetentionMode, RetentionPolicy, StoredMessage};

/// 离线待投递队列 / Offline pending queue
///
/// (room, recipient) -> 有序消息 id / ordered message ids
#[derive(Default)]
pub struct PendingQueue {
    queues: Mutex<HashMap<(String, Identity), VecDeque<String>>>,
}

impl PendingQueue {
    pub fn push(&self, room_id: &str, recipient: Identity, message_id: &str) {
        let mut queues = self.queues.lock();
        let queue = queues
            .entry((room_id.to_string(), recipient))
            .or_default();
        if !queue.iter().any(|id| id == message_id) {
            queue.push_back(message_id.to_string());
        }
    }

    /// 原子取出 / Drain atomically
    pub fn drain(&self, room_id: &str, recipient: Identity) -> Vec<String> {
        self.queues
            .lock()
            .remove(&(room_id.to_string(), recipient))
            .map(Vec::from)
            .unwrap_or_default()
    }

    pub fn clear_room(&self, room_id: &str) {
        self.queues.lock().retain(|(room, _), _| room != room_id);
    }

    pub fn len(&self, room_id: &str, recipient: Identity) -> usize {
        self.queues
            .lock()
            .get(&(room_id.to_string(), recipient))
            .map_or(0, VecDeque::len)
    }
}

#[derive(Default)]
struct MemoryState {
    messages: HashMap<String, StoredMessage>,
    reads: HashMap<String, BTreeSet<Identity>>,
    policies: HashMap<String, RetentionPolicy>,
}

/// 内存存储（降级模式）/ In-memory store used in degraded mode
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    pending: PendingQueue,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }
}

fn sorted(mut list: Vec<StoredMessage>) -> Vec<StoredMessage> {
    list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    list
}

#[async_trait]
impl PersistenceGateway for MemoryStore {
    fn is_durable(&self) -> bool {
        false
    }

    async fn append(&self, message: &StoredMessage) -> StorageResult<AppendOutcome> {
        let mut state = self.state.write();
        if state.messages.contains_key(&message.id) {
            return Ok(AppendOutcome::Duplicate);
        }
        state.messages.insert(message.id.clone(), message.clone());
        Ok(AppendOutcome::Stored)
    }

    async fn find_message(&self, id: &str) -> StorageResult<Option<StoredMessage>> {
        Ok(self.state.read().messages.get(id).cloned())
    }

    async fn find_history(
        &self,
        room_id: &str,
        identity: Identity,
    ) -> StorageResult<Vec<StoredMessage>> {
        let state = self.state.read();
        let list = state
            .messages
            .values()
            .filter(|m| m.room_id == room_id && !m.deleted && m.involves(identity))
            .cloned()
            .collect();
        Ok(sorted(list))
    }

    async fn mark_delivered(&self, ids: &[String]) -> StorageResult<Vec<String>> {
        let mut state = self.state.write();
        let mut advanced = Vec::new();
        for id in ids {
            if let Some(m) = state.messages.get_mut(id) {
                if let Some(next) = m.status.advance(DeliveryStatus::Delivered) {
                    m.status = next;
                    advanced.push(id.clone());
                }
            }
        }
        Ok(advanced)
    }

    async fn record_read(
        &self,
        message_id: &str,
        identity: Identity,
    ) -> StorageResult<Option<ReadOutcome>> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let Some(message) = state.messages.get_mut(message_id) else {
            return Ok(None);
        };
        let mut advanced = false;
        if identity == message.receiver {
            if let Some(next) = message.status.advance(DeliveryStatus::Read) {
                message.status = next;
                advanced = true;
            }
        }
        let sender = message.sender;
        let readers = state.reads.entry(message_id.to_string()).or_default();
        readers.insert(identity);
        Ok(Some(ReadOutcome {
            readers: readers.iter().copied().collect(),
            advanced,
            sender,
        }))
    }

    async fn set_expiry(&self, message_id: &str, expires_at: i64) -> StorageResult<()> {
        if let Some(m) = self.state.write().messages.get_mut(message_id) {
            m.expires_at = Some(expires_at);
        }
        Ok(())
    }

    async fn find_expired(&self, now: i64) -> StorageResult<Vec<StoredMessage>> {
        let state = self.state.read();
        let list = state
            .messages
            .values()
            .filter(|m| m.is_expired(now))
            .cloned()
            .collect();
        Ok(sorted(list))
    }

    async fn soft_delete(
        &self,
        room_id: &str,
        ids: &[String],
        by: Option<Identity>,
        at: i64,
    ) -> StorageResult<Vec<String>> {
        let mut state = self.state.write();
        let mut deleted = Vec::new();
        for id in ids {
            let newly = match state.messages.get_mut(id) {
                Some(m) => m.mark_deleted(by, at),
                None => {
                    state
                        .messages
                        .insert(id.clone(), StoredMessage::tombstone(id, room_id, by, at));
                    true
                }
            };
            if newly {
                deleted.push(id.clone());
            }
        }
        Ok(deleted)
    }

    async fn wipe_room(&self, room_id: &str, by: Identity, at: i64) -> StorageResult<Vec<String>> {
        let mut deleted = Vec::new();
        {
            let mut state = self.state.write();
            for m in state.messages.values_mut() {
                if m.room_id == room_id && m.mark_deleted(Some(by), at) {
                    deleted.push(m.id.clone());
                }
            }
        }
        self.pending.clear_room(room_id);
        Ok(deleted)
    }

    async fn get_retention_policy(&self, room_id: &str) -> StorageResult<RetentionPolicy> {
        Ok(self
            .state
            .read()
            .policies
            .get(room_id)
            .cloned()
            .unwrap_or_else(|| RetentionPolicy::default_for(room_id)))
    }

    async fn set_retention_policy(
        &self,
        room_id: &str,
        mode: RetentionMode,
        at: i64,
    ) -> StorageResult<RetentionPolicy> {
        let policy = RetentionPolicy {
            room_id: room_id.to_string(),
            mode,
            set_at: at,
        };
        self.state
            .write()
            .policies
            .insert(room_id.to_string(), policy.clone());
        Ok(policy)
    }

    async fn queue_pending(&self, message: &StoredMessage) -> StorageResult<()> {
        self.pending
            .push(&message.room_id, message.receiver, &message.id);
        Ok(())
    }

    async fn take_pending(
        &self,
        room_id: &str,
        identity: Identity,
    ) -> StorageResult<Vec<StoredMessage>> {
        let ids = self.pending.drain(room_id, identity);
        let state = self.state.read();
        Ok(ids
            .iter()
            .filter_map(|id| state.messages.get(id))
            .filter(|m| !m.deleted)
            .cloned()
            .collect())
    }
}
