use std::collections::BTreeSet;

use async_trait::async_trait;
use sled::{Db, Tree};

use super::{AppendOutcome, PersistenceGateway, ReadOutcome, StorageResult};
use crate::domain::{DeliveryStatus, Identity, RetentionMode, RetentionPolicy, StoredMessage};

/// sled 持久化存储 / Durable sled-backed store
///
/// 树 / trees: `messages` (id -> json), `reads` (id -> readers),
/// `retention` (room -> policy), `pending` (room:identity:ts:id -> id)
#[derive(Clone)]
pub struct SledStore {
    db: Db,
    messages: Tree,
    reads: Tree,
    retention: Tree,
    pending: Tree,
}

impl SledStore {
    pub fn open(path: &str) -> StorageResult<Self> {
        Self::from_db(sled::open(path)?)
    }

    pub fn open_temporary() -> StorageResult<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> StorageResult<Self> {
        Ok(Self {
            messages: db.open_tree("messages")?,
            reads: db.open_tree("reads")?,
            retention: db.open_tree("retention")?,
            pending: db.open_tree("pending")?,
            db,
        })
    }

    fn load(&self, id: &str) -> StorageResult<Option<StoredMessage>> {
        match self.messages.get(id.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn scan(&self, mut keep: impl FnMut(&StoredMessage) -> bool) -> StorageResult<Vec<StoredMessage>> {
        let mut out = Vec::new();
        for item in self.messages.iter() {
            let (_k, v) = item?;
            let m: StoredMessage = serde_json::from_slice(&v)?;
            if keep(&m) {
                out.push(m);
            }
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    /// 读-改-写，CAS 冲突时重试 / Read-modify-write, retried on CAS conflict
    ///
    /// `change` 返回 false 表示不写 / `change` returning false skips the write
    fn modify(
        &self,
        id: &str,
        mut change: impl FnMut(&mut StoredMessage) -> bool,
    ) -> StorageResult<Option<(StoredMessage, bool)>> {
        loop {
            let Some(raw) = self.messages.get(id.as_bytes())? else {
                return Ok(None);
            };
            let mut m: StoredMessage = serde_json::from_slice(&raw)?;
            if !change(&mut m) {
                return Ok(Some((m, false)));
            }
            let next = serde_json::to_vec(&m)?;
            if self
                .messages
                .compare_and_swap(id.as_bytes(), Some(raw), Some(next))?
                .is_ok()
            {
                return Ok(Some((m, true)));
            }
        }
    }

    fn pending_prefix(room_id: &str, identity: Identity) -> String {
        format!("{}:{}:", room_id, identity)
    }
}

#[async_trait]
impl PersistenceGateway for SledStore {
    fn is_durable(&self) -> bool {
        true
    }

    async fn append(&self, message: &StoredMessage) -> StorageResult<AppendOutcome> {
        let val = serde_json::to_vec(message)?;
        let swapped = self
            .messages
            .compare_and_swap(message.id.as_bytes(), None as Option<&[u8]>, Some(val))?;
        self.db.flush_async().await?;
        Ok(match swapped {
            Ok(()) => AppendOutcome::Stored,
            Err(_) => AppendOutcome::Duplicate,
        })
    }

    async fn find_message(&self, id: &str) -> StorageResult<Option<StoredMessage>> {
        self.load(id)
    }

    async fn find_history(
        &self,
        room_id: &str,
        identity: Identity,
    ) -> StorageResult<Vec<StoredMessage>> {
        self.scan(|m| m.room_id == room_id && !m.deleted && m.involves(identity))
    }

    async fn mark_delivered(&self, ids: &[String]) -> StorageResult<Vec<String>> {
        let mut advanced = Vec::new();
        for id in ids {
            let outcome = self.modify(id, |m| match m.status.advance(DeliveryStatus::Delivered) {
                Some(next) => {
                    m.status = next;
                    true
                }
                None => false,
            })?;
            if let Some((_, true)) = outcome {
                advanced.push(id.clone());
            }
        }
        Ok(advanced)
    }

    async fn record_read(
        &self,
        message_id: &str,
        identity: Identity,
    ) -> StorageResult<Option<ReadOutcome>> {
        let outcome = self.modify(message_id, |m| {
            if identity != m.receiver {
                return false;
            }
            match m.status.advance(DeliveryStatus::Read) {
                Some(next) => {
                    m.status = next;
                    true
                }
                None => false,
            }
        })?;
        let Some((message, advanced)) = outcome else {
            return Ok(None);
        };
        let merged = self.reads.update_and_fetch(message_id.as_bytes(), |old| {
            let mut readers: BTreeSet<Identity> = old
                .and_then(|raw| serde_json::from_slice(raw).ok())
                .unwrap_or_default();
            readers.insert(identity);
            serde_json::to_vec(&readers).ok()
        })?;
        let readers: BTreeSet<Identity> = match merged {
            Some(raw) => serde_json::from_slice(&raw)?,
            None => BTreeSet::from([identity]),
        };
        Ok(Some(ReadOutcome {
            readers: readers.into_iter().collect(),
            advanced,
            sender: message.sender,
        }))
    }

    async fn set_expiry(&self, message_id: &str, expires_at: i64) -> StorageResult<()> {
        self.modify(message_id, |m| {
            m.expires_at = Some(expires_at);
            true
        })?;
        Ok(())
    }

    async fn find_expired(&self, now: i64) -> StorageResult<Vec<StoredMessage>> {
        self.scan(|m| m.is_expired(now))
    }

    async fn soft_delete(
        &self,
        room_id: &str,
        ids: &[String],
        by: Option<Identity>,
        at: i64,
    ) -> StorageResult<Vec<String>> {
        let mut deleted = Vec::new();
        for id in ids {
            match self.modify(id, |m| m.mark_deleted(by, at))? {
                Some((_, true)) => deleted.push(id.clone()),
                Some((_, false)) => {}
                None => {
                    let tomb = serde_json::to_vec(&StoredMessage::tombstone(id, room_id, by, at))?;
                    if self
                        .messages
                        .compare_and_swap(id.as_bytes(), None as Option<&[u8]>, Some(tomb))?
                        .is_ok()
                    {
                        deleted.push(id.clone());
                    }
                }
            }
        }
        self.db.flush_async().await?;
        Ok(deleted)
    }

    async fn wipe_room(&self, room_id: &str, by: Identity, at: i64) -> StorageResult<Vec<String>> {
        let live: Vec<String> = self
            .scan(|m| m.room_id == room_id && !m.deleted)?
            .into_iter()
            .map(|m| m.id)
            .collect();
        let deleted = self.soft_delete(room_id, &live, Some(by), at).await?;
        for prefix in Identity::ALL.map(|id| Self::pending_prefix(room_id, id)) {
            for key in self.pending.scan_prefix(prefix.as_bytes()).keys() {
                self.pending.remove(key?)?;
            }
        }
        Ok(deleted)
    }

    async fn get_retention_policy(&self, room_id: &str) -> StorageResult<RetentionPolicy> {
        match self.retention.get(room_id.as_bytes())? {
            Some(raw) => Ok(serde_json::from_slice(&raw)?),
            None => Ok(RetentionPolicy::default_for(room_id)),
        }
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
        self.retention
            .insert(room_id.as_bytes(), serde_json::to_vec(&policy)?)?;
        self.retention.flush_async().await?;
        Ok(policy)
    }

    async fn queue_pending(&self, message: &StoredMessage) -> StorageResult<()> {
        // 时间戳零填充保证按前缀扫描有序 / zero-padded timestamp keeps prefix scans ordered
        let key = format!(
            "{}{:020}:{}",
            Self::pending_prefix(&message.room_id, message.receiver),
            message.created_at.max(0),
            message.id
        );
        self.pending.insert(key.as_bytes(), message.id.as_bytes())?;
        Ok(())
    }

    async fn take_pending(
        &self,
        room_id: &str,
        identity: Identity,
    ) -> StorageResult<Vec<StoredMessage>> {
        let prefix = Self::pending_prefix(room_id, identity);
        let mut out = Vec::new();
        for item in self.pending.scan_prefix(prefix.as_bytes()) {
            let (key, id) = item?;
            // remove 只会对一个调用者返回 Some / only one caller observes Some from remove
            if self.pending.remove(&key)?.is_none() {
                continue;
            }
            let id = String::from_utf8_lossy(&id).to_string();
            if let Some(m) = self.load(&id)? {
                if !m.deleted {
                    out.push(m);
                }
            }
        }
        Ok(out)
    }
}
