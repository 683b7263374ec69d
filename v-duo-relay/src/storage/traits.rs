use async_trait::async_trait;

use super::{AppendOutcome, ReadOutcome, StorageResult};
use crate::domain::{Identity, RetentionMode, RetentionPolicy, StoredMessage};

/// 持久化网关契约 / Persistence gateway contract
///
/// 实现负责自身并发（插入按 id 幂等）/ implementations own their concurrency (insert-if-absent by id)
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// 是否跨重启持久 / Whether data survives a restart
    fn is_durable(&self) -> bool;

    async fn append(&self, message: &StoredMessage) -> StorageResult<AppendOutcome>;

    async fn find_message(&self, id: &str) -> StorageResult<Option<StoredMessage>>;

    /// 身份可见的未删除历史，按创建时间升序 / Non-deleted history visible to `identity`, oldest first
    async fn find_history(&self, room_id: &str, identity: Identity)
        -> StorageResult<Vec<StoredMessage>>;

    /// 返回实际推进到 delivered 的 id / Ids that actually advanced to `delivered`
    async fn mark_delivered(&self, ids: &[String]) -> StorageResult<Vec<String>>;

    /// 未知 id 返回 None / None for unknown ids
    async fn record_read(
        &self,
        message_id: &str,
        identity: Identity,
    ) -> StorageResult<Option<ReadOutcome>>;

    async fn set_expiry(&self, message_id: &str, expires_at: i64) -> StorageResult<()>;

    async fn find_expired(&self, now: i64) -> StorageResult<Vec<StoredMessage>>;

    /// 打墓碑，返回新删除的 id；未知 id 也会留下墓碑
    /// Tombstone ids, returning the newly deleted ones; unknown ids get a tombstone too
    async fn soft_delete(
        &self,
        room_id: &str,
        ids: &[String],
        by: Option<Identity>,
        at: i64,
    ) -> StorageResult<Vec<String>>;

    /// 清空房间（紧急擦除）/ Tombstone every live message of a room
    async fn wipe_room(&self, room_id: &str, by: Identity, at: i64) -> StorageResult<Vec<String>>;

    async fn get_retention_policy(&self, room_id: &str) -> StorageResult<RetentionPolicy>;

    async fn set_retention_policy(
        &self,
        room_id: &str,
        mode: RetentionMode,
        at: i64,
    ) -> StorageResult<RetentionPolicy>;

    /// 接收方离线时排队 / Queue for an offline recipient
    async fn queue_pending(&self, message: &StoredMessage) -> StorageResult<()>;

    /// 原子取出该身份的待投递消息 / Atomically drain messages pending for `identity`
    async fn take_pending(&self, room_id: &str, identity: Identity)
        -> StorageResult<Vec<StoredMessage>>;
}
