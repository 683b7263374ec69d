use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::relay::fanout;
use crate::server::RelayServer;
use crate::storage::StorageResult;

impl RelayServer {
    /// 清理过期消息：批量打墓碑并逐 id 广播删除
    /// Sweep expired messages: tombstone them in one batch per room and broadcast one deletion per id
    pub async fn sweep_expired(&self, now: i64) -> StorageResult<usize> {
        let expired = self.gateway.find_expired(now).await?;
        if expired.is_empty() {
            debug!("🧹 Retention sweep: nothing expired");
            return Ok(0);
        }
        let mut by_room: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for message in expired {
            by_room.entry(message.room_id).or_default().push(message.id);
        }
        let mut total = 0;
        for (room, ids) in by_room {
            let deleted = self.gateway.soft_delete(&room, &ids, None, now).await?;
            total += deleted.len();
            self.dispatch(&room, fanout::deleted_fanout(&deleted));
        }
        info!("🧹 Retention sweep removed {} expired messages", total);
        Ok(total)
    }
}
