use tracing::{debug, warn};

use crate::domain::{now_ms, RetentionMode};
use crate::error::RelayResult;
use crate::relay::{fanout, validate, ConnectionState};
use crate::server::RelayServer;

impl RelayServer {
    /// 已读回执：推进状态、全房间广播、双方已读后交给清理
    /// Read receipts: advance status, broadcast to the room, hand fully-read messages to the sweep
    pub(crate) async fn on_read(
        &self,
        state: &mut ConnectionState,
        ids: Vec<String>,
    ) -> RelayResult<()> {
        let (room, identity) = state.joined()?;
        // 任一 id 不合法则整帧拒绝 / one malformed id rejects the whole frame
        for id in &ids {
            validate::check_id("ids[]", id, self.config.limits.max_id_len)?;
        }
        let mode = self.retention_mode(&room).await;
        let mut read = Vec::with_capacity(ids.len());
        for id in ids {
            let outcome = match self.gateway.record_read(&id, identity).await {
                Ok(Some(outcome)) => outcome,
                Ok(None) => {
                    debug!("read receipt for unknown id {} from {}", id, state.handle);
                    continue;
                }
                Err(e) => {
                    warn!("record_read {} failed: {}", id, e);
                    continue;
                }
            };
            if mode == RetentionMode::AfterBothRead && outcome.read_by_both() {
                // 只标记过期，删除留给下一次清理 / only mark expired, the next sweep deletes
                if let Err(e) = self.gateway.set_expiry(&id, now_ms()).await {
                    warn!("set_expiry {} failed: {}", id, e);
                }
            }
            if outcome.sender != identity {
                read.push(id);
            }
        }
        if let Some(out) = fanout::read_fanout(read) {
            self.dispatch(&room, vec![out]);
        }
        Ok(())
    }
}
