//! 多设备同步 / Multi-device sync coordinator
//!
//! 加入时三路并行：兄弟设备 sync-request、网关历史 sync-messages、待投递消息逐条下发。
//! On join, three independent paths: sibling sync-request, gateway history as sync-messages, pending messages one by one.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::{DeliveryStatus, Identity, ServerEvent, WireMessage};
use crate::error::RelayResult;
use crate::registry::JoinOutcome;
use crate::relay::{validate, Audience, ConnectionState, Outbound, Phase};
use crate::server::RelayServer;

impl RelayServer {
    pub(crate) async fn sync_on_join(
        &self,
        handle: &str,
        room: &str,
        identity: Identity,
        device_id: &str,
        outcome: &JoinOutcome,
    ) {
        let snapshot = &outcome.snapshot;
        let peer = identity.peer();
        let peer_online = snapshot.is_identity_online(peer);
        let mut outbound = vec![Outbound::new(
            Audience::Connection(handle.to_string()),
            ServerEvent::Joined {
                identity,
                is_initiator: peer_online,
                peer_online,
                peer_profile: snapshot.profile_of(peer),
                retention_mode: self.retention_mode(room).await,
            },
        )];
        if outcome.first_of_identity {
            let profile = snapshot
                .get(handle)
                .map(|s| s.profile.clone())
                .unwrap_or_default();
            outbound.push(Outbound::new(
                Audience::Identity(peer),
                ServerEvent::PeerJoined { identity, profile },
            ));
        }
        if snapshot.siblings_of(handle).next().is_some() {
            outbound.push(self.request_sibling_sync(room, identity, handle, device_id));
        }
        self.dispatch(room, outbound);

        let history = match self.gateway.find_history(room, identity).await {
            Ok(list) => list,
            Err(e) => {
                warn!("history for {} in {} unavailable: {}", identity, room, e);
                Vec::new()
            }
        };
        debug!("📚 Pushing {} history messages to {}", history.len(), handle);
        self.dispatch(
            room,
            vec![Outbound::new(
                Audience::Connection(handle.to_string()),
                ServerEvent::SyncMessages {
                    messages: history
                        .iter()
                        .map(|m| WireMessage::from_stored(m, identity))
                        .collect(),
                },
            )],
        );

        self.drain_pending(handle, room, identity).await;
    }

    /// 下发离线期间排队的消息并回执 delivered / Deliver messages queued while offline and announce `delivered`
    async fn drain_pending(&self, handle: &str, room: &str, identity: Identity) {
        let pending = match self.gateway.take_pending(room, identity).await {
            Ok(list) => list,
            Err(e) => {
                warn!("pending queue for {} unavailable: {}", identity, e);
                return;
            }
        };
        if pending.is_empty() {
            return;
        }
        info!("📬 Delivering {} queued messages to {}", pending.len(), handle);
        let ids: Vec<String> = pending.iter().map(|m| m.id.clone()).collect();
        let outbound = pending
            .iter()
            .map(|m| {
                Outbound::new(
                    Audience::Connection(handle.to_string()),
                    ServerEvent::ChatMessage {
                        message: WireMessage::from_stored(m, identity)
                            .with_status(DeliveryStatus::Delivered),
                    },
                )
            })
            .collect();
        self.dispatch(room, outbound);

        let advanced = match self.gateway.mark_delivered(&ids).await {
            Ok(advanced) => advanced,
            Err(e) => {
                warn!("mark_delivered after drain failed: {}", e);
                ids
            }
        };
        self.announce_status(room, identity.peer(), advanced, DeliveryStatus::Delivered);
    }

    /// 登记待应答并向兄弟设备发 sync-request / Register the pending request and ask siblings
    fn request_sibling_sync(
        &self,
        room: &str,
        identity: Identity,
        handle: &str,
        device_id: &str,
    ) -> Outbound {
        self.pending_syncs
            .insert((room.to_string(), device_id.to_string()), identity);
        Outbound::new(
            Audience::Siblings {
                of: handle.to_string(),
            },
            ServerEvent::SyncRequest {
                target_device_id: device_id.to_string(),
            },
        )
    }

    pub(crate) fn on_sync_request(
        &self,
        state: &mut ConnectionState,
        target_device_id: Option<String>,
    ) -> RelayResult<()> {
        let (room, identity) = state.joined()?;
        let own_device = match &state.phase {
            Phase::Joined { device_id, .. } => device_id.clone(),
            Phase::Connected => return Ok(()),
        };
        let target = target_device_id.unwrap_or(own_device);
        validate::check_id("targetDeviceId", &target, self.config.limits.max_id_len)?;
        let out = self.request_sibling_sync(&room, identity, &state.handle, &target);
        self.dispatch(&room, vec![out]);
        Ok(())
    }

    /// 第一个应答者胜出，只点对点送回请求设备
    /// The first responder wins and is routed point-to-point to the requesting device
    pub(crate) fn on_sync_response(
        &self,
        state: &mut ConnectionState,
        target_device_id: String,
        messages: Vec<Value>,
    ) -> RelayResult<()> {
        let (room, identity) = state.joined()?;
        validate::check_id("targetDeviceId", &target_device_id, self.config.limits.max_id_len)?;
        let key = (room.clone(), target_device_id.clone());
        let claimed = self
            .pending_syncs
            .remove_if(&key, |_, requester| *requester == identity)
            .is_some();
        if !claimed {
            debug!(
                "late or unsolicited sync-response from {} for {}",
                state.handle, target_device_id
            );
            return Ok(());
        }
        debug!(
            "🔄 Routing {} sync messages from {} to device {}",
            messages.len(),
            state.handle,
            target_device_id
        );
        self.dispatch(
            &room,
            vec![Outbound::new(
                Audience::Device {
                    identity,
                    device_id: target_device_id.clone(),
                },
                ServerEvent::SyncResponse {
                    target_device_id,
                    messages,
                },
            )],
        );
        Ok(())
    }
}
