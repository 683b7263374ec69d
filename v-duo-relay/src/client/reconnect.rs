use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

/// 固定退避重连策略 / Fixed-backoff reconnect policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    /// None 表示无限重试 / None retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(3),
            max_attempts: None,
        }
    }
}

/// 监督循环退出原因 / Why the supervised loop exited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// 主动关闭 / Intentional close
    Stopped,
    /// 连续失败达到上限 / Consecutive failures hit the limit
    GaveUp { attempts: u32 },
}

/// 按策略反复运行 `connect`，关闭信号到达立即停止
/// Run `connect` under the policy, stopping as soon as shutdown is signalled
///
/// 一次会话正常结束会重置失败计数 / a session that ends cleanly resets the failure count
pub async fn run_supervised<F, Fut>(
    policy: ReconnectPolicy,
    mut shutdown: watch::Receiver<bool>,
    mut connect: F,
) -> SupervisorExit
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut failures = 0u32;
    loop {
        if *shutdown.borrow() {
            return SupervisorExit::Stopped;
        }
        let attempt = failures + 1;
        tokio::select! {
            result = connect(attempt) => match result {
                Ok(()) => {
                    info!("🔌 Session ended, reconnecting");
                    failures = 0;
                }
                Err(e) => {
                    failures += 1;
                    warn!("🔌 Connect attempt {} failed: {}", attempt, e);
                }
            },
            _ = shutdown.changed() => return SupervisorExit::Stopped,
        }
        if *shutdown.borrow() {
            return SupervisorExit::Stopped;
        }
        if let Some(max) = policy.max_attempts {
            if failures >= max {
                return SupervisorExit::GaveUp { attempts: failures };
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(policy.delay) => {}
            _ = shutdown.changed() => return SupervisorExit::Stopped,
        }
    }
}
