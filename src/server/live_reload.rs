use crate::build::report::BuildReport;
use crate::error::DinoError;
use crate::server::registry::ChannelRegistry;

/// 发给浏览器的刷新指令
pub const RELOAD_TOKEN: &str = "reload";

/// 构建完成后通知所有已连接的浏览器刷新
#[derive(Clone)]
pub struct LiveReload {
    registry: ChannelRegistry,
    reload_on_failure: bool,
}

impl LiveReload {
    pub fn new(registry: ChannelRegistry, reload_on_failure: bool) -> Self {
        Self {
            registry,
            reload_on_failure,
        }
    }

    /// 根据构建结果决定是否广播，返回送达的通道数
    pub fn after_build(&self, outcome: &Result<BuildReport, DinoError>) -> usize {
        match outcome {
            Err(e) => {
                tracing::error!("构建失败，不通知刷新：{e}");
                0
            }
            Ok(report) if !report.is_success() && !self.reload_on_failure => {
                tracing::info!("构建存在失败阶段，跳过刷新");
                0
            }
            Ok(_) => self.broadcast(),
        }
    }

    pub fn broadcast(&self) -> usize {
        let delivered = self.registry.broadcast(RELOAD_TOKEN);
        if delivered > 0 {
            tracing::info!("🔄 已通知 {delivered} 个页面刷新");
        }
        delivered
    }
}
