use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

type Clients = HashMap<u64, mpsc::UnboundedSender<String>>;

/// 已连接的热重载通道
///
/// 克隆后共享同一份连接表。
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    clients: Arc<Mutex<Clients>>,
    next_id: Arc<AtomicU64>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Clients> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 注册新通道，返回通道 id 与消息接收端
    pub fn register(&self) -> (u64, mpsc::UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().insert(id, tx);
        tracing::debug!("热重载通道 {id} 已连接");
        (id, rx)
    }

    pub fn remove(&self, id: u64) {
        if self.lock().remove(&id).is_some() {
            tracing::debug!("热重载通道 {id} 已断开");
        }
    }

    /// 向所有通道发送消息，发送失败的通道被移除；返回送达数量
    pub fn broadcast(&self, message: &str) -> usize {
        let mut clients = self.lock();
        clients.retain(|id, tx| {
            let alive = tx.send(message.to_string()).is_ok();
            if !alive {
                tracing::debug!("热重载通道 {id} 已关闭，移除");
            }
            alive
        });
        clients.len()
    }

    /// 关闭全部通道，对应的连接任务随之结束
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_reaches_live_channels_and_prunes_closed_ones() {
        let registry = ChannelRegistry::new();
        let (_, mut a) = registry.register();
        let (_, mut b) = registry.register();
        let (_, c) = registry.register();
        drop(c);

        let delivered = registry.broadcast("reload");

        assert_eq!(delivered, 2);
        assert_eq!(registry.len(), 2);
        assert_eq!(a.try_recv().unwrap(), "reload");
        assert_eq!(b.try_recv().unwrap(), "reload");
    }

    #[test]
    fn ids_are_unique_and_removable() {
        let registry = ChannelRegistry::new();
        let (first, _rx1) = registry.register();
        let (second, _rx2) = registry.register();
        assert_ne!(first, second);

        registry.remove(first);
        assert_eq!(registry.len(), 1);
        registry.remove(first);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn clear_closes_receivers() {
        let registry = ChannelRegistry::new();
        let shared = registry.clone();
        let (_, mut rx) = shared.register();

        registry.clear();

        assert!(registry.is_empty());
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn empty_registry_broadcasts_to_nobody() {
        assert_eq!(ChannelRegistry::new().broadcast("reload"), 0);
    }
}
