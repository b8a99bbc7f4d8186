pub mod live_reload;
pub mod port;
pub mod registry;
pub mod routes;

use crate::config::{Layout, ServerConfig};
use crate::error::DinoError;
use registry::ChannelRegistry;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

/// 等待旧服务退出的上限，超时后强制终止
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
    pub port_attempts: u32,
    pub ws_path: String,
    pub output_root: PathBuf,
}

impl ServerOptions {
    pub fn from_config(config: &ServerConfig, layout: &Layout) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            port_attempts: config.port_attempts,
            ws_path: config.ws_path.clone(),
            output_root: layout.output_root.clone(),
        }
    }
}

/// 正在运行的服务实例
struct ServerHandle {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

impl ServerHandle {
    async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let mut task = self.task;
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::warn!("服务退出时出错：{e}"),
            Ok(Err(e)) => tracing::warn!("服务任务异常退出：{e}"),
            Err(_) => {
                tracing::warn!("等待服务退出超时，强制终止");
                task.abort();
            }
        }
        tracing::debug!("已停止 {}", self.addr);
    }
}

/// 开发服务器：静态文件 + 热重载通道
///
/// 同一时刻至多一个实例在运行，重复调用 `start` 会先停掉旧实例。
pub struct DevServer {
    options: ServerOptions,
    registry: ChannelRegistry,
    slot: Mutex<Option<ServerHandle>>,
}

impl DevServer {
    pub fn new(options: ServerOptions) -> Self {
        Self {
            options,
            registry: ChannelRegistry::new(),
            slot: Mutex::new(None),
        }
    }

    /// 热重载通道表，交给广播方使用
    pub fn registry(&self) -> ChannelRegistry {
        self.registry.clone()
    }

    pub async fn addr(&self) -> Option<SocketAddr> {
        self.slot.lock().await.as_ref().map(|h| h.addr)
    }

    /// 启动（或重启）服务，返回实际监听地址
    pub async fn start(&self) -> Result<SocketAddr, DinoError> {
        let mut slot = self.slot.lock().await;
        if let Some(old) = slot.take() {
            tracing::info!("重启开发服务器...");
            self.registry.clear();
            old.shutdown().await;
        }

        let opts = &self.options;
        let (std_listener, port) =
            port::find_available_port(&opts.host, opts.port, opts.port_attempts)?;
        if let Some(note) = port::describe_fallback(opts.port, port) {
            tracing::warn!("{note}");
        }
        let bind_err = |source: std::io::Error| DinoError::Bind { port, source };
        std_listener.set_nonblocking(true).map_err(bind_err)?;
        let listener = tokio::net::TcpListener::from_std(std_listener).map_err(bind_err)?;
        let addr = listener.local_addr().map_err(bind_err)?;

        let app = routes::router(&opts.output_root, &opts.ws_path, self.registry.clone());
        let (shutdown, signal) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = signal.await;
                })
                .await
        });

        *slot = Some(ServerHandle {
            addr,
            shutdown,
            task,
        });
        tracing::info!("🦕 Dinos have landed: http://{addr}");
        Ok(addr)
    }

    /// 停止服务并断开所有热重载通道
    pub async fn stop(&self) {
        let handle = self.slot.lock().await.take();
        self.registry.clear();
        if let Some(handle) = handle {
            handle.shutdown().await;
            tracing::info!("开发服务器已关闭");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_port() -> u16 {
        std::net::TcpListener::bind(("127.0.0.1", 0))
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn options(dir: &std::path::Path, port: u16) -> ServerOptions {
        ServerOptions {
            host: "127.0.0.1".into(),
            port,
            port_attempts: 20,
            ws_path: "/ws".into(),
            output_root: dir.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn restart_rebinds_and_keeps_single_instance() {
        let dir = tempfile::tempdir().unwrap();
        let server = DevServer::new(options(dir.path(), free_port()));

        let first = server.start().await.unwrap();
        let second = server.start().await.unwrap();

        assert_eq!(first.port(), second.port());
        assert_eq!(server.addr().await, Some(second));
        server.stop().await;
        assert_eq!(server.addr().await, None);
    }

    #[tokio::test]
    async fn restart_clears_live_channels() {
        let dir = tempfile::tempdir().unwrap();
        let server = DevServer::new(options(dir.path(), free_port()));
        server.start().await.unwrap();
        let (_, mut rx) = server.registry().register();

        server.start().await.unwrap();

        assert!(server.registry().is_empty());
        assert!(rx.recv().await.is_none());
        server.stop().await;
    }

    #[tokio::test]
    async fn occupied_port_falls_through_to_next() {
        let dir = tempfile::tempdir().unwrap();
        let held = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let busy = held.local_addr().unwrap().port();
        if busy == u16::MAX {
            return;
        }
        let server = DevServer::new(options(dir.path(), busy));

        let addr = server.start().await.unwrap();

        assert!(addr.port() > busy);
        server.stop().await;
    }

    #[tokio::test]
    async fn stop_without_start_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let server = DevServer::new(options(dir.path(), free_port()));
        server.stop().await;
        assert_eq!(server.addr().await, None);
    }
}
