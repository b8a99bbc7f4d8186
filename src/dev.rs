use crate::build;
use crate::build::changeset::ChangeSet;
use crate::config::DinoConfig;
use crate::server::live_reload::LiveReload;
use crate::server::{DevServer, ServerOptions};
use crate::watch;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

/// dev 模式：全量构建 → 启动服务 → 监听变更增量重建并通知刷新，直到 Ctrl-C
pub async fn run(root: PathBuf, config: DinoConfig, clean: bool) -> Result<()> {
    if clean {
        build::clean(&root, &config)?;
    }

    let layout = config.layout(&root);
    let builder = Arc::new(build::builder(
        &root,
        &config,
        Some(config.server.ws_path.clone()),
    ));

    // 首次全量构建，源目录缺失等致命错误直接退出
    let initial = Arc::clone(&builder);
    tokio::task::spawn_blocking(move || initial.build(&ChangeSet::Full)).await??;

    let server = DevServer::new(ServerOptions::from_config(&config.server, &layout));
    server.start().await?;

    let reload = LiveReload::new(server.registry(), config.watch.reload_on_failure);
    let (_watcher, events) = watch::watcher::spawn_watcher(&layout)?;

    tokio::select! {
        _ = watch::run(events, builder, reload, config.debounce()) => {
            tracing::warn!("文件监听意外结束");
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("监听 Ctrl-C 失败：{e}");
            }
            tracing::info!("收到退出信号，正在关闭...");
        }
    }

    server.stop().await;
    Ok(())
}
