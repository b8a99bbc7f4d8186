use crate::config::Layout;
use crate::error::DinoError;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    Create,
    Modify,
    Remove,
}

/// 过滤后的文件系统事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub kind: FsEventKind,
    pub paths: Vec<PathBuf>,
}

/// 持有底层 watcher，drop 后停止监听
pub struct WatcherHandle {
    _inner: RecommendedWatcher,
    roots: Vec<PathBuf>,
}

impl WatcherHandle {
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("roots", &self.roots)
            .finish()
    }
}

/// 决定哪些路径需要触发构建
#[derive(Debug, Clone)]
pub struct EventFilter {
    roots: Vec<PathBuf>,
    output_root: PathBuf,
}

impl EventFilter {
    /// 监听源目录；资源目录不在源目录之内时一并监听
    pub fn new(layout: &Layout) -> Self {
        let mut roots = vec![layout.source_root.clone()];
        if !layout.assets_root.starts_with(&layout.source_root) {
            roots.push(layout.assets_root.clone());
        }
        Self {
            roots,
            output_root: layout.output_root.clone(),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// 忽略输出目录、监听范围之外以及隐藏文件（编辑器临时文件等）
    pub fn should_ignore(&self, path: &Path) -> bool {
        if path.starts_with(&self.output_root) {
            return true;
        }
        let Some(rel) = self
            .roots
            .iter()
            .find_map(|root| path.strip_prefix(root).ok())
        else {
            return true;
        };
        rel.components().any(|c| {
            c.as_os_str()
                .to_str()
                .is_some_and(|name| name.starts_with('.') && name != "." && name != "..")
        })
    }

    pub fn classify(&self, event: Event) -> Option<FsEvent> {
        let kind = match event.kind {
            EventKind::Create(_) => FsEventKind::Create,
            EventKind::Modify(_) | EventKind::Any => FsEventKind::Modify,
            EventKind::Remove(_) => FsEventKind::Remove,
            EventKind::Access(_) | EventKind::Other => return None,
        };
        let paths: Vec<PathBuf> = event
            .paths
            .into_iter()
            .filter(|p| !self.should_ignore(p))
            .collect();
        if paths.is_empty() {
            None
        } else {
            Some(FsEvent { kind, paths })
        }
    }
}

/// 启动递归文件监听，事件经过滤后送入返回的通道
pub fn spawn_watcher(
    layout: &Layout,
) -> Result<(WatcherHandle, mpsc::UnboundedReceiver<FsEvent>), DinoError> {
    let filter = EventFilter::new(layout);
    let roots = filter.roots().to_vec();
    let (tx, rx) = mpsc::unbounded_channel();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if let Some(event) = filter.classify(event) {
                // 接收端已关闭说明 watch 循环已退出
                let _ = tx.send(event);
            }
        }
        Err(e) => tracing::warn!("文件监听出错：{e}"),
    })?;

    for root in &roots {
        if !root.exists() {
            tracing::debug!("{} 不存在，跳过监听", root.display());
            continue;
        }
        watcher.watch(root, RecursiveMode::Recursive)?;
        tracing::info!("👀 正在监听 {}", root.display());
    }

    Ok((
        WatcherHandle {
            _inner: watcher,
            roots,
        },
        rx,
    ))
}
