pub mod assets;
pub mod html;
pub mod script;
pub mod style;

use crate::build::changeset::ChangeSet;
use crate::build::report::{FileStatus, StageResult};
use crate::config::{DinoConfig, Layout};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// 构建管道中的一个阶段
///
/// 约束：
/// - `Full` 处理本阶段领域内的全部文件，`Partial` 只处理集合中属于本领域的文件
/// - 只写入本阶段自己的输出子目录，因此同一轮构建中的阶段可以并发执行
/// - 单个文件失败记录在结果中，不影响同批次其它文件
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(&self, changes: &ChangeSet) -> StageResult;
}

/// 按固定顺序 HTML → Script → Style → Asset 构造默认阶段
pub fn default_stages(
    config: &DinoConfig,
    layout: Arc<Layout>,
    live_reload: Option<String>,
) -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(html::HtmlStage::new(Arc::clone(&layout), live_reload)),
        Box::new(script::ScriptStage::new(
            Arc::clone(&layout),
            Box::new(script::CommandCompiler::new(config.script.command.clone())),
        )),
        Box::new(style::StyleStage::new(
            Arc::clone(&layout),
            Box::new(style::GrassCompiler::from_config(&config.style, &layout)),
        )),
        Box::new(assets::AssetStage::new(
            layout,
            Box::new(assets::ImageCrateOptimizer::from_config(&config.assets)),
        )),
    ]
}

/// 递归收集 `root` 下满足条件的文件（忽略隐藏文件），按路径排序
pub(crate) fn walk_files(root: &Path, filter: &dyn Fn(&Path) -> bool) -> Vec<PathBuf> {
    let mut files = Vec::new();
    collect(root, filter, &mut files);
    files.sort();
    files
}

fn collect(dir: &Path, filter: &dyn Fn(&Path) -> bool, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            collect(&path, filter, files);
        } else if filter(&path) {
            files.push(path);
        }
    }
}

pub(crate) fn has_ext(path: &Path, exts: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| exts.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

pub(crate) fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// 输出存在且修改时间不早于 `newest_source` 时视为最新
pub(crate) fn is_fresh(newest_source: Option<SystemTime>, output: &Path) -> bool {
    match (newest_source, modified(output)) {
        (Some(src), Some(out)) => out >= src,
        _ => false,
    }
}

/// 仅在内容变化时写入，返回 `Written` 或 `Unchanged`
pub(crate) fn write_if_changed(path: &Path, bytes: &[u8]) -> std::io::Result<FileStatus> {
    if std::fs::read(path).is_ok_and(|existing| existing == bytes) {
        return Ok(FileStatus::Unchanged);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    tracing::debug!("已写入 {}", path.display());
    Ok(FileStatus::Written)
}

/// 源文件被删除时同步移除输出
pub(crate) fn remove_output(result: &mut StageResult, source: &Path, output: PathBuf) {
    if !output.exists() {
        return;
    }
    let status = match std::fs::remove_file(&output) {
        Ok(()) => {
            tracing::info!("源文件已删除，移除输出 {}", output.display());
            FileStatus::Removed
        }
        Err(e) => FileStatus::Failed(format!("移除输出失败：{e}")),
    };
    result.record(source.to_path_buf(), Some(output), status);
}

/// `root` 下的相对路径，换上新的扩展名后挂到 `out_root` 下
pub(crate) fn output_path(root: &Path, out_root: &Path, source: &Path, ext: Option<&str>) -> Option<PathBuf> {
    let rel = source.strip_prefix(root).ok()?;
    let mut out = out_root.join(rel);
    if let Some(ext) = ext {
        out.set_extension(ext);
    }
    Some(out)
}
