pub mod changeset;
pub mod mirror;
pub mod pipeline;
pub mod report;
pub mod stages;

use crate::config::DinoConfig;
use anyhow::Result;
use changeset::ChangeSet;
use pipeline::Builder;
use report::BuildReport;
use std::path::Path;
use std::sync::Arc;

/// 按配置组装构建协调器；`live_reload` 为热重载 WebSocket 路径
pub fn builder(project_root: &Path, config: &DinoConfig, live_reload: Option<String>) -> Builder {
    let layout = Arc::new(config.layout(project_root));
    let stages = stages::default_stages(config, Arc::clone(&layout), live_reload);
    Builder::new(layout, stages).parallel(config.build.parallel)
}

/// 清除输出目录
pub fn clean(project_root: &Path, config: &DinoConfig) -> Result<()> {
    let output_dir = project_root.join(&config.paths.output);
    if output_dir.exists() {
        std::fs::remove_dir_all(&output_dir)?;
        tracing::info!("已清除输出目录：{}", output_dir.display());
    }
    Ok(())
}

/// 执行一次全量构建（不注入热重载脚本）
pub fn run(project_root: &Path, config: &DinoConfig, clean_first: bool) -> Result<BuildReport> {
    if clean_first {
        clean(project_root, config)?;
    }
    let report = builder(project_root, config, None).build(&ChangeSet::Full)?;
    Ok(report)
}
