use crate::build::changeset::ChangeSet;
use crate::build::mirror;
use crate::build::report::{BuildReport, StageResult};
use crate::build::stages::Stage;
use crate::config::Layout;
use crate::error::DinoError;
use chrono::Utc;
use rayon::prelude::*;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// 执行一轮构建的能力，watch 循环通过它驱动构建，测试中可替换为假实现
pub trait BuildRunner: Send + Sync {
    fn build(&self, changes: &ChangeSet) -> Result<BuildReport, DinoError>;
}

/// 构建协调器：先镜像目录，再按 HTML → Script → Style → Asset 执行各阶段
pub struct Builder {
    layout: Arc<Layout>,
    stages: Vec<Box<dyn Stage>>,
    parallel: bool,
}

impl Builder {
    pub fn new(layout: Arc<Layout>, stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            layout,
            stages,
            parallel: false,
        }
    }

    /// 阶段之间输出目录互不重叠，可在 rayon 线程池上并发执行
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// 执行一次构建
    ///
    /// 只有镜像阶段的致命错误（源目录缺失、输出目录无法创建）会返回 `Err`；
    /// 阶段失败和阶段崩溃都记录在报告中，后续阶段照常执行。
    pub fn build(&self, changes: &ChangeSet) -> Result<BuildReport, DinoError> {
        tracing::info!("开始构建（{}）...", changes.summary());
        let started_at = Utc::now();
        let start = std::time::Instant::now();

        let mirror = mirror::mirror(&self.layout)?;

        let stages: Vec<StageResult> = if self.parallel {
            self.stages
                .par_iter()
                .map(|stage| run_stage(stage.as_ref(), changes))
                .collect()
        } else {
            self.stages
                .iter()
                .map(|stage| run_stage(stage.as_ref(), changes))
                .collect()
        };

        let report = BuildReport {
            started_at,
            finished_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
            changes: changes.summary(),
            mirror,
            stages,
        };
        report.log_summary();
        Ok(report)
    }
}

impl BuildRunner for Builder {
    fn build(&self, changes: &ChangeSet) -> Result<BuildReport, DinoError> {
        Builder::build(self, changes)
    }
}

/// 单个阶段的 panic 被转换为失败的阶段结果
fn run_stage(stage: &dyn Stage, changes: &ChangeSet) -> StageResult {
    match catch_unwind(AssertUnwindSafe(|| stage.run(changes))) {
        Ok(result) => result,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "未知错误".to_string());
            tracing::error!("阶段 {} 崩溃：{reason}", stage.name());
            StageResult::crashed(stage.name(), format!("阶段崩溃：{reason}"))
        }
    }
}
