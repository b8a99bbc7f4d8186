use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// 单个文件在阶段中的处理结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum FileStatus {
    Written,
    /// 内容与已有输出一致，未重写
    Unchanged,
    /// 输出比源文件新，跳过处理
    Skipped,
    /// 源文件已删除，对应输出被移除
    Removed,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub source: PathBuf,
    pub output: Option<PathBuf>,
    #[serde(flatten)]
    pub status: FileStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "lowercase")]
pub enum StageOutcome {
    Success,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub stage: String,
    #[serde(flatten)]
    pub outcome: StageOutcome,
    pub files: Vec<FileRecord>,
}

impl StageResult {
    pub fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            outcome: StageOutcome::Success,
            files: Vec::new(),
        }
    }

    /// 阶段整体崩溃（collaborator panic 等），由构建协调器生成
    pub fn crashed(stage: &str, reason: impl Into<String>) -> Self {
        Self {
            stage: stage.to_string(),
            outcome: StageOutcome::Failed(reason.into()),
            files: Vec::new(),
        }
    }

    pub fn record(&mut self, source: PathBuf, output: Option<PathBuf>, status: FileStatus) {
        if let FileStatus::Failed(reason) = &status {
            tracing::warn!("[{}] {}：{reason}", self.stage, source.display());
        }
        self.files.push(FileRecord {
            source,
            output,
            status,
        });
    }

    /// 汇总文件级失败，得到阶段结果
    pub fn finish(mut self) -> Self {
        let failed = self.count(|s| matches!(s, FileStatus::Failed(_)));
        if failed > 0 && self.outcome == StageOutcome::Success {
            self.outcome = StageOutcome::Failed(format!("{failed} 个文件处理失败"));
        }
        self
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, StageOutcome::Failed(_))
    }

    pub fn count(&self, pred: impl Fn(&FileStatus) -> bool) -> usize {
        self.files.iter().filter(|f| pred(&f.status)).count()
    }

    pub fn written(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Written | FileStatus::Removed))
    }

    /// 查找某个源文件的记录
    pub fn file(&self, source: &std::path::Path) -> Option<&FileRecord> {
        self.files.iter().find(|f| f.source == source)
    }
}

/// 镜像阶段中非致命的子树失败
#[derive(Debug, Clone, Default, Serialize)]
pub struct MirrorReport {
    pub created: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

/// 一次构建的完整报告
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub changes: String,
    pub mirror: MirrorReport,
    pub stages: Vec<StageResult>,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        !self.stages.iter().any(StageResult::is_failed)
    }

    pub fn failed_stages(&self) -> Vec<&StageResult> {
        self.stages.iter().filter(|s| s.is_failed()).collect()
    }

    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == name)
    }

    pub fn log_summary(&self) {
        let written: usize = self.stages.iter().map(StageResult::written).sum();
        let unchanged: usize = self
            .stages
            .iter()
            .map(|s| s.count(|st| matches!(st, FileStatus::Unchanged | FileStatus::Skipped)))
            .sum();
        let failed: usize = self
            .stages
            .iter()
            .map(|s| s.count(|st| matches!(st, FileStatus::Failed(_))))
            .sum();

        for stage in self.failed_stages() {
            if let StageOutcome::Failed(reason) = &stage.outcome {
                tracing::warn!("阶段 {} 失败：{reason}", stage.stage);
            }
        }

        if self.is_success() {
            tracing::info!(
                "🤖 构建完成（{}），耗时 {}ms：写入 {written}，未变 {unchanged}",
                self.changes,
                self.duration_ms,
            );
        } else {
            tracing::warn!(
                "构建完成但存在失败（{}），耗时 {}ms：写入 {written}，未变 {unchanged}，失败 {failed}",
                self.changes,
                self.duration_ms,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_failure_marks_stage_failed() {
        let mut result = StageResult::new("style");
        result.record("/src/scss/a.scss".into(), None, FileStatus::Written);
        result.record(
            "/src/scss/b.scss".into(),
            None,
            FileStatus::Failed("语法错误".into()),
        );
        let result = result.finish();
        assert!(result.is_failed());
        assert_eq!(result.outcome, StageOutcome::Failed("1 个文件处理失败".into()));
        assert_eq!(result.written(), 1);
    }

    #[test]
    fn crashed_stage_keeps_reason() {
        let result = StageResult::crashed("asset", "panic").finish();
        assert_eq!(result.outcome, StageOutcome::Failed("panic".into()));
    }

    #[test]
    fn report_serializes_outcomes() {
        let mut ok = StageResult::new("html");
        ok.record("/src/index.html".into(), Some("/dist/index.html".into()), FileStatus::Skipped);
        let report = BuildReport {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            duration_ms: 3,
            changes: "全量".into(),
            mirror: MirrorReport::default(),
            stages: vec![ok.finish(), StageResult::crashed("script", "boom")],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["stages"][0]["outcome"], "success");
        assert_eq!(json["stages"][0]["files"][0]["status"], "skipped");
        assert_eq!(json["stages"][1]["outcome"], "failed");
        assert_eq!(json["stages"][1]["reason"], "boom");
        assert!(!report.is_success());
        assert_eq!(report.failed_stages().len(), 1);
    }
}
