use crate::build::changeset::ChangeSet;
use crate::build::report::{FileStatus, StageResult};
use crate::build::stages::{self, Stage};
use crate::config::Layout;
use crate::error::StageError;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

pub const STAGE_NAME: &str = "script";

const SCRIPT_EXTS: &[&str] = &["ts", "tsx", "js", "mjs"];

/// 脚本编译器：输入入口文件，返回打包后的 JS
pub trait ScriptCompiler: Send + Sync {
    fn compile(&self, entry: &Path) -> Result<Vec<u8>, StageError>;
}

/// 调用外部打包命令，产物取自 stdout
pub struct CommandCompiler {
    command: Vec<String>,
}

impl CommandCompiler {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl ScriptCompiler for CommandCompiler {
    fn compile(&self, entry: &Path) -> Result<Vec<u8>, StageError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(StageError::Compile("未配置脚本编译命令".into()));
        };
        let input = entry.to_string_lossy();
        let args: Vec<String> = args.iter().map(|a| a.replace("{input}", &input)).collect();

        let output = Command::new(program)
            .args(&args)
            .output()
            .map_err(|e| StageError::Compile(format!("无法执行 {program}：{e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StageError::Compile(format!(
                "{program} 退出码 {}：{}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

pub struct ScriptStage {
    layout: Arc<Layout>,
    compiler: Box<dyn ScriptCompiler>,
}

impl ScriptStage {
    pub fn new(layout: Arc<Layout>, compiler: Box<dyn ScriptCompiler>) -> Self {
        Self { layout, compiler }
    }

    fn is_script(path: &Path) -> bool {
        let declaration = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(".d.ts"));
        stages::has_ext(path, SCRIPT_EXTS) && !declaration
    }

    fn output_for(&self, entry: &Path) -> Option<PathBuf> {
        stages::output_path(
            &self.layout.script_root(),
            &self.layout.script_out(),
            entry,
            Some("js"),
        )
    }

    fn compile_entry(&self, entry: &Path, check_fresh: bool, result: &mut StageResult) {
        let Some(output) = self.output_for(entry) else {
            return;
        };
        if check_fresh && stages::is_fresh(stages::modified(entry), &output) {
            result.record(entry.to_path_buf(), Some(output), FileStatus::Skipped);
            return;
        }

        let status = match self.compiler.compile(entry) {
            Ok(js) => match stages::write_if_changed(&output, &js) {
                Ok(status) => {
                    if status == FileStatus::Written {
                        tracing::info!("已编译 {} → {}", entry.display(), output.display());
                    }
                    status
                }
                Err(e) => FileStatus::Failed(StageError::io(&output, e).to_string()),
            },
            Err(e) => FileStatus::Failed(e.to_string()),
        };
        result.record(entry.to_path_buf(), Some(output), status);
    }
}

impl Stage for ScriptStage {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    fn run(&self, changes: &ChangeSet) -> StageResult {
        let mut result = StageResult::new(STAGE_NAME);
        let root = self.layout.script_root();

        let check_fresh = match changes {
            ChangeSet::Full => true,
            ChangeSet::Partial(_) => {
                let changed: Vec<PathBuf> = changes
                    .paths_under(&root, Self::is_script)
                    .cloned()
                    .collect();
                if changed.is_empty() {
                    return result;
                }
                for removed in changed.iter().filter(|p| !p.exists()) {
                    if let Some(output) = self.output_for(removed) {
                        stages::remove_output(&mut result, removed, output);
                    }
                }
                // 入口之间的 import 关系不可见，任一脚本变化都重编全部入口
                false
            }
        };

        for entry in stages::walk_files(&root, &Self::is_script) {
            self.compile_entry(&entry, check_fresh, &mut result);
        }
        result.finish()
    }
}
