use crate::build::stages::html::resolve_includes;
use crate::config::{CONFIG_FILE, DinoConfig, Layout};
use anyhow::Result;
use std::path::Path;

pub struct CheckResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// 执行项目完整性检查，依次验证配置、源目录、资源目录和 HTML include
pub fn run(project_root: &Path) -> Result<CheckResult> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let Some(config) = check_config(project_root, &mut errors, &mut warnings) else {
        return Ok(CheckResult { errors, warnings });
    };
    let layout = config.layout(project_root);

    if check_source(&layout, &mut errors, &mut warnings) {
        check_includes(&layout, &mut errors);
    }
    check_assets(&layout, &mut warnings);

    Ok(CheckResult { errors, warnings })
}

fn check_config(
    root: &Path,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) -> Option<DinoConfig> {
    if !root.join(CONFIG_FILE).exists() {
        warnings.push(format!("缺少 {CONFIG_FILE}，使用默认配置"));
    }
    match DinoConfig::load(root) {
        Ok(config) => Some(config),
        Err(e) => {
            errors.push(format!("{e}"));
            None
        }
    }
}

/// 返回源目录是否可用
fn check_source(layout: &Layout, errors: &mut Vec<String>, warnings: &mut Vec<String>) -> bool {
    let source = &layout.source_root;
    if !source.is_dir() {
        errors.push(format!("源目录 {} 不存在", source.display()));
        return false;
    }
    if !source.join("index.html").exists() {
        warnings.push(format!("{} 下没有 index.html", source.display()));
    }
    for (dir, label) in [(layout.style_root(), "样式"), (layout.script_root(), "脚本")] {
        if !dir.is_dir() {
            warnings.push(format!("{label}目录 {} 不存在", dir.display()));
        }
    }
    true
}

fn check_includes(layout: &Layout, errors: &mut Vec<String>) {
    let partials = layout.partials_root();
    let pages = crate::build::stages::walk_files(&layout.source_root, &|p| {
        crate::build::stages::has_ext(p, &["html"]) && !p.starts_with(&partials)
    });
    for page in pages {
        if let Err(e) = resolve_includes(&layout.source_root, &page) {
            errors.push(format!("{}：{e}", page.display()));
        }
    }
}

fn check_assets(layout: &Layout, warnings: &mut Vec<String>) {
    if !layout.assets_root.is_dir() {
        warnings.push(format!("资源目录 {} 不存在", layout.assets_root.display()));
    }
}
