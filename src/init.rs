use crate::config::CONFIG_FILE;
use anyhow::Result;
use std::fs;
use std::path::Path;

// 嵌入项目骨架
const DEFAULT_CONFIG: &str = include_str!("../scaffold/dino.toml");
const INDEX_HTML: &str = include_str!("../scaffold/src/index.html");
const HEADER_HTML: &str = include_str!("../scaffold/src/partials/header.html");
const APP_SCSS: &str = include_str!("../scaffold/src/scss/app.scss");
const APP_TS: &str = include_str!("../scaffold/src/ts/app.ts");

/// 检测项目是否已初始化，未初始化则创建骨架。
/// 返回 `true` 表示执行了初始化，`false` 表示已存在。
pub fn ensure_initialized(root: &Path) -> Result<bool> {
    if root.join(CONFIG_FILE).exists() {
        return Ok(false);
    }

    let dirs = ["src/partials", "src/scss", "src/ts", "assets"];
    for dir in &dirs {
        fs::create_dir_all(root.join(dir))?;
    }

    fs::write(root.join(CONFIG_FILE), DEFAULT_CONFIG)?;

    let files: &[(&str, &str)] = &[
        ("src/index.html", INDEX_HTML),
        ("src/partials/header.html", HEADER_HTML),
        ("src/scss/app.scss", APP_SCSS),
        ("src/ts/app.ts", APP_TS),
    ];
    for (path, content) in files {
        let target = root.join(path);
        // 不覆盖已有的源文件
        if !target.exists() {
            fs::write(target, content)?;
        }
    }

    Ok(true)
}
