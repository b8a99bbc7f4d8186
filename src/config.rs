use crate::error::DinoError;
use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "dino.toml";

/// 资源在输出目录中的子目录名，与 `paths.assets` 无关
pub const ASSETS_OUTPUT: &str = "assets";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DinoConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub dirs: DirsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub script: ScriptConfig,
    #[serde(default)]
    pub style: StyleConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_output")]
    pub output: String,
    #[serde(default = "default_assets")]
    pub assets: String,
}

/// 源目录名与输出目录名的映射
#[derive(Debug, Clone, Deserialize)]
pub struct DirsConfig {
    #[serde(default = "default_style_source")]
    pub style_source: String,
    #[serde(default = "default_style_output")]
    pub style_output: String,
    #[serde(default = "default_script_source")]
    pub script_source: String,
    #[serde(default = "default_script_output")]
    pub script_output: String,
    #[serde(default = "default_partials")]
    pub partials: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_port_attempts")]
    pub port_attempts: u32,
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// 存在失败阶段的构建是否仍然通知浏览器刷新
    #[serde(default = "default_true")]
    pub reload_on_failure: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildConfig {
    #[serde(default)]
    pub parallel: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptConfig {
    /// 打包命令，`{input}` 会被替换为入口文件路径，产物取自 stdout
    #[serde(default = "default_script_command")]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StyleConfig {
    #[serde(default = "default_true")]
    pub compressed: bool,
    #[serde(default)]
    pub load_paths: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetsConfig {
    #[serde(default = "default_true")]
    pub optimize_images: bool,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

/// 解析后的绝对路径布局，构建各阶段共享
#[derive(Debug, Clone)]
pub struct Layout {
    pub project_root: PathBuf,
    pub source_root: PathBuf,
    pub output_root: PathBuf,
    pub assets_root: PathBuf,
    pub style_source: String,
    pub style_output: String,
    pub script_source: String,
    pub script_output: String,
    pub partials: String,
}

impl Layout {
    /// 顶层目录名映射：样式源目录 → 样式输出目录，脚本源目录 → 脚本输出目录
    pub fn rename_top_level<'a>(&'a self, name: &'a str) -> &'a str {
        if name == self.style_source {
            &self.style_output
        } else if name == self.script_source {
            &self.script_output
        } else {
            name
        }
    }

    /// 源文件在输出目录中的对应路径（顶层目录按映射改名）
    pub fn output_for(&self, source: &Path) -> Option<PathBuf> {
        let rel = source.strip_prefix(&self.source_root).ok()?;
        let mut components = rel.components();
        let first = components.next()?.as_os_str().to_str()?;
        let rest = components.as_path();
        if rest.as_os_str().is_empty() {
            return Some(self.output_root.join(first));
        }
        Some(self.output_root.join(self.rename_top_level(first)).join(rest))
    }

    pub fn style_root(&self) -> PathBuf {
        self.source_root.join(&self.style_source)
    }

    pub fn style_out(&self) -> PathBuf {
        self.output_root.join(&self.style_output)
    }

    pub fn script_root(&self) -> PathBuf {
        self.source_root.join(&self.script_source)
    }

    pub fn script_out(&self) -> PathBuf {
        self.output_root.join(&self.script_output)
    }

    pub fn partials_root(&self) -> PathBuf {
        self.source_root.join(&self.partials)
    }

    pub fn assets_out(&self) -> PathBuf {
        self.output_root.join(ASSETS_OUTPUT)
    }

    /// 资源目录名（用于 HTML 中 `../assets/` 的改写）
    pub fn assets_dir_name(&self) -> &str {
        self.assets_root
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("assets")
    }
}

impl DinoConfig {
    /// 读取项目根目录下的 dino.toml，不存在时使用默认配置
    pub fn load(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(CONFIG_FILE);
        if !config_path.exists() {
            tracing::debug!("未找到 {CONFIG_FILE}，使用默认配置");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("读取 {CONFIG_FILE} 失败：{}", e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: DinoConfig = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("解析 {CONFIG_FILE} 失败：{}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), DinoError> {
        let dirs = [
            ("dirs.style_source", &self.dirs.style_source),
            ("dirs.style_output", &self.dirs.style_output),
            ("dirs.script_source", &self.dirs.script_source),
            ("dirs.script_output", &self.dirs.script_output),
            ("dirs.partials", &self.dirs.partials),
        ];
        for (key, value) in dirs {
            if value.is_empty() || value.contains(['/', '\\']) {
                return Err(DinoError::Config(format!(
                    "{key} 必须是单级目录名，当前为 \"{value}\""
                )));
            }
        }
        // 输出目录位于源目录之内时，镜像会把输出目录当作源目录无限递归
        let anchor = Path::new("/");
        if anchor
            .join(&self.paths.output)
            .starts_with(anchor.join(&self.paths.source))
        {
            return Err(DinoError::Config(format!(
                "paths.output \"{}\" 不能位于 paths.source \"{}\" 之内",
                self.paths.output, self.paths.source
            )));
        }
        if self.dirs.style_output == self.dirs.script_output {
            return Err(DinoError::Config(
                "dirs.style_output 与 dirs.script_output 不能相同".into(),
            ));
        }
        if !self.server.ws_path.starts_with('/') {
            return Err(DinoError::Config(format!(
                "server.ws_path 必须以 / 开头，当前为 \"{}\"",
                self.server.ws_path
            )));
        }
        if self.server.port_attempts == 0 {
            return Err(DinoError::Config("server.port_attempts 不能为 0".into()));
        }
        if self.watch.debounce_ms == 0 {
            return Err(DinoError::Config("watch.debounce_ms 不能为 0".into()));
        }
        if !(1..=100).contains(&self.assets.jpeg_quality) {
            return Err(DinoError::Config(format!(
                "assets.jpeg_quality 必须在 1-100 之间，当前为 {}",
                self.assets.jpeg_quality
            )));
        }
        Ok(())
    }

    /// 以项目根目录解析出绝对路径布局
    pub fn layout(&self, project_root: &Path) -> Layout {
        Layout {
            project_root: project_root.to_path_buf(),
            source_root: project_root.join(&self.paths.source),
            output_root: project_root.join(&self.paths.output),
            assets_root: project_root.join(&self.paths.assets),
            style_source: self.dirs.style_source.clone(),
            style_output: self.dirs.style_output.clone(),
            script_source: self.dirs.script_source.clone(),
            script_output: self.dirs.script_output.clone(),
            partials: self.dirs.partials.clone(),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.watch.debounce_ms)
    }
}

// 默认值函数
fn default_source() -> String { "src".into() }
fn default_output() -> String { "dist".into() }
fn default_assets() -> String { "assets".into() }
fn default_style_source() -> String { "scss".into() }
fn default_style_output() -> String { "css".into() }
fn default_script_source() -> String { "ts".into() }
fn default_script_output() -> String { "js".into() }
fn default_partials() -> String { "partials".into() }
fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 1234 }
fn default_port_attempts() -> u32 { 100 }
fn default_ws_path() -> String { "/ws".into() }
fn default_log_level() -> String { "info".into() }
fn default_debounce_ms() -> u64 { 300 }
fn default_true() -> bool { true }
fn default_jpeg_quality() -> u8 { 80 }
fn default_script_command() -> Vec<String> {
    vec![
        "esbuild".into(),
        "{input}".into(),
        "--bundle".into(),
        "--format=esm".into(),
    ]
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            output: default_output(),
            assets: default_assets(),
        }
    }
}

impl Default for DirsConfig {
    fn default() -> Self {
        Self {
            style_source: default_style_source(),
            style_output: default_style_output(),
            script_source: default_script_source(),
            script_output: default_script_output(),
            partials: default_partials(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            port_attempts: default_port_attempts(),
            ws_path: default_ws_path(),
            log_level: default_log_level(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            reload_on_failure: true,
        }
    }
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            command: default_script_command(),
        }
    }
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            compressed: true,
            load_paths: Vec::new(),
        }
    }
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            optimize_images: true,
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DinoConfig::load(dir.path()).unwrap();
        assert_eq!(config.server.port, 1234);
        assert_eq!(config.paths.source, "src");
        assert_eq!(config.paths.output, "dist");
        assert_eq!(config.watch.debounce_ms, 300);
        assert!(config.watch.reload_on_failure);
        assert!(!config.build.parallel);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = DinoConfig::parse(
            r#"
            [server]
            port = 8080

            [dirs]
            style_source = "sass"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.ws_path, "/ws");
        assert_eq!(config.dirs.style_source, "sass");
        assert_eq!(config.dirs.style_output, "css");
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(DinoConfig::parse("[server]\nws_path = \"ws\"").is_err());
        assert!(DinoConfig::parse("[watch]\ndebounce_ms = 0").is_err());
        assert!(DinoConfig::parse("[assets]\njpeg_quality = 0").is_err());
        assert!(DinoConfig::parse("[dirs]\nscript_output = \"css\"").is_err());
        assert!(DinoConfig::parse("[dirs]\nstyle_source = \"a/b\"").is_err());
        assert!(DinoConfig::parse("[server\nport = 1").is_err());
    }

    #[test]
    fn rejects_output_inside_source() {
        for paths in [
            "[paths]\noutput = \"src/dist\"",
            "[paths]\noutput = \"./src/dist\"",
            "[paths]\nsource = \"web\"\noutput = \"web\"",
            "[paths]\nsource = \".\"",
        ] {
            let err = DinoConfig::parse(paths).unwrap_err();
            assert!(err.to_string().contains("paths.output"), "{paths}: {err}");
        }
        assert!(DinoConfig::parse("[paths]\nsource = \"site/src\"\noutput = \"site/dist\"").is_ok());
    }

    #[test]
    fn layout_renames_only_configured_dirs() {
        let layout = DinoConfig::default().layout(Path::new("/project"));
        assert_eq!(layout.rename_top_level("scss"), "css");
        assert_eq!(layout.rename_top_level("ts"), "js");
        assert_eq!(layout.rename_top_level("images"), "images");
        assert_eq!(layout.source_root, Path::new("/project/src"));
        assert_eq!(layout.style_out(), Path::new("/project/dist/css"));
        assert_eq!(layout.assets_dir_name(), "assets");
    }

    #[test]
    fn output_for_renames_first_dir_only() {
        let layout = DinoConfig::default().layout(Path::new("/project"));
        assert_eq!(
            layout.output_for(Path::new("/project/src/index.html")),
            Some(PathBuf::from("/project/dist/index.html"))
        );
        assert_eq!(
            layout.output_for(Path::new("/project/src/ts/app.html")),
            Some(PathBuf::from("/project/dist/js/app.html"))
        );
        // 顶层同名文件不改名
        assert_eq!(
            layout.output_for(Path::new("/project/src/scss")),
            Some(PathBuf::from("/project/dist/scss"))
        );
        assert_eq!(layout.output_for(Path::new("/elsewhere/a.html")), None);
    }
}
