use crate::build::changeset::ChangeSet;
use crate::build::report::{FileStatus, StageResult};
use crate::build::stages::{self, Stage};
use crate::config::{Layout, StyleConfig};
use crate::error::StageError;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const STAGE_NAME: &str = "style";

/// 样式编译器：输入 SCSS 入口，返回 CSS
pub trait StyleCompiler: Send + Sync {
    fn compile(&self, entry: &Path) -> Result<String, StageError>;
}

pub struct GrassCompiler {
    compressed: bool,
    load_paths: Vec<PathBuf>,
}

impl GrassCompiler {
    pub fn new(compressed: bool, load_paths: Vec<PathBuf>) -> Self {
        Self {
            compressed,
            load_paths,
        }
    }

    /// 加载路径：样式源目录 + 配置中的额外目录（相对项目根目录）
    pub fn from_config(config: &StyleConfig, layout: &Layout) -> Self {
        let mut load_paths = vec![layout.style_root()];
        load_paths.extend(config.load_paths.iter().map(|p| layout.project_root.join(p)));
        Self::new(config.compressed, load_paths)
    }
}

impl StyleCompiler for GrassCompiler {
    fn compile(&self, entry: &Path) -> Result<String, StageError> {
        let style = if self.compressed {
            grass::OutputStyle::Compressed
        } else {
            grass::OutputStyle::Expanded
        };
        let mut options = grass::Options::default().style(style);
        if let Some(dir) = entry.parent() {
            options = options.load_path(dir);
        }
        let options = options.load_paths(&self.load_paths);

        grass::from_path(entry, &options).map_err(|e| StageError::Compile(e.to_string()))
    }
}

pub struct StyleStage {
    layout: Arc<Layout>,
    compiler: Box<dyn StyleCompiler>,
}

impl StyleStage {
    pub fn new(layout: Arc<Layout>, compiler: Box<dyn StyleCompiler>) -> Self {
        Self { layout, compiler }
    }

    fn is_style(path: &Path) -> bool {
        stages::has_ext(path, &["scss", "css"])
    }

    /// 以下划线开头的文件只会被 @use/@import，不单独输出
    fn is_partial(path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('_'))
    }

    fn is_entry(path: &Path) -> bool {
        Self::is_style(path) && !Self::is_partial(path)
    }

    fn output_for(&self, entry: &Path) -> Option<PathBuf> {
        stages::output_path(
            &self.layout.style_root(),
            &self.layout.style_out(),
            entry,
            Some("css"),
        )
    }

    fn compile_entry(&self, entry: &Path, result: &mut StageResult) {
        let Some(output) = self.output_for(entry) else {
            return;
        };

        let css = if stages::has_ext(entry, &["css"]) {
            std::fs::read(entry).map_err(|e| StageError::io(entry, e))
        } else {
            self.compiler.compile(entry).map(String::into_bytes)
        };

        let status = match css {
            Ok(css) => match stages::write_if_changed(&output, &css) {
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

impl Stage for StyleStage {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    fn run(&self, changes: &ChangeSet) -> StageResult {
        let mut result = StageResult::new(STAGE_NAME);
        let root = self.layout.style_root();

        let entries: Vec<PathBuf> = match changes {
            ChangeSet::Full => stages::walk_files(&root, &Self::is_entry),
            ChangeSet::Partial(_) => {
                let changed: Vec<PathBuf> = changes
                    .paths_under(&root, Self::is_style)
                    .cloned()
                    .collect();

                for removed in changed.iter().filter(|p| Self::is_entry(p) && !p.exists()) {
                    if let Some(output) = self.output_for(removed) {
                        stages::remove_output(&mut result, removed, output);
                    }
                }

                if changed.iter().any(|p| Self::is_partial(p)) {
                    tracing::debug!("样式 partial 变更，重新编译全部入口");
                    stages::walk_files(&root, &Self::is_entry)
                } else {
                    changed
                        .into_iter()
                        .filter(|p| Self::is_entry(p) && p.is_file())
                        .collect()
                }
            }
        };

        for entry in &entries {
            self.compile_entry(entry, &mut result);
        }
        result.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DinoConfig;
    use std::fs;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeCompiler {
        calls: Arc<Mutex<Vec<PathBuf>>>,
    }

    impl StyleCompiler for FakeCompiler {
        fn compile(&self, entry: &Path) -> Result<String, StageError> {
            self.calls.lock().unwrap().push(entry.to_path_buf());
            let source = fs::read_to_string(entry).map_err(|e| StageError::io(entry, e))?;
            if source.contains("broken") {
                return Err(StageError::Compile("expected \";\"".into()));
            }
            Ok(source.replace(' ', ""))
        }
    }

    fn setup() -> (tempfile::TempDir, Arc<Layout>) {
        let dir = tempfile::tempdir().unwrap();
        let layout = DinoConfig::default().layout(dir.path());
        fs::create_dir_all(layout.style_root().join("components")).unwrap();
        (dir, Arc::new(layout))
    }

    fn stage_with_calls(layout: &Arc<Layout>) -> (StyleStage, Arc<Mutex<Vec<PathBuf>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let compiler = FakeCompiler {
            calls: Arc::clone(&calls),
        };
        (StyleStage::new(Arc::clone(layout), Box::new(compiler)), calls)
    }

    #[test]
    fn partials_are_not_emitted_and_css_passes_through() {
        let (_dir, layout) = setup();
        let root = layout.style_root();
        fs::write(root.join("app.scss"), "a { b: c }").unwrap();
        fs::write(root.join("_vars.scss"), "$x: 1;").unwrap();
        fs::write(root.join("components/reset.css"), "html { margin: 0 }").unwrap();

        let (stage, calls) = stage_with_calls(&layout);
        let result = stage.run(&ChangeSet::Full);

        assert!(!result.is_failed());
        let out = layout.style_out();
        assert_eq!(fs::read_to_string(out.join("app.css")).unwrap(), "a{b:c}");
        assert_eq!(
            fs::read_to_string(out.join("components/reset.css")).unwrap(),
            "html { margin: 0 }"
        );
        assert!(!out.join("_vars.css").exists());
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn changed_partial_recompiles_every_entry() {
        let (_dir, layout) = setup();
        let root = layout.style_root();
        fs::write(root.join("a.scss"), "").unwrap();
        fs::write(root.join("components/b.scss"), "").unwrap();
        fs::write(root.join("_vars.scss"), "").unwrap();

        let (stage, calls) = stage_with_calls(&layout);
        stage.run(&ChangeSet::partial([root.join("_vars.scss")]).unwrap());

        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn changed_entry_recompiles_only_itself() {
        let (_dir, layout) = setup();
        let root = layout.style_root();
        fs::write(root.join("a.scss"), "").unwrap();
        fs::write(root.join("b.scss"), "").unwrap();

        let (stage, calls) = stage_with_calls(&layout);
        stage.run(&ChangeSet::partial([root.join("b.scss")]).unwrap());

        assert_eq!(*calls.lock().unwrap(), vec![root.join("b.scss")]);
    }

    #[test]
    fn second_full_build_writes_nothing() {
        let (_dir, layout) = setup();
        fs::write(layout.style_root().join("a.scss"), "a { b: c }").unwrap();
        let (stage, _) = stage_with_calls(&layout);

        assert_eq!(stage.run(&ChangeSet::Full).written(), 1);
        let second = stage.run(&ChangeSet::Full);
        assert_eq!(second.written(), 0);
        assert_eq!(second.count(|s| *s == FileStatus::Unchanged), 1);
    }

    #[test]
    fn compile_error_is_isolated_to_the_file() {
        let (_dir, layout) = setup();
        let root = layout.style_root();
        fs::write(root.join("bad.scss"), "broken").unwrap();
        fs::write(root.join("good.scss"), "p { q: r }").unwrap();

        let (stage, _) = stage_with_calls(&layout);
        let result = stage.run(&ChangeSet::Full);

        assert!(result.is_failed());
        assert!(!layout.style_out().join("bad.css").exists());
        assert!(layout.style_out().join("good.css").exists());
    }

    #[test]
    fn grass_compiles_with_partials_from_load_path() {
        let (_dir, layout) = setup();
        let root = layout.style_root();
        fs::write(root.join("_vars.scss"), "$main: #ff0000;").unwrap();
        fs::write(
            root.join("components/button.scss"),
            "@use \"vars\";\n.btn { color: vars.$main; }",
        )
        .unwrap();

        let compiler = GrassCompiler::from_config(&StyleConfig::default(), &layout);
        let css = compiler.compile(&root.join("components/button.scss")).unwrap();

        assert!(css.contains(".btn{color:"));
    }

    #[test]
    fn grass_reports_syntax_errors() {
        let (_dir, layout) = setup();
        let entry = layout.style_root().join("bad.scss");
        fs::write(&entry, ".a { color: red").unwrap();

        let compiler = GrassCompiler::from_config(&StyleConfig::default(), &layout);
        assert!(matches!(compiler.compile(&entry), Err(StageError::Compile(_))));
    }
}
