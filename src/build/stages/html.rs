use crate::build::changeset::ChangeSet;
use crate::build::report::{FileStatus, StageResult};
use crate::build::stages::{self, Stage};
use crate::config::{ASSETS_OUTPUT, Layout};
use crate::error::StageError;
use regex::{Captures, Regex};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

pub const STAGE_NAME: &str = "html";

/// include 最大嵌套层数
const MAX_INCLUDE_DEPTH: usize = 32;

/// 注入脚本的标记属性，用于判断已有输出是否处于热重载模式
const RELOAD_MARKER: &str = "data-dino-reload";

static INCLUDE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<include\s+src\s*=\s*["']([^"']+)["']\s*(?:/>|>.*?</include>)"#).unwrap()
});

static ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\b(href|src)(\s*=\s*)(?:"([^"]*)"|'([^']*)')"#).unwrap());

pub struct HtmlStage {
    layout: Arc<Layout>,
    /// 热重载模式下的 WebSocket 路径；`None` 表示不注入
    live_reload: Option<String>,
}

/// 渲染结果：最终 HTML 以及参与渲染的全部文件（页面本身 + 所有 include）
struct Rendered {
    html: String,
    deps: BTreeSet<PathBuf>,
}

impl HtmlStage {
    pub fn new(layout: Arc<Layout>, live_reload: Option<String>) -> Self {
        Self {
            layout,
            live_reload,
        }
    }

    /// 样式/脚本源目录下的 HTML 不属于页面，避免写入其它阶段的输出子目录
    fn is_page(&self, path: &Path) -> bool {
        path.starts_with(&self.layout.source_root)
            && !path.starts_with(self.layout.partials_root())
            && !path.starts_with(self.layout.style_root())
            && !path.starts_with(self.layout.script_root())
            && stages::has_ext(path, &["html"])
    }

    fn all_pages(&self) -> Vec<PathBuf> {
        stages::walk_files(&self.layout.source_root, &|p| self.is_page(p))
    }

    fn render(&self, page: &Path) -> Result<Rendered, StageError> {
        let (html, deps) = resolve_includes(&self.layout.source_root, page)?;
        let mut html = rewrite_references(&html, &self.layout);
        if let Some(ws_path) = &self.live_reload {
            html = inject_reload_script(&html, &reload_snippet(ws_path));
        }
        Ok(Rendered { html, deps })
    }

    fn process(&self, page: &Path, result: &mut StageResult) {
        let Some(output) = self.layout.output_for(page) else {
            return;
        };

        let rendered = match self.render(page) {
            Ok(r) => r,
            Err(e) => {
                result.record(page.to_path_buf(), Some(output), FileStatus::Failed(e.to_string()));
                return;
            }
        };

        let newest = rendered.deps.iter().filter_map(|p| stages::modified(p)).max();
        if stages::is_fresh(newest, &output) && self.injection_matches(&output) {
            result.record(page.to_path_buf(), Some(output), FileStatus::Skipped);
            return;
        }

        let status = match stages::write_if_changed(&output, rendered.html.as_bytes()) {
            Ok(status) => {
                if status == FileStatus::Written {
                    tracing::info!("已处理 {} → {}", page.display(), output.display());
                }
                status
            }
            Err(e) => FileStatus::Failed(StageError::io(&output, e).to_string()),
        };
        result.record(page.to_path_buf(), Some(output), status);
    }

    /// 已有输出的注入状态是否与当前模式一致
    fn injection_matches(&self, output: &Path) -> bool {
        std::fs::read_to_string(output)
            .is_ok_and(|html| html.contains(RELOAD_MARKER) == self.live_reload.is_some())
    }

    /// 增量模式下需要处理的页面：变更的页面本身 + include 了变更文件的页面
    fn affected_pages(&self, changed: &BTreeSet<PathBuf>) -> BTreeSet<PathBuf> {
        let mut pages: BTreeSet<PathBuf> = changed
            .iter()
            .filter(|p| self.is_page(p) && p.is_file())
            .cloned()
            .collect();

        for page in self.all_pages() {
            if pages.contains(&page) {
                continue;
            }
            // 渲染失败的页面也要重新处理，以便报告错误
            let depends = match resolve_includes(&self.layout.source_root, &page) {
                Ok((_, deps)) => deps.iter().any(|d| changed.contains(d)),
                Err(_) => true,
            };
            if depends {
                pages.insert(page);
            }
        }
        pages
    }
}

impl Stage for HtmlStage {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    fn run(&self, changes: &ChangeSet) -> StageResult {
        let mut result = StageResult::new(STAGE_NAME);

        let pages = match changes {
            ChangeSet::Full => {
                tracing::info!("开始处理 HTML 文件...");
                self.all_pages().into_iter().collect()
            }
            ChangeSet::Partial(_) => {
                let changed: BTreeSet<PathBuf> = changes
                    .paths_under(&self.layout.source_root, |p| stages::has_ext(p, &["html"]))
                    .cloned()
                    .collect();
                if changed.is_empty() {
                    return result;
                }
                for removed in changed.iter().filter(|p| self.is_page(p) && !p.exists()) {
                    if let Some(output) = self.layout.output_for(removed) {
                        stages::remove_output(&mut result, removed, output);
                    }
                }
                self.affected_pages(&changed)
            }
        };

        for page in &pages {
            self.process(page, &mut result);
        }
        result.finish()
    }
}

/// 递归展开 `<include src="...">`，路径相对于源目录解析
///
/// 返回展开后的内容和参与展开的所有文件（包含 `file` 本身）。
pub fn resolve_includes(
    source_root: &Path,
    file: &Path,
) -> Result<(String, BTreeSet<PathBuf>), StageError> {
    let mut deps = BTreeSet::new();
    let mut stack = Vec::new();
    let html = expand(source_root, file, &mut stack, &mut deps)?;
    Ok((html, deps))
}

fn expand(
    source_root: &Path,
    file: &Path,
    stack: &mut Vec<PathBuf>,
    deps: &mut BTreeSet<PathBuf>,
) -> Result<String, StageError> {
    if stack.iter().any(|p| p == file) {
        let mut chain = stack.clone();
        chain.push(file.to_path_buf());
        return Err(StageError::IncludeCycle { chain });
    }
    if stack.len() >= MAX_INCLUDE_DEPTH {
        return Err(StageError::IncludeTooDeep(MAX_INCLUDE_DEPTH));
    }

    let content = std::fs::read_to_string(file).map_err(|e| StageError::io(file, e))?;
    deps.insert(file.to_path_buf());
    stack.push(file.to_path_buf());

    let mut out = String::with_capacity(content.len());
    let mut last = 0;
    for caps in INCLUDE_RE.captures_iter(&content) {
        let (Some(whole), Some(target)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let target = target.as_str();
        let path = source_root.join(target.trim_start_matches('/'));
        if !path.is_file() {
            // 记录缺失的目标，目标出现后依赖页面可被增量重建
            deps.insert(path);
            return Err(StageError::IncludeNotFound {
                target: target.to_string(),
                from: file.to_path_buf(),
            });
        }
        out.push_str(&content[last..whole.start()]);
        out.push_str(&expand(source_root, &path, stack, deps)?);
        last = whole.end();
    }
    out.push_str(&content[last..]);

    stack.pop();
    Ok(out)
}

/// 改写 href/src 中指向样式/脚本源文件的引用
pub fn rewrite_references(html: &str, layout: &Layout) -> String {
    ATTR_RE
        .replace_all(html, |caps: &Captures| {
            let attr = &caps[1];
            let eq = &caps[2];
            match (caps.get(3), caps.get(4)) {
                (Some(url), _) => format!("{attr}{eq}\"{}\"", rewrite_url(url.as_str(), layout)),
                (_, Some(url)) => format!("{attr}{eq}'{}'", rewrite_url(url.as_str(), layout)),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn rewrite_url(url: &str, layout: &Layout) -> String {
    let external = url.starts_with('#')
        || url.starts_with("//")
        || url.contains("://")
        || ["data:", "mailto:", "tel:", "javascript:"]
            .iter()
            .any(|scheme| url.starts_with(scheme));
    if external || url.is_empty() {
        return url.to_string();
    }

    let split = url.find(['?', '#']).unwrap_or(url.len());
    let (path, suffix) = url.split_at(split);

    // 资源目录位于源目录之外，输出后固定为页面同级的 assets/
    let assets_prefix = format!("../{}/", layout.assets_dir_name());
    if let Some(rest) = path.strip_prefix(&assets_prefix) {
        return format!("./{ASSETS_OUTPUT}/{rest}{suffix}");
    }

    let body_start = leading_dots_len(path);
    let (prefix, body) = path.split_at(body_start);
    let body = rename_first_segment(body, layout);
    let body = swap_extension(&body);

    format!("{prefix}{body}{suffix}")
}

/// 开头的 `./`、`../`、`/` 前缀长度
fn leading_dots_len(path: &str) -> usize {
    let mut idx = 0;
    loop {
        let rest = &path[idx..];
        if rest.starts_with("./") {
            idx += 2;
        } else if rest.starts_with("../") {
            idx += 3;
        } else if rest.starts_with('/') {
            idx += 1;
        } else {
            return idx;
        }
    }
}

fn rename_first_segment(body: &str, layout: &Layout) -> String {
    let (first, rest) = match body.find('/') {
        Some(i) => body.split_at(i),
        None => return body.to_string(),
    };
    format!("{}{rest}", layout.rename_top_level(first))
}

fn swap_extension(body: &str) -> String {
    for (from, to) in [(".scss", ".css"), (".sass", ".css"), (".tsx", ".js")] {
        if let Some(stem) = body.strip_suffix(from) {
            return format!("{stem}{to}");
        }
    }
    match body.strip_suffix(".ts") {
        Some(stem) if !stem.ends_with(".d") => format!("{stem}.js"),
        _ => body.to_string(),
    }
}

/// 在最后一个 `</body>` 之前插入脚本，没有 body 时追加到末尾
pub fn inject_reload_script(html: &str, snippet: &str) -> String {
    let lower = html.to_ascii_lowercase();
    match lower.rfind("</body>") {
        Some(pos) => {
            let mut out = String::with_capacity(html.len() + snippet.len() + 1);
            out.push_str(&html[..pos]);
            out.push_str(snippet);
            out.push('\n');
            out.push_str(&html[pos..]);
            out
        }
        None => format!("{html}\n{snippet}"),
    }
}

/// 浏览器端热重载监听脚本
pub fn reload_snippet(ws_path: &str) -> String {
    const TEMPLATE: &str = r#"<script data-dino-reload>
(() => {
  const url = (location.protocol === "https:" ? "wss://" : "ws://") + location.host + "__WS_PATH__";
  let reconnecting = false;
  const connect = () => {
    const ws = new WebSocket(url);
    ws.onopen = () => { if (reconnecting) location.reload(); };
    ws.onmessage = (e) => { if (e.data === "reload") location.reload(); };
    ws.onclose = () => { reconnecting = true; setTimeout(connect, 1000); };
  };
  connect();
})();
</script>"#;
    TEMPLATE.replace("__WS_PATH__", ws_path)
}
