use crate::build::report::MirrorReport;
use crate::config::Layout;
use crate::error::DinoError;
use std::path::Path;

/// 将源目录结构镜像到输出目录
///
/// 只创建目录，文件由各阶段写入。顶层的样式/脚本源目录会按映射改名，
/// 其余目录名原样保留。单个子树创建失败只记录日志，不影响兄弟目录。
pub fn mirror(layout: &Layout) -> Result<MirrorReport, DinoError> {
    let source = &layout.source_root;
    if !source.is_dir() {
        return Err(DinoError::SourceRootMissing(source.clone()));
    }

    let mut report = MirrorReport::default();
    ensure_dir(&layout.output_root, &mut report).map_err(|e| DinoError::OutputRoot {
        path: layout.output_root.clone(),
        source: e,
    })?;

    let entries = std::fs::read_dir(source).map_err(|e| DinoError::SourceRootUnreadable {
        path: source.clone(),
        source: e,
    })?;

    for entry in entries.flatten() {
        if !is_visible_dir(&entry) || entry.path() == layout.output_root {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let target = layout.output_root.join(layout.rename_top_level(&name));
        mirror_subtree(&entry.path(), &target, &layout.output_root, &mut report);
    }

    Ok(report)
}

/// `output_root` 出现在源目录中时跳过，否则新建的目录会被继续镜像
fn mirror_subtree(source: &Path, target: &Path, output_root: &Path, report: &mut MirrorReport) {
    if let Err(e) = ensure_dir(target, report) {
        tracing::error!("创建目录 {} 失败，跳过该子树：{e}", target.display());
        report.failed.push((target.to_path_buf(), e.to_string()));
        return;
    }

    let entries = match std::fs::read_dir(source) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!("读取目录 {} 失败，跳过该子树：{e}", source.display());
            report.failed.push((source.to_path_buf(), e.to_string()));
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if is_visible_dir(&entry) && path != output_root {
            mirror_subtree(&path, &target.join(entry.file_name()), output_root, report);
        }
    }
}

fn ensure_dir(path: &Path, report: &mut MirrorReport) -> std::io::Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(path)?;
    tracing::debug!("已创建目录 {}", path.display());
    report.created.push(path.to_path_buf());
    Ok(())
}

fn is_visible_dir(entry: &std::fs::DirEntry) -> bool {
    let hidden = entry.file_name().to_string_lossy().starts_with('.');
    !hidden && entry.file_type().is_ok_and(|t| t.is_dir())
}
