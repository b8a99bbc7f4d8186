use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// 一次构建要处理的变更集合
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSet {
    /// 全量重建
    Full,
    /// 具体变更的源文件（绝对路径，非空）
    Partial(BTreeSet<PathBuf>),
}

impl ChangeSet {
    /// 由事件路径构造增量变更集；空集合返回 `None`，不会被派发
    pub fn partial<I, P>(paths: I) -> Option<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let set: BTreeSet<PathBuf> = paths.into_iter().map(Into::into).collect();
        if set.is_empty() {
            None
        } else {
            Some(Self::Partial(set))
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full)
    }

    /// 是否包含该路径（全量构建视为包含一切）
    pub fn contains(&self, path: &Path) -> bool {
        match self {
            Self::Full => true,
            Self::Partial(set) => set.contains(path),
        }
    }

    /// 变更集中位于 `root` 之下且满足 `filter` 的路径
    pub fn paths_under<'a>(
        &'a self,
        root: &'a Path,
        filter: impl Fn(&Path) -> bool + 'a,
    ) -> impl Iterator<Item = &'a PathBuf> + 'a {
        let set = match self {
            Self::Full => None,
            Self::Partial(set) => Some(set),
        };
        set.into_iter()
            .flatten()
            .filter(move |p| p.starts_with(root) && filter(p))
    }

    pub fn len(&self) -> Option<usize> {
        match self {
            Self::Full => None,
            Self::Partial(set) => Some(set.len()),
        }
    }

    /// 用于日志与报告的简要描述
    pub fn summary(&self) -> String {
        match self {
            Self::Full => "全量".to_string(),
            Self::Partial(set) => format!("{} 个变更文件", set.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_batch_is_dropped() {
        assert_eq!(ChangeSet::partial(Vec::<PathBuf>::new()), None);
    }

    #[test]
    fn partial_deduplicates_paths() {
        let set = ChangeSet::partial(["/src/a.html", "/src/a.html", "/src/b.html"]).unwrap();
        assert_eq!(set.len(), Some(2));
        assert!(set.contains(Path::new("/src/a.html")));
        assert!(!set.contains(Path::new("/src/c.html")));
        assert!(!set.is_full());
    }

    #[test]
    fn paths_under_filters_by_root() {
        let set = ChangeSet::partial(["/src/scss/a.scss", "/src/ts/a.ts", "/src/scss/b.txt"]).unwrap();
        let scss: Vec<_> = set
            .paths_under(Path::new("/src/scss"), |p| {
                p.extension().is_some_and(|e| e == "scss")
            })
            .collect();
        assert_eq!(scss, vec![&PathBuf::from("/src/scss/a.scss")]);
        assert_eq!(ChangeSet::Full.paths_under(Path::new("/src"), |_| true).count(), 0);
    }
}
