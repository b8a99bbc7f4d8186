use std::path::PathBuf;
use thiserror::Error;

/// 构建或服务层面的致命错误
#[derive(Debug, Error)]
pub enum DinoError {
    #[error("源目录不存在：{}", .0.display())]
    SourceRootMissing(PathBuf),

    #[error("无法读取源目录 {}：{source}", path.display())]
    SourceRootUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("无法创建输出目录 {}：{source}", path.display())]
    OutputRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("从端口 {base} 起尝试 {attempts} 次均已被占用")]
    PortsExhausted { base: u16, attempts: u32 },

    #[error("绑定端口 {port} 失败：{source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("配置错误：{0}")]
    Config(String),

    #[error("文件监听失败：{0}")]
    Watch(#[from] notify::Error),
}

/// 单个文件在某个构建阶段中的失败原因
#[derive(Debug, Error)]
pub enum StageError {
    #[error("找不到 include 目标 {target}（来自 {})", from.display())]
    IncludeNotFound { target: String, from: PathBuf },

    #[error("include 形成循环：{}", chain.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(" → "))]
    IncludeCycle { chain: Vec<PathBuf> },

    #[error("include 嵌套超过 {0} 层")]
    IncludeTooDeep(usize),

    #[error("编译失败：{0}")]
    Compile(String),

    #[error("图片处理失败：{0}")]
    Image(String),

    #[error("读写 {} 失败：{source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
