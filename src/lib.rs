//! 本地开发构建器：把源目录镜像到输出目录，按阶段编译 HTML/脚本/样式/资源，
//! 并提供静态文件服务与 WebSocket 热重载。

pub mod build;
pub mod check;
pub mod config;
pub mod dev;
pub mod error;
pub mod init;
pub mod server;
pub mod watch;

pub use build::changeset::ChangeSet;
pub use build::pipeline::{BuildRunner, Builder};
pub use build::report::{BuildReport, FileStatus, StageOutcome, StageResult};
pub use config::{DinoConfig, Layout};
pub use error::{DinoError, StageError};
