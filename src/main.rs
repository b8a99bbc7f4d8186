use clap::{Parser, Subcommand};
use dinoserve::{build, check, config, dev, init};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "dinoserve", about = "本地开发构建器与热重载服务器", version = long_version())]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// 执行一次全量构建
    Build {
        /// 项目根目录（默认当前目录）
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// 源目录（覆盖 dino.toml）
        #[arg(long)]
        source: Option<String>,

        /// 输出目录（覆盖 dino.toml）
        #[arg(long)]
        output: Option<String>,

        /// 构建前清除输出目录
        #[arg(long)]
        clean: bool,

        /// 以 JSON 输出构建报告
        #[arg(long)]
        json: bool,
    },

    /// 构建并启动开发服务器，监听变更自动重建
    Dev {
        /// 项目根目录（默认当前目录）
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// 源目录（覆盖 dino.toml）
        #[arg(long)]
        source: Option<String>,

        /// 输出目录（覆盖 dino.toml）
        #[arg(long)]
        output: Option<String>,

        /// 监听地址
        #[arg(long)]
        host: Option<String>,

        /// 起始端口，被占用时依次尝试后续端口
        #[arg(long)]
        port: Option<u16>,

        /// 启动前清除输出目录
        #[arg(long)]
        clean: bool,
    },

    /// 检查项目完整性
    Check {
        /// 项目根目录（默认当前目录）
        #[arg(short, long, default_value = ".")]
        root: PathBuf,
    },

    /// 创建项目骨架
    Init {
        /// 项目根目录（默认当前目录）
        #[arg(short, long, default_value = ".")]
        root: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // None 等同于 Dev { root: "." }
    let command = cli.command.unwrap_or(Commands::Dev {
        root: PathBuf::from("."),
        source: None,
        output: None,
        host: None,
        port: None,
        clean: false,
    });

    // 使用配置中的日志级别作为默认值
    let default_level = match &command {
        Commands::Build { root, .. }
        | Commands::Dev { root, .. }
        | Commands::Check { root, .. }
        | Commands::Init { root } => {
            config::DinoConfig::load(&root.canonicalize().unwrap_or_else(|_| root.clone()))
                .ok()
                .map(|c| c.server.log_level.clone())
        }
    };

    let default_level = default_level.as_deref().unwrap_or("info");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    match command {
        Commands::Build {
            root,
            source,
            output,
            clean,
            json,
        } => {
            let root = root.canonicalize()?;
            let config = load_config(&root, source, output)?;
            let report = build::run(&root, &config, clean)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            if !report.is_success() {
                anyhow::bail!("构建存在失败阶段：{} 个", report.failed_stages().len());
            }
        }
        Commands::Dev {
            root,
            source,
            output,
            host,
            port,
            clean,
        } => {
            let root = root.canonicalize()?;
            let mut config = load_config(&root, source, output)?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(dev::run(root, config, clean))?;
        }
        Commands::Check { root } => {
            let root = root.canonicalize()?;
            let result = check::run(&root)?;

            for w in &result.warnings {
                tracing::warn!("{w}");
            }
            for e in &result.errors {
                tracing::error!("{e}");
            }

            if result.errors.is_empty() {
                tracing::info!("检查通过（{} 个警告）", result.warnings.len());
            } else {
                anyhow::bail!(
                    "检查未通过：{} 个错误，{} 个警告",
                    result.errors.len(),
                    result.warnings.len()
                );
            }
        }
        Commands::Init { root } => {
            std::fs::create_dir_all(&root)?;
            let root = root.canonicalize()?;
            if init::ensure_initialized(&root)? {
                tracing::info!("已初始化项目：{}", root.display());
            } else {
                tracing::info!("{} 已存在，跳过初始化", config::CONFIG_FILE);
            }
        }
    }

    Ok(())
}

/// 读取配置并应用命令行覆盖
fn load_config(
    root: &Path,
    source: Option<String>,
    output: Option<String>,
) -> anyhow::Result<config::DinoConfig> {
    let mut config = config::DinoConfig::load(root)?;
    if let Some(source) = source {
        config.paths.source = source;
    }
    if let Some(output) = output {
        config.paths.output = output;
    }
    config.validate()?;
    Ok(config)
}

const fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        "\ncommit:  ",
        env!("DINO_GIT_COMMIT"),
        "\nbuild:   ",
        env!("DINO_BUILD_TIME"),
        "\ntarget:  ",
        env!("DINO_BUILD_TARGET"),
        "\nprofile: ",
        env!("DINO_BUILD_PROFILE"),
    )
}
