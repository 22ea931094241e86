use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use cloud_mirror_rust::{
    accounts::AccountStore,
    config::{AppConfig, LogConfig},
    gdrive::{DriveClone, DriveDelete, DriveHelper, RestConnector},
    listener::{TaskListener, TransferRequest, UploadResult, UserContext},
    logging,
    rclone::{RcloneHelper, RcloneTransfer},
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Parser)]
#[command(name = "cloud-mirror", version, about = "云盘镜像传输工具")]
struct Cli {
    /// 配置文件路径
    #[arg(long, global = true, default_value = "config/app.toml")]
    config: String,

    /// 发起任务的用户 ID（用于查找私有令牌和 rclone 配置）
    #[arg(long, global = true)]
    user: Option<i64>,

    /// 任务显示名称
    #[arg(long, global = true)]
    name: Option<String>,

    /// 额外排除的扩展名，逗号分隔
    #[arg(long, global = true, value_delimiter = ',')]
    exclude: Vec<String>,

    /// 附加的 rclone 参数，`key:value|flag` 格式
    #[arg(long, global = true, allow_hyphen_values = true)]
    rc_flags: Option<String>,

    /// 私有链接：使用用户自己的令牌
    #[arg(long, global = true)]
    private: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 通过 Drive API 克隆链接到目标文件夹
    Clone {
        link: String,
        dest: String,
        /// 单文件克隆后的新名称
        #[arg(long)]
        new_name: Option<String>,
    },
    /// 通过 rclone 在远端之间克隆
    RcloneClone {
        src_remote: String,
        src_path: String,
        dest: String,
        /// 源对象的 Drive ID（按 ID 克隆）
        #[arg(long)]
        drive_id: Option<String>,
        /// 源是文件夹
        #[arg(long)]
        folder: bool,
    },
    /// 删除 Drive 链接指向的对象
    Delete { link: String },
    /// 通过 rclone 从远端下载
    Download {
        remote: String,
        path: String,
        local: PathBuf,
    },
    /// 通过 rclone 上传本地文件或目录
    Upload {
        path: PathBuf,
        dest: String,
        /// 保留源文件（使用 copy 而不是 move）
        #[arg(long)]
        seed: bool,
        /// 上传到新目录（总是使用 move）
        #[arg(long)]
        new_dir: bool,
    },
}

/// 把回调写进日志的监听器
#[derive(Default)]
struct LoggingListener {
    failed: AtomicBool,
}

#[async_trait]
impl TaskListener for LoggingListener {
    async fn on_download_complete(&self) {
        info!("✓ 下载完成");
    }

    async fn on_download_error(&self, message: String) {
        self.failed.store(true, Ordering::SeqCst);
        error!("下载失败: {}", message);
    }

    async fn on_upload_complete(&self, result: UploadResult) {
        info!(
            "✓ 上传完成: {} (文件 {}，文件夹 {}，{} 字节)",
            result.destination, result.files, result.folders, result.size
        );
        if !result.link.is_empty() {
            info!("链接: {}", result.link);
        }
    }

    async fn on_upload_error(&self, message: String) {
        self.failed.store(true, Ordering::SeqCst);
        error!("上传失败: {}", message);
    }
}

/// 先单独读取日志配置，保证后续加载过程的日志可见
async fn load_log_config(path: &str) -> LogConfig {
    if let Ok(content) = tokio::fs::read_to_string(path).await {
        if let Ok(config) = toml::from_str::<toml::Value>(&content) {
            if let Some(log_table) = config.get("log") {
                if let Ok(log_config) = log_table.clone().try_into::<LogConfig>() {
                    return log_config;
                }
            }
        }
    }
    LogConfig::default()
}

/// 等待任务结束；收到 Ctrl+C 时先取消再等待清理完成
async fn supervise<F, Fut>(mut work: JoinHandle<()>, cancel: F) -> Result<()>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    tokio::select! {
        result = &mut work => result.context("任务异常退出")?,
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => {
                info!("收到 Ctrl+C，正在取消任务...");
                cancel().await;
                work.await.context("任务异常退出")?;
            }
            Err(e) => {
                warn!("无法监听 Ctrl+C: {}", e);
                work.await.context("任务异常退出")?;
            }
        },
    }
    Ok(())
}

/// 本地路径总大小
async fn local_size(path: &Path) -> Result<u64> {
    let root = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        WalkDir::new(&root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum::<u64>()
    })
    .await
    .context("统计本地大小失败")
}

/// 按命令行参数构造请求
fn build_request(cli: &Cli, user: &UserContext, link: String, dest: String, name: String) -> TransferRequest {
    let mut request = TransferRequest::new(link, dest, name)
        .with_user(user.clone())
        .with_extension_filter(&cli.exclude);
    if let Some(flags) = &cli.rc_flags {
        request = request.with_rc_flags(flags.as_str());
    }
    request
}

fn display_name(name: Option<&String>, fallback: &str) -> String {
    name.cloned().unwrap_or_else(|| {
        fallback
            .trim_end_matches('/')
            .rsplit(['/', ':'])
            .next()
            .unwrap_or(fallback)
            .to_string()
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = load_log_config(&cli.config).await;
    let _log_guard = logging::init_logging(&log_config);

    let config = AppConfig::load_or_default(&cli.config).await;
    info!("cloud-mirror v{} 启动", env!("CARGO_PKG_VERSION"));

    let accounts = Arc::new(AccountStore::new(config.accounts.accounts_dir.clone()));
    let use_sa = config.accounts.use_service_accounts;
    let user = UserContext {
        user_id: cli.user,
        private_link: cli.private,
        ..UserContext::default()
    };
    let listener = Arc::new(LoggingListener::default());

    match &cli.command {
        Command::Clone {
            link,
            dest,
            new_name,
        } => {
            let connector = RestConnector::new().context("创建 Drive 客户端失败")?;
            let helper = Arc::new(DriveHelper::new(
                Arc::new(connector),
                accounts,
                config.drive.clone(),
                use_sa,
            ));
            let name = display_name(cli.name.as_ref(), link);
            let mut request = build_request(&cli, &user, link.clone(), dest.clone(), name);
            if let Some(new_name) = new_name {
                request = request.with_new_name(new_name.as_str());
            }
            let task = Arc::new(DriveClone::new(helper, request, listener.clone()));

            let runner = Arc::clone(&task);
            let work = tokio::spawn(async move {
                runner.execute().await;
            });
            supervise(work, || async move { task.cancel_task().await }).await?;
        }
        Command::Delete { link } => {
            let connector = RestConnector::new().context("创建 Drive 客户端失败")?;
            let helper = DriveHelper::new(Arc::new(connector), accounts, config.drive.clone(), use_sa);
            let message = DriveDelete::new(Arc::new(helper))
                .delete_link(link, &user)
                .await;
            info!("{}", message);
        }
        Command::RcloneClone {
            src_remote,
            src_path,
            dest,
            drive_id,
            folder,
        } => {
            let helper = Arc::new(RcloneHelper::new(config.rclone.clone(), accounts, use_sa));
            let name = display_name(cli.name.as_ref(), src_path);
            let request = build_request(&cli, &user, src_path.clone(), dest.clone(), name);
            let task = Arc::new(RcloneTransfer::new(helper, request, listener.clone()));

            let config_path = config.rclone.config_path.clone();
            let mime_type = if *folder { "Folder" } else { "File" };
            let (src_remote, src_path, drive_id) =
                (src_remote.clone(), src_path.clone(), drive_id.clone());
            let runner = Arc::clone(&task);
            let done = listener.clone();
            let work = tokio::spawn(async move {
                let cloned = runner
                    .clone_remote(
                        &config_path,
                        &src_remote,
                        &src_path,
                        mime_type,
                        drive_id.as_deref(),
                    )
                    .await;
                if let Some((link, destination)) = cloned {
                    done.on_upload_complete(UploadResult {
                        link,
                        size: 0,
                        files: 0,
                        folders: 0,
                        mime_type: mime_type.to_string(),
                        destination,
                    })
                    .await;
                }
            });
            supervise(work, || async move { task.cancel_task().await }).await?;
        }
        Command::Download {
            remote,
            path,
            local,
        } => {
            let helper = Arc::new(RcloneHelper::new(config.rclone.clone(), accounts, use_sa));
            let name = display_name(cli.name.as_ref(), path);
            let request = build_request(&cli, &user, path.clone(), String::new(), name);
            let task = Arc::new(RcloneTransfer::new(helper, request, listener.clone()));

            let config_path = config.rclone.config_path.clone();
            let (remote, local) = (remote.clone(), local.clone());
            let runner = Arc::clone(&task);
            let work = tokio::spawn(async move {
                runner.download(&remote, &config_path, &local).await;
            });
            supervise(work, || async move { task.cancel_task().await }).await?;
        }
        Command::Upload {
            path,
            dest,
            seed,
            new_dir,
        } => {
            let size = local_size(path).await?;
            let helper = Arc::new(RcloneHelper::new(config.rclone.clone(), accounts, use_sa));
            let name = display_name(cli.name.as_ref(), &path.to_string_lossy());
            let request = build_request(&cli, &user, path.display().to_string(), dest.clone(), name)
                .with_seed(*seed)
                .with_new_dir(*new_dir);
            let task = Arc::new(RcloneTransfer::new(helper, request, listener.clone()));

            let path = path.clone();
            let runner = Arc::clone(&task);
            let work = tokio::spawn(async move {
                runner.upload(&path, size).await;
            });
            supervise(work, || async move { task.cancel_task().await }).await?;
        }
    }

    if listener.failed.load(Ordering::SeqCst) {
        anyhow::bail!("任务失败");
    }
    Ok(())
}
