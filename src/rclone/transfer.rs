// rclone 传输任务
//
// 一个任务对应一个请求：下载、上传或克隆，运行期间可被 `cancel_task` 终止

use parking_lot::Mutex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::command::{link_args, lsjson_args, Method, RcloneCommand};
use super::config::{remote_options, sa_section, RemoteProfile};
use super::progress::{monitor, LiveProgress, ProgressSnapshot};
use super::RcloneHelper;
use crate::accounts::RotationCursor;
use crate::common::get_mime_type;
use crate::gdrive::types::{file_url, folder_url};
use crate::listener::{TaskListener, TransferRequest, UploadResult};

/// 被 SIGKILL 终止的退出码（取消时由我们发出）
pub const KILLED_EXIT_CODE: i32 = -9;

const SA_ACCESS_MESSAGE: &str = "Mostly your service accounts don't have access to this drive!";
const RATE_LIMIT_MARKER: &str = "RATE_LIMIT_EXCEEDED";
const FOLDER: &str = "Folder";

/// 当前进行中的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Download,
    Upload,
    Clone,
}

#[derive(Debug)]
struct ProcessOutput {
    code: i32,
    stdout: String,
    stderr: String,
}

impl ProcessOutput {
    fn spawn_failed(err: std::io::Error) -> Self {
        Self {
            code: -1,
            stdout: String::new(),
            stderr: err.to_string(),
        }
    }
}

/// 进程运行结果（已处理轮换）
enum RunOutcome {
    Finished,
    Cancelled,
    /// 错误文本可能为空
    Failed(String),
}

/// 实际使用的配置和远端
struct Endpoint {
    config_path: PathBuf,
    remote: String,
    using_sa: bool,
    cursor: Option<RotationCursor>,
}

#[derive(Debug, Deserialize)]
struct LsJsonEntry {
    #[serde(rename = "Path")]
    path: String,
    #[serde(rename = "ID", default)]
    id: Option<String>,
}

/// rclone 传输任务
pub struct RcloneTransfer {
    helper: Arc<RcloneHelper>,
    request: TransferRequest,
    listener: Arc<dyn TaskListener>,
    progress: LiveProgress,
    cancel: CancellationToken,
    kind: Mutex<Option<TransferKind>>,
    started: Instant,
}

impl RcloneTransfer {
    pub fn new(
        helper: Arc<RcloneHelper>,
        request: TransferRequest,
        listener: Arc<dyn TaskListener>,
    ) -> Self {
        Self {
            helper,
            request,
            listener,
            progress: LiveProgress::default(),
            cancel: CancellationToken::new(),
            kind: Mutex::new(None),
            started: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.request.name
    }

    pub fn request(&self) -> &TransferRequest {
        &self.request
    }

    pub fn kind(&self) -> Option<TransferKind> {
        *self.kind.lock()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn set_kind(&self, kind: TransferKind) {
        *self.kind.lock() = Some(kind);
    }

    fn command(
        &self,
        config_path: &Path,
        method: Method,
        source: String,
        destinations: Vec<String>,
    ) -> RcloneCommand {
        RcloneCommand::new(
            self.helper.settings(),
            config_path,
            method,
            source,
            destinations,
            &self.request.extension_filter,
            self.request.rc_flags.as_deref(),
        )
    }

    // ========== 下载 ==========

    /// 从远端下载到本地
    pub async fn download(&self, remote: &str, config_path: &Path, local_path: &Path) {
        self.set_kind(TransferKind::Download);

        let profile = match remote_options(config_path, remote).await {
            Ok(profile) => profile,
            Err(e) => {
                error!("读取远端配置失败: {}", e);
                self.listener.on_download_error(e.to_string()).await;
                return;
            }
        };

        let mut endpoint = self.resolve_endpoint(&profile, config_path).await;
        if endpoint.cursor.is_some() {
            info!("Download with service account {}", endpoint.remote);
        }

        let mut cmd = self.command(
            &endpoint.config_path,
            Method::Copy,
            format!("{}:{}", endpoint.remote, self.request.link),
            vec![local_path.display().to_string()],
        );
        if !cmd.has_user_flags() {
            if profile.is_drive() {
                cmd.push_flags(&["--drive-acknowledge-abuse"]);
            } else {
                cmd.push_flags(&["--retries-sleep", "3s"]);
            }
        }

        match self
            .run_with_rotation(&mut cmd, &mut endpoint, RcloneCommand::set_source_remote)
            .await
        {
            RunOutcome::Cancelled => {}
            RunOutcome::Finished => self.listener.on_download_complete().await,
            RunOutcome::Failed(message) if message.is_empty() => {
                self.listener.on_download_complete().await
            }
            RunOutcome::Failed(message) => self.listener.on_download_error(message).await,
        }
    }

    // ========== 上传 ==========

    /// 上传本地文件或目录，结果通过 `on_upload_complete` 报告
    pub async fn upload(&self, local_path: &Path, size: u64) {
        self.set_kind(TransferKind::Upload);
        let settings = self.helper.settings();

        let mut rc_path = self.request.up_dest.trim_matches('/').to_string();
        let config_path = match rc_path.strip_prefix("mrcc:").map(str::to_string) {
            Some(rest) => {
                let Some(user_id) = self.request.user.user_id else {
                    self.fail_upload("User rclone config requires a user id!".to_string())
                        .await;
                    return;
                };
                rc_path = rest;
                settings.user_config_path(user_id)
            }
            None => settings.config_path.clone(),
        };

        let Some((remote, mut path)) = rc_path
            .split_once(':')
            .map(|(r, p)| (r.to_string(), p.trim_matches('/').to_string()))
        else {
            self.fail_upload(format!("Invalid rclone destination: {}", rc_path))
                .await;
            return;
        };

        let is_dir = tokio::fs::metadata(local_path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);

        let (mime_type, files, folders) = if is_dir {
            let (folders, files) = match self.count_files_and_folders(local_path).await {
                Ok(counts) => counts,
                Err(e) => {
                    self.fail_upload(format!("统计上传目录失败: {}", e)).await;
                    return;
                }
            };
            path = join_remote_path(&path, &self.request.name);
            (FOLDER.to_string(), files, folders)
        } else {
            if self.request.is_excluded(&local_path.to_string_lossy()) {
                let message = format!(
                    "This file extension is excluded by extension filter ({})!",
                    self.request.custom_extensions().join(", ")
                );
                self.fail_upload(message).await;
                return;
            }
            (get_mime_type(local_path).await, 1, 0)
        };

        let profile = match remote_options(&config_path, &remote).await {
            Ok(profile) => profile,
            Err(e) => {
                self.fail_upload(e.to_string()).await;
                return;
            }
        };

        let mut endpoint = self.resolve_endpoint(&profile, &config_path).await;
        if endpoint.cursor.is_some() {
            info!("Upload with service account {}", endpoint.remote);
        }

        let method = if !self.request.seed || self.request.new_dir {
            Method::Move
        } else {
            Method::Copy
        };
        let mut cmd = self.command(
            &endpoint.config_path,
            method,
            local_path.display().to_string(),
            vec![format!("{}:{}", endpoint.remote, path)],
        );
        if profile.is_drive() && !cmd.has_user_flags() {
            cmd.push_flags(&[
                "--drive-chunk-size",
                "128M",
                "--drive-upload-cutoff",
                "128M",
            ]);
        }

        match self
            .run_with_rotation(&mut cmd, &mut endpoint, RcloneCommand::set_destination_remote)
            .await
        {
            RunOutcome::Cancelled => return,
            RunOutcome::Failed(message) if !message.is_empty() => {
                self.listener.on_upload_error(message).await;
                return;
            }
            RunOutcome::Finished | RunOutcome::Failed(_) => {}
        }

        let (link, destination) = if profile.is_drive() {
            self.get_gdrive_link(&config_path, &remote, &path, &mime_type)
                .await
        } else {
            let name = &self.request.name;
            let destination = if mime_type == FOLDER {
                format!("{}:{}", remote, path)
            } else if !path.is_empty() {
                format!("{}:{}/{}", remote, path, name)
            } else {
                format!("{}:{}", remote, name)
            };
            let link = self.share_link(&config_path, &destination).await;
            (link, destination)
        };

        if self.is_cancelled() {
            return;
        }

        info!("Upload Done. Path: {}", destination);
        self.listener
            .on_upload_complete(UploadResult {
                link,
                size,
                files,
                folders,
                mime_type,
                destination,
            })
            .await;
    }

    // ========== 克隆 ==========

    /// 远端之间克隆，返回 `(链接, 目标路径)`
    ///
    /// 带 `drive_id` 时按 ID 克隆到 Drive 远端；失败或取消返回 None
    pub async fn clone_remote(
        &self,
        config_path: &Path,
        src_remote: &str,
        src_path: &str,
        mime_type: &str,
        drive_id: Option<&str>,
    ) -> Option<(String, String)> {
        self.set_kind(TransferKind::Clone);
        let name = self.request.name.clone();
        let is_folder = mime_type == FOLDER;

        let mut destination = self.request.up_dest.clone();
        let Some((dst_remote, dst_path)) = destination
            .split_once(':')
            .map(|(r, p)| (r.to_string(), p.to_string()))
        else {
            self.fail_upload(format!("Invalid rclone destination: {}", destination))
                .await;
            return None;
        };

        let (mut cmd, src_type, dst_type, dst_path) = if let Some(id) = drive_id {
            let dst = match remote_options(config_path, &dst_remote).await {
                Ok(profile) => profile,
                Err(e) => {
                    self.fail_upload(e.to_string()).await;
                    return None;
                }
            };
            if !dst.is_drive() {
                self.fail_upload("Destination not supported for clone gdrive link!".to_string())
                    .await;
                return None;
            }

            if is_folder {
                destination = format!("{}/{}", destination.trim_end_matches('/'), name);
                let cmd = self.command(
                    config_path,
                    Method::Copy,
                    format!("{}:{{{}}}", dst_remote, id),
                    vec![destination.clone()],
                );
                (cmd, "drive".to_string(), dst.remote_type, join_remote_path(&dst_path, &name))
            } else {
                let cmd = self.command(
                    config_path,
                    Method::BackendCopyId,
                    format!("{}:", dst_remote),
                    vec![
                        id.to_string(),
                        format!("{}/", destination.trim_end_matches('/')),
                    ],
                );
                (cmd, "drive".to_string(), dst.remote_type, dst_path)
            }
        } else {
            let profiles = tokio::try_join!(
                remote_options(config_path, src_remote),
                remote_options(config_path, &dst_remote)
            );
            let (src, dst) = match profiles {
                Ok(profiles) => profiles,
                Err(e) => {
                    self.fail_upload(e.to_string()).await;
                    return None;
                }
            };
            let cmd = self.command(
                config_path,
                Method::Copy,
                format!("{}:{}", src_remote, src_path),
                vec![destination.clone()],
            );
            (cmd, src.remote_type, dst.remote_type, dst_path)
        };

        let dst_is_drive = dst_type == "drive";
        let rolling_sa = dst_is_drive
            && self.helper.use_service_accounts()
            && self.helper.is_default_config(config_path)
            && self.helper.accounts().pool().await.is_some();
        if rolling_sa {
            info!("Clone with service accounts");
            cmd.push_flags(&[
                "--drive-random-pick-sa",
                "--drive-rolling-sa",
                "--drive-rolling-count",
                "4",
            ]);
        }

        if !cmd.has_user_flags() {
            if src_type == "drive" && !dst_is_drive {
                cmd.push_flags(&["--drive-acknowledge-abuse"]);
            } else if src_type == "drive" {
                cmd.push_flags(&["--tpslimit", "3"]);
            }
            if src_type == dst_type {
                cmd.push_flags(&[
                    "--server-side-across-configs",
                    "--drive-server-side-across-configs",
                ]);
            }
        }

        let output = self.run_process(&cmd).await;
        if self.is_cancelled() {
            return None;
        }
        match output.code {
            0 => {}
            KILLED_EXIT_CODE => return None,
            code => {
                let message = if !output.stderr.is_empty() {
                    output.stderr
                } else if drive_id.is_some() && dst_is_drive && self.helper.use_service_accounts() {
                    SA_ACCESS_MESSAGE.to_string()
                } else {
                    format!("rclone exited with code {}", code)
                };
                self.fail_upload(message).await;
                return None;
            }
        }

        if dst_is_drive {
            let (link, destination) = self
                .get_gdrive_link(config_path, &dst_remote, &dst_path, mime_type)
                .await;
            return (!self.is_cancelled()).then_some((link, destination));
        }

        if !is_folder {
            if dst_path.is_empty() {
                destination.push_str(&name);
            } else {
                destination = format!("{}/{}", destination, name);
            }
        }

        let link = self.share_link(config_path, &destination).await;
        if self.is_cancelled() {
            return None;
        }
        Some((link, destination))
    }

    // ========== 取消 ==========

    /// 取消任务：终止进程并按当前操作报告
    pub async fn cancel_task(&self) {
        self.cancel.cancel();
        let kind = self.kind();
        match kind {
            Some(TransferKind::Download) => {
                info!("Download cancelled: {}", self.request.name);
                self.listener
                    .on_download_error("Download stopped by user!".to_string())
                    .await;
            }
            Some(TransferKind::Upload) => {
                info!("Upload cancelled: {}", self.request.name);
                self.listener
                    .on_upload_error("Upload stopped by user!".to_string())
                    .await;
            }
            _ => {
                info!("Clone cancelled: {}", self.request.name);
                self.listener
                    .on_upload_error("Clone stopped by user!".to_string())
                    .await;
            }
        }
    }

    // ========== 内部实现 ==========

    async fn fail_upload(&self, message: String) {
        error!("{}", message);
        self.listener.on_upload_error(message).await;
    }

    /// 决定是否启用服务账号：Drive 远端 + 全局开启 + 默认配置 + 有凭证池
    async fn resolve_endpoint(&self, profile: &RemoteProfile, config_path: &Path) -> Endpoint {
        let mut endpoint = Endpoint {
            config_path: config_path.to_path_buf(),
            remote: profile.name.clone(),
            using_sa: false,
            cursor: None,
        };

        if !(profile.is_drive()
            && self.helper.use_service_accounts()
            && self.helper.is_default_config(config_path))
        {
            return endpoint;
        }
        let Some(pool) = self.helper.accounts().pool().await else {
            return endpoint;
        };
        endpoint.using_sa = true;

        match self
            .helper
            .sa_configs()
            .create(&profile.name, profile, &pool)
            .await
        {
            Ok(Some(path)) => {
                let cursor = pool.cursor();
                endpoint.remote = sa_section(cursor.index());
                endpoint.config_path = path;
                endpoint.cursor = Some(cursor);
            }
            Ok(None) => debug!("远端 {} 没有共享盘或根目录 ID，不轮换服务账号", profile.name),
            Err(e) => warn!("生成服务账号配置失败: {}", e),
        }
        endpoint
    }

    /// 运行命令，遇到限流时轮换服务账号重跑
    async fn run_with_rotation(
        &self,
        cmd: &mut RcloneCommand,
        endpoint: &mut Endpoint,
        rewrite: fn(&mut RcloneCommand, &str),
    ) -> RunOutcome {
        loop {
            let output = self.run_process(cmd).await;
            if self.is_cancelled() {
                return RunOutcome::Cancelled;
            }
            match output.code {
                0 => return RunOutcome::Finished,
                KILLED_EXIT_CODE => return RunOutcome::Cancelled,
                _ => {}
            }

            let message = if output.stderr.is_empty() && endpoint.using_sa {
                SA_ACCESS_MESSAGE.to_string()
            } else {
                output.stderr
            };

            if endpoint.using_sa && message.contains(RATE_LIMIT_MARKER) {
                if let Some(cursor) = endpoint.cursor.as_mut() {
                    let (index, exhausted) = cursor.rotate();
                    if !exhausted {
                        let section = sa_section(index);
                        info!("Switching to {} remote", section);
                        rewrite(cmd, &section);
                        if self.is_cancelled() {
                            return RunOutcome::Cancelled;
                        }
                        continue;
                    }
                    info!(
                        "Reached maximum number of service accounts switching, which is {}",
                        cursor.ceiling()
                    );
                }
            }

            if !message.is_empty() {
                error!("{}", message);
            }
            return RunOutcome::Failed(message);
        }
    }

    fn spawn(&self, args: &[String]) -> std::io::Result<Child> {
        Command::new(&self.helper.settings().binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }

    /// 运行传输命令：stdout 进入进度解析，stderr 收集为错误文本
    async fn run_process(&self, cmd: &RcloneCommand) -> ProcessOutput {
        let args = cmd.args();
        debug!("rclone {}", args.join(" "));
        self.progress.reset();

        let mut child = match self.spawn(&args) {
            Ok(child) => child,
            Err(e) => return ProcessOutput::spawn_failed(e),
        };
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let progress = &self.progress;
        let watch = async move {
            if let Some(stdout) = stdout {
                monitor(stdout, progress).await;
            }
        };

        let ((), stderr, code) = tokio::join!(
            watch,
            read_lossy(stderr),
            wait_or_kill(&mut child, &self.cancel)
        );

        ProcessOutput {
            code,
            stdout: String::new(),
            stderr,
        }
    }

    /// 运行辅助命令（`lsjson`、`link`），收集 stdout
    async fn cmd_exec(&self, args: Vec<String>) -> ProcessOutput {
        debug!("rclone {}", args.join(" "));
        let mut child = match self.spawn(&args) {
            Ok(child) => child,
            Err(e) => return ProcessOutput::spawn_failed(e),
        };
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (stdout, stderr, code) = tokio::join!(
            read_lossy(stdout),
            read_lossy(stderr),
            wait_or_kill(&mut child, &self.cancel)
        );
        ProcessOutput {
            code,
            stdout,
            stderr,
        }
    }

    /// 非 Drive 远端的分享链接；失败时为空
    async fn share_link(&self, config_path: &Path, destination: &str) -> String {
        let output = self.cmd_exec(link_args(config_path, destination)).await;
        match output.code {
            0 => output.stdout,
            KILLED_EXIT_CODE => String::new(),
            _ => {
                error!(
                    "while getting link. Path: {}. Stderr: {}",
                    destination, output.stderr
                );
                String::new()
            }
        }
    }

    /// 通过 `lsjson` 查出对象 ID 并拼出 Drive 链接，返回 `(链接, 目标路径)`
    async fn get_gdrive_link(
        &self,
        config_path: &Path,
        remote: &str,
        rc_path: &str,
        mime_type: &str,
    ) -> (String, String) {
        let name = &self.request.name;
        let is_folder = mime_type == FOLDER;

        let (epath, destination) = if is_folder {
            let epath = match rc_path.trim_matches('/').rsplit_once('/') {
                Some((parent, _)) => format!("{}:{}", remote, parent),
                None => format!("{}:", remote),
            };
            (epath, format!("{}:{}", remote, rc_path))
        } else {
            let path = if rc_path.is_empty() {
                format!("{}:{}", remote, name)
            } else {
                format!("{}:{}/{}", remote, rc_path, name)
            };
            (path.clone(), path)
        };

        let output = self.cmd_exec(lsjson_args(config_path, &epath)).await;
        let mut link = String::new();
        match output.code {
            0 => match serde_json::from_str::<Vec<LsJsonEntry>>(&output.stdout) {
                Ok(entries) => {
                    match entries
                        .into_iter()
                        .find(|e| &e.path == name)
                        .and_then(|e| e.id)
                    {
                        Some(id) if is_folder => link = folder_url(&id),
                        Some(id) => link = file_url(&id),
                        None => warn!("lsjson 结果中没有 {}: {}", name, epath),
                    }
                }
                Err(e) => error!("解析 lsjson 输出失败: {}", e),
            },
            KILLED_EXIT_CODE => {}
            _ => error!(
                "While getting drive link. Path: {}. Stderr: {}",
                destination, output.stderr
            ),
        }
        (link, destination)
    }

    /// 统计目录下的 (文件夹数, 文件数)，排除命中过滤的文件
    async fn count_files_and_folders(
        &self,
        root: &Path,
    ) -> Result<(u64, u64), tokio::task::JoinError> {
        let root = root.to_path_buf();
        let request = self.request.clone();
        tokio::task::spawn_blocking(move || {
            let mut folders = 0u64;
            let mut files = 0u64;
            for entry in WalkDir::new(&root).min_depth(1).into_iter().filter_map(Result::ok) {
                if entry.file_type().is_dir() {
                    folders += 1;
                } else if !request.is_excluded(&entry.file_name().to_string_lossy()) {
                    files += 1;
                }
            }
            (folders, files)
        })
        .await
    }
}

fn join_remote_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", path.trim_end_matches('/'), name)
    }
}

async fn read_lossy<R>(reader: Option<R>) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut bytes = Vec::new();
    if let Err(e) = reader.read_to_end(&mut bytes).await {
        debug!("读取进程输出失败: {}", e);
    }
    String::from_utf8_lossy(&bytes).trim().to_string()
}

/// 等待进程结束；取消时先杀掉进程
async fn wait_or_kill(child: &mut Child, cancel: &CancellationToken) -> i32 {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = cancel.cancelled() => {
            if let Err(e) = child.start_kill() {
                debug!("终止 rclone 进程失败: {}", e);
            }
            child.wait().await
        }
    };

    match status {
        Ok(status) => exit_code(status),
        Err(e) => {
            warn!("等待 rclone 进程失败: {}", e);
            -1
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}
