// aria2 下载状态
//
// aria2 的一个任务可能衍生出后续任务（磁力链接 -> 种子内容），
// 状态始终跟随链上最新的下载，取消时整条链一起删除

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};

use super::{elapsed_string, MirrorStatus, StatusHandle, TaskHandle};
use crate::common::{eta_string, percent_string, readable_file_size, readable_time, UNKNOWN_ETA};
use crate::listener::TaskListener;

/// 跟随链的最大长度
const MAX_FOLLOW_DEPTH: usize = 8;

/// aria2 RPC 错误
#[derive(Debug, Error)]
pub enum Aria2Error {
    #[error("aria2 rpc failed: {0}")]
    Rpc(String),
    #[error("GID {0} is not found")]
    NotFound(String),
}

/// 一次 `tellStatus` 的快照
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aria2Download {
    pub gid: String,
    pub name: String,
    pub total_length: u64,
    pub completed_length: u64,
    pub upload_length: u64,
    pub download_speed: u64,
    pub upload_speed: u64,
    pub is_waiting: bool,
    pub is_paused: bool,
    /// 已完成并在做种
    pub seeder: bool,
    /// 由该任务衍生出的后续任务
    pub followed_by: Vec<String>,
    pub num_seeders: u32,
    pub connections: u32,
}

impl Aria2Download {
    pub fn progress_string(&self) -> String {
        percent_string(self.completed_length as f64, self.total_length as f64)
    }

    pub fn eta_string(&self) -> String {
        let remaining = self.total_length.saturating_sub(self.completed_length);
        eta_string(remaining as f64, self.download_speed as f64)
    }

    /// 分享率（保留三位小数）
    pub fn ratio(&self) -> String {
        if self.completed_length == 0 {
            return "0".to_string();
        }
        let ratio = self.upload_length as f64 / self.completed_length as f64;
        format!("{}", (ratio * 1000.0).round() / 1000.0)
    }
}

/// aria2 RPC 客户端
#[async_trait]
pub trait Aria2Rpc: Send + Sync {
    async fn get_download(&self, gid: &str) -> Result<Aria2Download, Aria2Error>;
    /// 删除任务；`files` 为 true 时同时删除已下载的文件
    async fn remove(&self, gids: &[String], force: bool, files: bool) -> Result<(), Aria2Error>;
}

#[derive(Debug, Default)]
struct Tracked {
    gid: String,
    download: Option<Aria2Download>,
    /// 跟随链上出现过的所有 gid（含初始 gid）
    chain: Vec<String>,
}

/// aria2 下载状态
pub struct Aria2Status {
    rpc: Arc<dyn Aria2Rpc>,
    listener: Arc<dyn TaskListener>,
    tracked: Mutex<Tracked>,
    queued: bool,
    seeding: bool,
    started: Instant,
    seeding_started: Mutex<Option<Instant>>,
}

impl Aria2Status {
    pub fn new(
        rpc: Arc<dyn Aria2Rpc>,
        listener: Arc<dyn TaskListener>,
        gid: impl Into<String>,
        seeding: bool,
        queued: bool,
    ) -> Self {
        let gid = gid.into();
        Self {
            rpc,
            listener,
            tracked: Mutex::new(Tracked {
                chain: vec![gid.clone()],
                gid,
                download: None,
            }),
            queued,
            seeding,
            started: Instant::now(),
            seeding_started: Mutex::new(None),
        }
    }

    /// 标记开始做种，用于计算做种时长
    pub fn start_seeding(&self) {
        *self.seeding_started.lock() = Some(Instant::now());
    }

    /// 重新获取快照，并沿跟随链切换到最新的下载
    async fn update(&self) -> Option<Aria2Download> {
        let gid = self.tracked.lock().gid.clone();

        let mut current = match self.rpc.get_download(&gid).await {
            Ok(download) => Some(download),
            Err(e) => {
                error!("{}: Aria2c, Error while getting torrent info", e);
                self.tracked.lock().download.clone()
            }
        };
        let mut current_gid = gid;
        let mut seen = self.tracked.lock().chain.clone();

        for _ in 0..MAX_FOLLOW_DEPTH {
            let Some(next) = current
                .as_ref()
                .and_then(|d| d.followed_by.first())
                .cloned()
            else {
                break;
            };
            if next == current_gid {
                break;
            }
            match self.rpc.get_download(&next).await {
                Ok(download) => {
                    if !seen.contains(&next) {
                        seen.push(next.clone());
                    }
                    current_gid = next;
                    current = Some(download);
                }
                Err(e) => {
                    warn!("获取后续任务 {} 失败: {}", next, e);
                    break;
                }
            }
        }

        let mut tracked = self.tracked.lock();
        tracked.gid = current_gid;
        tracked.chain = seen;
        if current.is_some() {
            tracked.download = current.clone();
        }
        current
    }

    /// 每次报告前都重新获取；RPC 失败时退回上一次的快照
    async fn current(&self) -> Option<Aria2Download> {
        self.update().await
    }

    fn seeding_time(&self) -> String {
        let since = self.seeding_started.lock().unwrap_or(self.started);
        readable_time(since.elapsed().as_secs_f64())
    }

    async fn remove(&self, gids: Vec<String>) {
        if let Err(e) = self.rpc.remove(&gids, true, true).await {
            error!("删除 aria2 任务失败 {:?}: {}", gids, e);
        }
    }
}

#[async_trait]
impl StatusHandle for Aria2Status {
    fn engine(&self) -> &'static str {
        "Aria2"
    }

    fn elapsed(&self) -> String {
        elapsed_string(self.started.elapsed())
    }

    async fn name(&self) -> String {
        self.current().await.map(|d| d.name).unwrap_or_default()
    }

    async fn progress(&self) -> String {
        self.current()
            .await
            .map(|d| d.progress_string())
            .unwrap_or_else(|| "0%".to_string())
    }

    async fn processed_bytes(&self) -> String {
        let completed = self.current().await.map(|d| d.completed_length).unwrap_or(0);
        readable_file_size(completed as f64)
    }

    async fn size(&self) -> String {
        let total = self.current().await.map(|d| d.total_length).unwrap_or(0);
        readable_file_size(total as f64)
    }

    async fn speed(&self) -> String {
        let speed = self.current().await.map(|d| d.download_speed).unwrap_or(0);
        format!("{}/s", readable_file_size(speed as f64))
    }

    async fn eta(&self) -> String {
        self.current()
            .await
            .map(|d| d.eta_string())
            .unwrap_or_else(|| UNKNOWN_ETA.to_string())
    }

    async fn status(&self) -> MirrorStatus {
        let download = self.update().await.unwrap_or_default();
        if download.is_waiting || self.queued {
            if self.seeding {
                MirrorStatus::QueuedUpload
            } else {
                MirrorStatus::QueuedDownload
            }
        } else if download.is_paused {
            MirrorStatus::Paused
        } else if download.seeder && self.seeding {
            MirrorStatus::Seeding
        } else {
            MirrorStatus::Downloading
        }
    }

    async fn gid(&self) -> String {
        self.update().await;
        self.tracked.lock().gid.clone()
    }

    fn task(&self) -> TaskHandle {
        TaskHandle::Aria2(self.tracked.lock().gid.clone())
    }

    async fn cancel_task(&self) {
        let download = self.update().await.unwrap_or_default();
        let (gid, chain) = {
            let tracked = self.tracked.lock();
            (tracked.gid.clone(), tracked.chain.clone())
        };

        if download.seeder && self.seeding {
            info!("Cancelling Seed: {}", download.name);
            let message = format!(
                "Seeding stopped with Ratio: {} and Time: {}",
                download.ratio(),
                self.seeding_time()
            );
            futures::join!(
                self.listener.on_upload_error(message),
                self.remove(vec![gid])
            );
        } else if chain.len() > 1 || !download.followed_by.is_empty() {
            info!("Cancelling Download: {}", download.name);
            self.listener
                .on_download_error("Download cancelled by user!".to_string())
                .await;
            let mut gids = chain;
            for next in download.followed_by {
                if !gids.contains(&next) {
                    gids.push(next);
                }
            }
            self.remove(gids).await;
        } else {
            let message = if self.queued {
                info!("Cancelling QueueDl: {}", download.name);
                "Task have been removed from queue/download"
            } else {
                info!("Cancelling Download: {}", download.name);
                "Download stopped by user!"
            };
            futures::join!(
                self.listener.on_download_error(message.to_string()),
                self.remove(vec![gid])
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::testing::{ListenerEvent, RecordingListener};
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeAria2 {
        downloads: Mutex<HashMap<String, Aria2Download>>,
        removed: Mutex<Vec<Vec<String>>>,
        fail: Mutex<bool>,
    }

    impl FakeAria2 {
        fn put(&self, download: Aria2Download) {
            self.downloads
                .lock()
                .insert(download.gid.clone(), download);
        }
    }

    #[async_trait]
    impl Aria2Rpc for FakeAria2 {
        async fn get_download(&self, gid: &str) -> Result<Aria2Download, Aria2Error> {
            if *self.fail.lock() {
                return Err(Aria2Error::Rpc("connection refused".to_string()));
            }
            self.downloads
                .lock()
                .get(gid)
                .cloned()
                .ok_or_else(|| Aria2Error::NotFound(gid.to_string()))
        }

        async fn remove(&self, gids: &[String], force: bool, files: bool) -> Result<(), Aria2Error> {
            assert!(force && files);
            self.removed.lock().push(gids.to_vec());
            Ok(())
        }
    }

    fn download(gid: &str) -> Aria2Download {
        Aria2Download {
            gid: gid.to_string(),
            name: format!("{}.bin", gid),
            total_length: 1000,
            completed_length: 250,
            download_speed: 50,
            ..Aria2Download::default()
        }
    }

    fn status(
        rpc: &Arc<FakeAria2>,
        gid: &str,
        seeding: bool,
        queued: bool,
    ) -> (Aria2Status, Arc<RecordingListener>) {
        let listener = Arc::new(RecordingListener::default());
        let status = Aria2Status::new(rpc.clone(), listener.clone(), gid, seeding, queued);
        (status, listener)
    }

    #[tokio::test]
    async fn test_follows_chain_to_newest_download() {
        let rpc = Arc::new(FakeAria2::default());
        rpc.put(Aria2Download {
            followed_by: vec!["meta2".to_string()],
            ..download("magnet")
        });
        rpc.put(Aria2Download {
            followed_by: vec!["content".to_string()],
            ..download("meta2")
        });
        rpc.put(download("content"));

        let (status, listener) = status(&rpc, "magnet", false, false);
        assert_eq!(status.gid().await, "content");
        assert_eq!(status.name().await, "content.bin");
        assert_eq!(status.progress().await, "25.00%");
        assert_eq!(status.eta().await, "15s");

        status.cancel_task().await;
        assert_eq!(
            listener.events(),
            vec![ListenerEvent::DownloadError(
                "Download cancelled by user!".to_string()
            )]
        );
        assert_eq!(
            rpc.removed.lock().clone(),
            vec![vec![
                "magnet".to_string(),
                "meta2".to_string(),
                "content".to_string()
            ]]
        );
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let rpc = Arc::new(FakeAria2::default());
        rpc.put(Aria2Download {
            is_waiting: true,
            ..download("w")
        });
        rpc.put(Aria2Download {
            is_paused: true,
            ..download("p")
        });
        rpc.put(Aria2Download {
            seeder: true,
            ..download("s")
        });

        assert_eq!(status(&rpc, "w", false, false).0.status().await, MirrorStatus::QueuedDownload);
        assert_eq!(status(&rpc, "w", true, false).0.status().await, MirrorStatus::QueuedUpload);
        assert_eq!(status(&rpc, "p", false, false).0.status().await, MirrorStatus::Paused);
        assert_eq!(status(&rpc, "s", true, false).0.status().await, MirrorStatus::Seeding);
        assert_eq!(status(&rpc, "s", false, false).0.status().await, MirrorStatus::Downloading);
    }

    #[tokio::test]
    async fn test_cancel_queued_download() {
        let rpc = Arc::new(FakeAria2::default());
        rpc.put(download("q"));

        let (status, listener) = status(&rpc, "q", false, true);
        status.cancel_task().await;

        assert_eq!(
            listener.events(),
            vec![ListenerEvent::DownloadError(
                "Task have been removed from queue/download".to_string()
            )]
        );
        assert_eq!(rpc.removed.lock().clone(), vec![vec!["q".to_string()]]);
    }

    #[tokio::test]
    async fn test_cancel_seeding_reports_ratio() {
        let rpc = Arc::new(FakeAria2::default());
        rpc.put(Aria2Download {
            seeder: true,
            completed_length: 1000,
            upload_length: 1500,
            ..download("seed")
        });

        let (status, listener) = status(&rpc, "seed", true, false);
        status.cancel_task().await;

        match listener.events().as_slice() {
            [ListenerEvent::UploadError(message)] => {
                assert!(message.starts_with("Seeding stopped with Ratio: 1.5 and Time: "))
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_every_report_reads_live_download() {
        let rpc = Arc::new(FakeAria2::default());
        rpc.put(download("live"));

        let (status, _) = status(&rpc, "live", false, false);
        assert_eq!(status.progress().await, "25.00%");

        rpc.put(Aria2Download {
            completed_length: 750,
            download_speed: 125,
            ..download("live")
        });
        assert_eq!(status.progress().await, "75.00%");
        assert_eq!(status.speed().await, "125.00B/s");
        assert_eq!(status.eta().await, "2s");

        // 元数据下载完成后出现后续任务
        rpc.put(Aria2Download {
            followed_by: vec!["files".to_string()],
            ..download("live")
        });
        rpc.put(download("files"));
        assert_eq!(status.name().await, "files.bin");
    }

    #[tokio::test]
    async fn test_rpc_failure_keeps_last_snapshot() {
        let rpc = Arc::new(FakeAria2::default());
        rpc.put(download("g"));

        let (status, _) = status(&rpc, "g", false, false);
        assert_eq!(status.status().await, MirrorStatus::Downloading);

        *rpc.fail.lock() = true;
        assert_eq!(status.status().await, MirrorStatus::Downloading);
        assert_eq!(status.name().await, "g.bin");
        assert_eq!(status.gid().await, "g");
    }
}
