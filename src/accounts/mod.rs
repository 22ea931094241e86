//! 服务账号模块
//!
//! 负责发现服务账号凭证并提供有界的轮换策略：
//! - 随机起点，分散不同任务之间的配额
//! - 之后顺序轮换，每个操作最多把每个凭证试一遍

mod pool;

pub use pool::{CredentialPool, RotationCursor};

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::warn;

/// 服务账号错误
#[derive(Debug, Error)]
pub enum AccountError {
    /// 目录中没有凭证文件
    #[error("no service account files found in {0:?}")]
    Empty(PathBuf),
    /// 读取目录失败
    #[error("failed to read service account dir {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 扫描任务异常退出
    #[error("service account scan aborted: {0}")]
    Scan(String),
}

/// 进程级的凭证池持有者
///
/// 第一次使用时扫描目录，之后所有操作共享同一份只读列表
#[derive(Debug)]
pub struct AccountStore {
    dir: PathBuf,
    pool: OnceCell<Option<Arc<CredentialPool>>>,
}

impl AccountStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pool: OnceCell::new(),
        }
    }

    /// 直接使用已构建的池
    pub fn with_pool(pool: CredentialPool) -> Self {
        Self {
            dir: pool.dir().to_path_buf(),
            pool: OnceCell::new_with(Some(Some(Arc::new(pool)))),
        }
    }

    /// 凭证目录
    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    /// 获取凭证池；目录不存在或为空时返回 None
    pub async fn pool(&self) -> Option<Arc<CredentialPool>> {
        self.pool
            .get_or_init(|| async {
                match CredentialPool::discover(self.dir.clone()).await {
                    Ok(pool) => Some(Arc::new(pool)),
                    Err(e) => {
                        warn!("服务账号不可用: {}", e);
                        None
                    }
                }
            })
            .await
            .clone()
    }
}
