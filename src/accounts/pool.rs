// 服务账号轮换池

use rand::Rng;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::AccountError;

/// 服务账号凭证池
///
/// 目录中的凭证文件按文件名排序后编号（从 0 开始），发现后不再变化
#[derive(Debug, Clone)]
pub struct CredentialPool {
    /// 凭证目录
    dir: PathBuf,
    /// 凭证文件（已排序）
    files: Vec<PathBuf>,
}

impl CredentialPool {
    /// 扫描凭证目录
    ///
    /// 目录读取在阻塞线程池中完成；只保留普通文件
    pub async fn discover(dir: impl Into<PathBuf>) -> Result<Self, AccountError> {
        let dir = dir.into();
        let scan_dir = dir.clone();

        let files = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<PathBuf>> {
            let mut files = Vec::new();
            for entry in std::fs::read_dir(&scan_dir)? {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    files.push(entry.path());
                }
            }
            files.sort();
            Ok(files)
        })
        .await
        .map_err(|e| AccountError::Scan(e.to_string()))?
        .map_err(|e| AccountError::Io {
            path: dir.clone(),
            source: e,
        })?;

        if files.is_empty() {
            return Err(AccountError::Empty(dir));
        }

        info!("发现 {} 个服务账号: {:?}", files.len(), dir);
        Ok(Self { dir, files })
    }

    /// 从已知文件列表创建（测试和外部预置用）
    pub fn from_files(dir: impl Into<PathBuf>, files: Vec<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files,
        }
    }

    /// 凭证目录
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 凭证数量（即轮换上限）
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// 按编号取凭证文件
    pub fn get(&self, index: usize) -> Option<&Path> {
        self.files.get(index).map(PathBuf::as_path)
    }

    /// 所有凭证文件
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// 随机起点的游标
    pub fn cursor(&self) -> RotationCursor {
        RotationCursor::random(self.len())
    }
}

/// 轮换游标
///
/// 每个顶层操作各持有一个，互不共享
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationCursor {
    /// 当前编号
    index: usize,
    /// 已轮换次数
    rotations: usize,
    /// 轮换上限（池大小）
    ceiling: usize,
}

impl RotationCursor {
    /// 固定起点
    pub fn new(start: usize, ceiling: usize) -> Self {
        Self {
            index: if ceiling == 0 { 0 } else { start % ceiling },
            rotations: 0,
            ceiling,
        }
    }

    /// 随机起点，分散不同任务之间的配额消耗
    pub fn random(ceiling: usize) -> Self {
        let start = if ceiling == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..ceiling)
        };
        Self::new(start, ceiling)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn rotations(&self) -> usize {
        self.rotations
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// 轮换次数是否已达上限
    pub fn is_exhausted(&self) -> bool {
        self.rotations >= self.ceiling
    }

    /// 切换到下一个凭证
    ///
    /// 返回 `(编号, 是否耗尽)`；已耗尽时保持当前编号不动
    pub fn rotate(&mut self) -> (usize, bool) {
        if self.is_exhausted() {
            return (self.index, true);
        }

        self.index = (self.index + 1) % self.ceiling;
        self.rotations += 1;
        debug!(
            "切换到第 {} 个服务账号（已轮换 {}/{}）",
            self.index, self.rotations, self.ceiling
        );
        (self.index, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    #[test]
    fn test_rotate_wraps_around() {
        let mut cursor = RotationCursor::new(2, 3);
        assert_eq!(cursor.rotate(), (0, false));
        assert_eq!(cursor.rotate(), (1, false));
        assert_eq!(cursor.rotate(), (2, false));
        assert_eq!(cursor.rotate(), (2, true));
        assert_eq!(cursor.rotations(), 3);
    }

    #[test]
    fn test_empty_pool_is_exhausted() {
        let mut cursor = RotationCursor::random(0);
        assert!(cursor.is_exhausted());
        assert_eq!(cursor.rotate(), (0, true));
    }

    proptest! {
        /// N 个凭证，连续 N+1 次限流：恰好轮换 N 次，第 N+1 次报告耗尽
        #[test]
        fn prop_rotation_is_bounded(n in 1usize..64, start in 0usize..64) {
            let mut cursor = RotationCursor::new(start, n);
            let mut rotated = 0;
            let mut terminal = false;

            for _ in 0..=n {
                let (index, exhausted) = cursor.rotate();
                prop_assert!(index < n);
                if exhausted {
                    terminal = true;
                    break;
                }
                rotated += 1;
            }

            prop_assert_eq!(rotated, n);
            prop_assert!(terminal);
            prop_assert!(cursor.rotations() <= cursor.ceiling());
        }

        #[test]
        fn prop_random_start_in_range(n in 1usize..256) {
            let cursor = RotationCursor::random(n);
            prop_assert!(cursor.index() < n);
            prop_assert_eq!(cursor.rotations(), 0);
        }
    }

    #[tokio::test]
    async fn test_discover_sorts_files() {
        let dir = TempDir::new().unwrap();
        for name in ["b.json", "a.json", "c.json"] {
            std::fs::write(dir.path().join(name), "{}").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let pool = CredentialPool::discover(dir.path()).await.unwrap();
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.get(0).unwrap().file_name().unwrap(), "a.json");
        assert_eq!(pool.get(2).unwrap().file_name().unwrap(), "c.json");
        assert!(pool.get(3).is_none());
    }

    #[tokio::test]
    async fn test_discover_empty_dir_fails() {
        let dir = TempDir::new().unwrap();
        let result = CredentialPool::discover(dir.path()).await;
        assert!(matches!(result, Err(AccountError::Empty(_))));
    }
}
