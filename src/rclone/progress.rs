// rclone `-P` 进度输出解析

use parking_lot::RwLock;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, warn};

use crate::common::UNKNOWN_ETA;

/// 连续读取失败达到该次数后放弃读取
const MAX_READ_ERRORS: usize = 16;

const PROGRESS_PATTERN: &str = r"Transferred:\s+([\d.]+\s*\w+)\s*/\s*([\d.]+\s*\w+),\s+([\d.]+%)\s*,\s+([\d.]+\s*\w+/s),\s+ETA\s+([\dwdhms]+)";

/// 一次进度快照（均为 rclone 原样输出的文本）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub transferred: String,
    pub size: String,
    pub percentage: String,
    pub speed: String,
    pub eta: String,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            transferred: "0 B".to_string(),
            size: "0 B".to_string(),
            percentage: "0%".to_string(),
            speed: "0 B/s".to_string(),
            eta: UNKNOWN_ETA.to_string(),
        }
    }
}

/// 进度行解析器
#[derive(Debug, Clone)]
pub struct ProgressParser {
    re: Regex,
}

impl ProgressParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            re: Regex::new(PROGRESS_PATTERN)?,
        })
    }

    /// 解析一行；不是进度行时返回 None
    pub fn parse(&self, line: &str) -> Option<ProgressSnapshot> {
        let caps = self.re.captures(line)?;
        let group = |i: usize| caps.get(i).map(|m| m.as_str().to_string());
        Some(ProgressSnapshot {
            transferred: group(1)?,
            size: group(2)?,
            percentage: group(3)?,
            speed: group(4)?,
            eta: group(5)?,
        })
    }
}

/// 进程运行期间持续更新的进度
#[derive(Debug, Default)]
pub struct LiveProgress {
    inner: RwLock<ProgressSnapshot>,
}

impl LiveProgress {
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.inner.read().clone()
    }

    pub fn update(&self, snapshot: ProgressSnapshot) {
        *self.inner.write() = snapshot;
    }

    pub fn reset(&self) {
        *self.inner.write() = ProgressSnapshot::default();
    }
}

/// 读取进程输出直到结束，持续更新进度
///
/// rclone 用 `\r` 刷新同一行，按 `\n` 读入后再按 `\r` 切分；非 UTF-8 字节按替换字符处理。
/// 读取失败时跳过该行继续读，保证管道持续被排空
pub async fn monitor<R>(reader: R, progress: &LiveProgress)
where
    R: AsyncRead + Unpin,
{
    let parser = match ProgressParser::new() {
        Ok(parser) => Some(parser),
        Err(e) => {
            warn!("进度解析器初始化失败: {}", e);
            None
        }
    };

    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut read_errors = 0;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                read_errors = 0;
                let Some(parser) = parser.as_ref() else {
                    continue;
                };
                let text = String::from_utf8_lossy(&buf);
                if let Some(snapshot) = text.split('\r').filter_map(|seg| parser.parse(seg)).last() {
                    progress.update(snapshot);
                }
            }
            Err(e) => {
                read_errors += 1;
                if read_errors >= MAX_READ_ERRORS {
                    warn!("进度输出连续读取失败 {} 次，停止解析: {}", read_errors, e);
                    break;
                }
                debug!("读取进度输出失败，跳过: {}", e);
            }
        }
    }
}
