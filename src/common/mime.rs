// 本地文件 MIME 类型识别

use std::path::{Path, PathBuf};
use tracing::debug;

/// 无法识别时的类型
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// 识别本地文件的 MIME 类型
///
/// 先按文件头魔数判断，识别不出再按扩展名猜测
pub async fn get_mime_type(path: &Path) -> String {
    let path: PathBuf = path.to_path_buf();
    match tokio::task::spawn_blocking(move || detect(&path)).await {
        Ok(mime) => mime,
        Err(e) => {
            debug!("识别文件类型失败: {}", e);
            DEFAULT_MIME_TYPE.to_string()
        }
    }
}

fn detect(path: &Path) -> String {
    if let Some(kind) = infer::get_from_path(path).ok().flatten() {
        return kind.mime_type().to_string();
    }
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
