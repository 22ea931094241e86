//! 公共模块
//!
//! 提供跨模块使用的通用组件

mod format;
mod mime;
mod retry;

pub use format::{
    eta_string, percent_string, readable_file_size, readable_time, sanitize_message, UNKNOWN_ETA,
};
pub use mime::{get_mime_type, DEFAULT_MIME_TYPE};
pub use retry::{retry_with_policy, RetryPolicy};
