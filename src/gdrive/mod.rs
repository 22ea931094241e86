//! Google Drive REST 后端
//!
//! - `link`: 链接解析与认证模式
//! - `auth` / `client`: OAuth 令牌与 v3 REST 调用
//! - `helper`: 带重试和服务账号轮换的会话
//! - `clone` / `delete`: 面向任务的操作

pub mod auth;
pub mod client;
pub mod clone;
pub mod delete;
pub mod error;
pub mod helper;
pub mod link;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{Credential, TokenSource};
pub use client::{DriveConnector, DriveService, RestConnector};
pub use clone::{DriveClone, CLONE_CANCELLED_MESSAGE};
pub use delete::DriveDelete;
pub use error::DriveError;
pub use helper::{DriveHelper, DriveSession};
pub use link::{extract_id, is_gdrive_id, AuthContext};
pub use types::{CloneOutcome, CloneStats, DriveFile, ItemFilter, FOLDER_MIME_TYPE};
