// Cloud Mirror Rust Library
// 云盘镜像传输核心库

// 服务账号轮换池
pub mod accounts;

// 公共模块（重试、格式化）
pub mod common;

// 配置管理模块
pub mod config;

// Google Drive REST 后端
pub mod gdrive;

// 任务监听接口
pub mod listener;

// 日志系统
pub mod logging;

// rclone 子进程传输引擎
pub mod rclone;

// 任务状态适配层
pub mod status;

// 导出常用类型
pub use accounts::{AccountStore, CredentialPool, RotationCursor};
pub use config::AppConfig;
pub use gdrive::{DriveClone, DriveDelete, DriveHelper};
pub use listener::{TaskListener, TransferRequest, UploadResult, UserContext};
pub use rclone::{RcloneHelper, RcloneTransfer};
pub use status::{MirrorStatus, StatusHandle};
