// SFTP 数据模型

pub mod transfer;
pub mod types;

pub use transfer::{
    ProgressTracker, TransferDirection, TransferOperation, TransferProgress, TransferResult,
};
pub use types::{
    format_bytes, format_permissions, FileType, RemoteEntry, DEFAULT_OWNER, DEFAULT_PERMISSIONS,
};
