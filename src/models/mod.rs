// 数据模型模块

pub mod command;
pub mod sftp;

pub use command::CommandResult;
pub use sftp::{
    FileType, ProgressTracker, RemoteEntry, TransferDirection, TransferOperation,
    TransferProgress, TransferResult,
};
