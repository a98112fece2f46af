// SFTP 后端服务

pub mod path;
mod service;
mod session;

pub use service::RusshSftp;
pub use session::{ProgressCallback, TransferSession, DEFAULT_CHUNK_SIZE};
