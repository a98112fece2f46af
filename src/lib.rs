// sshkit - SSH 会话编排
//
// 连接状态机、命令执行器和文件传输会话，底层 SSH 协议由 russh / russh-sftp 负责。

pub mod logging;
pub mod models;
pub mod services;
pub mod ssh;

#[cfg(test)]
pub(crate) mod testing;

pub use logging::init_logging;
pub use models::{CommandResult, RemoteEntry, TransferProgress, TransferResult};
pub use services::sftp::TransferSession;
pub use ssh::{AuthMethod, CommandExecutor, ErrorCategory, SshConfig, SshConnection, SshError};
