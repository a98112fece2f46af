// SSH 错误类型定义
//
// 封闭的错误分类：每种错误属于且仅属于一个类别，并带有可恢复标记和处理建议。
// 所有底层传输错误（russh / russh-sftp / io）都在编排边界被包装成这里的某个类型。

use std::fmt;

use russh_sftp::protocol::StatusCode;
use thiserror::Error;

/// 错误类别（用于粗粒度分派，无需检查具体错误类型）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Connection,
    Authentication,
    Protocol,
    Session,
    Command,
    FileTransfer,
    Configuration,
    System,
}

impl ErrorCategory {
    /// 类别名称
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Authentication => "authentication",
            Self::Protocol => "protocol",
            Self::Session => "session",
            Self::Command => "command",
            Self::FileTransfer => "file_transfer",
            Self::Configuration => "configuration",
            Self::System => "system",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SSH 错误类型
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SshError {
    // ---- 连接 ----
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection timeout: {0}")]
    ConnectionTimeout(String),

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    // ---- 认证 ----
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Authentication timeout: {0}")]
    AuthenticationTimeout(String),

    #[error("Private key not found: {0}")]
    KeyNotFound(String),

    #[error("Invalid private key: {0}")]
    KeyInvalid(String),

    #[error("Invalid passphrase: {0}")]
    InvalidPassphrase(String),

    // ---- 协议 ----
    #[error("SSH protocol error: {0}")]
    ProtocolError(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    // ---- 会话 ----
    #[error("Session not established: {0}")]
    SessionNotEstablished(String),

    #[error("Session closed: {0}")]
    SessionClosed(String),

    #[error("Channel creation failed: {0}")]
    ChannelCreationFailed(String),

    #[error("Channel operation failed: {0}")]
    ChannelOperationFailed(String),

    // ---- 命令 ----
    #[error("Command execution failed: {0}")]
    CommandExecutionFailed(String),

    #[error("Command timeout: {0}")]
    CommandTimeout(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    // ---- 文件传输 ----
    #[error("SFTP initialization failed: {0}")]
    SftpInitFailed(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Directory operation failed: {0}")]
    DirectoryOperationFailed(String),

    // ---- 配置 ----
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    // ---- 系统 ----
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl SshError {
    /// 所属类别
    pub fn category(&self) -> ErrorCategory {
        use SshError::*;
        match self {
            ConnectionFailed(_) | ConnectionTimeout(_) | NotConnected(_) | ConnectionLost(_) => {
                ErrorCategory::Connection
            }
            AuthenticationFailed(_)
            | AuthenticationTimeout(_)
            | KeyNotFound(_)
            | KeyInvalid(_)
            | InvalidPassphrase(_) => ErrorCategory::Authentication,
            ProtocolError(_) | UnsupportedAlgorithm(_) | InvalidData(_) => ErrorCategory::Protocol,
            SessionNotEstablished(_)
            | SessionClosed(_)
            | ChannelCreationFailed(_)
            | ChannelOperationFailed(_) => ErrorCategory::Session,
            CommandExecutionFailed(_) | CommandTimeout(_) | InvalidCommand(_) => {
                ErrorCategory::Command
            }
            SftpInitFailed(_)
            | FileNotFound(_)
            | AccessDenied(_)
            | TransferFailed(_)
            | DirectoryOperationFailed(_) => ErrorCategory::FileTransfer,
            InvalidConfiguration(_) | MissingParameter(_) => ErrorCategory::Configuration,
            OutOfMemory(_) | NetworkUnreachable(_) | Unknown(_) => ErrorCategory::System,
        }
    }

    /// 是否可通过重试恢复
    ///
    /// 超时、瞬时网络错误和传输错误可恢复；认证、配置和协议错误不可恢复。
    pub fn is_recoverable(&self) -> bool {
        use SshError::*;
        matches!(
            self,
            ConnectionFailed(_)
                | ConnectionTimeout(_)
                | ConnectionLost(_)
                | AuthenticationTimeout(_)
                | ChannelOperationFailed(_)
                | CommandTimeout(_)
                | TransferFailed(_)
                | NetworkUnreachable(_)
        )
    }

    /// 稳定的错误代码
    pub fn code(&self) -> &'static str {
        use SshError::*;
        match self {
            ConnectionFailed(_) => "CONNECTION_FAILED",
            ConnectionTimeout(_) => "CONNECTION_TIMEOUT",
            NotConnected(_) => "NOT_CONNECTED",
            ConnectionLost(_) => "CONNECTION_LOST",
            AuthenticationFailed(_) => "AUTHENTICATION_FAILED",
            AuthenticationTimeout(_) => "AUTHENTICATION_TIMEOUT",
            KeyNotFound(_) => "KEY_NOT_FOUND",
            KeyInvalid(_) => "KEY_INVALID",
            InvalidPassphrase(_) => "INVALID_PASSPHRASE",
            ProtocolError(_) => "PROTOCOL_ERROR",
            UnsupportedAlgorithm(_) => "UNSUPPORTED_ALGORITHM",
            InvalidData(_) => "INVALID_DATA",
            SessionNotEstablished(_) => "SESSION_NOT_ESTABLISHED",
            SessionClosed(_) => "SESSION_CLOSED",
            ChannelCreationFailed(_) => "CHANNEL_CREATION_FAILED",
            ChannelOperationFailed(_) => "CHANNEL_OPERATION_FAILED",
            CommandExecutionFailed(_) => "COMMAND_EXECUTION_FAILED",
            CommandTimeout(_) => "COMMAND_TIMEOUT",
            InvalidCommand(_) => "INVALID_COMMAND",
            SftpInitFailed(_) => "SFTP_INIT_FAILED",
            FileNotFound(_) => "FILE_NOT_FOUND",
            AccessDenied(_) => "ACCESS_DENIED",
            TransferFailed(_) => "TRANSFER_FAILED",
            DirectoryOperationFailed(_) => "DIRECTORY_OPERATION_FAILED",
            InvalidConfiguration(_) => "INVALID_CONFIGURATION",
            MissingParameter(_) => "MISSING_PARAMETER",
            OutOfMemory(_) => "OUT_OF_MEMORY",
            NetworkUnreachable(_) => "NETWORK_UNREACHABLE",
            Unknown(_) => "UNKNOWN",
        }
    }

    /// 详细信息（不含前缀描述）
    pub fn detail(&self) -> &str {
        use SshError::*;
        match self {
            ConnectionFailed(s)
            | ConnectionTimeout(s)
            | NotConnected(s)
            | ConnectionLost(s)
            | AuthenticationFailed(s)
            | AuthenticationTimeout(s)
            | KeyNotFound(s)
            | KeyInvalid(s)
            | InvalidPassphrase(s)
            | ProtocolError(s)
            | UnsupportedAlgorithm(s)
            | InvalidData(s)
            | SessionNotEstablished(s)
            | SessionClosed(s)
            | ChannelCreationFailed(s)
            | ChannelOperationFailed(s)
            | CommandExecutionFailed(s)
            | CommandTimeout(s)
            | InvalidCommand(s)
            | SftpInitFailed(s)
            | FileNotFound(s)
            | AccessDenied(s)
            | TransferFailed(s)
            | DirectoryOperationFailed(s)
            | InvalidConfiguration(s)
            | MissingParameter(s)
            | OutOfMemory(s)
            | NetworkUnreachable(s)
            | Unknown(s) => s,
        }
    }

    /// 给用户的处理建议
    pub fn suggestion(&self) -> &'static str {
        use SshError::*;
        match self {
            ConnectionFailed(_) => "Check that the host is reachable and the SSH server is running.",
            ConnectionTimeout(_) => "Check the network or increase the connection timeout.",
            NotConnected(_) => "Connect and authenticate before using this operation.",
            ConnectionLost(_) => "Reconnect to the server and retry the operation.",
            AuthenticationFailed(_) => "Verify the username and credentials.",
            AuthenticationTimeout(_) => "Retry authentication; the server may be slow to respond.",
            KeyNotFound(_) => "Check the private key path.",
            KeyInvalid(_) => "Use a private key in a format the server accepts (OpenSSH, PEM).",
            InvalidPassphrase(_) => "Check the passphrase for the private key.",
            ProtocolError(_) => "Check that the server speaks SSH protocol 2.0.",
            UnsupportedAlgorithm(_) => "Enable a key exchange, cipher or MAC algorithm supported by both sides.",
            InvalidData(_) => "The server sent unexpected data; retry or inspect the server logs.",
            SessionNotEstablished(_) => "Authenticate the connection and start the session first.",
            SessionClosed(_) => "Start a new session.",
            ChannelCreationFailed(_) => "Check the server's channel limits (MaxSessions) and retry.",
            ChannelOperationFailed(_) => "Retry the operation on a new channel.",
            CommandExecutionFailed(_) => "Check the command and its output on stderr.",
            CommandTimeout(_) => "Increase the data timeout or make the command finish sooner.",
            InvalidCommand(_) => "Provide a non-empty command.",
            SftpInitFailed(_) => "Make sure the SFTP subsystem is enabled in sshd_config.",
            FileNotFound(_) => "Check that the path exists.",
            AccessDenied(_) => "Check the file permissions for this user.",
            TransferFailed(_) => "Retry the transfer.",
            DirectoryOperationFailed(_) => "Check that the directory exists, is empty when removing, and is writable.",
            InvalidConfiguration(_) => "Fix the configuration value named in the message.",
            MissingParameter(_) => "Provide the missing parameter.",
            OutOfMemory(_) => "Free memory or transfer smaller files.",
            NetworkUnreachable(_) => "Check the local network connection and routing.",
            Unknown(_) => "Retry the operation; inspect the logs if the problem persists.",
        }
    }
}

/// russh 错误映射
impl From<russh::Error> for SshError {
    fn from(e: russh::Error) -> Self {
        match e {
            russh::Error::ConnectionTimeout => SshError::ConnectionTimeout(e.to_string()),
            russh::Error::InactivityTimeout | russh::Error::KeepaliveTimeout => {
                SshError::ConnectionLost(e.to_string())
            }
            russh::Error::Disconnect => SshError::ConnectionLost(e.to_string()),
            russh::Error::UnknownKey => {
                SshError::ProtocolError(format!("server host key rejected: {}", e))
            }
            russh::Error::IO(io) => SshError::from(io),
            other => SshError::ProtocolError(other.to_string()),
        }
    }
}

impl From<russh::keys::Error> for SshError {
    fn from(e: russh::keys::Error) -> Self {
        let message = e.to_string();
        let lower = message.to_lowercase();
        // 口令缺失或错误与密钥格式错误共用同一个错误类型
        if lower.contains("passphrase") || lower.contains("decrypt") || lower.contains("encrypted") {
            SshError::InvalidPassphrase(message)
        } else {
            SshError::KeyInvalid(message)
        }
    }
}

/// russh-sftp 错误映射
impl From<russh_sftp::client::error::Error> for SshError {
    fn from(e: russh_sftp::client::error::Error) -> Self {
        use russh_sftp::client::error::Error as SftpError;
        match e {
            SftpError::Status(status) => match status.status_code {
                StatusCode::NoSuchFile => SshError::FileNotFound(status.error_message),
                StatusCode::PermissionDenied => SshError::AccessDenied(status.error_message),
                StatusCode::NoConnection | StatusCode::ConnectionLost => {
                    SshError::ConnectionLost(status.error_message)
                }
                StatusCode::OpUnsupported => SshError::UnsupportedAlgorithm(format!(
                    "operation not supported by server: {}",
                    status.error_message
                )),
                StatusCode::BadMessage => SshError::InvalidData(status.error_message),
                _ => SshError::TransferFailed(status.error_message),
            },
            SftpError::Timeout => SshError::ConnectionTimeout("SFTP request timed out".to_string()),
            other => SshError::TransferFailed(other.to_string()),
        }
    }
}

/// IO 错误映射
impl From<std::io::Error> for SshError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::NotFound => SshError::FileNotFound(e.to_string()),
            ErrorKind::PermissionDenied => SshError::AccessDenied(e.to_string()),
            ErrorKind::TimedOut => SshError::ConnectionTimeout(e.to_string()),
            ErrorKind::ConnectionRefused => SshError::ConnectionFailed(e.to_string()),
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => SshError::ConnectionLost(e.to_string()),
            ErrorKind::AddrNotAvailable => SshError::NetworkUnreachable(e.to_string()),
            ErrorKind::OutOfMemory => SshError::OutOfMemory(e.to_string()),
            ErrorKind::InvalidData => SshError::InvalidData(e.to_string()),
            _ => SshError::Unknown(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_mapping() {
        assert_eq!(
            SshError::ConnectionTimeout("x".into()).category(),
            ErrorCategory::Connection
        );
        assert_eq!(
            SshError::KeyNotFound("x".into()).category(),
            ErrorCategory::Authentication
        );
        assert_eq!(
            SshError::UnsupportedAlgorithm("x".into()).category(),
            ErrorCategory::Protocol
        );
        assert_eq!(
            SshError::SessionNotEstablished("x".into()).category(),
            ErrorCategory::Session
        );
        assert_eq!(
            SshError::InvalidCommand("x".into()).category(),
            ErrorCategory::Command
        );
        assert_eq!(
            SshError::DirectoryOperationFailed("x".into()).category(),
            ErrorCategory::FileTransfer
        );
        assert_eq!(
            SshError::MissingParameter("x".into()).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(SshError::Unknown("x".into()).category(), ErrorCategory::System);
    }

    #[test]
    fn test_recoverable_flags() {
        assert!(SshError::ConnectionTimeout("t".into()).is_recoverable());
        assert!(SshError::CommandTimeout("t".into()).is_recoverable());
        assert!(SshError::TransferFailed("t".into()).is_recoverable());
        assert!(SshError::NetworkUnreachable("t".into()).is_recoverable());

        assert!(!SshError::AuthenticationFailed("a".into()).is_recoverable());
        assert!(!SshError::InvalidConfiguration("c".into()).is_recoverable());
        assert!(!SshError::ProtocolError("p".into()).is_recoverable());
    }

    #[test]
    fn test_display_and_detail() {
        let err = SshError::FileNotFound("/tmp/missing".into());
        assert_eq!(err.to_string(), "File not found: /tmp/missing");
        assert_eq!(err.detail(), "/tmp/missing");
        assert_eq!(err.code(), "FILE_NOT_FOUND");
        assert!(!err.suggestion().is_empty());
    }

    #[test]
    fn test_io_error_mapping() {
        let not_found = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(SshError::from(not_found), SshError::FileNotFound(_)));

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no");
        assert!(matches!(SshError::from(denied), SshError::AccessDenied(_)));

        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(SshError::from(refused).category(), ErrorCategory::Connection);
    }
}
