// SSH 连接模块
//
// 模块结构:
// - config: 连接配置 (SshConfig, AuthMethod)
// - error: 错误类型 (SshError, ErrorCategory)
// - event: 连接事件与日志接收器 (ConnectionEvent, LogEntry, LogSink)
// - transport: 传输层抽象 (SshTransport, TransportHandle, SftpBackend)
// - handler: russh Handler 实现
// - client: 基于 russh 的传输实现
// - session: 已认证的 russh 句柄
// - connection: 连接状态机 (SshConnection)
// - executor: 命令执行器 (CommandExecutor)

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod executor;
pub mod handler;
pub mod session;
pub mod transport;

// 公开导出
pub use client::RusshTransport;
pub use config::{AuthMethod, HostKeyPolicy, KeepaliveConfig, SshConfig};
pub use connection::SshConnection;
pub use error::{ErrorCategory, SshError};
pub use event::{
    ChannelSink, ConnectionEvent, ConnectionState, LogEntry, LogLevel, LogSink, MemorySink,
    TracingSink,
};
pub use executor::{CommandExecutor, CompletionCallback, OutputCallback};
pub use transport::{
    CommandStream, OutputChunk, OutputStream, SeparatedOutput, SftpBackend, SshTransport,
    TransportHandle,
};
