// 传输层抽象
//
// 编排层只通过这里的 trait 接触底层 SSH 库：
// - SshTransport: 连接并认证，返回已认证的句柄
// - TransportHandle: 在句柄上执行命令、打开 SFTP 子系统
// - SftpBackend: SFTP 文件操作原语
// 生产实现见 ssh::client / ssh::session / services::sftp::service。

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::io::{AsyncRead, AsyncWrite};

use super::config::{AuthMethod, SshConfig};
use super::error::SshError;
use super::event::LogSink;
use crate::models::sftp::RemoteEntry;

/// 输出来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// 流式输出的一个分块
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    /// 来源
    pub stream: OutputStream,
    /// 原始字节
    pub data: Vec<u8>,
}

impl OutputChunk {
    pub fn stdout(data: impl Into<Vec<u8>>) -> Self {
        Self {
            stream: OutputStream::Stdout,
            data: data.into(),
        }
    }

    pub fn stderr(data: impl Into<Vec<u8>>) -> Self {
        Self {
            stream: OutputStream::Stderr,
            data: data.into(),
        }
    }

    /// 按 UTF-8（有损）解码
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    pub fn is_stderr(&self) -> bool {
        self.stream == OutputStream::Stderr
    }
}

/// 惰性、有限、不可重启的命令输出流
///
/// 中途丢弃即放弃剩余输出；失败以最后一个 `Err` 元素的形式出现。
pub type CommandStream = BoxStream<'static, Result<OutputChunk, SshError>>;

/// 分离的 stdout / stderr
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeparatedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// 远程文件读取端
pub type RemoteReader = Box<dyn AsyncRead + Send + Unpin>;
/// 远程文件写入端
pub type RemoteWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// 连接并认证
#[async_trait]
pub trait SshTransport: Send + Sync {
    /// 建立连接、按主机密钥策略校验服务器并完成认证
    async fn connect(
        &self,
        config: &SshConfig,
        username: &str,
        auth: &AuthMethod,
        sink: Arc<dyn LogSink>,
    ) -> Result<Arc<dyn TransportHandle>, SshError>;
}

/// 已认证的传输句柄
///
/// 子会话只借用句柄，不拥有也不关闭它。
#[async_trait]
pub trait TransportHandle: Send + Sync {
    /// 单流执行：stdout 与 stderr 合并
    async fn execute(&self, command: &str) -> Result<Vec<u8>, SshError>;

    /// 双流执行：完整收集 stdout 和 stderr
    async fn execute_separated(&self, command: &str) -> Result<SeparatedOutput, SshError>;

    /// 流式执行
    async fn execute_streamed(&self, command: &str) -> Result<CommandStream, SshError>;

    /// 打开 SFTP 子系统
    async fn open_sftp(&self) -> Result<Box<dyn SftpBackend>, SshError>;

    /// 关闭底层连接
    async fn close(&self) -> Result<(), SshError>;

    fn is_closed(&self) -> bool;
}

/// SFTP 原语
#[async_trait]
pub trait SftpBackend: Send + Sync {
    /// 列出目录（包含 `.` 和 `..` 与否取决于服务器）
    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, SshError>;

    async fn create_dir(&self, path: &str) -> Result<(), SshError>;

    async fn remove_dir(&self, path: &str) -> Result<(), SshError>;

    async fn remove_file(&self, path: &str) -> Result<(), SshError>;

    async fn rename(&self, from: &str, to: &str) -> Result<(), SshError>;

    /// 远程真实路径
    async fn canonicalize(&self, path: &str) -> Result<String, SshError>;

    /// 文件属性
    async fn metadata(&self, path: &str) -> Result<RemoteEntry, SshError>;

    /// 以只读方式打开
    async fn open_read(&self, path: &str) -> Result<RemoteReader, SshError>;

    /// 以写入 / 创建 / 截断方式打开
    async fn open_write(&self, path: &str) -> Result<RemoteWriter, SshError>;

    async fn close(&self) -> Result<(), SshError>;
}
