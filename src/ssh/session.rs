// SSH 会话句柄
// 认证成功后的 russh Handle 封装，每个命令 / SFTP 子系统各自打开一个通道

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use russh::client::{Handle, Msg};
use russh::ChannelMsg;
use russh_sftp::client::SftpSession;
use tokio::time::timeout;

use super::error::SshError;
use super::event::{LogEntry, LogSink};
use super::handler::SshClientHandler;
use super::transport::{CommandStream, OutputChunk, SeparatedOutput, SftpBackend, TransportHandle};
use crate::services::sftp::RusshSftp;

// 使用 russh::client::Msg 作为消息类型
type RusshChannel = russh::Channel<Msg>;

/// 一次读取得到的通道事件
enum ChannelEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    Exit(u32),
    Closed,
    Other,
}

/// 已认证的 russh 句柄
pub struct RusshHandle {
    /// 共享的 russh Handle
    handle: Handle<SshClientHandler>,
    /// 单次读取超时
    data_timeout: Duration,
    /// 是否已关闭
    closed: AtomicBool,
    sink: Arc<dyn LogSink>,
}

impl RusshHandle {
    pub fn new(handle: Handle<SshClientHandler>, data_timeout: Duration, sink: Arc<dyn LogSink>) -> Self {
        Self {
            handle,
            data_timeout,
            closed: AtomicBool::new(false),
            sink,
        }
    }

    /// 打开会话通道并执行命令
    async fn open_exec(&self, command: &str) -> Result<RusshChannel, SshError> {
        if self.is_closed() {
            return Err(SshError::ConnectionLost("SSH connection is closed".to_string()));
        }

        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::ChannelCreationFailed(e.to_string()))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::ChannelOperationFailed(e.to_string()))?;

        self.sink
            .log(LogEntry::debug(format!("[Exec] Channel {:?} running: {}", channel.id(), command)));
        Ok(channel)
    }
}

/// 带超时读取一条通道消息
async fn next_event(channel: &mut RusshChannel, data_timeout: Duration) -> Result<ChannelEvent, SshError> {
    let msg = timeout(data_timeout, channel.wait()).await.map_err(|_| {
        SshError::CommandTimeout(format!(
            "no output received for {}s",
            data_timeout.as_secs()
        ))
    })?;

    Ok(match msg {
        Some(ChannelMsg::Data { data }) => ChannelEvent::Stdout(data.to_vec()),
        // ext == 1 为 stderr
        Some(ChannelMsg::ExtendedData { data, ext: 1 }) => ChannelEvent::Stderr(data.to_vec()),
        Some(ChannelMsg::ExitStatus { exit_status }) => ChannelEvent::Exit(exit_status),
        Some(ChannelMsg::Close) | None => ChannelEvent::Closed,
        // Eof 可能先于 ExitStatus 到达，继续读取直到通道关闭
        Some(_) => ChannelEvent::Other,
    })
}

/// 流式读取的状态
struct StreamState {
    channel: RusshChannel,
    data_timeout: Duration,
    exit_status: Option<u32>,
    done: bool,
}

#[async_trait]
impl TransportHandle for RusshHandle {
    async fn execute(&self, command: &str) -> Result<Vec<u8>, SshError> {
        let mut channel = self.open_exec(command).await?;
        let mut output = Vec::new();
        let mut exit_status = None;

        loop {
            match next_event(&mut channel, self.data_timeout).await? {
                ChannelEvent::Stdout(data) | ChannelEvent::Stderr(data) => {
                    output.extend_from_slice(&data)
                }
                ChannelEvent::Exit(code) => exit_status = Some(code),
                ChannelEvent::Closed => break,
                ChannelEvent::Other => {}
            }
        }

        match exit_status {
            Some(code) if code != 0 => Err(SshError::CommandExecutionFailed(format!(
                "exited with status {}: {}",
                code,
                String::from_utf8_lossy(&output).trim_end()
            ))),
            _ => Ok(output),
        }
    }

    async fn execute_separated(&self, command: &str) -> Result<SeparatedOutput, SshError> {
        let mut channel = self.open_exec(command).await?;
        let mut output = SeparatedOutput::default();

        loop {
            match next_event(&mut channel, self.data_timeout).await? {
                ChannelEvent::Stdout(data) => output.stdout.extend_from_slice(&data),
                ChannelEvent::Stderr(data) => output.stderr.extend_from_slice(&data),
                ChannelEvent::Closed => break,
                ChannelEvent::Exit(_) | ChannelEvent::Other => {}
            }
        }

        Ok(output)
    }

    async fn execute_streamed(&self, command: &str) -> Result<CommandStream, SshError> {
        let channel = self.open_exec(command).await?;
        let state = StreamState {
            channel,
            data_timeout: self.data_timeout,
            exit_status: None,
            done: false,
        };

        let stream = stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }
            loop {
                match next_event(&mut state.channel, state.data_timeout).await {
                    Ok(ChannelEvent::Stdout(data)) => {
                        return Some((Ok(OutputChunk::stdout(data)), state))
                    }
                    Ok(ChannelEvent::Stderr(data)) => {
                        return Some((Ok(OutputChunk::stderr(data)), state))
                    }
                    Ok(ChannelEvent::Exit(code)) => state.exit_status = Some(code),
                    Ok(ChannelEvent::Other) => {}
                    Ok(ChannelEvent::Closed) => {
                        state.done = true;
                        return match state.exit_status {
                            Some(code) if code != 0 => Some((
                                Err(SshError::CommandExecutionFailed(format!(
                                    "exited with status {}",
                                    code
                                ))),
                                state,
                            )),
                            _ => None,
                        };
                    }
                    Err(e) => {
                        state.done = true;
                        return Some((Err(e), state));
                    }
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn open_sftp(&self) -> Result<Box<dyn SftpBackend>, SshError> {
        if self.is_closed() {
            return Err(SshError::ConnectionLost("SSH connection is closed".to_string()));
        }

        // 打开 SFTP 子系统通道
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::ChannelCreationFailed(e.to_string()))?;

        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| SshError::SftpInitFailed(format!("failed to request sftp subsystem: {}", e)))?;

        // 使用 russh-sftp 包装通道
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| SshError::SftpInitFailed(e.to_string()))?;

        self.sink.log(LogEntry::debug("[SFTP] Subsystem channel opened"));
        Ok(Box::new(RusshSftp::new(sftp)))
    }

    async fn close(&self) -> Result<(), SshError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
            .map_err(SshError::from)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.handle.is_closed()
    }
}
