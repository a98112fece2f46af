// 命令执行器
// 在已认证连接上执行远程命令：合并输出、分离输出、流式输出三种模式

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use futures::StreamExt;

use super::connection::SshConnection;
use super::error::SshError;
use super::event::{LogEntry, LogSink};
use super::transport::{CommandStream, OutputStream, TransportHandle};
use crate::models::command::{CommandResult, FAILURE_EXIT_CODE};

/// 输出回调（stdout 或 stderr 文本）
pub type OutputCallback = Arc<dyn Fn(&str) + Send + Sync>;
/// 完成回调
pub type CompletionCallback = Arc<dyn Fn(&CommandResult) + Send + Sync>;

/// 命令执行器
///
/// 持有连接的弱引用。回调在调用方的任务中同步触发，不能阻塞。
pub struct CommandExecutor {
    connection: Weak<SshConnection>,
    sink: Arc<dyn LogSink>,
    active: AtomicBool,
    on_output: Option<OutputCallback>,
    on_error: Option<OutputCallback>,
    on_complete: Option<CompletionCallback>,
}

impl CommandExecutor {
    pub fn new(connection: &Arc<SshConnection>) -> Self {
        Self {
            connection: Arc::downgrade(connection),
            sink: connection.log_sink(),
            active: AtomicBool::new(false),
            on_output: None,
            on_error: None,
            on_complete: None,
        }
    }

    pub fn with_output_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_output = Some(Arc::new(callback));
        self
    }

    pub fn with_error_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn with_completion_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CommandResult) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(callback));
        self
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// 启动执行器，要求连接已认证
    pub async fn start(&self) -> Result<(), SshError> {
        if self.is_active() {
            return Ok(());
        }
        let connection = self.live_connection()?;
        {
            let _guard = connection.channel_lock().lock().await;
            connection
                .transport_handle()
                .map_err(|e| SshError::SessionNotEstablished(e.detail().to_string()))?;
            self.active.store(true, Ordering::SeqCst);
        }
        self.sink.log(LogEntry::debug("[Exec] Command executor started"));
        Ok(())
    }

    /// 停止执行器，可重复调用
    pub fn close(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            self.sink.log(LogEntry::debug("[Exec] Command executor closed"));
        }
    }

    fn live_connection(&self) -> Result<Arc<SshConnection>, SshError> {
        let connection = self.connection.upgrade().ok_or_else(|| {
            SshError::SessionNotEstablished("connection has been dropped".to_string())
        })?;
        if !connection.is_authenticated() {
            return Err(SshError::SessionNotEstablished(
                "connection is not authenticated".to_string(),
            ));
        }
        Ok(connection)
    }

    /// 状态检查并校验命令
    fn prepare(&self, command: &str) -> Result<Arc<dyn TransportHandle>, SshError> {
        let connection = self.live_connection()?;
        if !self.is_active() {
            return Err(SshError::SessionNotEstablished(
                "command executor not started".to_string(),
            ));
        }
        let handle = connection
            .transport_handle()
            .map_err(|e| SshError::SessionNotEstablished(e.detail().to_string()))?;

        if command.trim().is_empty() {
            return Err(SshError::InvalidCommand("command is empty".to_string()));
        }
        Ok(handle)
    }

    fn emit_output(&self, text: &str) {
        if let (Some(callback), false) = (&self.on_output, text.is_empty()) {
            callback(text);
        }
    }

    fn emit_error(&self, text: &str) {
        if let (Some(callback), false) = (&self.on_error, text.is_empty()) {
            callback(text);
        }
    }

    fn complete(&self, result: &CommandResult) {
        self.sink.log(LogEntry::debug(format!("[Exec] {}", result)));
        if let Some(callback) = &self.on_complete {
            callback(result);
        }
    }

    /// 执行命令，stdout 与 stderr 合并
    ///
    /// 传输失败不返回 `Err`，而是返回退出码为 -1、错误信息在 stderr 中的结果。
    pub async fn execute_command(&self, command: &str) -> Result<CommandResult, SshError> {
        let handle = self.prepare(command)?;
        self.sink
            .log(LogEntry::info(format!("[Exec] Executing: {}", command)));

        let start = Utc::now();
        let result = match handle.execute(command).await {
            Ok(output) => {
                let output = String::from_utf8_lossy(&output).into_owned();
                self.emit_output(&output);
                CommandResult::timed(command, 0, output, String::new(), start, Utc::now())
            }
            Err(e) => {
                let message = e.to_string();
                self.sink.log(
                    LogEntry::error(format!("[Exec] Command failed: {}", command))
                        .with_details(message.clone()),
                );
                self.emit_error(&message);
                CommandResult::timed(
                    command,
                    FAILURE_EXIT_CODE,
                    String::new(),
                    message,
                    start,
                    Utc::now(),
                )
            }
        };

        self.complete(&result);
        Ok(result)
    }

    /// 执行命令，分别收集 stdout 和 stderr
    ///
    /// 退出码按 stderr 是否为空推断：空为 0，否则为 1。
    pub async fn execute_command_separated(
        &self,
        command: &str,
    ) -> Result<CommandResult, SshError> {
        let handle = self.prepare(command)?;
        self.sink.log(LogEntry::info(format!(
            "[Exec] Executing (separated): {}",
            command
        )));

        let start = Utc::now();
        let result = match handle.execute_separated(command).await {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                self.emit_output(&stdout);
                self.emit_error(&stderr);
                let exit_code = if stderr.is_empty() { 0 } else { 1 };
                CommandResult::timed(command, exit_code, stdout, stderr, start, Utc::now())
            }
            Err(e) => {
                let message = e.to_string();
                self.sink.log(
                    LogEntry::error(format!("[Exec] Command failed: {}", command))
                        .with_details(message.clone()),
                );
                self.emit_error(&message);
                CommandResult::timed(
                    command,
                    FAILURE_EXIT_CODE,
                    String::new(),
                    message,
                    start,
                    Utc::now(),
                )
            }
        };

        self.complete(&result);
        Ok(result)
    }

    /// 流式执行命令
    ///
    /// 每个分块到达时触发输出 / 错误回调；失败作为流的最后一个 `Err` 元素出现。
    pub async fn execute_command_stream(&self, command: &str) -> Result<CommandStream, SshError> {
        let handle = self.prepare(command)?;
        self.sink.log(LogEntry::info(format!(
            "[Exec] Executing (streamed): {}",
            command
        )));

        let stream = handle.execute_streamed(command).await?;
        let on_output = self.on_output.clone();
        let on_error = self.on_error.clone();

        Ok(stream
            .inspect(move |item| {
                if let Ok(chunk) = item {
                    let callback = match chunk.stream {
                        OutputStream::Stdout => &on_output,
                        OutputStream::Stderr => &on_error,
                    };
                    if let Some(callback) = callback {
                        callback(&chunk.text());
                    }
                }
            })
            .boxed())
    }
}

impl Drop for CommandExecutor {
    fn drop(&mut self) {
        self.close();
    }
}
