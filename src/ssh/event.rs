// SSH 连接事件与日志接收器定义
//
// 日志是注入的能力（LogSink），而不是全局状态，测试可以确定性地断言发出的事件。

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Local};
use tokio::sync::mpsc;

/// 连接状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// 未连接
    Disconnected,
    /// 已连接（尚未认证）
    Connected,
    /// 已认证
    Authenticated,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Authenticated => "authenticated",
        }
    }
}

/// 连接事件
#[derive(Clone, Debug)]
pub enum ConnectionEvent {
    /// 状态变化
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// 日志消息
    Log(LogEntry),
}

/// 日志级别
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

/// 日志条目
#[derive(Clone, Debug)]
pub struct LogEntry {
    /// 时间戳
    pub timestamp: DateTime<Local>,
    /// 日志级别
    pub level: LogLevel,
    /// 消息内容
    pub message: String,
    /// 详细信息（可选）
    pub details: Option<String>,
}

impl LogEntry {
    /// 创建新的日志条目
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            message: message.into(),
            details: None,
        }
    }

    /// 附加详情
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn debug(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Debug, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }
}

/// 日志接收器
pub trait LogSink: Send + Sync {
    /// 接收一个事件，不能失败
    fn emit(&self, event: ConnectionEvent);

    fn log(&self, entry: LogEntry) {
        self.emit(ConnectionEvent::Log(entry));
    }
}

/// 转发到 tracing 的默认接收器
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StateChanged { from, to } => {
                tracing::debug!("[SSH] State {} -> {}", from.as_str(), to.as_str());
            }
            ConnectionEvent::Log(entry) => {
                let details = entry.details.as_deref().unwrap_or("");
                match entry.level {
                    LogLevel::Debug => tracing::debug!("{} {}", entry.message, details),
                    LogLevel::Info => tracing::info!("{} {}", entry.message, details),
                    LogLevel::Warn => tracing::warn!("{} {}", entry.message, details),
                    LogLevel::Error => tracing::error!("{} {}", entry.message, details),
                }
            }
        }
    }
}

/// 通过 mpsc 通道转发事件（用于 UI 等外部消费者）
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ChannelSink {
    /// 创建接收器以及对应的事件接收端
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl LogSink for ChannelSink {
    fn emit(&self, event: ConnectionEvent) {
        // 接收端已关闭时直接丢弃
        let _ = self.sender.send(event);
    }
}

/// 在内存中收集事件
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ConnectionEvent>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 已收集的全部事件
    pub fn events(&self) -> Vec<ConnectionEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 已收集的日志条目
    pub fn entries(&self) -> Vec<LogEntry> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ConnectionEvent::Log(entry) => Some(entry),
                _ => None,
            })
            .collect()
    }

    /// 指定级别的日志条目
    pub fn entries_at(&self, level: LogLevel) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.level == level)
            .collect()
    }

    /// 已收集的状态变化序列
    pub fn transitions(&self) -> Vec<(ConnectionState, ConnectionState)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ConnectionEvent::StateChanged { from, to } => Some((from, to)),
                _ => None,
            })
            .collect()
    }
}

impl LogSink for MemorySink {
    fn emit(&self, event: ConnectionEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
