// SFTP 传输相关类型
// 定义传输方向、进度和传输结果

use std::path::PathBuf;
use std::time::{Duration, Instant};

/// 传输方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Upload,
    Download,
}

impl TransferDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferDirection::Upload => "upload",
            TransferDirection::Download => "download",
        }
    }
}

/// 传输进度
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    /// 已传输字节数
    pub transferred_bytes: u64,
    /// 总字节数
    pub total_bytes: u64,
    /// 传输方向
    pub direction: TransferDirection,
    /// 文件名
    pub filename: String,
    /// 瞬时速度 (bytes/s)
    pub speed: Option<f64>,
    /// 预估剩余时间（秒）
    pub eta: Option<f64>,
}

impl TransferProgress {
    /// 创建新的传输进度
    pub fn new(
        transferred_bytes: u64,
        total_bytes: u64,
        direction: TransferDirection,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            transferred_bytes,
            total_bytes,
            direction,
            filename: filename.into(),
            speed: None,
            eta: None,
        }
    }

    /// 进度 (0.0 - 1.0)
    ///
    /// 总字节数为 0 时视为已完成，返回 1.0。
    pub fn progress(&self) -> f64 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        (self.transferred_bytes as f64 / self.total_bytes as f64).clamp(0.0, 1.0)
    }

    /// 进度百分比 (0 - 100)
    pub fn progress_percentage(&self) -> u32 {
        (self.progress() * 100.0).round() as u32
    }

    /// 是否已完成
    pub fn is_completed(&self) -> bool {
        self.transferred_bytes >= self.total_bytes
    }

    /// 格式化速度显示
    pub fn format_speed(&self) -> String {
        match self.speed {
            Some(speed) => format_bytes_per_sec(speed as u64),
            None => "-".to_string(),
        }
    }
}

/// 进度追踪器：为单次传输生成单调递增的进度值
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    direction: TransferDirection,
    filename: String,
    total_bytes: u64,
    transferred_bytes: u64,
    completed: bool,
    started_at: Instant,
}

impl ProgressTracker {
    pub fn new(direction: TransferDirection, filename: impl Into<String>, total_bytes: u64) -> Self {
        Self {
            direction,
            filename: filename.into(),
            total_bytes,
            transferred_bytes: 0,
            completed: false,
            started_at: Instant::now(),
        }
    }

    /// 累加已传输字节数并返回新的进度
    ///
    /// 恰好达到已知总量时进度完成。超过总量说明大小未知或已过期，
    /// 此时总量保持比已传输多 1 字节，完成状态留给 `finish`。
    pub fn advance(&mut self, bytes: u64) -> TransferProgress {
        self.transferred_bytes = self.transferred_bytes.saturating_add(bytes);
        if self.completed {
            self.total_bytes = self.transferred_bytes;
        } else if self.transferred_bytes > self.total_bytes {
            self.total_bytes = self.transferred_bytes.saturating_add(1);
        }
        let progress = self.snapshot();
        self.completed = progress.is_completed();
        progress
    }

    /// 读到 EOF：把剩余部分标记为完成
    pub fn finish(&mut self) -> TransferProgress {
        self.total_bytes = self.transferred_bytes;
        self.completed = true;
        self.snapshot()
    }

    /// 是否已经产生过完成的进度
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// 当前进度（含速度和剩余时间）
    pub fn snapshot(&self) -> TransferProgress {
        let mut progress = TransferProgress::new(
            self.transferred_bytes,
            self.total_bytes,
            self.direction,
            self.filename.clone(),
        );

        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            let speed = self.transferred_bytes as f64 / elapsed;
            progress.speed = Some(speed);
            if speed > 0.0 {
                let remaining = self.total_bytes.saturating_sub(self.transferred_bytes);
                progress.eta = Some(remaining as f64 / speed);
            }
        }
        progress
    }
}

/// 传输操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOperation {
    Upload,
    Download,
    Delete,
    Rename,
    Mkdir,
    Rmdir,
}

impl TransferOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferOperation::Upload => "upload",
            TransferOperation::Download => "download",
            TransferOperation::Delete => "delete",
            TransferOperation::Rename => "rename",
            TransferOperation::Mkdir => "mkdir",
            TransferOperation::Rmdir => "rmdir",
        }
    }
}

/// 传输结果
#[derive(Debug, Clone, PartialEq)]
pub struct TransferResult {
    /// 操作类型
    pub operation: TransferOperation,
    /// 本地路径（目录操作和删除没有本地路径）
    pub local_path: Option<PathBuf>,
    /// 远程路径
    pub remote_path: String,
    /// 文件大小
    pub file_size: u64,
    /// 实际传输字节数
    pub bytes_transferred: u64,
    /// 耗时
    pub duration: Duration,
    /// 是否成功
    pub success: bool,
    /// 错误信息
    pub error: Option<String>,
}

impl TransferResult {
    /// 成功的传输
    pub fn succeeded(
        operation: TransferOperation,
        local_path: Option<PathBuf>,
        remote_path: impl Into<String>,
        file_size: u64,
        duration: Duration,
    ) -> Self {
        Self {
            operation,
            local_path,
            remote_path: remote_path.into(),
            file_size,
            bytes_transferred: file_size,
            duration,
            success: true,
            error: None,
        }
    }

    /// 失败的传输
    pub fn failed(
        operation: TransferOperation,
        local_path: Option<PathBuf>,
        remote_path: impl Into<String>,
        file_size: u64,
        bytes_transferred: u64,
        duration: Duration,
        error: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            local_path,
            remote_path: remote_path.into(),
            file_size,
            bytes_transferred,
            duration,
            success: false,
            error: Some(error.into()),
        }
    }

    /// 平均速度 (bytes/s)，耗时为 0 时返回 0
    pub fn average_speed(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.bytes_transferred as f64 / secs
    }

    /// 完成率，文件大小为 0 时返回 1.0
    pub fn completion_rate(&self) -> f64 {
        if self.file_size == 0 {
            return 1.0;
        }
        self.bytes_transferred as f64 / self.file_size as f64
    }

    /// 格式化平均速度
    pub fn format_speed(&self) -> String {
        format_bytes_per_sec(self.average_speed() as u64)
    }
}

/// 格式化字节速度
fn format_bytes_per_sec(bytes_per_sec: u64) -> String {
    let speed = bytes_per_sec as f64;
    if speed >= 1_073_741_824.0 {
        format!("{:.1} GB/s", speed / 1_073_741_824.0)
    } else if speed >= 1_048_576.0 {
        format!("{:.1} MB/s", speed / 1_048_576.0)
    } else if speed >= 1_024.0 {
        format!("{:.1} KB/s", speed / 1_024.0)
    } else {
        format!("{} B/s", bytes_per_sec)
    }
}
