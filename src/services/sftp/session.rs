// 文件传输会话
// 在已认证的连接上打开 SFTP 子系统，提供目录导航、上传下载和文件操作

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Instant;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::path::{file_name, normalize_path};
use crate::models::sftp::{
    ProgressTracker, RemoteEntry, TransferDirection, TransferOperation, TransferProgress,
    TransferResult,
};
use crate::ssh::connection::SshConnection;
use crate::ssh::error::SshError;
use crate::ssh::event::{LogEntry, LogSink};
use crate::ssh::transport::{RemoteReader, SftpBackend};

/// 默认分块大小 32KB
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// 传输进度回调
pub type ProgressCallback = Arc<dyn Fn(&TransferProgress) + Send + Sync>;

/// 文件传输会话
///
/// 借用连接的传输句柄，不拥有连接。`start` 之前或连接未认证时，
/// 所有操作都返回 `SessionNotEstablished`。
pub struct TransferSession {
    connection: Weak<SshConnection>,
    sink: Arc<dyn LogSink>,
    /// SFTP 原语，`start` 后才有值
    sftp: Option<Box<dyn SftpBackend>>,
    /// 打开 SFTP 时连接的会话 ID，重新认证后旧通道失效
    session_id: Option<String>,
    /// 当前目录（绝对路径）
    current_dir: String,
    /// 主目录
    home_dir: String,
    chunk_size: usize,
    progress_callback: Option<ProgressCallback>,
    cancel: CancellationToken,
}

/// 单次分块复制的结果
enum CopyOutcome {
    Completed(u64),
    Cancelled(u64),
}

impl TransferSession {
    pub fn new(connection: &Arc<SshConnection>) -> Self {
        Self {
            connection: Arc::downgrade(connection),
            sink: connection.log_sink(),
            sftp: None,
            session_id: None,
            current_dir: "/".to_string(),
            home_dir: "/".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress_callback: None,
            cancel: CancellationToken::new(),
        }
    }

    /// 设置进度回调
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&TransferProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    /// 设置分块大小（至少 1 字节）
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// 使用外部取消令牌，令牌被取消后进行中的传输在下一个分块边界停止
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_active(&self) -> bool {
        self.backend().is_ok()
    }

    pub fn current_directory(&self) -> &str {
        &self.current_dir
    }

    pub fn home_directory(&self) -> &str {
        &self.home_dir
    }

    /// 获取仍然存活且已认证的连接
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

    /// 操作前的状态检查
    fn backend(&self) -> Result<&dyn SftpBackend, SshError> {
        let connection = self.live_connection()?;
        let sftp = self.sftp.as_deref().ok_or_else(|| {
            SshError::SessionNotEstablished("transfer session not started".to_string())
        })?;
        if connection.session_id() != self.session_id {
            return Err(SshError::SessionNotEstablished(
                "SFTP channel belongs to a previous SSH session, start again".to_string(),
            ));
        }
        Ok(sftp)
    }

    fn resolve(&self, path: &str) -> String {
        // ~ 开头的路径相对主目录
        if path == "~" {
            return self.home_dir.clone();
        }
        if let Some(rest) = path.strip_prefix("~/") {
            return normalize_path(&self.home_dir, rest);
        }
        normalize_path(&self.current_dir, path)
    }

    fn report(&self, progress: &TransferProgress) {
        if let Some(callback) = &self.progress_callback {
            callback(progress);
        }
    }

    /// 打开 SFTP 子系统，当前目录设为主目录
    pub async fn start(&mut self) -> Result<(), SshError> {
        let connection = self.live_connection()?;
        if self.sftp.is_some() {
            if connection.session_id() == self.session_id {
                return Ok(());
            }
            // 旧通道随上一次会话关闭，直接丢弃
            self.sftp = None;
            self.sink.log(LogEntry::debug(
                "[SFTP] Discarding channel of a previous SSH session",
            ));
        }
        let handle = connection
            .transport_handle()
            .map_err(|e| SshError::SessionNotEstablished(e.detail().to_string()))?;

        let sftp = {
            let _guard = connection.channel_lock().lock().await;
            handle.open_sftp().await?
        };

        let home = match sftp.canonicalize(".").await {
            Ok(path) => path,
            Err(e) => {
                // 回退到根目录
                self.sink.log(
                    LogEntry::warn("[SFTP] Failed to get home directory, using /")
                        .with_details(e.to_string()),
                );
                "/".to_string()
            }
        };

        self.sink.log(LogEntry::info(format!(
            "[SFTP] Transfer session started, home directory: {}",
            home
        )));
        self.home_dir = home.clone();
        self.current_dir = home;
        self.sftp = Some(sftp);
        self.session_id = connection.session_id();
        Ok(())
    }

    /// 关闭 SFTP 子系统，可重复调用
    pub async fn close(&mut self) {
        if let Some(sftp) = self.sftp.take() {
            if let Err(e) = sftp.close().await {
                self.sink.log(
                    LogEntry::warn("[SFTP] Error while closing SFTP session")
                        .with_details(e.to_string()),
                );
            }
            self.sink.log(LogEntry::info("[SFTP] Transfer session closed"));
        }
        self.session_id = None;
        self.current_dir = "/".to_string();
    }

    /// 切换当前目录，目标目录必须可列出
    pub async fn change_directory(&mut self, path: &str) -> Result<(), SshError> {
        let target = self.resolve(path);
        let sftp = self.backend()?;

        if let Err(e) = sftp.read_dir(&target).await {
            return Err(SshError::FileNotFound(format!("{} ({})", target, e.detail())));
        }

        self.sink
            .log(LogEntry::debug(format!("[SFTP] Changed directory to {}", target)));
        self.current_dir = target;
        Ok(())
    }

    /// 列出目录（默认当前目录），不包含 `.` 和 `..`，目录在前
    pub async fn list_directory(&self, path: Option<&str>) -> Result<Vec<RemoteEntry>, SshError> {
        let target = match path {
            Some(p) => self.resolve(p),
            None => self.current_dir.clone(),
        };
        let sftp = self.backend()?;

        let mut entries: Vec<RemoteEntry> = sftp
            .read_dir(&target)
            .await?
            .into_iter()
            .filter(|e| e.name != "." && e.name != "..")
            .collect();

        entries.sort_by(|a, b| {
            b.is_dir()
                .cmp(&a.is_dir())
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(entries)
    }

    pub async fn create_directory(&self, path: &str) -> Result<TransferResult, SshError> {
        let target = self.resolve(path);
        let started = Instant::now();
        self.backend()?.create_dir(&target).await?;
        Ok(TransferResult::succeeded(
            TransferOperation::Mkdir,
            None,
            target,
            0,
            started.elapsed(),
        ))
    }

    pub async fn remove_directory(&self, path: &str) -> Result<TransferResult, SshError> {
        let target = self.resolve(path);
        let started = Instant::now();
        self.backend()?.remove_dir(&target).await?;
        Ok(TransferResult::succeeded(
            TransferOperation::Rmdir,
            None,
            target,
            0,
            started.elapsed(),
        ))
    }

    pub async fn remove_file(&self, path: &str) -> Result<TransferResult, SshError> {
        let target = self.resolve(path);
        let started = Instant::now();
        self.backend()?.remove_file(&target).await?;
        Ok(TransferResult::succeeded(
            TransferOperation::Delete,
            None,
            target,
            0,
            started.elapsed(),
        ))
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<TransferResult, SshError> {
        let source = self.resolve(from);
        let target = self.resolve(to);
        let started = Instant::now();
        self.backend()?.rename(&source, &target).await?;
        Ok(TransferResult::succeeded(
            TransferOperation::Rename,
            None,
            target,
            0,
            started.elapsed(),
        ))
    }

    /// 获取远程文件属性
    pub async fn stat(&self, path: &str) -> Result<RemoteEntry, SshError> {
        let target = self.resolve(path);
        self.backend()?.metadata(&target).await
    }

    /// 上传本地文件
    pub async fn upload_file(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
    ) -> Result<TransferResult, SshError> {
        let local_path = local_path.as_ref();
        let sftp = self.backend()?;
        let target = self.resolve(remote_path);

        let metadata = tokio::fs::metadata(local_path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                SshError::FileNotFound(local_path.display().to_string())
            }
            _ => SshError::from(e),
        })?;
        if !metadata.is_file() {
            return Err(SshError::TransferFailed(format!(
                "{} is not a regular file",
                local_path.display()
            )));
        }
        let total = metadata.len();

        self.sink.log(LogEntry::info(format!(
            "[SFTP] Uploading {} -> {} ({} bytes)",
            local_path.display(),
            target,
            total
        )));

        let started = Instant::now();
        let mut reader = tokio::fs::File::open(local_path).await?;
        let mut writer = sftp.open_write(&target).await?;
        let mut tracker = ProgressTracker::new(TransferDirection::Upload, file_name(&target), total);

        let outcome = self
            .copy_chunks(&mut reader, &mut writer, &mut tracker)
            .await
            .map_err(|e| {
                SshError::TransferFailed(format!("upload to {} failed: {}", target, e.detail()))
            })?;
        writer.shutdown().await.map_err(|e| {
            SshError::TransferFailed(format!("failed to finish {}: {}", target, e))
        })?;
        if let CopyOutcome::Cancelled(_) = outcome {
            // 不保留上传了一半的远程文件
            drop(writer);
            if let Err(e) = sftp.remove_file(&target).await {
                self.sink.log(
                    LogEntry::warn(format!(
                        "[SFTP] Failed to remove partial upload {}",
                        target
                    ))
                    .with_details(e.to_string()),
                );
            }
        }

        Ok(self.finish_result(
            outcome,
            TransferOperation::Upload,
            local_path,
            target,
            total,
            started,
        ))
    }

    /// 下载远程文件
    ///
    /// 先写入同目录下的临时文件，完成后重命名，失败或取消时不会留下不完整的目标文件。
    pub async fn download_file(
        &self,
        remote_path: &str,
        local_path: impl AsRef<Path>,
    ) -> Result<TransferResult, SshError> {
        let local_path = local_path.as_ref();
        let sftp = self.backend()?;
        let target = self.resolve(remote_path);

        let entry = sftp.metadata(&target).await?;
        if entry.is_dir() {
            return Err(SshError::TransferFailed(format!("{} is a directory", target)));
        }
        let total = entry.size;

        if let Some(parent) = local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        self.sink.log(LogEntry::info(format!(
            "[SFTP] Downloading {} -> {} ({} bytes)",
            target,
            local_path.display(),
            total
        )));

        let started = Instant::now();
        let temp_path = temp_sibling(local_path);
        let mut reader = sftp.open_read(&target).await?;
        let mut tracker =
            ProgressTracker::new(TransferDirection::Download, file_name(&target), total);

        let result = self
            .download_into(&mut reader, &temp_path, &mut tracker)
            .await;

        let outcome = match result {
            Ok(CopyOutcome::Completed(bytes)) => {
                if let Err(e) = tokio::fs::rename(&temp_path, local_path).await {
                    let _ = tokio::fs::remove_file(&temp_path).await;
                    return Err(SshError::TransferFailed(format!(
                        "failed to move download into {}: {}",
                        local_path.display(),
                        e
                    )));
                }
                CopyOutcome::Completed(bytes)
            }
            Ok(CopyOutcome::Cancelled(bytes)) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                CopyOutcome::Cancelled(bytes)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(SshError::TransferFailed(format!(
                    "download of {} failed: {}",
                    target,
                    e.detail()
                )));
            }
        };

        Ok(self.finish_result(
            outcome,
            TransferOperation::Download,
            local_path,
            target,
            total,
            started,
        ))
    }

    async fn download_into(
        &self,
        reader: &mut RemoteReader,
        temp_path: &Path,
        tracker: &mut ProgressTracker,
    ) -> Result<CopyOutcome, SshError> {
        let mut file = tokio::fs::File::create(temp_path).await?;
        let outcome = self.copy_chunks(reader, &mut file, tracker).await?;
        file.sync_all().await?;
        Ok(outcome)
    }

    /// 按分块复制，每个分块后报告一次进度
    ///
    /// 总量大于 0 时先报告一次 0%；复制结束时若最后一次报告未到 100%，补报完成。
    async fn copy_chunks<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        tracker: &mut ProgressTracker,
    ) -> Result<CopyOutcome, SshError>
    where
        R: tokio::io::AsyncRead + Unpin + ?Sized,
        W: tokio::io::AsyncWrite + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; self.chunk_size];

        let initial = tracker.snapshot();
        if initial.total_bytes > 0 {
            self.report(&initial);
        }

        loop {
            if self.cancel.is_cancelled() {
                return Ok(CopyOutcome::Cancelled(tracker.transferred_bytes()));
            }

            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).await?;

            // 完成后文件仍在增长：继续复制，不再重复报告完成
            let reported = tracker.is_completed();
            let progress = tracker.advance(n as u64);
            if !reported {
                self.report(&progress);
            }
        }

        writer.flush().await?;
        if !tracker.is_completed() {
            let progress = tracker.finish();
            self.report(&progress);
        }
        Ok(CopyOutcome::Completed(tracker.transferred_bytes()))
    }

    fn finish_result(
        &self,
        outcome: CopyOutcome,
        operation: TransferOperation,
        local_path: &Path,
        remote_path: String,
        total: u64,
        started: Instant,
    ) -> TransferResult {
        match outcome {
            CopyOutcome::Completed(bytes) => {
                self.sink.log(LogEntry::info(format!(
                    "[SFTP] {} of {} finished: {} bytes",
                    operation.as_str(),
                    remote_path,
                    bytes
                )));
                TransferResult::succeeded(
                    operation,
                    Some(local_path.to_path_buf()),
                    remote_path,
                    total.max(bytes),
                    started.elapsed(),
                )
            }
            CopyOutcome::Cancelled(bytes) => {
                self.sink.log(LogEntry::warn(format!(
                    "[SFTP] {} of {} cancelled after {} bytes",
                    operation.as_str(),
                    remote_path,
                    bytes
                )));
                TransferResult::failed(
                    operation,
                    Some(local_path.to_path_buf()),
                    remote_path,
                    total,
                    bytes,
                    started.elapsed(),
                    "transfer cancelled",
                )
            }
        }
    }
}

/// 下载用的临时文件：与目标同目录，避免跨文件系统重命名
fn temp_sibling(local_path: &Path) -> PathBuf {
    let name = local_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    local_path.with_file_name(format!(".{}.{}.part", name, uuid::Uuid::new_v4().simple()))
}

impl Drop for TransferSession {
    fn drop(&mut self) {
        if self.sftp.take().is_some() {
            self.sink
                .log(LogEntry::debug("[SFTP] Transfer session dropped while active"));
        }
    }
}
