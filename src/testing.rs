// 测试用的内存传输实现

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Cursor;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::io::AsyncWrite;
use tokio::sync::Notify;

use crate::models::sftp::{FileType, RemoteEntry};
use crate::services::sftp::path::{file_name, join_path, normalize_path, parent_path};
use crate::ssh::config::{AuthMethod, SshConfig};
use crate::ssh::connection::SshConnection;
use crate::ssh::error::SshError;
use crate::ssh::event::{LogEntry, LogSink};
use crate::ssh::transport::{
    CommandStream, OutputChunk, RemoteReader, RemoteWriter, SeparatedOutput, SftpBackend,
    SshTransport, TransportHandle,
};

pub(crate) const MOCK_PASSWORD: &str = "secret";
pub(crate) const MOCK_HOME: &str = "/home/tester";

/// 预设的命令输出
#[derive(Clone, Debug)]
pub(crate) struct MockCommand {
    pub chunks: Vec<OutputChunk>,
    pub exit_status: u32,
}

impl MockCommand {
    fn stdout(&self) -> Vec<u8> {
        self.chunks
            .iter()
            .filter(|c| !c.is_stderr())
            .flat_map(|c| c.data.clone())
            .collect()
    }

    fn stderr(&self) -> Vec<u8> {
        self.chunks
            .iter()
            .filter(|c| c.is_stderr())
            .flat_map(|c| c.data.clone())
            .collect()
    }
}

#[derive(Default)]
struct FsState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    fail_realpath: bool,
    list_dots: bool,
    degraded: bool,
    fail_remove: bool,
}

impl FsState {
    fn is_dir(&self, path: &str) -> bool {
        self.dirs.contains(path)
    }

    fn children(&self, path: &str) -> Vec<String> {
        self.dirs
            .iter()
            .chain(self.files.keys())
            .filter(|p| p.as_str() != "/" && parent_path(p) == path)
            .cloned()
            .collect()
    }

    fn entry(&self, path: &str) -> Option<RemoteEntry> {
        let name = file_name(path);
        if self.degraded {
            if self.is_dir(path) || self.files.contains_key(path) {
                return Some(RemoteEntry::new(name, path, FileType::Unknown));
            }
            return None;
        }

        let (file_type, size, permissions) = if self.is_dir(path) {
            (FileType::Directory, 4096, "rwxr-xr-x")
        } else {
            let data = self.files.get(path)?;
            (FileType::File, data.len() as u64, "rw-r--r--")
        };
        let mut entry = RemoteEntry::new(name, path, file_type);
        entry.size = size;
        entry.permissions = permissions.to_string();
        entry.owner = "1000".to_string();
        entry.group = "1000".to_string();
        entry.metadata_degraded = false;
        Some(entry)
    }

    fn mkdir_all(&mut self, path: &str) {
        let mut current = String::new();
        self.dirs.insert("/".to_string());
        for part in path.split('/').filter(|p| !p.is_empty()) {
            let base = if current.is_empty() { "/" } else { current.as_str() };
            current = join_path(base, part);
            self.dirs.insert(current.clone());
        }
    }
}

/// 内存文件系统
#[derive(Clone)]
pub(crate) struct MockFs {
    state: Arc<Mutex<FsState>>,
}

impl MockFs {
    fn new() -> Self {
        let fs = Self {
            state: Arc::new(Mutex::new(FsState::default())),
        };
        fs.add_dir(MOCK_HOME);
        fs
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_dir(&self, path: &str) {
        self.lock().mkdir_all(path);
    }

    pub fn add_file(&self, path: &str, data: &[u8]) {
        let mut state = self.lock();
        state.mkdir_all(&parent_path(path));
        state.files.insert(path.to_string(), data.to_vec());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    pub fn fail_realpath(&self, fail: bool) {
        self.lock().fail_realpath = fail;
    }

    pub fn set_list_dots(&self, enabled: bool) {
        self.lock().list_dots = enabled;
    }

    pub fn set_degraded(&self, enabled: bool) {
        self.lock().degraded = enabled;
    }

    /// 删除文件时返回权限错误
    pub fn fail_remove(&self, fail: bool) {
        self.lock().fail_remove = fail;
    }
}

/// 写入时追加到内存文件
struct MockWriter {
    fs: MockFs,
    path: String,
}

impl AsyncWrite for MockWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let mut state = self.fs.lock();
        state
            .files
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

struct MockSftp {
    fs: MockFs,
}

#[async_trait]
impl SftpBackend for MockSftp {
    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, SshError> {
        let state = self.fs.lock();
        if !state.is_dir(path) {
            return Err(SshError::FileNotFound(path.to_string()));
        }
        let mut entries = Vec::new();
        if state.list_dots {
            entries.push(RemoteEntry::new(".", path, FileType::Directory));
            entries.push(RemoteEntry::new("..", parent_path(path), FileType::Directory));
        }
        entries.extend(state.children(path).iter().filter_map(|p| state.entry(p)));
        Ok(entries)
    }

    async fn create_dir(&self, path: &str) -> Result<(), SshError> {
        let mut state = self.fs.lock();
        if state.is_dir(path) || state.files.contains_key(path) {
            return Err(SshError::DirectoryOperationFailed(format!("{} already exists", path)));
        }
        if !state.is_dir(&parent_path(path)) {
            return Err(SshError::FileNotFound(parent_path(path)));
        }
        state.dirs.insert(path.to_string());
        Ok(())
    }

    async fn remove_dir(&self, path: &str) -> Result<(), SshError> {
        let mut state = self.fs.lock();
        if !state.is_dir(path) {
            return Err(SshError::FileNotFound(path.to_string()));
        }
        if !state.children(path).is_empty() {
            return Err(SshError::DirectoryOperationFailed(format!(
                "rmdir {}: directory not empty",
                path
            )));
        }
        state.dirs.remove(path);
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> Result<(), SshError> {
        let mut state = self.fs.lock();
        if state.fail_remove {
            return Err(SshError::AccessDenied(format!("remove {}: permission denied", path)));
        }
        state
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| SshError::FileNotFound(path.to_string()))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), SshError> {
        let mut state = self.fs.lock();
        if !state.is_dir(&parent_path(to)) {
            return Err(SshError::FileNotFound(parent_path(to)));
        }
        if let Some(data) = state.files.remove(from) {
            state.files.insert(to.to_string(), data);
            return Ok(());
        }
        if state.is_dir(from) && state.children(from).is_empty() {
            state.dirs.remove(from);
            state.dirs.insert(to.to_string());
            return Ok(());
        }
        Err(SshError::FileNotFound(from.to_string()))
    }

    async fn canonicalize(&self, path: &str) -> Result<String, SshError> {
        if self.fs.lock().fail_realpath {
            return Err(SshError::ProtocolError("realpath not supported".to_string()));
        }
        Ok(normalize_path(MOCK_HOME, path))
    }

    async fn metadata(&self, path: &str) -> Result<RemoteEntry, SshError> {
        self.fs
            .lock()
            .entry(path)
            .ok_or_else(|| SshError::FileNotFound(path.to_string()))
    }

    async fn open_read(&self, path: &str) -> Result<RemoteReader, SshError> {
        let data = self
            .fs
            .file(path)
            .ok_or_else(|| SshError::FileNotFound(path.to_string()))?;
        Ok(Box::new(Cursor::new(data)))
    }

    async fn open_write(&self, path: &str) -> Result<RemoteWriter, SshError> {
        {
            let mut state = self.fs.lock();
            if !state.is_dir(&parent_path(path)) {
                return Err(SshError::FileNotFound(parent_path(path)));
            }
            if state.is_dir(path) {
                return Err(SshError::AccessDenied(format!("{} is a directory", path)));
            }
            state.files.insert(path.to_string(), Vec::new());
        }
        Ok(Box::new(MockWriter {
            fs: self.fs.clone(),
            path: path.to_string(),
        }))
    }

    async fn close(&self) -> Result<(), SshError> {
        Ok(())
    }
}

/// 让 `connect` 停在握手中途，直到测试放行
#[derive(Clone, Default)]
pub(crate) struct ConnectGate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl ConnectGate {
    /// 等待传输进入 `connect`
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

struct MockState {
    fs: MockFs,
    connect_gate: Mutex<Option<ConnectGate>>,
    commands: Mutex<HashMap<String, MockCommand>>,
    connect_failure: Mutex<Option<SshError>>,
    exec_failure: Mutex<Option<SshError>>,
    close_failure: Mutex<Option<SshError>>,
    connect_calls: AtomicUsize,
    close_calls: AtomicUsize,
    sftp_opens: AtomicUsize,
}

/// 内存中的 SshTransport
#[derive(Clone)]
pub(crate) struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState {
                fs: MockFs::new(),
                connect_gate: Mutex::new(None),
                commands: Mutex::new(HashMap::new()),
                connect_failure: Mutex::new(None),
                exec_failure: Mutex::new(None),
                close_failure: Mutex::new(None),
                connect_calls: AtomicUsize::new(0),
                close_calls: AtomicUsize::new(0),
                sftp_opens: AtomicUsize::new(0),
            }),
        }
    }

    pub fn fs(&self) -> &MockFs {
        &self.state.fs
    }

    pub fn add_command(&self, command: &str, chunks: Vec<OutputChunk>, exit_status: u32) {
        self.state
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(command.to_string(), MockCommand { chunks, exit_status });
    }

    pub fn fail_connect(&self, error: SshError) {
        *self
            .state
            .connect_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    pub fn fail_exec(&self, error: SshError) {
        *self
            .state
            .exec_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    pub fn fail_close(&self, error: SshError) {
        *self
            .state
            .close_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// 之后的 `connect` 调用都会在门口等待放行
    pub fn gate_connect(&self) -> ConnectGate {
        let gate = ConnectGate::default();
        *self
            .state
            .connect_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(gate.clone());
        gate
    }

    pub fn connect_calls(&self) -> usize {
        self.state.connect_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.state.close_calls.load(Ordering::SeqCst)
    }

    pub fn sftp_opens(&self) -> usize {
        self.state.sftp_opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SshTransport for MockTransport {
    async fn connect(
        &self,
        _config: &SshConfig,
        username: &str,
        auth: &AuthMethod,
        sink: Arc<dyn LogSink>,
    ) -> Result<Arc<dyn TransportHandle>, SshError> {
        self.state.connect_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self
            .state
            .connect_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        let failure = self
            .state
            .connect_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(error) = failure {
            return Err(error);
        }
        if let AuthMethod::Password(password) = auth {
            if password != MOCK_PASSWORD {
                return Err(SshError::AuthenticationFailed(format!(
                    "password authentication rejected for '{}'",
                    username
                )));
            }
        }
        sink.log(LogEntry::info("[SSH] Authentication successful"));
        Ok(Arc::new(MockHandle {
            state: self.state.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MockHandle {
    state: Arc<MockState>,
    closed: AtomicBool,
}

impl MockHandle {
    fn lookup(&self, command: &str) -> Result<MockCommand, SshError> {
        if self.is_closed() {
            return Err(SshError::ConnectionLost("SSH connection is closed".to_string()));
        }
        let failure = self
            .state
            .exec_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(error) = failure {
            return Err(error);
        }
        let commands = self
            .state
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(commands.get(command).cloned().unwrap_or_else(|| MockCommand {
            chunks: vec![OutputChunk::stderr(format!(
                "sh: {}: command not found\n",
                command
            ))],
            exit_status: 127,
        }))
    }
}

#[async_trait]
impl TransportHandle for MockHandle {
    async fn execute(&self, command: &str) -> Result<Vec<u8>, SshError> {
        let mock = self.lookup(command)?;
        let output: Vec<u8> = mock.chunks.iter().flat_map(|c| c.data.clone()).collect();
        if mock.exit_status != 0 {
            return Err(SshError::CommandExecutionFailed(format!(
                "exited with status {}: {}",
                mock.exit_status,
                String::from_utf8_lossy(&output).trim_end()
            )));
        }
        Ok(output)
    }

    async fn execute_separated(&self, command: &str) -> Result<SeparatedOutput, SshError> {
        let mock = self.lookup(command)?;
        Ok(SeparatedOutput {
            stdout: mock.stdout(),
            stderr: mock.stderr(),
        })
    }

    async fn execute_streamed(&self, command: &str) -> Result<CommandStream, SshError> {
        let mock = self.lookup(command)?;
        let mut items: Vec<Result<OutputChunk, SshError>> =
            mock.chunks.into_iter().map(Ok).collect();
        if mock.exit_status != 0 {
            items.push(Err(SshError::CommandExecutionFailed(format!(
                "exited with status {}",
                mock.exit_status
            ))));
        }
        Ok(stream::iter(items).boxed())
    }

    async fn open_sftp(&self) -> Result<Box<dyn SftpBackend>, SshError> {
        if self.is_closed() {
            return Err(SshError::ConnectionLost("SSH connection is closed".to_string()));
        }
        self.state.sftp_opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSftp {
            fs: self.state.fs.clone(),
        }))
    }

    async fn close(&self) -> Result<(), SshError> {
        self.closed.store(true, Ordering::SeqCst);
        self.state.close_calls.fetch_add(1, Ordering::SeqCst);
        let failure = self
            .state
            .close_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// 用内存传输建立并认证一个连接
pub(crate) async fn authenticated_connection(transport: &MockTransport) -> Arc<SshConnection> {
    let connection = SshConnection::new(
        SshConfig::new("example.com", 22),
        Arc::new(transport.clone()),
    )
    .expect("valid test config");
    connection
        .authenticate("tester", &AuthMethod::password(MOCK_PASSWORD))
        .await
        .expect("mock authentication");
    connection
}
