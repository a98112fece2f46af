// SSH 连接管理
// 认证状态机 Disconnected -> Connected -> Authenticated，持有唯一的传输句柄

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::Mutex;

use super::client::RusshTransport;
use super::config::{AuthMethod, SshConfig};
use super::error::{ErrorCategory, SshError};
use super::event::{ConnectionEvent, ConnectionState, LogEntry, LogSink, TracingSink};
use super::transport::{SshTransport, TransportHandle};

/// 连接内部状态
///
/// 不变式：`handle.is_some()` 当且仅当 `state == Authenticated`
struct ConnectionInner {
    state: ConnectionState,
    session_id: Option<String>,
    handle: Option<Arc<dyn TransportHandle>>,
    username: Option<String>,
}

/// SSH 连接
///
/// 子会话（命令执行器、传输会话）通过 `Weak` 引用借用这里的传输句柄，
/// 只有 `disconnect` 会关闭句柄。
pub struct SshConnection {
    config: SshConfig,
    transport: Arc<dyn SshTransport>,
    sink: Arc<dyn LogSink>,
    inner: RwLock<ConnectionInner>,
    /// 认证过程互斥
    auth_lock: Mutex<()>,
    /// 子通道创建互斥
    channel_lock: Mutex<()>,
}

impl SshConnection {
    /// 创建连接（配置会先被校验）
    pub fn new(config: SshConfig, transport: Arc<dyn SshTransport>) -> Result<Arc<Self>, SshError> {
        Self::with_log_sink(config, transport, Arc::new(TracingSink))
    }

    /// 使用 russh 传输创建连接
    pub fn russh(config: SshConfig) -> Result<Arc<Self>, SshError> {
        Self::new(config, Arc::new(RusshTransport::new()))
    }

    pub fn with_log_sink(
        config: SshConfig,
        transport: Arc<dyn SshTransport>,
        sink: Arc<dyn LogSink>,
    ) -> Result<Arc<Self>, SshError> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            transport,
            sink,
            inner: RwLock::new(ConnectionInner {
                state: ConnectionState::Disconnected,
                session_id: None,
                handle: None,
                username: None,
            }),
            auth_lock: Mutex::new(()),
            channel_lock: Mutex::new(()),
        }))
    }

    fn read(&self) -> RwLockReadGuard<'_, ConnectionInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ConnectionInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_state(&self, from: ConnectionState, to: ConnectionState) {
        if from != to {
            self.sink.emit(ConnectionEvent::StateChanged { from, to });
        }
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    pub fn log_sink(&self) -> Arc<dyn LogSink> {
        self.sink.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.read().state
    }

    /// 当前会话 ID，每次连接 / 认证成功时重新生成
    pub fn session_id(&self) -> Option<String> {
        self.read().session_id.clone()
    }

    /// 已认证的用户名
    pub fn username(&self) -> Option<String> {
        self.read().username.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state() != ConnectionState::Disconnected
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == ConnectionState::Authenticated
    }

    /// 子通道创建锁
    pub fn channel_lock(&self) -> &Mutex<()> {
        &self.channel_lock
    }

    /// 标记为已连接
    ///
    /// russh 把连接和认证绑在一起，这里不做网络 I/O，真正的连接发生在 `authenticate`。
    pub fn connect(&self) {
        let from = {
            let mut inner = self.write();
            if inner.state != ConnectionState::Disconnected {
                return;
            }
            inner.state = ConnectionState::Connected;
            inner.session_id = Some(uuid::Uuid::new_v4().to_string());
            ConnectionState::Disconnected
        };
        self.sink.log(LogEntry::info(format!(
            "[SSH] Connection to {} prepared",
            self.config.address()
        )));
        self.notify_state(from, ConnectionState::Connected);
    }

    /// 认证
    ///
    /// 已认证时记录警告并直接返回。未连接时会先隐式 `connect`。
    pub async fn authenticate(&self, username: &str, auth: &AuthMethod) -> Result<(), SshError> {
        let _guard = self.auth_lock.lock().await;

        if self.is_authenticated() {
            self.sink.log(LogEntry::warn(format!(
                "[SSH] Already authenticated to {}, ignoring",
                self.config.address()
            )));
            return Ok(());
        }

        if username.trim().is_empty() {
            return Err(SshError::MissingParameter("username".to_string()));
        }

        // 私钥文件不存在时不发起网络连接
        if let AuthMethod::PublicKey { key_path, .. } = auth {
            if !tokio::fs::try_exists(key_path).await.unwrap_or(false) {
                self.sink.log(LogEntry::error(format!(
                    "[SSH] Private key not found: {}",
                    key_path.display()
                )));
                return Err(SshError::KeyNotFound(key_path.display().to_string()));
            }
        }

        self.connect();
        let attempt_id = self.session_id();

        let handle = match self
            .transport
            .connect(&self.config, username, auth, self.sink.clone())
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                let e = classify_auth_error(e);
                self.sink.log(
                    LogEntry::error(format!(
                        "[SSH] Authentication to {} failed",
                        self.config.address()
                    ))
                    .with_details(e.to_string()),
                );
                return Err(e);
            }
        };

        let from = {
            let mut inner = self.write();
            // 握手期间被 disconnect 过：丢弃新句柄
            if inner.state != ConnectionState::Connected || inner.session_id != attempt_id {
                None
            } else {
                let from = inner.state;
                inner.state = ConnectionState::Authenticated;
                inner.session_id = Some(uuid::Uuid::new_v4().to_string());
                inner.handle = Some(handle.clone());
                inner.username = Some(username.to_string());
                Some(from)
            }
        };
        let Some(from) = from else {
            if let Err(e) = handle.close().await {
                self.sink.log(
                    LogEntry::warn("[SSH] Error while closing abandoned connection, ignored")
                        .with_details(e.to_string()),
                );
            }
            self.sink.log(LogEntry::warn(format!(
                "[SSH] Connection to {} was closed during authentication",
                self.config.address()
            )));
            return Err(SshError::SessionClosed(
                "disconnected while authenticating".to_string(),
            ));
        };

        self.sink.log(LogEntry::info(format!(
            "[SSH] Authenticated as '{}' on {}",
            username,
            self.config.address()
        )));
        self.notify_state(from, ConnectionState::Authenticated);
        Ok(())
    }

    /// 断开连接，可重复调用，不会失败
    pub async fn disconnect(&self) {
        let (from, handle) = {
            let mut inner = self.write();
            let from = inner.state;
            inner.state = ConnectionState::Disconnected;
            inner.session_id = None;
            inner.username = None;
            (from, inner.handle.take())
        };

        if let Some(handle) = handle {
            if let Err(e) = handle.close().await {
                self.sink.log(
                    LogEntry::warn("[SSH] Error while closing connection, ignored")
                        .with_details(e.to_string()),
                );
            }
        }

        if from != ConnectionState::Disconnected {
            self.sink.log(LogEntry::info(format!(
                "[SSH] Disconnected from {}",
                self.config.address()
            )));
        }
        self.notify_state(from, ConnectionState::Disconnected);
    }

    /// 获取传输句柄
    pub fn transport_handle(&self) -> Result<Arc<dyn TransportHandle>, SshError> {
        self.read().handle.clone().ok_or_else(|| {
            SshError::NotConnected(format!("no authenticated session to {}", self.config.address()))
        })
    }
}

/// 认证阶段的错误归类：连接类错误保留原样，其余会话 / 通道层错误归为认证失败
fn classify_auth_error(error: SshError) -> SshError {
    match error.category() {
        ErrorCategory::Authentication
        | ErrorCategory::Connection
        | ErrorCategory::Protocol
        | ErrorCategory::Configuration
        | ErrorCategory::System => error,
        _ => SshError::AuthenticationFailed(error.detail().to_string()),
    }
}

impl Drop for SshConnection {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if inner.handle.take().is_some() {
            // 句柄随之释放，底层连接由 russh 在句柄全部释放后关闭
            self.sink.log(LogEntry::debug(format!(
                "[SSH] Dropping authenticated connection to {}",
                self.config.address()
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::event::{LogLevel, MemorySink};
    use crate::testing::{MockTransport, MOCK_PASSWORD};

    fn connection_with_sink(transport: &MockTransport) -> (Arc<SshConnection>, Arc<MemorySink>) {
        let sink = MemorySink::new();
        let connection = SshConnection::with_log_sink(
            SshConfig::new("example.com", 22),
            Arc::new(transport.clone()),
            sink.clone(),
        )
        .unwrap();
        (connection, sink)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = SshConnection::new(SshConfig::new("", 22), Arc::new(MockTransport::new()));
        assert!(matches!(result, Err(SshError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_connect_is_idempotent() {
        let transport = MockTransport::new();
        let (connection, sink) = connection_with_sink(&transport);
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(connection.session_id().is_none());

        connection.connect();
        let first_id = connection.session_id();
        assert!(first_id.is_some());
        assert!(connection.is_connected());
        assert!(!connection.is_authenticated());

        connection.connect();
        assert_eq!(connection.session_id(), first_id);
        assert_eq!(
            sink.transitions(),
            vec![(ConnectionState::Disconnected, ConnectionState::Connected)]
        );
        assert_eq!(transport.connect_calls(), 0);
    }

    #[tokio::test]
    async fn test_authenticate_and_disconnect() {
        let transport = MockTransport::new();
        let (connection, sink) = connection_with_sink(&transport);

        assert!(matches!(
            connection.transport_handle(),
            Err(SshError::NotConnected(_))
        ));

        connection.connect();
        let connect_id = connection.session_id();
        connection
            .authenticate("tester", &AuthMethod::password(MOCK_PASSWORD))
            .await
            .unwrap();
        assert!(connection.is_authenticated());
        assert!(connection.is_connected());
        assert!(connection.transport_handle().is_ok());
        assert_ne!(connection.session_id(), connect_id);
        assert_eq!(connection.username().as_deref(), Some("tester"));

        connection.disconnect().await;
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(connection.session_id().is_none());
        assert!(matches!(
            connection.transport_handle(),
            Err(SshError::NotConnected(_))
        ));
        assert_eq!(
            sink.transitions(),
            vec![
                (ConnectionState::Disconnected, ConnectionState::Connected),
                (ConnectionState::Connected, ConnectionState::Authenticated),
                (ConnectionState::Authenticated, ConnectionState::Disconnected),
            ]
        );
    }

    #[tokio::test]
    async fn test_authenticate_implies_connect() {
        let transport = MockTransport::new();
        let (connection, sink) = connection_with_sink(&transport);
        connection
            .authenticate("tester", &AuthMethod::password(MOCK_PASSWORD))
            .await
            .unwrap();
        assert!(connection.is_authenticated());
        assert_eq!(sink.transitions().len(), 2);
    }

    #[tokio::test]
    async fn test_reauthenticate_is_noop() {
        let transport = MockTransport::new();
        let (connection, sink) = connection_with_sink(&transport);
        let auth = AuthMethod::password(MOCK_PASSWORD);
        connection.authenticate("tester", &auth).await.unwrap();
        let session_id = connection.session_id();

        connection.authenticate("tester", &auth).await.unwrap();
        assert_eq!(connection.session_id(), session_id);
        assert_eq!(connection.state(), ConnectionState::Authenticated);
        assert_eq!(transport.connect_calls(), 1);
        assert!(sink
            .entries_at(LogLevel::Warn)
            .iter()
            .any(|e| e.message.contains("Already authenticated")));
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let transport = MockTransport::new();
        let (connection, _sink) = connection_with_sink(&transport);
        let err = connection
            .authenticate("tester", &AuthMethod::password("wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::AuthenticationFailed(_)));
        assert_eq!(connection.state(), ConnectionState::Connected);
        assert!(connection.transport_handle().is_err());
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_network() {
        let transport = MockTransport::new();
        let (connection, _sink) = connection_with_sink(&transport);
        let err = connection
            .authenticate(
                "tester",
                &AuthMethod::key_file("/definitely/not/here/id_rsa", None),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::KeyNotFound(_)));
        assert_eq!(transport.connect_calls(), 0);
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_transport_errors_are_classified() {
        let transport = MockTransport::new();
        transport.fail_connect(SshError::ConnectionTimeout("10s".to_string()));
        let (connection, _sink) = connection_with_sink(&transport);
        let err = connection
            .authenticate("tester", &AuthMethod::password(MOCK_PASSWORD))
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::ConnectionTimeout(_)));

        transport.fail_connect(SshError::ChannelOperationFailed("boom".to_string()));
        let err = connection
            .authenticate("tester", &AuthMethod::password(MOCK_PASSWORD))
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_swallows_errors() {
        let transport = MockTransport::new();
        transport.fail_close(SshError::ConnectionLost("reset".to_string()));
        let (connection, sink) = connection_with_sink(&transport);
        connection
            .authenticate("tester", &AuthMethod::password(MOCK_PASSWORD))
            .await
            .unwrap();

        connection.disconnect().await;
        connection.disconnect().await;
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert_eq!(transport.close_calls(), 1);
        assert!(!sink.entries_at(LogLevel::Warn).is_empty());

        // 断开后可以重新认证
        connection
            .authenticate("tester", &AuthMethod::password(MOCK_PASSWORD))
            .await
            .unwrap();
        assert!(connection.is_authenticated());
    }

    #[tokio::test]
    async fn test_disconnect_during_authentication_wins() {
        let transport = MockTransport::new();
        let gate = transport.gate_connect();
        let (connection, sink) = connection_with_sink(&transport);

        let pending = {
            let connection = connection.clone();
            tokio::spawn(async move {
                connection
                    .authenticate("tester", &AuthMethod::password(MOCK_PASSWORD))
                    .await
            })
        };
        gate.entered().await;
        assert_eq!(connection.state(), ConnectionState::Connected);

        connection.disconnect().await;
        gate.release();
        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, SshError::SessionClosed(_)));

        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(connection.transport_handle().is_err());
        assert!(connection.username().is_none());
        // 握手得到的句柄被关闭
        assert_eq!(transport.close_calls(), 1);
        assert_eq!(
            sink.transitions(),
            vec![
                (ConnectionState::Disconnected, ConnectionState::Connected),
                (ConnectionState::Connected, ConnectionState::Disconnected),
            ]
        );
    }

    #[tokio::test]
    async fn test_unreachable_service() {
        // 本地未监听的端口：应得到连接类或认证类错误，而不是 panic
        let config = SshConfig::new("127.0.0.1", 2222)
            .with_connection_timeout(10)
            .with_data_timeout(30);
        let connection = SshConnection::russh(config).unwrap();
        let result = connection
            .authenticate("nobody", &AuthMethod::password("wrong"))
            .await;
        let err = result.unwrap_err();
        assert!(
            matches!(
                err.category(),
                ErrorCategory::Connection | ErrorCategory::Authentication
            ),
            "unexpected error: {:?}",
            err
        );
        assert!(!connection.is_authenticated());
    }
}
