// SSH 客户端核心实现
// 基于 russh 的 SshTransport：TCP 连接、SSH 握手、认证

use std::net::ToSocketAddrs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{AuthResult, Handle};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::config::{AuthMethod, SshConfig};
use super::error::SshError;
use super::event::{LogEntry, LogSink};
use super::handler::SshClientHandler;
use super::session::RusshHandle;
use super::transport::{SshTransport, TransportHandle};

/// 基于 russh 的传输实现
#[derive(Debug, Default, Clone, Copy)]
pub struct RusshTransport;

impl RusshTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SshTransport for RusshTransport {
    async fn connect(
        &self,
        config: &SshConfig,
        username: &str,
        auth: &AuthMethod,
        sink: Arc<dyn LogSink>,
    ) -> Result<Arc<dyn TransportHandle>, SshError> {
        let port = config.port_u16()?;
        sink.log(LogEntry::info("[SSH] Starting SSH connection..."));
        sink.log(LogEntry::debug(format!(
            "[SSH] Target: {}@{}:{}",
            username, config.host, port
        )));

        // 解析地址
        let socket_addr = (config.host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| {
                SshError::ConnectionFailed(format!("failed to resolve {}: {}", config.host, e))
            })?
            .next()
            .ok_or_else(|| {
                SshError::NetworkUnreachable(format!("no address found for {}", config.host))
            })?;

        // TCP 连接
        sink.log(LogEntry::info(format!("[SSH] Connecting to {}...", socket_addr)));
        let connect_timeout = config.connection_timeout_duration();
        let tcp_stream = timeout(connect_timeout, TcpStream::connect(socket_addr))
            .await
            .map_err(|_| {
                SshError::ConnectionTimeout(format!(
                    "TCP connect to {} timed out after {}s",
                    socket_addr, config.connection_timeout
                ))
            })?
            .map_err(|e| SshError::ConnectionFailed(format!("{}: {}", socket_addr, e)))?;
        sink.log(LogEntry::debug("[SSH] TCP connection established"));

        // SSH 握手
        if config.compression {
            sink.log(LogEntry::debug(
                "[SSH] Compression requested; negotiated by the transport defaults",
            ));
        }
        let russh_config = Arc::new(config.to_russh_config());
        let handler = SshClientHandler::new(
            sink.clone(),
            config.address(),
            config.host_key_policy.clone(),
        );

        let mut handle = timeout(
            connect_timeout,
            russh::client::connect_stream(russh_config, tcp_stream, handler),
        )
        .await
        .map_err(|_| {
            SshError::ConnectionTimeout(format!(
                "SSH handshake with {} timed out after {}s",
                socket_addr, config.connection_timeout
            ))
        })?
        .map_err(SshError::from)?;
        sink.log(LogEntry::debug("[SSH] SSH handshake completed"));

        // 认证
        sink.log(LogEntry::info(format!(
            "[SSH] Authenticating as '{}' ({})...",
            username,
            auth.kind()
        )));
        timeout(connect_timeout, authenticate(&mut handle, username, auth, &sink))
            .await
            .map_err(|_| {
                SshError::AuthenticationTimeout(format!(
                    "authentication did not finish within {}s",
                    config.connection_timeout
                ))
            })??;
        sink.log(LogEntry::info("[SSH] Authentication successful"));

        Ok(Arc::new(RusshHandle::new(
            handle,
            config.data_timeout_duration(),
            sink,
        )))
    }
}

/// 执行认证
async fn authenticate(
    handle: &mut Handle<SshClientHandler>,
    username: &str,
    auth: &AuthMethod,
    sink: &Arc<dyn LogSink>,
) -> Result<(), SshError> {
    let result = match auth {
        AuthMethod::Password(password) => {
            sink.log(LogEntry::debug("[SSH] Using password authentication"));
            handle
                .authenticate_password(username, password)
                .await
                .map_err(SshError::from)?
        }
        AuthMethod::PublicKey {
            key_path,
            passphrase,
        } => {
            sink.log(LogEntry::debug(format!(
                "[SSH] Using public key authentication: {:?}",
                key_path
            )));
            let key = load_private_key(key_path, passphrase.as_deref()).await?;
            let hash_alg = handle
                .best_supported_rsa_hash()
                .await
                .map_err(SshError::from)?
                .flatten();
            let key_with_alg = russh::keys::PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg);
            handle
                .authenticate_publickey(username, key_with_alg)
                .await
                .map_err(SshError::from)?
        }
    };

    match result {
        AuthResult::Success => Ok(()),
        AuthResult::Failure {
            remaining_methods,
            partial_success,
        } => {
            if partial_success {
                return Err(SshError::AuthenticationFailed(
                    "partial authentication - additional methods required".to_string(),
                ));
            }
            Err(SshError::AuthenticationFailed(format!(
                "{} authentication rejected for '{}'. Server suggests: {:?}",
                auth.kind(),
                username,
                remaining_methods
            )))
        }
    }
}

/// 加载私钥文件
pub async fn load_private_key(
    key_path: &Path,
    passphrase: Option<&str>,
) -> Result<russh::keys::PrivateKey, SshError> {
    let key_data = tokio::fs::read(key_path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => SshError::KeyNotFound(key_path.display().to_string()),
        _ => SshError::KeyInvalid(format!("failed to read {}: {}", key_path.display(), e)),
    })?;

    russh::keys::decode_secret_key(&String::from_utf8_lossy(&key_data), passphrase)
        .map_err(SshError::from)
}
