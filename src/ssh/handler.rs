// SSH 客户端 Handler 实现
// 实现 russh::client::Handler trait

use std::future::Future;
use std::sync::Arc;

use russh::keys::PublicKey;

use super::config::HostKeyPolicy;
use super::event::{LogEntry, LogSink};

/// SSH 客户端 Handler
/// 按主机密钥策略检查服务器公钥
pub struct SshClientHandler {
    /// 日志接收器
    sink: Arc<dyn LogSink>,
    /// 服务器地址（用于日志）
    address: String,
    /// 主机密钥策略
    policy: HostKeyPolicy,
}

impl SshClientHandler {
    /// 创建新的 Handler
    pub fn new(sink: Arc<dyn LogSink>, address: String, policy: HostKeyPolicy) -> Self {
        Self {
            sink,
            address,
            policy,
        }
    }
}

/// 指纹是否被策略接受
pub fn fingerprint_allowed(policy: &HostKeyPolicy, fingerprint: &str) -> bool {
    match policy {
        HostKeyPolicy::AcceptAny => true,
        HostKeyPolicy::Fingerprints(allowed) => allowed.iter().any(|f| f.trim() == fingerprint),
    }
}

impl russh::client::Handler for SshClientHandler {
    type Error = russh::Error;

    /// 检查服务器公钥
    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        let fingerprint = server_public_key
            .fingerprint(russh::keys::ssh_key::HashAlg::Sha256)
            .to_string();

        self.sink.log(LogEntry::debug(format!(
            "[SSH] Server key for {}: {} {}",
            self.address,
            server_public_key.algorithm(),
            fingerprint
        )));

        let accepted = fingerprint_allowed(&self.policy, &fingerprint);
        if !accepted {
            self.sink.log(LogEntry::error(format!(
                "[SSH] Host key {} for {} is not in the trusted list",
                fingerprint, self.address
            )));
        }

        async move { Ok(accepted) }
    }
}
