// SSH 连接配置

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::SshError;

/// 默认 SSH 端口
pub const DEFAULT_PORT: u32 = 22;
/// 默认客户端标识
pub const DEFAULT_CLIENT_ID: &str = concat!("SSH-2.0-sshkit_", env!("CARGO_PKG_VERSION"));
/// 唯一支持的协议版本
pub const PROTOCOL_VERSION: &str = "2.0";

/// SSH 连接配置
///
/// 不可变值：构建后通过 [`SshConfig::validate`] 校验，校验在第一个不满足的约束处失败。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// 目标主机
    pub host: String,
    /// 端口（用 u32 存储，越界值可以被表示并在校验时拒绝）
    pub port: u32,
    /// 连接超时（秒），覆盖 TCP 连接和 SSH 握手
    pub connection_timeout: u64,
    /// 数据超时（秒），单次通道读取的最长等待时间
    pub data_timeout: u64,
    /// 协议版本
    pub protocol_version: String,
    /// 客户端标识
    pub client_id: String,
    /// 是否启用压缩
    pub compression: bool,
    /// 心跳配置
    pub keepalive: KeepaliveConfig,
    /// 主机密钥策略
    pub host_key_policy: HostKeyPolicy,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            connection_timeout: 30,
            data_timeout: 60,
            protocol_version: PROTOCOL_VERSION.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            compression: false,
            keepalive: KeepaliveConfig::default(),
            host_key_policy: HostKeyPolicy::default(),
        }
    }
}

/// 认证方式
#[derive(Clone, Debug)]
pub enum AuthMethod {
    /// 密码认证
    Password(String),
    /// 公钥认证
    PublicKey {
        /// 私钥文件路径
        key_path: PathBuf,
        /// 私钥密码（如果有）
        passphrase: Option<String>,
    },
}

impl AuthMethod {
    /// 密码认证
    pub fn password(password: impl Into<String>) -> Self {
        AuthMethod::Password(password.into())
    }

    /// 私钥文件认证
    pub fn key_file(key_path: impl Into<PathBuf>, passphrase: Option<&str>) -> Self {
        AuthMethod::PublicKey {
            key_path: key_path.into(),
            passphrase: passphrase.map(str::to_string),
        }
    }

    /// 用于日志的认证方式名称（不含凭据）
    pub fn kind(&self) -> &'static str {
        match self {
            AuthMethod::Password(_) => "password",
            AuthMethod::PublicKey { .. } => "publickey",
        }
    }
}

/// 心跳配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    /// 心跳间隔（秒），0 表示禁用
    pub interval: u64,
    /// 最大重试次数
    pub max_retries: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: 0,
            max_retries: 3,
        }
    }
}

impl KeepaliveConfig {
    /// 是否启用心跳
    pub fn is_enabled(&self) -> bool {
        self.interval > 0
    }
}

/// 主机密钥策略
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// 接受任意主机密钥
    #[default]
    AcceptAny,
    /// 只接受列出的 SHA256 指纹（`SHA256:...` 格式）
    Fingerprints(Vec<String>),
}

impl SshConfig {
    /// 创建指定主机和端口的配置，其余字段取默认值
    pub fn new(host: impl Into<String>, port: u32) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_connection_timeout(mut self, secs: u64) -> Self {
        self.connection_timeout = secs;
        self
    }

    pub fn with_data_timeout(mut self, secs: u64) -> Self {
        self.data_timeout = secs;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    pub fn with_keepalive_interval(mut self, secs: u64) -> Self {
        self.keepalive.interval = secs;
        self
    }

    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    /// 校验配置，返回第一个不满足的约束
    pub fn validate(&self) -> Result<(), SshError> {
        if self.host.trim().is_empty() {
            return Err(SshError::InvalidConfiguration(
                "host must not be empty".to_string(),
            ));
        }
        if !(1..=65535).contains(&self.port) {
            return Err(SshError::InvalidConfiguration(format!(
                "port must be between 1 and 65535, got {}",
                self.port
            )));
        }
        if self.connection_timeout == 0 {
            return Err(SshError::InvalidConfiguration(
                "connection timeout must be greater than 0".to_string(),
            ));
        }
        if self.data_timeout == 0 {
            return Err(SshError::InvalidConfiguration(
                "data timeout must be greater than 0".to_string(),
            ));
        }
        if self.protocol_version != PROTOCOL_VERSION {
            return Err(SshError::InvalidConfiguration(format!(
                "unsupported protocol version '{}', only {} is supported",
                self.protocol_version, PROTOCOL_VERSION
            )));
        }
        if !self.client_id.starts_with("SSH-2.0-") || self.client_id.len() <= "SSH-2.0-".len() {
            return Err(SshError::InvalidConfiguration(format!(
                "client identifier '{}' must start with 'SSH-2.0-'",
                self.client_id
            )));
        }
        if let HostKeyPolicy::Fingerprints(list) = &self.host_key_policy {
            if list.is_empty() {
                return Err(SshError::InvalidConfiguration(
                    "host key fingerprint list must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// 校验并返回自身
    pub fn validated(self) -> Result<Self, SshError> {
        self.validate()?;
        Ok(self)
    }

    /// 从 JSON 解析配置（解析后立即校验）
    pub fn from_json_str(json: &str) -> Result<Self, SshError> {
        let config: SshConfig = serde_json::from_str(json)
            .map_err(|e| SshError::InvalidConfiguration(format!("malformed config: {}", e)))?;
        config.validated()
    }

    /// 校验过的端口
    pub fn port_u16(&self) -> Result<u16, SshError> {
        u16::try_from(self.port).ok().filter(|p| *p != 0).ok_or_else(|| {
            SshError::InvalidConfiguration(format!(
                "port must be between 1 and 65535, got {}",
                self.port
            ))
        })
    }

    /// `host:port` 形式的地址
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connection_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }

    pub fn data_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.data_timeout)
    }
}

/// russh 客户端配置构建
impl SshConfig {
    /// 构建 russh 配置
    pub fn to_russh_config(&self) -> russh::client::Config {
        let mut config = russh::client::Config::default();
        // 数据超时在每次通道读取时单独计时，空闲连接不应被断开
        config.inactivity_timeout = None;
        config.client_id = russh::SshId::Standard(self.client_id.clone());
        if self.keepalive.is_enabled() {
            config.keepalive_interval = Some(Duration::from_secs(self.keepalive.interval));
            config.keepalive_max = self.keepalive.max_retries as usize;
        }
        config
    }
}
