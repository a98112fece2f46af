// SFTP 服务 - 封装 russh-sftp 客户端

use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{FileAttributes, OpenFlags};
use tracing::{debug, info};

use super::path::{file_name, join_path};
use crate::models::sftp::{format_permissions, FileType, RemoteEntry};
use crate::ssh::error::SshError;
use crate::ssh::transport::{RemoteReader, RemoteWriter, SftpBackend};

/// russh-sftp 实现的 SFTP 原语
pub struct RusshSftp {
    /// russh-sftp 客户端会话
    sftp: SftpSession,
}

impl RusshSftp {
    pub fn new(sftp: SftpSession) -> Self {
        Self { sftp }
    }
}

/// 从服务器拿到的原始属性，各字段都可能缺失
#[derive(Debug, Clone, Copy, Default)]
struct RawAttrs {
    size: Option<u64>,
    permissions: Option<u32>,
    uid: Option<u32>,
    gid: Option<u32>,
    atime: Option<u32>,
    mtime: Option<u32>,
    is_dir: bool,
    is_symlink: bool,
}

impl From<&FileAttributes> for RawAttrs {
    fn from(attrs: &FileAttributes) -> Self {
        Self {
            size: attrs.size,
            permissions: attrs.permissions.map(|p| p as u32),
            uid: attrs.uid,
            gid: attrs.gid,
            atime: attrs.atime.map(|t| t as u32),
            mtime: attrs.mtime.map(|t| t as u32),
            is_dir: attrs.is_dir(),
            is_symlink: attrs.is_symlink(),
        }
    }
}

impl RawAttrs {
    /// 转换为目录条目，缺失的属性使用默认值
    fn into_entry(self, name: &str, path: String) -> RemoteEntry {
        // 优先使用模式位中的类型，服务器不给类型位时退回到 is_dir / is_symlink
        let file_type = match self.permissions.map(FileType::from_mode) {
            Some(file_type) if file_type != FileType::Unknown => file_type,
            _ if self.is_dir => FileType::Directory,
            _ if self.is_symlink => FileType::Symlink,
            _ if self.size.is_some() => FileType::File,
            _ => FileType::Unknown,
        };

        let mut entry = RemoteEntry::new(name, path, file_type);
        if let Some(size) = self.size {
            entry.size = size;
        }
        if let Some(perms) = self.permissions {
            entry.permissions = format_permissions(perms & 0o7777);
        }
        if let Some(uid) = self.uid {
            entry.owner = uid.to_string();
        }
        if let Some(gid) = self.gid {
            entry.group = gid.to_string();
        }
        entry.modified = self
            .mtime
            .map(|t| UNIX_EPOCH + Duration::from_secs(t as u64));
        entry.accessed = self
            .atime
            .map(|t| UNIX_EPOCH + Duration::from_secs(t as u64));
        entry.metadata_degraded =
            self.size.is_none() || self.permissions.is_none() || self.uid.is_none();
        entry
    }
}

/// 目录操作错误：保留“不存在 / 无权限 / 连接断开”，其余归为目录操作失败
fn dir_error(op: &str, path: &str, err: russh_sftp::client::error::Error) -> SshError {
    match SshError::from(err) {
        e @ (SshError::FileNotFound(_) | SshError::AccessDenied(_) | SshError::ConnectionLost(_)) => e,
        other => SshError::DirectoryOperationFailed(format!("{} {}: {}", op, path, other.detail())),
    }
}

#[async_trait]
impl SftpBackend for RusshSftp {
    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, SshError> {
        debug!("[SFTP] Reading directory: {}", path);

        let dir = self
            .sftp
            .read_dir(path)
            .await
            .map_err(|e| dir_error("read", path, e))?;

        let entries: Vec<RemoteEntry> = dir
            .map(|entry| {
                let name = entry.file_name();
                let full_path = join_path(path, &name);
                RawAttrs::from(&entry.metadata()).into_entry(&name, full_path)
            })
            .collect();

        debug!("[SFTP] Read {} entries from {}", entries.len(), path);
        Ok(entries)
    }

    async fn create_dir(&self, path: &str) -> Result<(), SshError> {
        info!("[SFTP] Creating directory: {}", path);
        self.sftp
            .create_dir(path)
            .await
            .map_err(|e| dir_error("mkdir", path, e))
    }

    async fn remove_dir(&self, path: &str) -> Result<(), SshError> {
        info!("[SFTP] Removing directory: {}", path);
        self.sftp
            .remove_dir(path)
            .await
            .map_err(|e| dir_error("rmdir", path, e))
    }

    async fn remove_file(&self, path: &str) -> Result<(), SshError> {
        info!("[SFTP] Removing file: {}", path);
        self.sftp.remove_file(path).await.map_err(SshError::from)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), SshError> {
        info!("[SFTP] Renaming {} -> {}", from, to);
        self.sftp.rename(from, to).await.map_err(SshError::from)
    }

    async fn canonicalize(&self, path: &str) -> Result<String, SshError> {
        let resolved = self.sftp.canonicalize(path).await.map_err(SshError::from)?;
        debug!("[SFTP] Resolved {} -> {}", path, resolved);
        Ok(resolved)
    }

    async fn metadata(&self, path: &str) -> Result<RemoteEntry, SshError> {
        debug!("[SFTP] Getting stat for: {}", path);
        let attrs = self.sftp.metadata(path).await.map_err(SshError::from)?;
        Ok(RawAttrs::from(&attrs).into_entry(file_name(path), path.to_string()))
    }

    async fn open_read(&self, path: &str) -> Result<RemoteReader, SshError> {
        let file = self.sftp.open(path).await.map_err(SshError::from)?;
        Ok(Box::new(file))
    }

    async fn open_write(&self, path: &str) -> Result<RemoteWriter, SshError> {
        let file = self
            .sftp
            .open_with_flags(path, OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE)
            .await
            .map_err(SshError::from)?;
        Ok(Box::new(file))
    }

    async fn close(&self) -> Result<(), SshError> {
        info!("[SFTP] Closing SFTP session");
        self.sftp.close().await.map_err(SshError::from)
    }
}
