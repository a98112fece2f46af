// SFTP 基础数据类型

use std::time::SystemTime;

/// 无法获取权限时的默认权限字符串
pub const DEFAULT_PERMISSIONS: &str = "---------";
/// 无法获取属主 / 属组时的默认值
pub const DEFAULT_OWNER: &str = "unknown";

/// 文件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileType {
    /// 普通文件
    #[default]
    File,
    /// 目录
    Directory,
    /// 符号链接
    Symlink,
    /// 块设备
    BlockDevice,
    /// 字符设备
    CharDevice,
    /// 命名管道
    Fifo,
    /// 套接字
    Socket,
    /// 未知类型
    Unknown,
}

impl FileType {
    /// 从 Unix 模式位（st_mode）中的 S_IFMT 部分判断类型
    pub fn from_mode(mode: u32) -> Self {
        match mode & 0o170000 {
            0o140000 => FileType::Socket,
            0o120000 => FileType::Symlink,
            0o100000 => FileType::File,
            0o060000 => FileType::BlockDevice,
            0o040000 => FileType::Directory,
            0o020000 => FileType::CharDevice,
            0o010000 => FileType::Fifo,
            _ => FileType::Unknown,
        }
    }

    /// `ls -l` 风格的类型标识
    pub fn indicator(&self) -> char {
        match self {
            FileType::File => '-',
            FileType::Directory => 'd',
            FileType::Symlink => 'l',
            FileType::BlockDevice => 'b',
            FileType::CharDevice => 'c',
            FileType::Fifo => 'p',
            FileType::Socket => 's',
            FileType::Unknown => '?',
        }
    }
}

/// 远程目录条目
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntry {
    /// 文件名
    pub name: String,
    /// 完整路径
    pub path: String,
    /// 文件大小（字节）
    pub size: u64,
    /// 文件类型
    pub file_type: FileType,
    /// 权限字符串（如 rwxr-xr-x）
    pub permissions: String,
    /// 属主
    pub owner: String,
    /// 属组
    pub group: String,
    /// 修改时间
    pub modified: Option<SystemTime>,
    /// 访问时间
    pub accessed: Option<SystemTime>,
    /// 创建时间（SFTP v3 不提供）
    pub created: Option<SystemTime>,
    /// 属性是否缺失（size / permissions / owner 为默认值）
    pub metadata_degraded: bool,
}

impl RemoteEntry {
    /// 创建只有名称和路径的条目，其余属性取默认值并标记为降级
    pub fn new(name: impl Into<String>, path: impl Into<String>, file_type: FileType) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            size: 0,
            file_type,
            permissions: DEFAULT_PERMISSIONS.to_string(),
            owner: DEFAULT_OWNER.to_string(),
            group: DEFAULT_OWNER.to_string(),
            modified: None,
            accessed: None,
            created: None,
            metadata_degraded: true,
        }
    }

    /// 是否是目录
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    /// 是否是文件
    pub fn is_file(&self) -> bool {
        self.file_type == FileType::File
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type == FileType::Symlink
    }

    /// 是否是隐藏文件（以 . 开头）
    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('.')
    }

    /// `ls -l` 风格的模式字符串，如 `drwxr-xr-x`
    pub fn mode_string(&self) -> String {
        format!("{}{}", self.file_type.indicator(), self.permissions)
    }

    /// 格式化文件大小
    pub fn format_size(&self) -> String {
        if self.is_dir() {
            return "-".to_string();
        }
        format_bytes(self.size)
    }
}

/// 把权限位格式化为 9 位权限字符串（如 rwxr-xr-x）
pub fn format_permissions(perms: u32) -> String {
    let mut s = String::with_capacity(9);

    // 所有者权限
    s.push(if perms & 0o400 != 0 { 'r' } else { '-' });
    s.push(if perms & 0o200 != 0 { 'w' } else { '-' });
    s.push(match (perms & 0o100 != 0, perms & 0o4000 != 0) {
        (true, true) => 's',
        (false, true) => 'S',
        (true, false) => 'x',
        (false, false) => '-',
    });

    // 组权限
    s.push(if perms & 0o040 != 0 { 'r' } else { '-' });
    s.push(if perms & 0o020 != 0 { 'w' } else { '-' });
    s.push(match (perms & 0o010 != 0, perms & 0o2000 != 0) {
        (true, true) => 's',
        (false, true) => 'S',
        (true, false) => 'x',
        (false, false) => '-',
    });

    // 其他用户权限
    s.push(if perms & 0o004 != 0 { 'r' } else { '-' });
    s.push(if perms & 0o002 != 0 { 'w' } else { '-' });
    s.push(match (perms & 0o001 != 0, perms & 0o1000 != 0) {
        (true, true) => 't',
        (false, true) => 'T',
        (true, false) => 'x',
        (false, false) => '-',
    });

    s
}

/// 格式化字节数
pub fn format_bytes(bytes: u64) -> String {
    let size = bytes as f64;
    if size >= 1_073_741_824.0 {
        format!("{:.1} GB", size / 1_073_741_824.0)
    } else if size >= 1_048_576.0 {
        format!("{:.1} MB", size / 1_048_576.0)
    } else if size >= 1_024.0 {
        format!("{:.1} KB", size / 1_024.0)
    } else {
        format!("{} B", bytes)
    }
}
