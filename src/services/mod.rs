// 服务层

pub mod sftp;
