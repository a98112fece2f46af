// 命令执行结果

use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::ssh::error::SshError;

/// 传输失败时使用的退出码
pub const FAILURE_EXIT_CODE: i32 = -1;

/// 耗时上限（秒），约 100 年
pub const MAX_EXECUTION_TIME: f64 = 100.0 * 365.0 * 24.0 * 3600.0;

/// 命令执行结果
///
/// 构建后不可变。相等性只比较 (command, exit_code, stdout, stderr)，不比较时间戳。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CommandResult {
    command: String,
    exit_code: i32,
    stdout: String,
    stderr: String,
    /// 执行耗时（秒）
    execution_time: f64,
    #[serde(with = "timestamp")]
    start_time: DateTime<Utc>,
    #[serde(with = "timestamp")]
    end_time: DateTime<Utc>,
}

impl CommandResult {
    /// 由起止时间构建，耗时 = end - start
    pub fn timed(
        command: impl Into<String>,
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        let execution_time = (end_time - start_time)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            command: command.into(),
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            execution_time,
            start_time,
            end_time,
        }
    }

    /// 以当前时间为结束时间，按耗时倒推开始时间
    pub fn new(
        command: impl Into<String>,
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        execution_time: f64,
    ) -> Self {
        // 非有限值按 0 处理，过大的耗时截断，保证时间戳可表示且 JSON 可还原
        let mut execution_time = if execution_time.is_finite() {
            execution_time.clamp(0.0, MAX_EXECUTION_TIME)
        } else {
            0.0
        };
        let end_time = Utc::now();
        let start_time = end_time
            .checked_sub_signed(ChronoDuration::microseconds((execution_time * 1e6) as i64))
            .unwrap_or_else(|| {
                execution_time = 0.0;
                end_time
            });
        Self {
            command: command.into(),
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            execution_time,
            start_time,
            end_time,
        }
    }

    /// 成功结果（退出码 0）
    pub fn success(command: impl Into<String>, output: impl Into<String>, execution_time: f64) -> Self {
        Self::new(command, 0, output, String::new(), execution_time)
    }

    /// 失败结果
    pub fn failure(
        command: impl Into<String>,
        exit_code: i32,
        error: impl Into<String>,
        execution_time: f64,
    ) -> Self {
        Self::new(command, exit_code, String::new(), error, execution_time)
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// 执行耗时（秒）
    pub fn execution_time(&self) -> f64 {
        self.execution_time
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    /// 检查命令是否成功
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn has_output(&self) -> bool {
        !self.stdout.is_empty()
    }

    pub fn has_error(&self) -> bool {
        !self.stderr.is_empty()
    }

    /// stdout 与 stderr 拼接
    pub fn combined_output(&self) -> String {
        match (self.has_output(), self.has_error()) {
            (true, true) => format!("{}\n{}", self.stdout, self.stderr),
            (true, false) => self.stdout.clone(),
            (false, _) => self.stderr.clone(),
        }
    }

    /// 序列化为 JSON
    pub fn to_json(&self) -> Result<String, SshError> {
        serde_json::to_string(self).map_err(|e| SshError::InvalidData(e.to_string()))
    }

    /// 从 JSON 恢复，格式错误时返回 None
    pub fn restore(json: &str) -> Option<Self> {
        serde_json::from_str(json).ok()
    }
}

impl PartialEq for CommandResult {
    fn eq(&self, other: &Self) -> bool {
        self.command == other.command
            && self.exit_code == other.exit_code
            && self.stdout == other.stdout
            && self.stderr == other.stderr
    }
}

impl Eq for CommandResult {}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "`{}` exited with {} in {:.3}s",
            self.command, self.exit_code, self.execution_time
        )
    }
}

/// RFC 3339 UTC 毫秒精度时间戳，如 `2024-01-02T03:04:05.678Z`
mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
