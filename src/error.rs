//! 错误类型定义
//!
//! 提供块缓存和块设备操作的错误类型。

use core::fmt;

/// 缓存操作错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: &'static str,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// I/O 错误（来自块设备）
    Io,
    /// 无效参数（块号越界、数据长度不等于块大小等）
    InvalidInput,
    /// 等待其他线程的 I/O 超时
    Timeout,
    /// 权限错误（写只读设备）
    PermissionDenied,
}

impl Error {
    /// 创建新错误
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self { kind, message }
    }

    /// 获取错误类型
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 获取错误消息
    pub const fn message(&self) -> &'static str {
        self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

/// 设备 I/O 错误一律归为 `ErrorKind::Io`
///
/// `Timeout` 只用于等待其他线程的 I/O 超时，`PermissionDenied` 只用于只读检查，
/// 不能与设备错误混淆。
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        log::warn!("[DEVICE] I/O error ({:?}): {}", err.kind(), err);
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                Error::new(ErrorKind::Io, "Unexpected end of device")
            }
            _ => Error::new(ErrorKind::Io, "Device I/O failed"),
        }
    }
}

/// Result 类型别名
pub type Result<T> = core::result::Result<T, Error>;
