//! 缓存配置

use crate::consts::{DEFAULT_BLOCK_SIZE, DEFAULT_CACHE_SIZE};
use crate::error::{Error, ErrorKind, Result};
use core::time::Duration;

/// 缓存配置
///
/// 构造后在缓存的整个生命周期内保持不变。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// 缓存槽数量
    pub capacity: usize,
    /// 块大小（字节）
    pub block_size: usize,
    /// 等待其他线程 I/O 完成的最长时间，None 表示无限等待
    ///
    /// 同一次 read/write/flush 中的所有等待共用一个截止时间。
    pub wait_timeout: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
            wait_timeout: None,
        }
    }
}

impl CacheConfig {
    /// 指定容量和块大小，其余取默认值
    pub fn new(capacity: usize, block_size: usize) -> Self {
        Self {
            capacity,
            block_size,
            ..Self::default()
        }
    }

    /// 设置等待超时
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// 检查配置是否有效
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "Cache capacity must be non-zero"));
        }
        if self.block_size == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "Block size must be non-zero"));
        }
        Ok(())
    }
}
