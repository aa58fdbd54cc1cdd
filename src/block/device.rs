//! 块设备核心类型

use crate::error::Result;
use std::sync::Arc;

/// 块设备接口
///
/// 缓存背后的后备存储。所有操作都是阻塞的，并且可能被多个线程同时调用，
/// 因此方法接收 `&self`，由实现者自行保证内部同步。
///
/// # 示例
///
/// ```rust,ignore
/// use bufcache_core::{BlockDevice, Result};
///
/// struct MyDevice {
///     // ...
/// }
///
/// impl BlockDevice for MyDevice {
///     fn block_size(&self) -> u32 {
///         512
///     }
///
///     fn total_blocks(&self) -> u64 {
///         1024
///     }
///
///     fn read_block(&self, lba: u64, buf: &mut [u8]) -> Result<()> {
///         // 实现块读取
///         Ok(())
///     }
///
///     fn write_block(&self, lba: u64, buf: &[u8]) -> Result<()> {
///         // 实现块写入
///         Ok(())
///     }
/// }
/// ```
pub trait BlockDevice: Send + Sync {
    /// 块大小（字节）
    fn block_size(&self) -> u32;

    /// 总块数
    fn total_blocks(&self) -> u64;

    /// 读取一个块
    ///
    /// # 参数
    ///
    /// * `lba` - 块号
    /// * `buf` - 目标缓冲区（长度等于 block_size）
    ///
    /// 块号越界或介质不可用时返回 `ErrorKind::Io`
    fn read_block(&self, lba: u64, buf: &mut [u8]) -> Result<()>;

    /// 写入一个块
    ///
    /// 成功返回后，后续对同一块号的读取必须返回这些数据。
    fn write_block(&self, lba: u64, buf: &[u8]) -> Result<()>;

    /// 刷新设备自身的缓存到稳定存储
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// 是否只读
    fn is_read_only(&self) -> bool {
        false
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for Arc<T> {
    fn block_size(&self) -> u32 {
        (**self).block_size()
    }

    fn total_blocks(&self) -> u64 {
        (**self).total_blocks()
    }

    fn read_block(&self, lba: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_block(lba, buf)
    }

    fn write_block(&self, lba: u64, buf: &[u8]) -> Result<()> {
        (**self).write_block(lba, buf)
    }

    fn flush(&self) -> Result<()> {
        (**self).flush()
    }

    fn is_read_only(&self) -> bool {
        (**self).is_read_only()
    }
}
