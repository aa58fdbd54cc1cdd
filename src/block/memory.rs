//! 内存块设备
//!
//! 用一段连续内存模拟磁盘，主要用于测试和演示。

use super::BlockDevice;
use crate::error::{Error, ErrorKind, Result};
use parking_lot::RwLock;

/// 内存块设备
pub struct MemoryDevice {
    block_size: u32,
    total_blocks: u64,
    storage: RwLock<Vec<u8>>,
    read_only: bool,
}

impl MemoryDevice {
    /// 创建全零的内存设备
    ///
    /// # 参数
    ///
    /// * `block_size` - 块大小（字节）
    /// * `total_blocks` - 总块数
    pub fn new(block_size: u32, total_blocks: u64) -> Result<Self> {
        if block_size == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "Block size must be non-zero"));
        }
        let len = usize::try_from(total_blocks)
            .ok()
            .and_then(|blocks| blocks.checked_mul(block_size as usize))
            .ok_or(Error::new(ErrorKind::InvalidInput, "Device too large for memory"))?;

        Ok(Self {
            block_size,
            total_blocks,
            storage: RwLock::new(vec![0u8; len]),
            read_only: false,
        })
    }

    /// 创建只读副本
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    fn range(&self, lba: u64, len: usize) -> Result<core::ops::Range<usize>> {
        if lba >= self.total_blocks {
            return Err(Error::new(ErrorKind::Io, "Block number out of range"));
        }
        if len != self.block_size as usize {
            return Err(Error::new(ErrorKind::InvalidInput, "Buffer length must equal block size"));
        }
        let start = lba as usize * self.block_size as usize;
        Ok(start..start + len)
    }
}

impl BlockDevice for MemoryDevice {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    fn read_block(&self, lba: u64, buf: &mut [u8]) -> Result<()> {
        let range = self.range(lba, buf.len())?;
        buf.copy_from_slice(&self.storage.read()[range]);
        Ok(())
    }

    fn write_block(&self, lba: u64, buf: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::new(ErrorKind::PermissionDenied, "Device is read-only"));
        }
        let range = self.range(lba, buf.len())?;
        self.storage.write()[range].copy_from_slice(buf);
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

impl core::fmt::Debug for MemoryDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemoryDevice")
            .field("block_size", &self.block_size)
            .field("total_blocks", &self.total_blocks)
            .field("read_only", &self.read_only)
            .finish()
    }
}
