//! 文件块设备
//!
//! 使用 `pread`/`pwrite` 风格的定位 I/O（`std::os::unix::fs::FileExt`），
//! 不依赖共享的文件偏移，因此多个线程可以同时读写不同的块。

use super::BlockDevice;
use crate::error::{Error, ErrorKind, Result};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

/// 文件块设备
#[derive(Debug)]
pub struct FileDevice {
    file: File,
    block_size: u32,
    total_blocks: u64,
    writable: bool,
}

impl FileDevice {
    /// 打开已有的镜像文件
    ///
    /// 优先以读写方式打开，失败时退回只读。
    /// 文件长度必须是块大小的整数倍。
    pub fn open(path: impl AsRef<Path>, block_size: u32) -> Result<Self> {
        if block_size == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "Block size must be non-zero"));
        }
        let path = path.as_ref();
        let (file, writable) = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map(|file| (file, true))
            .or_else(|_| OpenOptions::new().read(true).open(path).map(|file| (file, false)))?;

        let len = file.metadata()?.len();
        if len % u64::from(block_size) != 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Image length must be a multiple of block size",
            ));
        }
        let total_blocks = len / u64::from(block_size);
        log::debug!(
            "[DEVICE] open {:?}: {} blocks x {} bytes, writable={}",
            path,
            total_blocks,
            block_size,
            writable
        );

        Ok(Self {
            file,
            block_size,
            total_blocks,
            writable,
        })
    }

    /// 创建（或截断）一个全零的镜像文件
    pub fn create(path: impl AsRef<Path>, block_size: u32, total_blocks: u64) -> Result<Self> {
        if block_size == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "Block size must be non-zero"));
        }
        let len = total_blocks
            .checked_mul(u64::from(block_size))
            .ok_or(Error::new(ErrorKind::InvalidInput, "Image size overflows u64"))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        file.set_len(len)?;

        Ok(Self {
            file,
            block_size,
            total_blocks,
            writable: true,
        })
    }

    fn offset(&self, lba: u64, len: usize) -> Result<u64> {
        if lba >= self.total_blocks {
            return Err(Error::new(ErrorKind::Io, "Block number out of range"));
        }
        if len != self.block_size as usize {
            return Err(Error::new(ErrorKind::InvalidInput, "Buffer length must equal block size"));
        }
        Ok(lba * u64::from(self.block_size))
    }
}

impl BlockDevice for FileDevice {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    fn read_block(&self, lba: u64, buf: &mut [u8]) -> Result<()> {
        let offset = self.offset(lba, buf.len())?;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_block(&self, lba: u64, buf: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(Error::new(ErrorKind::PermissionDenied, "Device is read-only"));
        }
        let offset = self.offset(lba, buf.len())?;
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        if self.writable {
            self.file.sync_all()?;
        }
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        !self.writable
    }
}
