//! bufcache_core: 多线程固定容量块缓存
//!
//! 位于块设备之前的写回式 LRU 缓存：
//! - 内存占用固定为 `capacity` 个块
//! - 多个线程可以同时按块号读写
//! - 设备 I/O 全部在锁外进行
//! - 同一块号的并发未命中只会触发一次设备读取
//!
//! # 示例
//!
//! ```rust,ignore
//! use bufcache_core::{BufferCache, MemoryDevice, Result};
//!
//! fn main() -> Result<()> {
//!     let device = MemoryDevice::new(512, 1024)?;
//!     let cache = BufferCache::new(device, 256, 512)?;
//!
//!     cache.write(0, &[0x42; 512])?;
//!     let data = cache.read(0)?;
//!     assert_eq!(data[0], 0x42);
//!
//!     cache.flush_all()?;
//!     Ok(())
//! }
//! ```
//!
//! # 模块结构
//!
//! - [`error`] - 错误类型定义
//! - [`block`] - 块设备抽象
//! - [`consts`] - 常量定义
//! - [`cache`] - 块缓存

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

// ===== 核心模块 =====

/// 错误处理
pub mod error;

/// 块设备抽象
pub mod block;

/// 常量定义
pub mod consts;

/// 块缓存
pub mod cache;

// ===== 公共导出 =====

// 错误处理
pub use error::{Error, ErrorKind, Result};

// 块设备
pub use block::{BlockDevice, MemoryDevice};
#[cfg(unix)]
pub use block::FileDevice;

// Cache
pub use cache::{BufferCache, CacheConfig, CacheStats};
pub use consts::{DEFAULT_BLOCK_SIZE, DEFAULT_CACHE_SIZE};
