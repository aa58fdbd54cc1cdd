//! 块缓存模块
//!
//! 这个模块提供了多线程共享的固定容量写回式块缓存。
//!
//! # 主要组件
//!
//! - [`BufferCache`] - 块缓存管理器，使用 lru crate 维护最近使用顺序
//! - [`CacheConfig`] - 缓存配置
//! - [`CacheStats`] - 缓存统计信息
//!
//! 缓存槽（`CacheSlot` / `SlotFlags`）是内部类型，公共 API 只交换块数据的拷贝。
//!
//! # 设计原理
//!
//! 1. **单锁**：驻留槽、空槽、在途块号集合都放在同一个 `Mutex` 保护的结构里，
//!    不存在多把锁之间的加锁顺序问题
//! 2. **锁外 I/O**：未命中时先把牺牲槽从池中摘下独占，再释放锁做设备读写
//! 3. **去重**：同一块号同时只有一个线程做设备 I/O，其余线程在条件变量上等待后重试
//! 4. **写回**：写只修改缓存，脏块在驱逐或显式刷新时才写回设备
//!
//! # 功能完整性
//!
//! ✅ LRU 驱逐策略（lru crate 自动管理）
//! ✅ 脏块跟踪与写回
//! ✅ 并发未命中去重
//! ✅ 可选的等待超时
//! ✅ 单块刷新 / 全部刷新
//! ✅ 缓存统计信息
//!
//! # 使用示例
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bufcache_core::{BufferCache, MemoryDevice};
//!
//! let device = MemoryDevice::new(512, 4096)?;
//! let cache = Arc::new(BufferCache::new(device, 256, 512)?);
//!
//! let worker = {
//!     let cache = Arc::clone(&cache);
//!     std::thread::spawn(move || cache.write(10, &[1u8; 512]))
//! };
//! worker.join().unwrap()?;
//!
//! assert_eq!(cache.read(10)?, vec![1u8; 512]);
//! cache.flush_all()?;
//!
//! let stats = cache.stats();
//! println!("hits={} misses={} dirty={}", stats.hits, stats.misses, stats.dirty_blocks);
//! ```

mod buffer_cache;
mod config;
mod slot;

pub use buffer_cache::{BufferCache, CacheStats};
pub use config::CacheConfig;
pub(crate) use slot::{CacheSlot, SlotFlags};
