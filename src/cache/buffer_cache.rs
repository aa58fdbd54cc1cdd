//! 多线程块缓存实现
//!
//! # 架构
//!
//! ```text
//! struct PoolState {                      // 全部在同一把 Mutex 下
//!     resident: LruCache<u64, CacheSlot>, // 驻留槽，按最近使用排序
//!     free: VecDeque<CacheSlot>,          // 从未使用过的空槽（视为最旧）
//!     in_flight: HashSet<u64>,            // 正在从设备装入的块号
//!     writing_back: HashSet<u64>,         // 正在写回的脏牺牲槽的旧块号
//! }
//! ```
//!
//! 槽总数恒等于容量：驻留槽 + 空槽 + 被某个线程独占做 I/O 的槽。
//!
//! # 未命中流程
//!
//! 1. 持锁：选出牺牲槽（先用空槽，再用 LRU 槽），将目标块号加入 `in_flight`
//! 2. 解锁：牺牲槽若为脏，先写回旧块号；然后装入目标块（读）或直接覆盖（写）
//! 3. 持锁：槽以目标块号插入 MRU 端，移出 `in_flight`，唤醒所有等待者
//!
//! 同一块号上的其他线程看到它处于 `in_flight`/`writing_back` 时在条件变量上睡眠，
//! 醒来后从头重新检查，因此同一块号同一时刻至多有一个设备操作。

use super::{CacheConfig, CacheSlot};
use crate::{
    block::BlockDevice,
    error::{Error, ErrorKind, Result},
};

use lru::LruCache;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::{HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::time::Instant;

/// 缓存统计信息
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// 总访问次数
    pub total_accesses: u64,
    /// 缓存命中次数
    pub hits: u64,
    /// 缓存未命中次数
    pub misses: u64,
    /// 因其他线程 I/O 而等待的次数
    pub waits: u64,
    /// 等待超时次数
    pub timeouts: u64,
    /// 脏块写回次数
    pub writebacks: u64,
    /// 当前脏块数量
    pub dirty_blocks: usize,
}

impl CacheStats {
    /// 计算命中率
    pub fn hit_rate(&self) -> f64 {
        if self.total_accesses == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_accesses as f64
        }
    }
}

/// 受缓存锁保护的全部簿记状态
struct PoolState {
    resident: LruCache<u64, CacheSlot>,
    free: VecDeque<CacheSlot>,
    in_flight: HashSet<u64>,
    writing_back: HashSet<u64>,
    stats: CacheStats,
}

impl PoolState {
    /// 块号是否有设备 I/O 正在进行
    fn is_busy(&self, lba: u64) -> bool {
        self.in_flight.contains(&lba) || self.writing_back.contains(&lba)
    }

    /// 从池中取出牺牲槽，所有槽都被独占时返回 None
    fn claim_victim(&mut self) -> Option<CacheSlot> {
        if let Some(slot) = self.free.pop_front() {
            return Some(slot);
        }
        self.resident.pop_lru().map(|(_, slot)| slot)
    }

    /// 把一次失败操作的牺牲槽放回池中
    ///
    /// 旧块号仍然可用时以原身份放回 LRU 端；否则（空槽，或旧块号已被
    /// 其他线程重新装入）作为空槽放回。
    fn return_victim(&mut self, mut slot: CacheSlot) {
        match slot.block() {
            Some(old) if !self.is_busy(old) && !self.resident.contains(&old) => {
                self.resident.put(old, slot);
                self.resident.demote(&old);
            }
            _ => {
                debug_assert!(!slot.is_dirty(), "dirty slot must keep its identity");
                slot.flags = super::SlotFlags::empty();
                self.free.push_front(slot);
            }
        }
    }

    fn dirty_count(&self) -> usize {
        self.resident.iter().filter(|(_, slot)| slot.is_dirty()).count()
    }
}

/// 多线程块缓存
///
/// 固定容量、写回式、LRU 驱逐。所有方法接收 `&self`，可以通过 `Arc`
/// 在线程间共享。
///
/// 设备 I/O 永远不在缓存锁内进行：一个慢速的磁盘操作只会阻塞
/// 访问同一块号的线程，不影响其他块。
///
/// # 示例
///
/// ```rust,ignore
/// let device = MemoryDevice::new(512, 1024)?;
/// let cache = BufferCache::new(device, 256, 512)?;
///
/// cache.write(7, &[0xAA; 512])?;
/// assert_eq!(cache.read(7)?, vec![0xAA; 512]);
///
/// // 关闭前把脏块刷到设备
/// cache.flush_all()?;
/// ```
pub struct BufferCache<D: BlockDevice> {
    device: D,
    config: CacheConfig,
    state: Mutex<PoolState>,
    /// 每当有块号离开 `in_flight`/`writing_back` 或有槽回到池中时广播
    released: Condvar,
}

impl<D: BlockDevice> BufferCache<D> {
    /// 创建新的块缓存
    ///
    /// # 参数
    ///
    /// * `device` - 后备块设备
    /// * `capacity` - 缓存容量（块数量）
    /// * `block_size` - 块大小（字节），必须与设备块大小一致
    pub fn new(device: D, capacity: usize, block_size: usize) -> Result<Self> {
        Self::with_config(device, CacheConfig::new(capacity, block_size))
    }

    /// 使用默认配置创建块缓存（256 块，每块 512 字节）
    pub fn with_default_config(device: D) -> Result<Self> {
        Self::with_config(device, CacheConfig::default())
    }

    /// 使用指定配置创建块缓存
    pub fn with_config(device: D, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        if device.block_size() as usize != config.block_size {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Device block size does not match cache block size",
            ));
        }
        let capacity = NonZeroUsize::new(config.capacity)
            .ok_or(Error::new(ErrorKind::InvalidInput, "Cache capacity must be non-zero"))?;

        let free = (0..config.capacity)
            .map(|_| CacheSlot::empty(config.block_size))
            .collect();

        log::debug!(
            "[CACHE] created: capacity={} block_size={} wait_timeout={:?}",
            config.capacity,
            config.block_size,
            config.wait_timeout
        );

        Ok(Self {
            device,
            config,
            state: Mutex::new(PoolState {
                resident: LruCache::new(capacity),
                free,
                in_flight: HashSet::new(),
                writing_back: HashSet::new(),
                stats: CacheStats::default(),
            }),
            released: Condvar::new(),
        })
    }

    /// 读取一个块
    ///
    /// 返回的数据反映在本次调用开始之前完成的最近一次 `write`；
    /// 若从未通过本缓存写过，则为设备上的内容。
    pub fn read(&self, lba: u64) -> Result<Vec<u8>> {
        self.check_lba(lba)?;
        self.perform(
            lba,
            |slot| slot.data.clone(),
            |device, slot| {
                // 读入独立的缓冲区，失败时牺牲槽保持原样
                let mut fresh = vec![0u8; slot.data.len()];
                device.read_block(lba, &mut fresh)?;
                slot.data.copy_from_slice(&fresh);
                slot.mark_clean();
                Ok(fresh)
            },
        )
    }

    /// 写入一个块
    ///
    /// 数据只写入缓存并标记为脏，驱逐或显式刷新时才落盘。
    pub fn write(&self, lba: u64, data: &[u8]) -> Result<()> {
        if data.len() != self.config.block_size {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Data length must equal block size",
            ));
        }
        if self.device.is_read_only() {
            return Err(Error::new(ErrorKind::PermissionDenied, "Device is read-only"));
        }
        self.check_lba(lba)?;
        self.perform(
            lba,
            |slot| slot.overwrite(data),
            |_, slot| {
                // 整块覆盖，无需先从设备读取
                slot.overwrite(data);
                Ok(())
            },
        )
    }

    /// 把单个脏块刷新到设备
    ///
    /// 块不在缓存中或不是脏块时什么也不做。
    /// 若该块号上有其他线程的 I/O 正在进行，先等待其完成。
    pub fn flush(&self, lba: u64) -> Result<()> {
        self.check_lba(lba)?;
        self.flush_block(lba).map(|_| ())
    }

    /// 刷新所有脏块到设备，然后刷新设备自身
    ///
    /// 只处理调用时驻留的脏块，按 LRU 到 MRU 的顺序写出；
    /// 遇到第一个错误即返回。
    ///
    /// # 返回
    ///
    /// 实际写出的块数量
    pub fn flush_all(&self) -> Result<usize> {
        let dirty: Vec<u64> = {
            let state = self.state.lock();
            state
                .resident
                .iter()
                .rev()
                .filter(|(_, slot)| slot.is_dirty())
                .map(|(lba, _)| *lba)
                .collect()
        };

        log::debug!("[CACHE] Flushing {} dirty blocks", dirty.len());

        let mut flushed = 0;
        for lba in dirty {
            if self.flush_block(lba)? {
                flushed += 1;
            }
        }
        self.device.flush()?;

        Ok(flushed)
    }

    /// 获取缓存统计信息
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let mut stats = state.stats.clone();
        stats.dirty_blocks = state.dirty_count();
        stats
    }

    /// 获取缓存容量
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// 获取块大小
    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    /// 当前驻留的块数量
    pub fn len(&self) -> usize {
        self.state.lock().resident.len()
    }

    /// 检查缓存中是否没有驻留块
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 获取脏块数量
    pub fn dirty_count(&self) -> usize {
        self.state.lock().dirty_count()
    }

    /// 块是否驻留在缓存中（不影响 LRU 顺序）
    pub fn is_cached(&self, lba: u64) -> bool {
        self.state.lock().resident.contains(&lba)
    }

    /// 获取后备设备
    pub fn device(&self) -> &D {
        &self.device
    }

    fn check_lba(&self, lba: u64) -> Result<()> {
        if lba >= self.device.total_blocks() {
            return Err(Error::new(ErrorKind::InvalidInput, "Block number out of range"));
        }
        Ok(())
    }

    fn deadline(&self) -> Option<Instant> {
        self.config.wait_timeout.map(|timeout| Instant::now() + timeout)
    }

    /// 在条件变量上睡眠，直到有 I/O 完成
    fn wait(
        &self,
        state: &mut MutexGuard<'_, PoolState>,
        deadline: Option<Instant>,
        lba: u64,
    ) -> Result<()> {
        state.stats.waits += 1;
        log::trace!("[CACHE] LBA={:#x} busy, waiting", lba);

        match deadline {
            None => self.released.wait(state),
            Some(deadline) => {
                if self.released.wait_until(state, deadline).timed_out() {
                    state.stats.timeouts += 1;
                    log::warn!("[CACHE] LBA={:#x} timed out waiting for in-flight I/O", lba);
                    return Err(Error::new(
                        ErrorKind::Timeout,
                        "Timed out waiting for in-flight block I/O",
                    ));
                }
            }
        }
        Ok(())
    }

    /// read/write 共用的核心流程
    ///
    /// `on_hit` 在持锁时作用于驻留槽，不能阻塞；
    /// `on_miss` 在不持锁时作用于已独占的牺牲槽（旧内容已写回），可以做设备 I/O。
    fn perform<R>(
        &self,
        lba: u64,
        on_hit: impl FnOnce(&mut CacheSlot) -> R,
        on_miss: impl FnOnce(&D, &mut CacheSlot) -> Result<R>,
    ) -> Result<R> {
        let deadline = self.deadline();
        let mut state = self.state.lock();
        state.stats.total_accesses += 1;

        let mut victim = loop {
            let pool = &mut *state;
            if let Some(slot) = pool.resident.get_mut(&lba) {
                // get_mut 已把槽移到 MRU 端
                let result = on_hit(&mut *slot);
                pool.stats.hits += 1;
                log::trace!("[CACHE] LBA={:#x} HIT (dirty={})", lba, slot.is_dirty());
                return Ok(result);
            }
            if !pool.is_busy(lba) {
                if let Some(victim) = pool.claim_victim() {
                    if let Some(old) = victim.block().filter(|_| victim.is_dirty()) {
                        pool.writing_back.insert(old);
                    }
                    pool.in_flight.insert(lba);
                    break victim;
                }
            }
            self.wait(&mut state, deadline, lba)?;
        };

        state.stats.misses += 1;
        log::debug!(
            "[CACHE] LBA={:#x} MISS, victim={:?} dirty={}, resident={}/{}",
            lba,
            victim.block(),
            victim.is_dirty(),
            state.resident.len(),
            self.config.capacity
        );
        drop(state);

        let old = victim.block().filter(|_| victim.is_dirty());
        let outcome = self
            .write_back(&mut victim)
            .and_then(|_| on_miss(&self.device, &mut victim));

        let mut state = self.state.lock();
        if let Some(old) = old {
            state.writing_back.remove(&old);
            if !victim.is_dirty() || outcome.is_ok() {
                state.stats.writebacks += 1;
            }
        }
        state.in_flight.remove(&lba);

        let result = match outcome {
            Ok(result) => {
                victim.assign(lba);
                state.resident.put(lba, victim);
                Ok(result)
            }
            Err(err) => {
                log::error!(
                    "[CACHE] LBA={:#x} miss failed: {}, returning victim {:?} to pool",
                    lba,
                    err,
                    victim.block()
                );
                state.return_victim(victim);
                Err(err)
            }
        };
        drop(state);
        self.released.notify_all();

        result
    }

    /// 牺牲槽为脏时把它写回旧块号，成功后标记为干净
    fn write_back(&self, victim: &mut CacheSlot) -> Result<()> {
        if let Some(old) = victim.block().filter(|_| victim.is_dirty()) {
            log::debug!("[CACHE] writing back victim LBA={:#x}", old);
            if let Err(err) = self.device.write_block(old, &victim.data) {
                log::warn!("[CACHE] write-back of LBA={:#x} failed: {}", old, err);
                return Err(err);
            }
            victim.mark_clean();
        }
        Ok(())
    }

    /// 刷新单个块，返回是否真的写了设备
    fn flush_block(&self, lba: u64) -> Result<bool> {
        let deadline = self.deadline();
        let mut state = self.state.lock();

        let mut slot = loop {
            let pool = &mut *state;
            match pool.resident.peek(&lba).map(CacheSlot::is_dirty) {
                Some(false) => return Ok(false),
                Some(true) => {
                    if let Some(slot) = pool.resident.pop(&lba) {
                        pool.in_flight.insert(lba);
                        break slot;
                    }
                }
                None if pool.is_busy(lba) => self.wait(&mut state, deadline, lba)?,
                None => return Ok(false),
            }
        };
        drop(state);

        log::debug!("[CACHE] flush LBA={:#x}", lba);
        let result = self.device.write_block(lba, &slot.data);

        let mut state = self.state.lock();
        match &result {
            Ok(()) => {
                slot.mark_clean();
                state.stats.writebacks += 1;
            }
            Err(err) => log::warn!("[CACHE] flush of LBA={:#x} failed: {}", lba, err),
        }
        state.resident.put(lba, slot);
        state.in_flight.remove(&lba);
        drop(state);
        self.released.notify_all();

        result.map(|_| true)
    }
}

impl<D: BlockDevice> core::fmt::Debug for BufferCache<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BufferCache")
            .field("capacity", &self.config.capacity)
            .field("block_size", &self.config.block_size)
            .field("resident", &state.resident.len())
            .field("free", &state.free.len())
            .field("in_flight", &state.in_flight.len())
            .field("writing_back", &state.writing_back.len())
            .field("stats", &state.stats)
            .finish()
    }
}
