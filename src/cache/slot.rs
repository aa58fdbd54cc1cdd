//! 缓存槽结构

use bitflags::bitflags;

bitflags! {
    /// 缓存槽标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct SlotFlags: u8 {
        /// 槽中保存着某个块的有效数据
        const UPTODATE = 0x01;
        /// 数据自上次写回后已被修改（脏）
        const DIRTY    = 0x02;
    }
}

/// 缓存槽（crate 内部类型，不对外导出）
///
/// 缓存在构造时一次性分配 `capacity` 个槽，之后只会被反复复用，不会被销毁。
///
/// 槽要么驻留在缓存池中（任何线程都可以在持有缓存锁时访问），
/// 要么被某个正在做设备 I/O 的线程独占（此时已从池中移除）。
/// 因此 `data` 本身不需要额外的锁。
///
/// # 字段说明
///
/// - `lba`: 当前保存的块号，只有在 `UPTODATE` 置位时才有意义
/// - `data`: 块数据，长度恒等于块大小
/// - `flags`: 槽状态标志
pub(crate) struct CacheSlot {
    /// 块号
    pub(crate) lba: u64,

    /// 块数据
    pub(crate) data: Vec<u8>,

    /// 槽状态标志
    pub(crate) flags: SlotFlags,
}

impl core::fmt::Debug for CacheSlot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CacheSlot")
            .field("lba", &self.lba)
            .field("data_len", &self.data.len())
            .field("flags", &self.flags)
            .finish()
    }
}

impl CacheSlot {
    /// 创建空槽
    ///
    /// # 参数
    ///
    /// * `block_size` - 块大小（字节）
    pub(crate) fn empty(block_size: usize) -> Self {
        Self {
            lba: 0,
            data: vec![0u8; block_size],
            flags: SlotFlags::empty(),
        }
    }

    /// 当前保存的块号，空槽返回 None
    pub(crate) fn block(&self) -> Option<u64> {
        self.is_uptodate().then_some(self.lba)
    }

    /// 让槽改为保存 `lba`
    pub(crate) fn assign(&mut self, lba: u64) {
        self.lba = lba;
        self.flags.insert(SlotFlags::UPTODATE);
    }

    /// 用整块数据覆盖并标记为脏
    ///
    /// 调用者保证 `data.len()` 等于块大小
    pub(crate) fn overwrite(&mut self, data: &[u8]) {
        debug_assert_eq!(data.len(), self.data.len());
        self.data.copy_from_slice(data);
        self.mark_dirty();
    }

    /// 标记为脏（已修改）
    pub(crate) fn mark_dirty(&mut self) {
        self.flags.insert(SlotFlags::DIRTY);
    }

    /// 标记为干净（已写入磁盘）
    pub(crate) fn mark_clean(&mut self) {
        self.flags.remove(SlotFlags::DIRTY);
    }

    /// 检查是否是脏块
    pub(crate) fn is_dirty(&self) -> bool {
        self.flags.contains(SlotFlags::DIRTY)
    }

    /// 检查数据是否有效
    pub(crate) fn is_uptodate(&self) -> bool {
        self.flags.contains(SlotFlags::UPTODATE)
    }
}
