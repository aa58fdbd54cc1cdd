use bufcache_core::{
    BlockDevice, BufferCache, CacheConfig, Error, ErrorKind, MemoryDevice, Result,
};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const BLOCK_SIZE: u32 = 64;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 统计每个块号上同时进行的设备操作数量
struct CountingDevice {
    inner: MemoryDevice,
    delay: Duration,
    active: Mutex<HashMap<u64, usize>>,
    max_active: AtomicUsize,
    reads: Mutex<HashMap<u64, usize>>,
    fail_reads_of: Option<u64>,
}

impl CountingDevice {
    fn new(total_blocks: u64, delay: Duration) -> Self {
        Self {
            inner: MemoryDevice::new(BLOCK_SIZE, total_blocks).unwrap(),
            delay,
            active: Mutex::new(HashMap::new()),
            max_active: AtomicUsize::new(0),
            reads: Mutex::new(HashMap::new()),
            fail_reads_of: None,
        }
    }

    fn failing_reads_of(mut self, lba: u64) -> Self {
        self.fail_reads_of = Some(lba);
        self
    }

    fn reads_of(&self, lba: u64) -> usize {
        self.reads.lock().get(&lba).copied().unwrap_or(0)
    }

    fn enter(&self, lba: u64) {
        let mut active = self.active.lock();
        let count = active.entry(lba).or_insert(0);
        *count += 1;
        self.max_active.fetch_max(*count, Ordering::SeqCst);
    }

    fn leave(&self, lba: u64) {
        let mut active = self.active.lock();
        if let Some(count) = active.get_mut(&lba) {
            *count -= 1;
        }
    }
}

impl BlockDevice for CountingDevice {
    fn block_size(&self) -> u32 {
        self.inner.block_size()
    }

    fn total_blocks(&self) -> u64 {
        self.inner.total_blocks()
    }

    fn read_block(&self, lba: u64, buf: &mut [u8]) -> Result<()> {
        self.enter(lba);
        *self.reads.lock().entry(lba).or_insert(0) += 1;
        thread::sleep(self.delay);
        let result = if self.fail_reads_of == Some(lba) {
            Err(Error::new(ErrorKind::Io, "injected read failure"))
        } else {
            self.inner.read_block(lba, buf)
        };
        self.leave(lba);
        result
    }

    fn write_block(&self, lba: u64, buf: &[u8]) -> Result<()> {
        self.enter(lba);
        thread::sleep(self.delay);
        let result = self.inner.write_block(lba, buf);
        self.leave(lba);
        result
    }
}

/// 对指定块号的读取（或写入）会阻塞，直到测试打开闸门
struct GatedDevice {
    inner: MemoryDevice,
    gated_lba: u64,
    gate_writes: bool,
    entered: AtomicBool,
    open: Mutex<bool>,
    opened: Condvar,
    gated_active: AtomicUsize,
    gated_max_active: AtomicUsize,
    gated_reads: AtomicUsize,
}

impl GatedDevice {
    fn new(gated_lba: u64) -> Self {
        Self {
            inner: MemoryDevice::new(BLOCK_SIZE, 16).unwrap(),
            gated_lba,
            gate_writes: false,
            entered: AtomicBool::new(false),
            open: Mutex::new(false),
            opened: Condvar::new(),
            gated_active: AtomicUsize::new(0),
            gated_max_active: AtomicUsize::new(0),
            gated_reads: AtomicUsize::new(0),
        }
    }

    fn gating_writes(gated_lba: u64) -> Self {
        Self {
            gate_writes: true,
            ..Self::new(gated_lba)
        }
    }

    fn open_gate(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }

    fn wait_entered(&self) {
        while !self.entered.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn pass(&self, lba: u64, gated: bool) {
        if lba != self.gated_lba {
            return;
        }
        let active = self.gated_active.fetch_add(1, Ordering::SeqCst) + 1;
        self.gated_max_active.fetch_max(active, Ordering::SeqCst);
        if gated {
            self.entered.store(true, Ordering::SeqCst);
            let mut open = self.open.lock();
            while !*open {
                self.opened.wait(&mut open);
            }
        }
    }

    fn leave(&self, lba: u64) {
        if lba == self.gated_lba {
            self.gated_active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl BlockDevice for GatedDevice {
    fn block_size(&self) -> u32 {
        self.inner.block_size()
    }

    fn total_blocks(&self) -> u64 {
        self.inner.total_blocks()
    }

    fn read_block(&self, lba: u64, buf: &mut [u8]) -> Result<()> {
        if lba == self.gated_lba {
            self.gated_reads.fetch_add(1, Ordering::SeqCst);
        }
        self.pass(lba, !self.gate_writes);
        let result = self.inner.read_block(lba, buf);
        self.leave(lba);
        result
    }

    fn write_block(&self, lba: u64, buf: &[u8]) -> Result<()> {
        self.pass(lba, self.gate_writes);
        let result = self.inner.write_block(lba, buf);
        self.leave(lba);
        result
    }
}

fn block_of(tag: u8, seq: u32) -> Vec<u8> {
    let mut data = vec![tag; BLOCK_SIZE as usize];
    data[..4].copy_from_slice(&seq.to_le_bytes());
    data
}

#[test]
fn concurrent_misses_fetch_once() {
    init_logging();
    let device = Arc::new(CountingDevice::new(32, Duration::from_millis(20)));
    device.inner.write_block(3, &block_of(3, 0)).unwrap();
    let cache = Arc::new(BufferCache::new(Arc::clone(&device), 8, BLOCK_SIZE as usize).unwrap());

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.read(3).unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), block_of(3, 0));
    }
    assert_eq!(device.reads_of(3), 1);
    assert_eq!(cache.stats().misses, 1);
    assert_eq!(cache.stats().hits, 7);
}

#[test]
fn mixed_workload_never_duplicates_io() {
    init_logging();
    const THREADS: u64 = 8;
    const OPS: u32 = 200;

    let device = Arc::new(CountingDevice::new(32, Duration::from_micros(200)));
    let cache = Arc::new(BufferCache::new(Arc::clone(&device), 4, BLOCK_SIZE as usize).unwrap());

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                // 每个线程独占两个块用于写，其余块只读
                let own = [t * 2, t * 2 + 1];
                let mut last = [None, None];
                let mut rng = 0x9E37_79B9_u32.wrapping_mul(t as u32 + 1);
                for seq in 0..OPS {
                    rng = rng.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                    let pick = ((rng >> 16) % 2) as usize;
                    match (rng >> 8) % 3 {
                        0 => {
                            let data = block_of(t as u8, seq);
                            cache.write(own[pick], &data).unwrap();
                            last[pick] = Some(data);
                        }
                        1 => {
                            let data = cache.read(own[pick]).unwrap();
                            if let Some(expected) = &last[pick] {
                                assert_eq!(&data, expected);
                            }
                        }
                        _ => {
                            let other = u64::from((rng >> 4) % 32);
                            assert_eq!(cache.read(other).unwrap().len(), BLOCK_SIZE as usize);
                        }
                    }
                }
                (own, last)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(device.max_active.load(Ordering::SeqCst) <= 1);
    assert!(cache.len() <= cache.capacity());

    cache.flush_all().unwrap();
    for (own, last) in results {
        for (lba, expected) in own.iter().zip(last.iter()) {
            if let Some(expected) = expected {
                let mut buf = vec![0u8; BLOCK_SIZE as usize];
                device.inner.read_block(*lba, &mut buf).unwrap();
                assert_eq!(&buf, expected);
            }
        }
    }
}

#[test]
fn waiters_block_when_all_slots_in_flight() {
    init_logging();
    let device = Arc::new(CountingDevice::new(16, Duration::from_millis(10)));
    let cache = Arc::new(BufferCache::new(Arc::clone(&device), 1, BLOCK_SIZE as usize).unwrap());

    let handles: Vec<_> = (0..4u64)
        .map(|lba| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.read(lba))
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap().is_ok());
    }
    assert_eq!(cache.len(), 1);
}

#[test]
fn failed_fetch_wakes_waiters() {
    init_logging();
    let device = Arc::new(CountingDevice::new(16, Duration::from_millis(10)).failing_reads_of(5));
    let cache = Arc::new(BufferCache::new(Arc::clone(&device), 4, BLOCK_SIZE as usize).unwrap());

    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.read(5)
            })
        })
        .collect();

    for handle in handles {
        let err = handle.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
    assert!(!cache.is_cached(5));
    assert!(device.max_active.load(Ordering::SeqCst) <= 1);

    // 其他块不受影响
    assert!(cache.read(6).is_ok());
}

#[test]
fn bounded_wait_times_out() {
    init_logging();
    let device = Arc::new(GatedDevice::new(7));
    let config =
        CacheConfig::new(4, BLOCK_SIZE as usize).with_wait_timeout(Duration::from_millis(50));
    let cache = Arc::new(BufferCache::with_config(Arc::clone(&device), config).unwrap());

    let loader = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || cache.read(7))
    };
    device.wait_entered();

    let err = cache.read(7).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(cache.stats().timeouts, 1);

    // 不相关的块不被慢速 I/O 阻塞
    assert!(cache.read(8).is_ok());

    device.open_gate();
    assert!(loader.join().unwrap().is_ok());
    assert!(cache.is_cached(7));
    assert!(cache.read(7).is_ok());
}

#[test]
fn read_waits_for_victim_write_back() {
    init_logging();
    let device = Arc::new(GatedDevice::gating_writes(3));
    let cache = Arc::new(BufferCache::new(Arc::clone(&device), 2, BLOCK_SIZE as usize).unwrap());

    let written = block_of(3, 42);
    cache.write(3, &written).unwrap();
    cache.read(5).unwrap();

    // 块3是LRU且为脏，读块6会驱逐它并在写回时卡在闸门上
    let evictor = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || cache.read(6))
    };
    device.wait_entered();
    assert!(!cache.is_cached(3));

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let cache = Arc::clone(&cache);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let data = cache.read(3);
            done.store(true, Ordering::SeqCst);
            data
        })
    };

    // 块5仍驻留，读线程只可能因块3正在写回而等待
    while cache.stats().waits == 0 {
        thread::sleep(Duration::from_millis(1));
    }
    thread::sleep(Duration::from_millis(20));
    assert!(!done.load(Ordering::SeqCst));
    assert_eq!(device.gated_reads.load(Ordering::SeqCst), 0);

    device.open_gate();
    assert!(evictor.join().unwrap().is_ok());
    assert_eq!(reader.join().unwrap().unwrap(), written);

    assert_eq!(device.gated_reads.load(Ordering::SeqCst), 1);
    assert_eq!(device.gated_max_active.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().writebacks, 1);
}

#[test]
fn write_then_read_across_threads() {
    init_logging();
    let device = Arc::new(CountingDevice::new(64, Duration::from_micros(100)));
    let cache = Arc::new(BufferCache::new(Arc::clone(&device), 2, BLOCK_SIZE as usize).unwrap());

    for round in 0..16u32 {
        let lba = u64::from(round % 8);
        let data = block_of(round as u8, round);
        {
            let cache = Arc::clone(&cache);
            let data = data.clone();
            thread::spawn(move || cache.write(lba, &data).unwrap())
                .join()
                .unwrap();
        }
        let cache = Arc::clone(&cache);
        let read = thread::spawn(move || cache.read(lba).unwrap()).join().unwrap();
        assert_eq!(read, data);
    }
}

#[cfg(unix)]
#[test]
fn file_device_survives_eviction_and_reopen() {
    use bufcache_core::FileDevice;

    init_logging();
    let path = std::env::temp_dir().join(format!("bufcache-it-{}.img", std::process::id()));
    {
        let device = FileDevice::create(&path, BLOCK_SIZE, 32).unwrap();
        let cache = BufferCache::new(device, 4, BLOCK_SIZE as usize).unwrap();
        for lba in 0..10u64 {
            cache.write(lba, &block_of(lba as u8, 1)).unwrap();
        }
        assert!(cache.stats().writebacks >= 6);
        cache.flush_all().unwrap();
        assert_eq!(cache.dirty_count(), 0);
    }

    let device = FileDevice::open(&path, BLOCK_SIZE).unwrap();
    let cache = BufferCache::new(device, 4, BLOCK_SIZE as usize).unwrap();
    for lba in 0..10u64 {
        assert_eq!(cache.read(lba).unwrap(), block_of(lba as u8, 1));
    }
    let _ = std::fs::remove_file(&path);
}
