//! 块设备抽象
//!
//! block/device.rs 定义缓存背后的后备存储接口 `BlockDevice`
//! block/memory.rs 提供内存设备，block/file.rs 提供基于镜像文件的设备

mod device;
mod memory;
#[cfg(unix)]
mod file;

pub use device::BlockDevice;
pub use memory::MemoryDevice;
#[cfg(unix)]
pub use file::FileDevice;
