//! 块缓存常量定义

//=============================================================================
// 基础常量
//=============================================================================

/// 默认块大小（512 字节）
pub const DEFAULT_BLOCK_SIZE: usize = 512;

/// 默认缓存块数量
pub const DEFAULT_CACHE_SIZE: usize = 256;

