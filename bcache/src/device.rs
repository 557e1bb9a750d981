use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::IoError;

/// 块大小常量，固定为 1024 字节
pub const BLOCK_SZ: usize = 1024;

/// 块标识：设备号 + 块号
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId {
    pub dev: u32,
    pub blockno: u32,
}

impl BlockId {
    #[inline]
    pub const fn new(dev: u32, blockno: u32) -> Self {
        Self { dev, blockno }
    }

    /// 分区下标：`((dev << 27) | blockno) % partitions`，按 64 位计算。
    #[inline]
    pub(crate) fn bucket(self, partitions: usize) -> usize {
        let key = ((self.dev as u64) << 27) | self.blockno as u64;
        (key % partitions as u64) as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.blockno)
    }
}

/// 设备传输方向
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Read => "read",
            Direction::Write => "write",
        })
    }
}

/// 块设备抽象接口
///
/// 同步传输：返回时数据已经读入 `buf` 或已经写到设备。
/// `buf` 长度恒为 [`BLOCK_SZ`]。
pub trait BlockDevice: Send + Sync {
    /// 读取 `id` 的内容到缓冲区
    fn read_block(&self, id: BlockId, buf: &mut [u8]) -> Result<(), IoError>;

    /// 将缓冲区内容写入 `id`
    fn write_block(&self, id: BlockId, buf: &[u8]) -> Result<(), IoError>;
}

/// 逻辑时间源，用于给空闲槽位打 LRU 时间戳。
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// 默认时钟：每次读取前进一步的计数器。
#[derive(Debug, Default)]
pub struct LogicalClock(AtomicU64);

impl LogicalClock {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }
}

impl Clock for LogicalClock {
    fn now(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_matches_shifted_key() {
        assert_eq!(BlockId::new(0, 5).bucket(13), 5);
        assert_eq!(BlockId::new(0, 13).bucket(13), 0);
        // (1 << 27) % 13 == 8
        assert_eq!(BlockId::new(1, 0).bucket(13), 8);
        assert_eq!(BlockId::new(1, 5).bucket(13), 0);
        assert_eq!(BlockId::new(7, 9).bucket(1), 0);
    }

    #[test]
    fn logical_clock_is_monotonic() {
        let clock = LogicalClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b > a);
    }
}
