use serde_derive::Deserialize;

use crate::{Error, Result};

/// 默认槽位数
pub const NBUF: usize = 30;
/// 默认分区数
pub const NBUCKET: usize = 13;

/// 块缓存配置，创建后不可更改。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// 槽位总数
    pub capacity: usize,
    /// 分区数
    pub partitions: usize,
}

impl CacheConfig {
    pub const fn new(capacity: usize, partitions: usize) -> Self {
        Self {
            capacity,
            partitions,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::Config("capacity must be positive"));
        }
        if self.partitions == 0 {
            return Err(Error::Config("partitions must be positive"));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(NBUF, NBUCKET)
    }
}
