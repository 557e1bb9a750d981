use thiserror::Error;

use crate::{BlockId, Direction};

/// 块设备传输失败；具体原因由设备驱动自行记录。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("device transfer failed")]
pub struct IoError;

/// 块缓存错误
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum Error {
    /// 所有槽位都有引用，无可回收槽位
    #[error("no evictable buffer among {capacity} slots")]
    Exhausted { capacity: usize },
    /// 设备传输失败
    #[error("{direction} of block {id} failed")]
    Device { id: BlockId, direction: Direction },
    /// 配置不合法
    #[error("invalid cache config: {0}")]
    Config(&'static str),
    /// 拆除时仍有被 pin 住的槽位
    #[error("{count} buffers still pinned")]
    Pinned { count: usize },
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
