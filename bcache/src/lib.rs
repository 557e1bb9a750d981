//! bcache: 内核块缓存
//!
//! 固定数量的内存槽位缓存磁盘块副本，既减少设备 I/O，
//! 也是多个执行流访问同一块时的同步点：同一时刻只有一个执行流能使用某个块。
//!
//! 用法：
//! - [`Cache::acquire`] / [`Cache::read`] 取得持锁的 [`Buf`]；
//! - 修改 [`Buf::data_mut`] 后调用 [`Cache::persist`] 同步写回；
//! - 用完调用 [`Cache::release`]，之后不得再使用该缓冲区；
//! - 日志层用 [`Cache::pin`] / [`Cache::unpin`] 让块在多次检出之间保持常驻。
//!
//! 设备传输由调用方实现 [`BlockDevice`] 提供，睡眠锁依赖 `sync` crate 注册的 `Park`。

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod buf;
mod cache;
mod config;
mod device;
mod error;
mod slot;
mod stats;

pub use buf::Buf;
pub use cache::{Cache, SlotInfo};
pub use config::{CacheConfig, NBUCKET, NBUF};
pub use device::{BlockDevice, BlockId, Clock, Direction, LogicalClock, BLOCK_SZ};
pub use error::{Error, IoError, Result};
pub use stats::Stats;
