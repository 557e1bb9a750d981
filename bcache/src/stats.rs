use core::sync::atomic::{AtomicU64, Ordering};

/// 统计计数快照
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// 命中（含慢路径上的二次检查命中）
    pub hits: u64,
    /// 未命中，需要回收槽位
    pub misses: u64,
    /// 回收了一个曾经映射过其他块的槽位
    pub evictions: u64,
    /// 成功的设备读
    pub reads: u64,
    /// 成功的设备写
    pub writes: u64,
    pub read_errors: u64,
    pub write_errors: u64,
}

impl Stats {
    /// 命中率；尚无查找时为 0。
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
pub(crate) struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    read_errors: AtomicU64,
    write_errors: AtomicU64,
}

macro_rules! bump {
    ($($name:ident => $field:ident),* $(,)?) => {
        impl Counters {
            $(
                #[inline]
                pub(crate) fn $name(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*
        }
    };
}

bump! {
    hit => hits,
    miss => misses,
    eviction => evictions,
    read => reads,
    write => writes,
    read_error => read_errors,
    write_error => write_errors,
}

impl Counters {
    pub(crate) fn snapshot(&self) -> Stats {
        Stats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
        }
    }
}
