//! 块缓存主体
//!
//! 锁分两级：
//! - 每个分区一把自旋锁，保护成员链表以及成员的身份、引用计数、LRU 时间戳；
//! - 一把全局回收锁，只在未命中时使用，串行化“跨分区选出最久未用槽位并迁移”的过程。
//!
//! 命中路径只碰一个分区锁。回收时同一时刻至多持有两把分区锁
//! （正在扫描的分区和目前最优候选所在的分区），而且只有回收锁的持有者会这样做，
//! 所以不会出现两个执行流交叉持有分区锁。
//! 分区锁和回收锁都不会跨越设备传输，也不会在持有时去等待槽位的睡眠锁。

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ptr;
use sync::{SpinLock, SpinLockGuard};

use crate::buf::Buf;
use crate::slot::{Bucket, Meta, Slot};
use crate::stats::{Counters, Stats};
use crate::{BlockDevice, BlockId, CacheConfig, Clock, Direction, Error, LogicalClock, Result};

/// 槽位元数据快照
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotInfo {
    pub slot: usize,
    pub id: Option<BlockId>,
    pub refcnt: u32,
    pub lru: u64,
    pub partition: usize,
}

/// 回收扫描中的最优候选，保留其分区锁直到被更优者替换
struct Victim<'a> {
    bucket: SpinLockGuard<'a, Bucket>,
    prev: Option<usize>,
    slot: usize,
    lru: u64,
}

/// 块缓存
///
/// 容量在创建时确定，之后槽位只会被反复迁移复用，不会增减。
pub struct Cache {
    config: CacheConfig,
    slots: Box<[Slot]>,
    buckets: Box<[SpinLock<Bucket>]>,
    evict: SpinLock<()>,
    device: Arc<dyn BlockDevice>,
    clock: Arc<dyn Clock>,
    stats: Counters,
}

impl Cache {
    /// 创建块缓存，LRU 时间戳使用 [`LogicalClock`]。
    pub fn new(config: CacheConfig, device: Arc<dyn BlockDevice>) -> Result<Self> {
        Self::with_clock(config, device, Arc::new(LogicalClock::new()))
    }

    /// 创建块缓存并指定时间源。
    ///
    /// 所有槽位初始挂在 0 号分区，0 号槽位在表头，身份为空。
    pub fn with_clock(
        config: CacheConfig,
        device: Arc<dyn BlockDevice>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let slots: Box<[Slot]> = (0..config.capacity).map(|_| Slot::new()).collect();
        let buckets: Box<[SpinLock<Bucket>]> = (0..config.partitions)
            .map(|key| SpinLock::new(Bucket::new(key)))
            .collect();
        {
            let mut first = buckets[0].lock();
            for idx in (0..slots.len()).rev() {
                first.push_front(&slots, idx);
            }
        }
        log::info!(
            "bcache: {} buffers in {} partitions",
            config.capacity,
            config.partitions
        );
        Ok(Self {
            config,
            slots,
            buckets,
            evict: SpinLock::new(()),
            device,
            clock,
            stats: Counters::default(),
        })
    }

    #[inline]
    pub fn config(&self) -> CacheConfig {
        self.config
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn partitions(&self) -> usize {
        self.buckets.len()
    }

    pub fn stats(&self) -> Stats {
        self.stats.snapshot()
    }

    /// 取得 `id` 对应的缓冲区并持有其睡眠锁。
    ///
    /// 返回的缓冲区可能尚未装载（`is_valid() == false`），见 [`Cache::ensure_loaded`]。
    /// 所有槽位都被引用时返回 [`Error::Exhausted`]。
    pub fn acquire(&self, id: BlockId) -> Result<Buf<'_>> {
        let key = id.bucket(self.buckets.len());

        if let Some(slot) = self.claim(key, id) {
            self.stats.hit();
            log::trace!("bcache: hit {id} in slot {slot}");
            return Ok(self.checkout(slot, id));
        }

        // 分区锁已在 claim 中放掉，再拿回收锁
        let evict = self.evict.lock();
        // 同一个块的并发未命中会排在回收锁上，只有第一个真正迁移槽位
        if let Some(slot) = self.claim(key, id) {
            drop(evict);
            self.stats.hit();
            log::trace!("bcache: late hit {id} in slot {slot}");
            return Ok(self.checkout(slot, id));
        }
        self.stats.miss();
        let slot = self.recycle(key, id)?;
        drop(evict);
        Ok(self.checkout(slot, id))
    }

    /// 读穿：若未装载则从设备读入。
    ///
    /// 读失败时缓冲区保持未装载，返回 [`Error::Device`]。
    pub fn ensure_loaded(&self, buf: &mut Buf<'_>) -> Result<()> {
        self.check_owner(buf);
        let slot = &self.slots[buf.slot];
        if slot.is_valid() {
            return Ok(());
        }
        let id = buf.id;
        match self.device.read_block(id, buf.data_mut()) {
            Ok(()) => {
                slot.set_valid(true);
                self.stats.read();
                Ok(())
            }
            Err(err) => {
                self.stats.read_error();
                log::error!("bcache: read of block {id} failed: {err}");
                Err(Error::Device {
                    id,
                    direction: Direction::Read,
                })
            }
        }
    }

    /// `acquire` 后紧接 `ensure_loaded`。读失败时缓冲区已被交还。
    pub fn read(&self, id: BlockId) -> Result<Buf<'_>> {
        let mut buf = self.acquire(id)?;
        if let Err(err) = self.ensure_loaded(&mut buf) {
            self.release(buf);
            return Err(err);
        }
        Ok(buf)
    }

    /// 写穿：同步把当前载荷写到设备。
    ///
    /// # Panics
    ///
    /// 当前执行流不持有该缓冲区。
    pub fn persist(&self, buf: &Buf<'_>) -> Result<()> {
        self.check_owner(buf);
        if !self.slots[buf.slot].lock.holding() {
            panic!("bwrite: block {} not held", buf.id);
        }
        let id = buf.id;
        match self.device.write_block(id, buf.data()) {
            Ok(()) => {
                self.stats.write();
                Ok(())
            }
            Err(err) => {
                self.stats.write_error();
                log::error!("bcache: write of block {id} failed: {err}");
                Err(Error::Device {
                    id,
                    direction: Direction::Write,
                })
            }
        }
    }

    /// 交还缓冲区：放掉睡眠锁，引用计数减一；归零时记下 LRU 时间戳。
    ///
    /// # Panics
    ///
    /// 当前执行流不持有该缓冲区。
    pub fn release(&self, buf: Buf<'_>) {
        self.check_owner(&buf);
        let Buf { slot, id, .. } = buf;
        let entry = &self.slots[slot];
        if !entry.lock.holding() {
            panic!("brelse: block {id} not held");
        }
        entry.lock.release();

        let _bucket = self.buckets[id.bucket(self.buckets.len())].lock();
        // SAFETY: 持有分区锁；refcnt > 0 时槽位不会被迁走，所以仍在该分区
        let meta = unsafe { entry.meta() };
        debug_assert!(meta.refcnt > 0);
        meta.refcnt -= 1;
        if meta.refcnt == 0 {
            meta.lru = self.clock.now();
        }
    }

    /// 增加一份不持有睡眠锁的引用，使块常驻。
    pub fn pin(&self, buf: &Buf<'_>) {
        self.check_owner(buf);
        let _bucket = self.buckets[buf.id.bucket(self.buckets.len())].lock();
        // SAFETY: 持有分区锁
        unsafe { self.slots[buf.slot].meta() }.refcnt += 1;
    }

    /// 撤销一次 [`Cache::pin`]。
    ///
    /// # Panics
    ///
    /// 引用计数将低于本次检出自身占用的那一份。
    pub fn unpin(&self, buf: &Buf<'_>) {
        self.check_owner(buf);
        let _bucket = self.buckets[buf.id.bucket(self.buckets.len())].lock();
        // SAFETY: 持有分区锁
        let meta = unsafe { self.slots[buf.slot].meta() };
        if meta.refcnt <= 1 {
            panic!("bunpin: block {} refcount underflow", buf.id);
        }
        meta.refcnt -= 1;
    }

    /// `id` 当前的引用计数；不在缓存中时为 `None`。
    pub fn refcnt(&self, id: BlockId) -> Option<u32> {
        self.inspect(id, |meta| meta.refcnt)
    }

    /// `id` 的 LRU 时间戳；只有引用计数为 0 时才有意义，否则为 `None`。
    pub fn lru(&self, id: BlockId) -> Option<u64> {
        self.inspect(id, |meta| (meta.refcnt == 0).then_some(meta.lru))
            .flatten()
    }

    /// `id` 所在的槽位下标
    pub fn slot_of(&self, id: BlockId) -> Option<usize> {
        let bucket = self.buckets[id.bucket(self.buckets.len())].lock();
        bucket.find(&self.slots, id)
    }

    pub fn is_resident(&self, id: BlockId) -> bool {
        self.slot_of(id).is_some()
    }

    /// 逐个分区收集槽位元数据，按槽位下标排序。
    ///
    /// 每次只持有一把分区锁，因此与并发迁移交错时不是一致快照。
    pub fn snapshot(&self) -> Vec<SlotInfo> {
        let mut infos = Vec::with_capacity(self.slots.len());
        for lock in self.buckets.iter() {
            let bucket = lock.lock();
            for (_, slot) in bucket.iter(&self.slots) {
                // SAFETY: 持有分区锁
                let meta = unsafe { self.slots[slot].meta() };
                infos.push(SlotInfo {
                    slot,
                    id: meta.id,
                    refcnt: meta.refcnt,
                    lru: meta.lru,
                    partition: bucket.key,
                });
            }
        }
        infos.sort_unstable_by_key(|info| info.slot);
        infos
    }

    /// 拆除缓存。仍有 pin 未撤销时返回 [`Error::Pinned`]。
    pub fn teardown(self) -> Result<()> {
        let count = self
            .snapshot()
            .iter()
            .filter(|info| info.refcnt > 0)
            .count();
        if count > 0 {
            log::warn!("bcache: teardown with {count} pinned buffers");
            return Err(Error::Pinned { count });
        }
        log::info!("bcache: teardown, {:?}", self.stats());
        Ok(())
    }

    #[inline]
    pub(crate) fn slot(&self, idx: usize) -> &Slot {
        &self.slots[idx]
    }

    fn check_owner(&self, buf: &Buf<'_>) {
        assert!(
            ptr::eq(buf.cache, self),
            "block {} belongs to another cache",
            buf.id
        );
    }

    /// 在分区 `key` 中查找 `id`，找到则引用计数加一。
    fn claim(&self, key: usize, id: BlockId) -> Option<usize> {
        let bucket = self.buckets[key].lock();
        let slot = bucket.find(&self.slots, id)?;
        // SAFETY: 持有分区锁
        unsafe { self.slots[slot].meta() }.refcnt += 1;
        Some(slot)
    }

    fn inspect<R>(&self, id: BlockId, f: impl FnOnce(&Meta) -> R) -> Option<R> {
        let bucket = self.buckets[id.bucket(self.buckets.len())].lock();
        let slot = bucket.find(&self.slots, id)?;
        // SAFETY: 持有分区锁
        Some(f(unsafe { self.slots[slot].meta() }))
    }

    /// 选出全局 LRU 最小的空闲槽位，迁入分区 `key` 并赋予身份 `id`。
    ///
    /// 调用者持有回收锁。扫描顺序为分区下标升序、链表顺序，相同 LRU 取先遇到的。
    fn recycle(&self, key: usize, id: BlockId) -> Result<usize> {
        let mut best: Option<Victim<'_>> = None;
        for lock in self.buckets.iter() {
            let bucket = lock.lock();
            let mut bound = best.as_ref().map(|victim| victim.lru);
            let mut found = None;
            for (prev, slot) in bucket.iter(&self.slots) {
                // SAFETY: 持有分区锁
                let meta = unsafe { self.slots[slot].meta() };
                if meta.refcnt == 0 && bound.map_or(true, |lru| meta.lru < lru) {
                    bound = Some(meta.lru);
                    found = Some((prev, slot, meta.lru));
                }
            }
            // 更优候选出现时替换，旧候选的分区锁随之释放；否则本分区锁在此释放
            if let Some((prev, slot, lru)) = found {
                best = Some(Victim {
                    bucket,
                    prev,
                    slot,
                    lru,
                });
            }
        }

        let Some(Victim {
            bucket: mut src,
            prev,
            slot,
            ..
        }) = best
        else {
            log::warn!("bcache: no buffers for {id}");
            return Err(Error::Exhausted {
                capacity: self.slots.len(),
            });
        };

        // SAFETY: 持有槽位所在分区的锁
        let old = unsafe { self.slots[slot].meta() }.id;
        let dst = if src.key == key {
            src
        } else {
            src.unlink(&self.slots, prev, slot);
            drop(src);
            // 槽位已不在任何链表上，回收锁保证没有别人能拿到它
            let mut dst = self.buckets[key].lock();
            dst.push_front(&self.slots, slot);
            dst
        };
        // SAFETY: 持有目标分区锁
        let meta = unsafe { self.slots[slot].meta() };
        meta.id = Some(id);
        meta.refcnt = 1;
        self.slots[slot].set_valid(false);
        drop(dst);

        match old {
            Some(old) => {
                self.stats.eviction();
                log::debug!("bcache: slot {slot} evicted {old} for {id}");
            }
            None => log::debug!("bcache: slot {slot} assigned to {id}"),
        }
        Ok(slot)
    }

    fn checkout(&self, slot: usize, id: BlockId) -> Buf<'_> {
        self.slots[slot].lock.acquire();
        Buf {
            cache: self,
            slot,
            id,
        }
    }
}
