//! 槽位池与分区成员链表。
//!
//! 槽位按下标寻址，分区链表用 `next` 下标串起成员，插入与摘除都是 O(1)。
//! 元数据（身份、引用计数、LRU 时间戳、链接）只能在持有所属分区锁时访问；
//! 载荷只能在持有槽位睡眠锁时访问。

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};
use sync::SleepLock;

use crate::{BlockId, BLOCK_SZ};

/// 由分区锁保护的槽位元数据
pub(crate) struct Meta {
    /// 当前映射的块；从未使用过的槽位为 `None`，不会被任何查找命中
    pub id: Option<BlockId>,
    pub refcnt: u32,
    /// `refcnt` 归零时的逻辑时间
    pub lru: u64,
    /// 所在分区
    pub bucket: usize,
    next: Option<usize>,
}

#[repr(C, align(8))]
pub(crate) struct Payload(pub [u8; BLOCK_SZ]);

pub(crate) struct Slot {
    pub lock: SleepLock,
    valid: AtomicBool,
    data: UnsafeCell<Payload>,
    meta: UnsafeCell<Meta>,
}

// 元数据受分区锁保护，载荷受睡眠锁保护
unsafe impl Sync for Slot {}

impl Slot {
    pub fn new() -> Self {
        Self {
            lock: SleepLock::new("buffer"),
            valid: AtomicBool::new(false),
            data: UnsafeCell::new(Payload([0; BLOCK_SZ])),
            meta: UnsafeCell::new(Meta {
                id: None,
                refcnt: 0,
                lru: 0,
                bucket: 0,
                next: None,
            }),
        }
    }

    /// 访问元数据。
    ///
    /// # Safety
    ///
    /// 调用者必须持有该槽位当前所在分区的锁，且返回的引用不与同一槽位的其他元数据引用重叠。
    #[allow(clippy::mut_from_ref)]
    #[inline]
    pub unsafe fn meta(&self) -> &mut Meta {
        &mut *self.meta.get()
    }

    /// 载荷指针。
    ///
    /// 解引用前必须持有 `lock`。
    #[inline]
    pub fn payload(&self) -> *mut Payload {
        self.data.get()
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::Release);
    }
}

/// 分区：单向成员链表的表头，放在分区锁里
pub(crate) struct Bucket {
    pub key: usize,
    head: Option<usize>,
}

impl Bucket {
    pub const fn new(key: usize) -> Self {
        Self { key, head: None }
    }

    /// 按链表顺序遍历成员，产出 `(前驱, 槽位)`。
    pub fn iter<'a>(&'a self, slots: &'a [Slot]) -> Members<'a> {
        Members {
            slots,
            prev: None,
            cur: self.head,
        }
    }

    pub fn find(&self, slots: &[Slot], id: BlockId) -> Option<usize> {
        self.iter(slots)
            .map(|(_, idx)| idx)
            // SAFETY: 持有本分区锁，成员的元数据归本分区保护
            .find(|&idx| unsafe { slots[idx].meta() }.id == Some(id))
    }

    /// 把槽位挂到表头。
    pub fn push_front(&mut self, slots: &[Slot], idx: usize) {
        // SAFETY: 槽位不在任何链表上，或者调用者持有其原分区锁
        let meta = unsafe { slots[idx].meta() };
        meta.next = self.head;
        meta.bucket = self.key;
        self.head = Some(idx);
    }

    /// 摘除 `idx`，`prev` 为 [`Bucket::iter`] 给出的前驱。
    pub fn unlink(&mut self, slots: &[Slot], prev: Option<usize>, idx: usize) {
        // SAFETY: 持有本分区锁
        let next = unsafe { slots[idx].meta() }.next.take();
        match prev {
            None => self.head = next,
            Some(p) => unsafe { slots[p].meta() }.next = next,
        }
    }
}

pub(crate) struct Members<'a> {
    slots: &'a [Slot],
    prev: Option<usize>,
    cur: Option<usize>,
}

impl<'a> Iterator for Members<'a> {
    type Item = (Option<usize>, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cur?;
        let item = (self.prev, idx);
        self.prev = Some(idx);
        // SAFETY: 迭代器借用了 Bucket，而 Bucket 只能经由分区锁拿到
        self.cur = unsafe { self.slots[idx].meta() }.next;
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn pool(n: usize) -> Vec<Slot> {
        (0..n).map(|_| Slot::new()).collect()
    }

    fn members(bucket: &Bucket, slots: &[Slot]) -> Vec<usize> {
        bucket.iter(slots).map(|(_, idx)| idx).collect()
    }

    #[test]
    fn push_front_and_unlink() {
        let slots = pool(4);
        let mut bucket = Bucket::new(0);
        for idx in (0..4).rev() {
            bucket.push_front(&slots, idx);
        }
        assert_eq!(members(&bucket, &slots), [0, 1, 2, 3]);

        // 摘除中间、表头、表尾
        bucket.unlink(&slots, Some(1), 2);
        assert_eq!(members(&bucket, &slots), [0, 1, 3]);
        bucket.unlink(&slots, None, 0);
        assert_eq!(members(&bucket, &slots), [1, 3]);
        bucket.unlink(&slots, Some(1), 3);
        assert_eq!(members(&bucket, &slots), [1]);
    }

    #[test]
    fn relink_into_other_bucket() {
        let slots = pool(2);
        let mut a = Bucket::new(0);
        let mut b = Bucket::new(1);
        a.push_front(&slots, 1);
        a.push_front(&slots, 0);
        a.unlink(&slots, Some(0), 1);
        b.push_front(&slots, 1);
        assert_eq!(members(&a, &slots), [0]);
        assert_eq!(members(&b, &slots), [1]);
        assert_eq!(unsafe { slots[1].meta() }.bucket, 1);
    }

    #[test]
    fn find_skips_unmapped_slots() {
        let slots = pool(2);
        let mut bucket = Bucket::new(0);
        bucket.push_front(&slots, 0);
        bucket.push_front(&slots, 1);
        let id = BlockId::new(0, 0);
        assert_eq!(bucket.find(&slots, id), None);
        unsafe { slots[0].meta() }.id = Some(id);
        assert_eq!(bucket.find(&slots, id), Some(0));
    }
}
