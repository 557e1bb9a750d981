use core::fmt;
use core::mem::{align_of, size_of};

use crate::cache::Cache;
use crate::{BlockId, Result, BLOCK_SZ};

/// 已检出的块缓冲区。
///
/// 持有 `Buf` 即持有槽位的睡眠锁和一份引用计数；用完必须交还 [`Cache::release`]。
/// `Buf` 可以在执行流之间移动，但只有获取它的执行流才能 `persist`/`release`。
#[must_use = "a checked-out buffer must be handed back with Cache::release"]
pub struct Buf<'a> {
    pub(crate) cache: &'a Cache,
    pub(crate) slot: usize,
    pub(crate) id: BlockId,
}

impl<'a> Buf<'a> {
    #[inline]
    pub fn id(&self) -> BlockId {
        self.id
    }

    #[inline]
    pub fn dev(&self) -> u32 {
        self.id.dev
    }

    #[inline]
    pub fn blockno(&self) -> u32 {
        self.id.blockno
    }

    /// 底层槽位下标
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// 载荷是否反映设备内容
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.cache.slot(self.slot).is_valid()
    }

    pub fn data(&self) -> &[u8; BLOCK_SZ] {
        // SAFETY: Buf 存在期间槽位睡眠锁被本次检出持有，且每个被持有的槽位只对应一个 Buf
        unsafe { &(*self.cache.slot(self.slot).payload()).0 }
    }

    pub fn data_mut(&mut self) -> &mut [u8; BLOCK_SZ] {
        // SAFETY: 同 `data`，且 `&mut self` 保证独占
        unsafe { &mut (*self.cache.slot(self.slot).payload()).0 }
    }

    /// 以 `T` 视图读取偏移 `offset` 处的数据。
    ///
    /// # Safety
    ///
    /// `T` 必须是 `#[repr(C)]` 布局，且对其任意位模式都是合法值。
    pub unsafe fn read<T, V>(&self, offset: usize, f: impl FnOnce(&T) -> V) -> V {
        let ptr = self.field_ptr::<T>(offset);
        f(&*ptr)
    }

    /// 以 `T` 视图修改偏移 `offset` 处的数据。
    ///
    /// # Safety
    ///
    /// 同 [`Buf::read`]。
    pub unsafe fn modify<T, V>(&mut self, offset: usize, f: impl FnOnce(&mut T) -> V) -> V {
        let ptr = self.field_ptr::<T>(offset);
        f(&mut *ptr)
    }

    fn field_ptr<T>(&self, offset: usize) -> *mut T {
        assert!(
            offset
                .checked_add(size_of::<T>())
                .map_or(false, |end| end <= BLOCK_SZ),
            "block field at {offset} out of bounds"
        );
        let base = self.cache.slot(self.slot).payload() as *mut u8;
        // SAFETY: 上面已检查 offset 不越界
        let addr = unsafe { base.add(offset) };
        assert_eq!(addr as usize % align_of::<T>(), 0, "misaligned block field");
        addr as *mut T
    }

    /// 等价于 [`Cache::ensure_loaded`]。
    pub fn load(&mut self) -> Result<()> {
        let cache = self.cache;
        cache.ensure_loaded(self)
    }

    /// 等价于 [`Cache::persist`]。
    pub fn persist(&self) -> Result<()> {
        self.cache.persist(self)
    }

    /// 等价于 [`Cache::release`]。
    pub fn release(self) {
        let cache = self.cache;
        cache.release(self)
    }
}

impl fmt::Debug for Buf<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buf")
            .field("id", &self.id)
            .field("slot", &self.slot)
            .field("valid", &self.is_valid())
            .finish()
    }
}
