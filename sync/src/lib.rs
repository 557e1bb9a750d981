//! sync: 内核同步原语
//!
//! - [`SpinLock`]：短临界区自旋锁，持有期间关闭本核中断；
//! - [`SleepLock`]：可睡眠的互斥锁，等待者通过 [`Park`] 挂起而不占用 CPU，
//!   并记录持有者以便检查“当前执行流是否持有该锁”。
//!
//! 挂起/唤醒由内核调度器实现 [`Park`] 后通过 [`init_park`] 注册；
//! 多核内核还需实现 [`Hart`] 并通过 `init_hart` 注册，自旋锁按核记录关中断嵌套。
//! 启用 `std` feature 时提供基于 `std::thread::park` 的宿主机实现 [`host::HostPark`]。

#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

mod sleep;

#[cfg(feature = "std")]
pub mod host;

pub use sleep::SleepLock;

use core::fmt;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use spin::Once;

#[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
mod arch_intr {
    pub fn intr_enabled() -> bool {
        riscv::register::sstatus::read().sie()
    }

    pub fn disable_intr() {
        unsafe {
            riscv::register::sstatus::clear_sie();
        }
    }

    pub fn enable_intr() {
        unsafe {
            riscv::register::sstatus::set_sie();
        }
    }
}

#[cfg(not(any(target_arch = "riscv32", target_arch = "riscv64")))]
mod arch_intr {
    pub fn intr_enabled() -> bool {
        false
    }

    pub fn disable_intr() {}

    pub fn enable_intr() {}
}

/// 支持的最大核数
pub const MAX_HARTS: usize = 8;

/// 一个执行上下文（内核中为一个核）的关中断嵌套状态。
///
/// 只由所属上下文在关中断后访问，原子类型只是为了让它能放进 `static`。
struct IntrState {
    nesting: AtomicUsize,
    prev_enabled: AtomicBool,
}

impl IntrState {
    const fn new() -> Self {
        Self {
            nesting: AtomicUsize::new(0),
            prev_enabled: AtomicBool::new(false),
        }
    }
}

/// 提供当前核号，供自旋锁按核记录关中断状态。
pub trait Hart: Sync {
    /// 当前核号，取值 `0..MAX_HARTS`。调用时本核中断已关闭。
    fn hart_id(&self) -> usize;
}

#[cfg(not(feature = "std"))]
mod percpu {
    use super::{Hart, IntrState, MAX_HARTS};
    use spin::Once;

    pub(super) static HART: Once<&'static dyn Hart> = Once::new();

    #[allow(clippy::declare_interior_mutable_const)]
    const IDLE: IntrState = IntrState::new();
    static STATES: [IntrState; MAX_HARTS] = [IDLE; MAX_HARTS];

    /// 未注册 [`Hart`] 时视为单核。
    pub(super) fn with<R>(f: impl FnOnce(&IntrState) -> R) -> R {
        let id = HART.get().map_or(0, |hart| hart.hart_id());
        match STATES.get(id) {
            Some(state) => f(state),
            None => panic!("hart {id} out of range, at most {MAX_HARTS} harts"),
        }
    }
}

// 宿主机上每个线程相当于一个核
#[cfg(feature = "std")]
mod percpu {
    use super::IntrState;

    std::thread_local! {
        static STATE: IntrState = const { IntrState::new() };
    }

    pub(super) fn with<R>(f: impl FnOnce(&IntrState) -> R) -> R {
        STATE.with(f)
    }
}

/// 注册核号来源。只有第一次调用生效；未注册时所有上下文共用 0 号核的状态。
#[cfg(not(feature = "std"))]
pub fn init_hart(hart: &'static dyn Hart) {
    percpu::HART.call_once(|| hart);
}

/// 关中断并增加本核嵌套计数；第一层记录进入前的中断状态。
fn push_off() {
    let prev = arch_intr::intr_enabled();
    arch_intr::disable_intr();
    percpu::with(|state| {
        if state.nesting.load(Ordering::Relaxed) == 0 {
            state.prev_enabled.store(prev, Ordering::Relaxed);
        }
        state.nesting.fetch_add(1, Ordering::Relaxed);
    });
}

/// 减少本核嵌套计数；回到最外层时恢复 `push_off` 之前的中断状态。
fn pop_off() {
    let restore = percpu::with(|state| {
        let nesting = state.nesting.load(Ordering::Relaxed);
        if nesting == 0 {
            panic!("interrupt nesting underflow");
        }
        state.nesting.store(nesting - 1, Ordering::Relaxed);
        nesting == 1 && state.prev_enabled.load(Ordering::Relaxed)
    });
    if restore {
        arch_intr::enable_intr();
    }
}

/// 当前上下文中断关闭的嵌套层数。
pub fn intr_nesting() -> usize {
    percpu::with(|state| state.nesting.load(Ordering::Relaxed))
}

// =============================================================================
// SpinLock
// =============================================================================

/// 关中断自旋锁。
///
/// 只用于短临界区：持有期间不得睡眠、不得等待设备 I/O，
/// 也不得去获取任何 [`SleepLock`]。
pub struct SpinLock<T> {
    inner: spin::Mutex<T>,
}

/// [`SpinLock`] 的守卫，析构时先解锁再恢复中断状态。
pub struct SpinLockGuard<'a, T> {
    guard: ManuallyDrop<spin::MutexGuard<'a, T>>,
}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: spin::Mutex::new(value),
        }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        push_off();
        SpinLockGuard {
            guard: ManuallyDrop::new(self.inner.lock()),
        }
    }

    /// 锁是否正被某个执行流持有（仅作诊断用，结果可能立即过期）。
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<'a, T> Deref for SpinLockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<'a, T> DerefMut for SpinLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<'a, T> Drop for SpinLockGuard<'a, T> {
    fn drop(&mut self) {
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        pop_off();
    }
}

// =============================================================================
// Park
// =============================================================================

/// 执行流标识，由 [`Park`] 实现分配。
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(usize);

impl ThreadId {
    #[inline]
    pub const fn from_usize(v: usize) -> Self {
        Self(v)
    }

    #[inline]
    pub const fn get_usize(self) -> usize {
        self.0
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ThreadId").field(&self.0).finish()
    }
}

/// 调度器提供的挂起/唤醒接口。
///
/// `unpark` 可能先于对应的 `park` 到达，实现必须把它记为一次“许可”，
/// 使随后的 `park` 立即返回；`park` 允许虚假唤醒。
pub trait Park: Sync {
    /// 当前执行流的标识。
    fn current(&self) -> ThreadId;
    /// 挂起当前执行流，直到被 `unpark` 或虚假唤醒。
    fn park(&self);
    /// 唤醒 `tid`。
    fn unpark(&self, tid: ThreadId);
}

static PARK: Once<&'static dyn Park> = Once::new();

/// 注册全局调度接口。只有第一次调用生效。
pub fn init_park(park: &'static dyn Park) {
    PARK.call_once(|| park);
}

pub(crate) fn park() -> &'static dyn Park {
    *PARK.get().expect("sync: park not initialized")
}
