//! 宿主机上的 [`Park`] 实现，供测试和 xtask 使用。

use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, Thread};

use crate::{init_park, Park, ThreadId};

static NEXT_TID: AtomicUsize = AtomicUsize::new(1);

/// 存活线程的句柄表，线程退出时移除自己的表项
static THREADS: spin::Mutex<BTreeMap<ThreadId, Thread>> = spin::Mutex::new(BTreeMap::new());

/// 线程首次调用 [`Park::current`] 时登记，线程局部变量析构时注销
struct Registration {
    tid: ThreadId,
}

impl Registration {
    fn new() -> Self {
        let tid = ThreadId::from_usize(NEXT_TID.fetch_add(1, Ordering::Relaxed));
        THREADS.lock().insert(tid, thread::current());
        Self { tid }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        THREADS.lock().remove(&self.tid);
    }
}

std::thread_local! {
    static CURRENT: Registration = Registration::new();
}

/// 以 `std::thread::park`/`unpark` 实现挂起与唤醒。
///
/// `std` 的 park 自带一次性许可，先到的 `unpark` 不会丢失。
/// 唤醒已退出的线程是空操作。
#[derive(Default)]
pub struct HostPark;

impl HostPark {
    /// `tid` 对应的线程是否仍登记在案
    pub fn is_registered(&self, tid: ThreadId) -> bool {
        THREADS.lock().contains_key(&tid)
    }
}

impl Park for HostPark {
    fn current(&self) -> ThreadId {
        CURRENT.with(|registration| registration.tid)
    }

    fn park(&self) {
        thread::park();
    }

    fn unpark(&self, tid: ThreadId) {
        let target = THREADS.lock().get(&tid).cloned();
        if let Some(thread) = target {
            thread.unpark();
        }
    }
}

pub static HOST_PARK: HostPark = HostPark;

/// 注册 [`HOST_PARK`] 为全局调度接口。
pub fn init() {
    init_park(&HOST_PARK);
}
