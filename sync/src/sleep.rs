use alloc::collections::VecDeque;

use crate::{park, SpinLock, ThreadId};

struct SleepState {
    locked: bool,
    holder: Option<ThreadId>,
    waiting: VecDeque<ThreadId>,
}

/// 可睡眠互斥锁。
///
/// 获取失败的执行流进入等待队列并挂起；释放时唤醒队首等待者，
/// 被唤醒者重新竞争，因此不保证先来先得。
pub struct SleepLock {
    name: &'static str,
    state: SpinLock<SleepState>,
}

impl SleepLock {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            state: SpinLock::new(SleepState {
                locked: false,
                holder: None,
                waiting: VecDeque::new(),
            }),
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 获取锁，必要时挂起当前执行流。没有超时。
    pub fn acquire(&self) {
        let park = park();
        let me = park.current();
        loop {
            {
                let mut state = self.state.lock();
                if !state.locked {
                    state.locked = true;
                    state.holder = Some(me);
                    // 虚假唤醒时自己可能还在队列里
                    state.waiting.retain(|&tid| tid != me);
                    return;
                }
                if !state.waiting.contains(&me) {
                    state.waiting.push_back(me);
                }
            }
            park.park();
        }
    }

    /// 不等待地尝试获取锁。
    pub fn try_acquire(&self) -> bool {
        let me = park().current();
        let mut state = self.state.lock();
        if state.locked {
            return false;
        }
        state.locked = true;
        state.holder = Some(me);
        true
    }

    /// 释放锁并唤醒一个等待者。
    ///
    /// # Panics
    ///
    /// 当前执行流不持有该锁。
    pub fn release(&self) {
        let park = park();
        let me = park.current();
        let woken = {
            let mut state = self.state.lock();
            if !state.locked || state.holder != Some(me) {
                panic!("{}: release of a sleep lock not held", self.name);
            }
            state.locked = false;
            state.holder = None;
            state.waiting.pop_front()
        };
        if let Some(tid) = woken {
            park.unpark(tid);
        }
    }

    /// 当前执行流是否持有该锁。
    pub fn holding(&self) -> bool {
        let me = park().current();
        let state = self.state.lock();
        state.locked && state.holder == Some(me)
    }

    /// 锁是否被任意执行流持有。
    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }
}
