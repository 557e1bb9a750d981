//! sync crate 功能性验证测试
//!
//! 这些测试验证 sync crate 对外提供的 API 的正确性。
//! 测试在用户态环境运行，使用 std，挂起/唤醒由 `sync::host::HostPark` 提供。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use sync::{intr_nesting, Park, SleepLock, SpinLock};

/// 在 main 之前注册宿主机 Park，所有用例共享。
#[ctor::ctor]
fn init_park_before_main() {
    sync::host::init();
}

#[test]
fn test_spin_lock_guard() {
    let lock = SpinLock::new(0u32);
    {
        let mut guard = lock.lock();
        *guard += 5;
        assert!(lock.is_locked());
    }
    assert!(!lock.is_locked());
    assert_eq!(*lock.lock(), 5);
}

#[test]
fn test_spin_lock_nesting_restored() {
    let a = SpinLock::new(());
    let b = SpinLock::new(());
    assert_eq!(intr_nesting(), 0);
    let ga = a.lock();
    let gb = b.lock();
    assert_eq!(intr_nesting(), 2);
    drop(gb);
    assert_eq!(intr_nesting(), 1);
    drop(ga);
    assert_eq!(intr_nesting(), 0);
}

#[test]
fn test_intr_nesting_is_per_context() {
    let lock = Arc::new(SpinLock::new(()));
    let held = Arc::new(Barrier::new(2));
    let done = Arc::new(Barrier::new(2));
    let holder = {
        let (lock, held, done) = (lock.clone(), held.clone(), done.clone());
        thread::spawn(move || {
            let _guard = lock.lock();
            assert_eq!(intr_nesting(), 1);
            held.wait();
            done.wait();
        })
    };
    held.wait();
    // 另一个执行流持有锁，不影响本执行流的嵌套计数
    assert_eq!(intr_nesting(), 0);
    let other = SpinLock::new(());
    drop(other.lock());
    assert_eq!(intr_nesting(), 0);
    done.wait();
    holder.join().unwrap();
    assert!(!lock.is_locked());
}

#[test]
fn test_thread_id_roundtrip() {
    let park = &sync::host::HOST_PARK;
    let me = park.current();
    assert_eq!(park.current(), me);
    let other = thread::spawn(move || sync::host::HOST_PARK.current())
        .join()
        .unwrap();
    assert_ne!(other, me);
}

#[test]
fn test_exited_thread_is_unregistered() {
    let park = &sync::host::HOST_PARK;
    assert!(park.is_registered(park.current()));
    let other = thread::spawn(|| {
        let tid = sync::host::HOST_PARK.current();
        assert!(sync::host::HOST_PARK.is_registered(tid));
        tid
    })
    .join()
    .unwrap();
    assert!(!park.is_registered(other));
    // 唤醒已退出的线程不做任何事
    park.unpark(other);
}

#[test]
fn test_sleep_lock_acquire_release() {
    let lock = SleepLock::new("test");
    assert!(!lock.holding());
    lock.acquire();
    assert!(lock.holding());
    assert!(lock.is_locked());
    lock.release();
    assert!(!lock.holding());
    assert!(!lock.is_locked());
}

#[test]
fn test_sleep_lock_try_acquire() {
    let lock = Arc::new(SleepLock::new("try"));
    assert!(lock.try_acquire());
    let other = Arc::clone(&lock);
    let got = thread::spawn(move || other.try_acquire()).join().unwrap();
    assert!(!got);
    lock.release();
}

#[test]
fn test_sleep_lock_holding_is_per_thread() {
    let lock = Arc::new(SleepLock::new("holder"));
    lock.acquire();
    let other = Arc::clone(&lock);
    let seen = thread::spawn(move || (other.is_locked(), other.holding()))
        .join()
        .unwrap();
    assert_eq!(seen, (true, false));
    lock.release();
}

#[test]
fn test_sleep_lock_release_not_held_panics() {
    let lock = Arc::new(SleepLock::new("foreign"));
    lock.acquire();
    let other = Arc::clone(&lock);
    let result = thread::spawn(move || other.release()).join();
    assert!(result.is_err());
    lock.release();
}

#[test]
fn test_sleep_lock_waiter_is_woken() {
    let lock = Arc::new(SleepLock::new("wake"));
    lock.acquire();
    let other = Arc::clone(&lock);
    let waiter = thread::spawn(move || {
        other.acquire();
        let held = other.holding();
        other.release();
        held
    });
    thread::sleep(Duration::from_millis(20));
    lock.release();
    assert!(waiter.join().unwrap());
}

#[test]
fn test_sleep_lock_mutual_exclusion() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 200;

    let lock = Arc::new(SleepLock::new("mutex"));
    let inside = Arc::new(AtomicUsize::new(0));
    let total = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let inside = Arc::clone(&inside);
            let total = Arc::clone(&total);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..ROUNDS {
                    lock.acquire();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    total.fetch_add(1, Ordering::Relaxed);
                    thread::yield_now();
                    inside.fetch_sub(1, Ordering::SeqCst);
                    lock.release();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(total.load(Ordering::Relaxed), THREADS * ROUNDS);
    assert!(!lock.is_locked());
}
