//! kconsole crate 功能性验证测试
//!
//! 这些测试验证 kconsole crate 对外提供的 API 的正确性。
//! 测试在用户态环境运行，使用 std。

use std::sync::{Mutex, MutexGuard, OnceLock};

use kconsole::log::{self, LevelFilter};
use kconsole::{init_console, parse_level, set_log_level, Console};

// 测试用的 Console 实现，记录所有输出
struct TestConsole {
    output: Mutex<Vec<u8>>,
}

impl Console for TestConsole {
    fn put_char(&self, c: u8) {
        self.output.lock().unwrap().push(c);
    }
}

// logger 和最大日志级别都是全局的，用例之间需要串行
static TEST_LOCK: Mutex<()> = Mutex::new(());
static SHARED: OnceLock<&'static TestConsole> = OnceLock::new();

fn shared_console() -> (MutexGuard<'static, ()>, &'static TestConsole) {
    let guard = TEST_LOCK.lock().unwrap_or_else(|err| err.into_inner());
    let console = *SHARED.get_or_init(|| {
        let console: &'static TestConsole = Box::leak(Box::new(TestConsole {
            output: Mutex::new(Vec::new()),
        }));
        init_console(console);
        console
    });
    console.output.lock().unwrap().clear();
    (guard, console)
}

fn output(console: &TestConsole) -> String {
    String::from_utf8(console.output.lock().unwrap().clone()).unwrap()
}

#[test]
fn test_put_str_defaults_to_put_char() {
    let console = TestConsole {
        output: Mutex::new(Vec::new()),
    };
    console.put_str("hello world\n");
    assert_eq!(console.output.lock().unwrap().as_slice(), b"hello world\n");
}

#[test]
fn test_parse_level() {
    assert_eq!(parse_level("trace"), Some(LevelFilter::Trace));
    assert_eq!(parse_level("DEBUG"), Some(LevelFilter::Debug));
    assert_eq!(parse_level(" Warn "), Some(LevelFilter::Warn));
    assert_eq!(parse_level("off"), Some(LevelFilter::Off));
    assert_eq!(parse_level("loud"), None);
}

#[test]
fn test_set_log_level_fallback() {
    let (_guard, _console) = shared_console();
    set_log_level(Some("error"));
    assert_eq!(log::max_level(), LevelFilter::Error);
    set_log_level(Some("bogus"));
    assert_eq!(log::max_level(), LevelFilter::Info);
    set_log_level(None);
    assert_eq!(log::max_level(), LevelFilter::Info);
}

#[test]
fn test_record_format() {
    let (_guard, console) = shared_console();
    set_log_level(Some("trace"));
    log::info!(target: "bcache", "{} buffers", 30);
    let out = output(console);
    assert_eq!(out, "\x1b[34m[ INFO bcache] 30 buffers\x1b[0m\n");
}

#[test]
fn test_level_colors() {
    let (_guard, console) = shared_console();
    set_log_level(Some("trace"));
    log::error!("e");
    log::warn!("w");
    log::debug!("d");
    log::trace!("t");
    let out = output(console);
    assert!(out.contains("\x1b[31m[ERROR"));
    assert!(out.contains("\x1b[93m[ WARN"));
    assert!(out.contains("\x1b[32m[DEBUG"));
    assert!(out.contains("\x1b[90m[TRACE"));
}

#[test]
fn test_level_filtering() {
    let (_guard, console) = shared_console();
    set_log_level(Some("warn"));
    log::info!("hidden");
    log::debug!("hidden");
    log::warn!("shown");
    let out = output(console);
    assert!(!out.contains("hidden"));
    assert!(out.contains("shown"));

    console.output.lock().unwrap().clear();
    set_log_level(Some("off"));
    log::error!("silenced");
    assert!(output(console).is_empty());
}

#[test]
fn test_console_is_sync() {
    let console: &'static TestConsole = Box::leak(Box::new(TestConsole {
        output: Mutex::new(Vec::new()),
    }));
    std::thread::spawn(move || console.put_char(b'X'))
        .join()
        .unwrap();
    assert_eq!(console.output.lock().unwrap().as_slice(), b"X");
}
