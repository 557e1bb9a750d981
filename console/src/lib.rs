//! kconsole: 把 `log` 记录输出到可替换的控制台
//!
//! 内核通过 [`init_console`] 注册串口等输出设备，宿主机工具注册标准输出。
//! 每条记录格式为 `\x1b[{color}m[{LEVEL} {target}] {args}\x1b[0m\n`。

#![no_std]

pub extern crate log;

use core::fmt::{self, Write};
use core::str::FromStr;
use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Once;

/// 控制台输出抽象 trait
pub trait Console: Sync {
    /// 输出单个字节
    fn put_char(&self, c: u8);

    /// 输出字符串（默认逐字节调用 `put_char`）
    fn put_str(&self, s: &str) {
        for byte in s.bytes() {
            self.put_char(byte);
        }
    }
}

static CONSOLE: Once<&'static dyn Console> = Once::new();

static LOGGER: Logger = Logger;

/// 注册全局控制台并安装 logger。重复调用不会替换已注册的控制台。
pub fn init_console(console: &'static dyn Console) {
    CONSOLE.call_once(|| console);
    let _ = log::set_logger(&LOGGER);
}

/// 解析日志级别（大小写不敏感，支持 `off`），无法解析时返回 `None`。
pub fn parse_level(s: &str) -> Option<LevelFilter> {
    LevelFilter::from_str(s.trim()).ok()
}

/// 设置全局最大日志级别；`None` 或无法解析时为 `Info`。
pub fn set_log_level(env: Option<&str>) {
    let level = env.and_then(parse_level).unwrap_or(LevelFilter::Info);
    log::set_max_level(level);
}

fn color(level: Level) -> u8 {
    match level {
        Level::Error => 31,
        Level::Warn => 93,
        Level::Info => 34,
        Level::Debug => 32,
        Level::Trace => 90,
    }
}

struct Writer(&'static dyn Console);

impl Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.put_str(s);
        Ok(())
    }
}

struct Logger;

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let Some(console) = CONSOLE.get() else {
            return;
        };
        let level = record.level();
        let mut writer = Writer(*console);
        let _ = writeln!(
            writer,
            "\x1b[{}m[{:>5} {}] {}\x1b[0m",
            color(level),
            level,
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}
