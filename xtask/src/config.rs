use anyhow::{bail, Context, Result};
use bcache::CacheConfig;
use serde_derive::Deserialize;
use std::{fs, path::Path};

/// 压力测试配置文件，对应 `stress.toml`。
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StressConfig {
    pub cache: CacheConfig,
    pub workload: Workload,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Workload {
    /// 并发执行流数
    pub threads: usize,
    /// 每个执行流的操作数
    pub ops: usize,
    /// 设备数
    pub devices: u32,
    /// 每个设备上参与测试的块数
    pub blocks: u32,
    /// 写比例，0.0 ~ 1.0
    pub write_ratio: f64,
    /// 每次设备传输的模拟延迟（微秒）
    pub latency_us: u64,
    /// 日志批大小：写过的块 pin 住，攒满后统一 unpin；0 表示不 pin
    pub log_batch: usize,
    pub seed: u64,
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            threads: 4,
            ops: 10_000,
            devices: 1,
            blocks: 64,
            write_ratio: 0.3,
            latency_us: 0,
            log_batch: 0,
            seed: 0x5eed,
        }
    }
}

impl StressConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        let w = &self.workload;
        if w.threads == 0 || w.devices == 0 || w.blocks == 0 {
            bail!("threads, devices and blocks must be positive");
        }
        if !(0.0..=1.0).contains(&w.write_ratio) {
            bail!("write_ratio {} out of range", w.write_ratio);
        }
        // 每个执行流最多同时占用 log_batch 个 pin 和一次检出
        let peak = w.threads * (w.log_batch + 1);
        if peak > self.cache.capacity {
            log::warn!(
                "up to {peak} buffers may be claimed at once but capacity is {}, expect exhaustion",
                self.cache.capacity
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_partial_file() {
        let config: StressConfig = toml::from_str(
            r#"
            [cache]
            capacity = 64

            [workload]
            threads = 8
            write_ratio = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(config.cache, CacheConfig::new(64, bcache::NBUCKET));
        assert_eq!(config.workload.threads, 8);
        assert_eq!(config.workload.ops, Workload::default().ops);
        config.validate().unwrap();
    }

    #[test]
    fn reject_unknown_keys() {
        assert!(toml::from_str::<StressConfig>("[cache]\nsize = 3\n").is_err());
    }

    #[test]
    fn reject_bad_ratio() {
        let mut config = StressConfig::default();
        config.workload.write_ratio = 1.5;
        assert!(config.validate().is_err());
    }
}
