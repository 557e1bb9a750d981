mod config;
mod disk;
mod stress;

use clap::{Args, Parser, Subcommand};
use config::StressConfig;
use disk::MemDisk;
use kconsole::Console;
use once_cell::sync::Lazy;
use std::{
    io::Write,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

static PROJECT: Lazy<&'static Path> =
    Lazy::new(|| Path::new(std::env!("CARGO_MANIFEST_DIR")).parent().unwrap());

static DEFAULT_CONFIG: Lazy<PathBuf> = Lazy::new(|| PROJECT.join("stress.toml"));

/// 日志输出到标准错误
struct Stderr;

impl Console for Stderr {
    fn put_char(&self, c: u8) {
        let _ = std::io::stderr().write_all(&[c]);
    }

    fn put_str(&self, s: &str) {
        let _ = std::io::stderr().write_all(s.as_bytes());
    }
}

static STDERR: Stderr = Stderr;

#[derive(Parser)]
#[clap(name = "xtask")]
#[clap(version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a concurrent workload against the block cache.
    Stress(StressArgs),
    /// Print the effective configuration.
    Config(ConfigArgs),
}

#[derive(Args, Default)]
struct ConfigArgs {
    /// TOML config file, defaults to stress.toml at the workspace root if present.
    #[clap(long)]
    config: Option<PathBuf>,
    #[clap(long)]
    capacity: Option<usize>,
    #[clap(long)]
    partitions: Option<usize>,
    #[clap(long)]
    threads: Option<usize>,
    #[clap(long)]
    ops: Option<usize>,
    #[clap(long)]
    blocks: Option<u32>,
    #[clap(long)]
    devices: Option<u32>,
    #[clap(long)]
    write_ratio: Option<f64>,
    #[clap(long)]
    latency_us: Option<u64>,
    #[clap(long)]
    log_batch: Option<usize>,
    #[clap(long)]
    seed: Option<u64>,
    /// Log level: error, warn, info, debug, trace or off.
    #[clap(long)]
    log: Option<String>,
}

#[derive(Args)]
struct StressArgs {
    #[clap(flatten)]
    config: ConfigArgs,
}

impl ConfigArgs {
    fn resolve(&self) -> anyhow::Result<StressConfig> {
        let path = self
            .config
            .clone()
            .or_else(|| DEFAULT_CONFIG.exists().then(|| (*DEFAULT_CONFIG).clone()));
        let mut config = match path {
            Some(path) => {
                log::info!("loading {}", path.display());
                StressConfig::load(&path)?
            }
            None => StressConfig::default(),
        };
        macro_rules! apply {
            ($($section:ident.$field:ident),*) => {
                $(if let Some(value) = self.$field.clone() {
                    config.$section.$field = value;
                })*
            };
        }
        apply!(
            cache.capacity,
            cache.partitions,
            workload.threads,
            workload.ops,
            workload.blocks,
            workload.devices,
            workload.write_ratio,
            workload.latency_us,
            workload.log_batch,
            workload.seed
        );
        config.validate()?;
        Ok(config)
    }
}

impl StressArgs {
    fn run(&self) -> anyhow::Result<bool> {
        let config = self.config.resolve()?;
        let disk = Arc::new(MemDisk::new(config.workload.latency_us));
        let cache = bcache::Cache::new(config.cache, disk.clone())?;
        log::info!("{:?}", config.workload);
        let report = stress::run(&cache, &disk, &config.workload);
        println!("{report}");
        let consistent = report.consistent();
        if let Err(err) = cache.teardown() {
            log::error!("{err}");
            return Ok(false);
        }
        Ok(consistent)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = match &cli.command {
        Commands::Stress(args) => args.config.log.as_deref(),
        Commands::Config(args) => args.log.as_deref(),
    };
    kconsole::init_console(&STDERR);
    kconsole::set_log_level(level);
    sync::host::init();

    let result = match cli.command {
        Commands::Stress(args) => args.run(),
        Commands::Config(args) => args.resolve().map(|config| {
            println!("{config:#?}");
            true
        }),
    };
    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
