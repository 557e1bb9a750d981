use crate::{config::Workload, disk::MemDisk};
use bcache::{BlockId, Buf, Cache, Error, Stats};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    collections::BTreeSet,
    fmt, thread,
    time::{Duration, Instant},
};

#[derive(Default, Clone, Copy, Debug)]
struct WorkerTally {
    ops: u64,
    writes: u64,
    exhausted: u64,
    failed: u64,
}

impl WorkerTally {
    fn merge(mut self, other: Self) -> Self {
        self.ops += other.ops;
        self.writes += other.writes;
        self.exhausted += other.exhausted;
        self.failed += other.failed;
        self
    }
}

pub struct Report {
    tally: WorkerTally,
    stats: Stats,
    transfers: (u64, u64),
    counter_sum: u64,
    elapsed: Duration,
}

impl Report {
    /// 盘上计数器之和应等于成功写入次数
    pub fn consistent(&self) -> bool {
        self.counter_sum == self.tally.writes
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.elapsed.as_secs_f64().max(f64::EPSILON);
        writeln!(
            f,
            "ops        {:>10}  ({:.0} ops/s)",
            self.tally.ops,
            self.tally.ops as f64 / secs
        )?;
        writeln!(
            f,
            "hits       {:>10}  ({:.1}%)",
            self.stats.hits,
            self.stats.hit_ratio() * 100.0
        )?;
        writeln!(f, "misses     {:>10}", self.stats.misses)?;
        writeln!(f, "evictions  {:>10}", self.stats.evictions)?;
        writeln!(
            f,
            "transfers  {:>10} reads, {} writes",
            self.transfers.0, self.transfers.1
        )?;
        writeln!(f, "exhausted  {:>10}", self.tally.exhausted)?;
        writeln!(f, "failed     {:>10}", self.tally.failed)?;
        write!(
            f,
            "counters   {:>10} / {} writes ({})",
            self.counter_sum,
            self.tally.writes,
            if self.consistent() { "ok" } else { "MISMATCH" }
        )
    }
}

/// 在 `cache` 上并发运行 `workload`。
pub fn run(cache: &Cache, disk: &MemDisk, workload: &Workload) -> Report {
    let start = Instant::now();
    let tally = thread::scope(|s| {
        let handles: Vec<_> = (0..workload.threads)
            .map(|t| s.spawn(move || worker(cache, workload, t)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("stress worker panicked"))
            .fold(WorkerTally::default(), WorkerTally::merge)
    });
    Report {
        tally,
        stats: cache.stats(),
        transfers: disk.transfers(),
        counter_sum: disk.counter_sum(),
        elapsed: start.elapsed(),
    }
}

fn worker(cache: &Cache, w: &Workload, t: usize) -> WorkerTally {
    let mut rng = StdRng::seed_from_u64(w.seed ^ (t as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15));
    let mut tally = WorkerTally::default();
    // 模拟日志层：本批写过的块保持 pin 住，直到批次提交
    let mut pinned = BTreeSet::new();

    for _ in 0..w.ops {
        let id = BlockId::new(rng.gen_range(0..w.devices), rng.gen_range(0..w.blocks));
        let mut buf = match cache.read(id) {
            Ok(buf) => buf,
            Err(Error::Exhausted { .. }) => {
                tally.exhausted += 1;
                thread::yield_now();
                continue;
            }
            Err(err) => {
                log::error!("worker {t}: {err}");
                tally.failed += 1;
                continue;
            }
        };
        tally.ops += 1;

        if rng.gen_bool(w.write_ratio) {
            bump(&mut buf);
            match cache.persist(&buf) {
                Ok(()) => tally.writes += 1,
                Err(err) => {
                    log::error!("worker {t}: {err}");
                    tally.failed += 1;
                }
            }
            if w.log_batch > 0 && pinned.insert(id) {
                cache.pin(&buf);
            }
        }
        cache.release(buf);

        if w.log_batch > 0 && pinned.len() >= w.log_batch {
            commit(cache, &mut pinned, t);
        }
    }
    commit(cache, &mut pinned, t);
    tally
}

fn bump(buf: &mut Buf<'_>) {
    let data = buf.data_mut();
    let value = u32::from_le_bytes([data[0], data[1], data[2], data[3]]).wrapping_add(1);
    data[..4].copy_from_slice(&value.to_le_bytes());
}

/// 提交一批：逐个重新检出并撤销 pin。被 pin 的块常驻，检出必然命中。
fn commit(cache: &Cache, pinned: &mut BTreeSet<BlockId>, t: usize) {
    if pinned.is_empty() {
        return;
    }
    log::debug!("worker {t}: commit {} blocks", pinned.len());
    for id in std::mem::take(pinned) {
        match cache.acquire(id) {
            Ok(buf) => {
                cache.unpin(&buf);
                cache.release(buf);
            }
            Err(err) => log::error!("worker {t}: pinned block {id} lost: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcache::CacheConfig;
    use std::sync::Arc;

    fn run_with(config: CacheConfig, workload: Workload) -> Report {
        sync::host::init();
        let disk = Arc::new(MemDisk::new(0));
        let cache = Cache::new(config, disk.clone()).unwrap();
        let report = run(&cache, &disk, &workload);
        cache.teardown().unwrap();
        report
    }

    #[test]
    fn counters_match_writes() {
        let workload = Workload {
            threads: 4,
            ops: 500,
            blocks: 16,
            write_ratio: 0.5,
            ..Workload::default()
        };
        let report = run_with(CacheConfig::new(8, 3), workload);
        assert!(report.consistent(), "{report}");
        assert_eq!(report.tally.exhausted, 0);
        assert_eq!(report.tally.ops, 2000);
        assert!(report.stats.evictions > 0);
    }

    #[test]
    fn pinned_batches_are_committed() {
        let workload = Workload {
            threads: 3,
            ops: 300,
            blocks: 40,
            write_ratio: 1.0,
            log_batch: 3,
            ..Workload::default()
        };
        // 3 * (3 + 1) = 12 个槽位足够
        let report = run_with(CacheConfig::new(12, 5), workload);
        assert!(report.consistent(), "{report}");
        assert_eq!(report.tally.exhausted, 0);
        assert_eq!(report.tally.writes, 900);
    }
}
