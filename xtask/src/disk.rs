use bcache::{BlockDevice, BlockId, IoError, BLOCK_SZ};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    thread,
    time::Duration,
};

/// 内存盘，可选地为每次传输加上固定延迟。
pub struct MemDisk {
    blocks: Mutex<HashMap<BlockId, Box<[u8; BLOCK_SZ]>>>,
    latency: Option<Duration>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemDisk {
    pub fn new(latency_us: u64) -> Self {
        Self {
            blocks: Mutex::new(HashMap::new()),
            latency: (latency_us > 0).then(|| Duration::from_micros(latency_us)),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    pub fn transfers(&self) -> (u64, u64) {
        (
            self.reads.load(Ordering::Relaxed),
            self.writes.load(Ordering::Relaxed),
        )
    }

    /// 块开头 4 字节的计数器之和
    pub fn counter_sum(&self) -> u64 {
        self.blocks
            .lock()
            .unwrap()
            .values()
            .map(|block| u32::from_le_bytes([block[0], block[1], block[2], block[3]]) as u64)
            .sum()
    }

    fn delay(&self) {
        if let Some(latency) = self.latency {
            thread::sleep(latency);
        }
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, id: BlockId, buf: &mut [u8]) -> Result<(), IoError> {
        self.delay();
        match self.blocks.lock().unwrap().get(&id) {
            Some(block) => buf.copy_from_slice(&block[..]),
            None => buf.fill(0),
        }
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_block(&self, id: BlockId, buf: &[u8]) -> Result<(), IoError> {
        self.delay();
        let mut block = Box::new([0u8; BLOCK_SZ]);
        block.copy_from_slice(buf);
        self.blocks.lock().unwrap().insert(id, block);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
