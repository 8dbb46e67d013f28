//! A driver registering after its device (and vice versa) both end up
//! bound, then the bound "disk" driver backs a real `BufferCache`
//! round trip through the block layer (spec §4.M, §4.N).

use std::sync::Mutex;

use talon_core::error::Result;
use talon_fs::buffer_cache::BufferCache;
use talon_kernel::block::{Direction, Gendisk, ll_rw_block, NoopElevator, RequestQueue};
use talon_kernel::bus::{Bus, Device, Driver};

struct DiskDevice;
impl Device for DiskDevice {
    fn name(&self) -> &str {
        "disk0"
    }
}

struct BlockDriver;
impl Driver for BlockDriver {
    fn name(&self) -> &str {
        "block-driver"
    }
    fn probe(&self, _dev: &dyn Device) -> Result<()> {
        Ok(())
    }
    fn remove(&self, _dev: &dyn Device) {}
}

fn matches_any(_dev: &dyn Device, _driver: &dyn Driver) -> bool {
    true
}

#[test]
fn driver_registered_after_device_binds_via_probe() {
    let bus = Bus::new("platform", matches_any);
    bus.add_device(Box::new(DiskDevice));
    assert_eq!(bus.device_count(), 1);
    assert!(!bus.is_bound("disk0"));

    bus.add_driver(Box::new(BlockDriver));
    assert!(bus.is_bound("disk0"));
}

#[test]
fn device_registered_after_driver_binds_via_probe() {
    let bus = Bus::new("platform", matches_any);
    bus.add_driver(Box::new(BlockDriver));
    bus.add_device(Box::new(DiskDevice));
    assert!(bus.is_bound("disk0"));
}

struct MemDisk {
    blocks: Mutex<Vec<[u8; 512]>>,
}

impl Gendisk for MemDisk {
    fn name(&self) -> &str {
        "disk0"
    }
    fn block_size(&self) -> u32 {
        512
    }
    fn read_block(&self, block_number: u64, buf: &mut [u8]) -> Result<()> {
        buf.copy_from_slice(&self.blocks.lock().unwrap()[block_number as usize]);
        Ok(())
    }
    fn write_block(&self, block_number: u64, buf: &[u8]) -> Result<()> {
        self.blocks.lock().unwrap()[block_number as usize].copy_from_slice(buf);
        Ok(())
    }
}

#[test]
fn buffer_cache_survives_a_dirty_evict_and_resync_cycle() {
    let disk = MemDisk {
        blocks: Mutex::new(vec![[0u8; 512]; 8]),
    };
    let queue = RequestQueue::new(Box::new(disk), Box::new(NoopElevator));
    let cache = BufferCache::new();

    for block in 0..8u64 {
        let buf = cache.bread(&queue, block).unwrap();
        buf.with_data_mut(|d| d[0] = block as u8);
        cache.mark_buffer_dirty(&buf);
        cache.sync_dirty_buffer(&queue, &buf).unwrap();
        cache.brelse(&buf);
    }

    let mut scratch = [0u8; 512];
    ll_rw_block(&queue, Direction::Read, 3, &mut scratch).unwrap();
    assert_eq!(scratch[0], 3);
}
