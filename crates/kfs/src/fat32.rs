//! Bit-exact FAT32 reader/writer backend (spec §4.H.7). Best-effort
//! interop only: boot-sector and directory-entry layout match the
//! on-disk format, but no FAT12/16 fallback and no long-name write
//! support.

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use talon_core::error::{KError, Result};
use talon_core::sync::SpinLock;

use crate::buffer_cache::{BlockDevice, BufferCache};
use crate::inode::{alloc_ino, DirEntry, Inode, InodeMetadata, InodeOps, InodeType};
use crate::superblock::{FileSystemType, Superblock, SuperblockOps};

const SECTOR_SIZE: usize = 512;
const DIR_ENTRY_SIZE: usize = 32;
const END_OF_CHAIN: u32 = 0x0FFF_FFF8;
const BOOT_SIGNATURE: u16 = 0xAA55;
const ATTR_DIRECTORY: u8 = 0x10;
const ATTR_LONG_NAME: u8 = 0x0F;
const DELETED_MARK: u8 = 0xE5;

#[derive(Debug, Clone, Copy)]
struct BootSector {
    bytes_per_sector: u16,
    sectors_per_cluster: u8,
    reserved_sectors: u16,
    fat_count: u8,
    fat_size_32: u32,
    root_cluster: u32,
    total_sectors: u32,
}

impl BootSector {
    fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < SECTOR_SIZE {
            return Err(KError::Inval);
        }
        let signature = u16::from_le_bytes([raw[510], raw[511]]);
        if signature != BOOT_SIGNATURE {
            return Err(KError::Inval);
        }
        let total_sectors_16 = u16::from_le_bytes([raw[19], raw[20]]);
        let total_sectors_32 = u32::from_le_bytes([raw[32], raw[33], raw[34], raw[35]]);
        Ok(Self {
            bytes_per_sector: u16::from_le_bytes([raw[11], raw[12]]),
            sectors_per_cluster: raw[13],
            reserved_sectors: u16::from_le_bytes([raw[14], raw[15]]),
            fat_count: raw[16],
            fat_size_32: u32::from_le_bytes([raw[36], raw[37], raw[38], raw[39]]),
            root_cluster: u32::from_le_bytes([raw[44], raw[45], raw[46], raw[47]]),
            total_sectors: if total_sectors_16 != 0 {
                total_sectors_16 as u32
            } else {
                total_sectors_32
            },
        })
    }
}

/// Uppercases and splits `name` into the fixed 8.3 FAT name field.
fn format_name(name: &str) -> [u8; 11] {
    let mut out = [b' '; 11];
    let bytes = name.as_bytes();
    let dot = bytes.iter().position(|&b| b == b'.');
    let stem_end = dot.unwrap_or(bytes.len());
    for (i, &b) in bytes[..stem_end].iter().take(8).enumerate() {
        out[i] = b.to_ascii_uppercase();
    }
    if let Some(dot) = dot {
        for (i, &b) in bytes[dot + 1..].iter().take(3).enumerate() {
            out[8 + i] = b.to_ascii_uppercase();
        }
    }
    out
}

/// Reassembles an 8.3 FAT name field into a display string.
fn parse_name(raw: &[u8; 11]) -> String {
    let stem = core::str::from_utf8(&raw[..8]).unwrap_or("").trim_end();
    let ext = core::str::from_utf8(&raw[8..11]).unwrap_or("").trim_end();
    if ext.is_empty() {
        String::from(stem)
    } else {
        let mut s = String::from(stem);
        s.push('.');
        s.push_str(ext);
        s
    }
}

struct RawDirEntry {
    name: [u8; 11],
    attr: u8,
    cluster: u32,
    size: u32,
}

impl RawDirEntry {
    fn read(bytes: &[u8]) -> Self {
        let mut name = [0u8; 11];
        name.copy_from_slice(&bytes[0..11]);
        let cluster_high = u16::from_le_bytes([bytes[20], bytes[21]]) as u32;
        let cluster_low = u16::from_le_bytes([bytes[26], bytes[27]]) as u32;
        Self {
            name,
            attr: bytes[11],
            cluster: (cluster_high << 16) | cluster_low,
            size: u32::from_le_bytes([bytes[28], bytes[29], bytes[30], bytes[31]]),
        }
    }

    fn write(bytes: &mut [u8], name: [u8; 11], attr: u8, cluster: u32, size: u32) {
        bytes.fill(0);
        bytes[0..11].copy_from_slice(&name);
        bytes[11] = attr;
        bytes[20..22].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
        bytes[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
        bytes[28..32].copy_from_slice(&size.to_le_bytes());
    }
}

/// A directory entry's on-disk location, kept so writes can patch the
/// entry's cluster/size fields in place.
#[derive(Clone, Copy)]
struct EntryLocation {
    sector: u64,
    offset: usize,
}

/// Superblock-private FAT32 state: the parsed geometry plus the buffer
/// cache used for all FAT and data I/O.
struct Fat32Sb {
    device: Arc<dyn BlockDevice>,
    cache: BufferCache,
    fat_start_sector: u64,
    data_start_sector: u64,
    root_cluster: u32,
    sectors_per_cluster: u32,
    bytes_per_sector: u32,
    total_sectors: u32,
}

impl Fat32Sb {
    fn mount(device: Arc<dyn BlockDevice>) -> Result<Arc<Self>> {
        let cache = BufferCache::new();
        let boot = cache.bread(device.as_ref(), 0)?;
        let parsed = boot.with_data(BootSector::parse)?;
        cache.brelse(&boot);

        let fat_start_sector = parsed.reserved_sectors as u64;
        let data_start_sector =
            fat_start_sector + parsed.fat_count as u64 * parsed.fat_size_32 as u64;
        Ok(Arc::new(Self {
            device,
            cache,
            fat_start_sector,
            data_start_sector,
            root_cluster: parsed.root_cluster,
            sectors_per_cluster: parsed.sectors_per_cluster as u32,
            bytes_per_sector: parsed.bytes_per_sector as u32,
            total_sectors: parsed.total_sectors,
        }))
    }

    fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_sector * self.sectors_per_cluster
    }

    fn cluster_to_sector(&self, cluster: u32) -> u64 {
        self.data_start_sector + (cluster as u64 - 2) * self.sectors_per_cluster as u64
    }

    fn next_cluster(&self, cluster: u32) -> Result<u32> {
        let byte_off = cluster as u64 * 4;
        let fat_sector = self.fat_start_sector + byte_off / self.bytes_per_sector as u64;
        let in_sector = (byte_off % self.bytes_per_sector as u64) as usize;
        let bh = self.cache.bread(self.device.as_ref(), fat_sector)?;
        let value = bh.with_data(|d| {
            u32::from_le_bytes([
                d[in_sector],
                d[in_sector + 1],
                d[in_sector + 2],
                d[in_sector + 3],
            ])
        });
        self.cache.brelse(&bh);
        Ok(value & 0x0FFF_FFFF)
    }

    fn write_fat_entry(&self, cluster: u32, value: u32) -> Result<()> {
        let byte_off = cluster as u64 * 4;
        let fat_sector = self.fat_start_sector + byte_off / self.bytes_per_sector as u64;
        let in_sector = (byte_off % self.bytes_per_sector as u64) as usize;
        let bh = self.cache.bread(self.device.as_ref(), fat_sector)?;
        bh.with_data_mut(|d| {
            let existing = u32::from_le_bytes([
                d[in_sector],
                d[in_sector + 1],
                d[in_sector + 2],
                d[in_sector + 3],
            ]);
            let merged = (existing & 0xF000_0000) | (value & 0x0FFF_FFFF);
            d[in_sector..in_sector + 4].copy_from_slice(&merged.to_le_bytes());
        });
        self.cache.mark_buffer_dirty(&bh);
        self.cache.sync_dirty_buffer(self.device.as_ref(), &bh)?;
        self.cache.brelse(&bh);
        Ok(())
    }

    fn find_free_cluster(&self) -> Result<u32> {
        let max_cluster = self.total_sectors / self.sectors_per_cluster.max(1);
        let mut cluster = 2u32;
        while cluster < max_cluster {
            if self.next_cluster(cluster)? == 0 {
                return Ok(cluster);
            }
            cluster += 1;
        }
        Err(KError::Oom)
    }

    fn alloc_cluster(&self, prev: Option<u32>) -> Result<u32> {
        let new_cluster = self.find_free_cluster()?;
        self.write_fat_entry(new_cluster, 0x0FFF_FFFF)?;
        if let Some(prev_cluster) = prev {
            if let Err(e) = self.write_fat_entry(prev_cluster, new_cluster) {
                let _ = self.write_fat_entry(new_cluster, 0);
                return Err(e);
            }
        }
        let sector = self.cluster_to_sector(new_cluster);
        for i in 0..self.sectors_per_cluster as u64 {
            let bh = self.cache.getblk(self.device.as_ref(), sector + i);
            bh.with_data_mut(|d| d.fill(0));
            self.cache.mark_buffer_dirty(&bh);
            self.cache.sync_dirty_buffer(self.device.as_ref(), &bh)?;
        }
        Ok(new_cluster)
    }

    fn free_chain(&self, start: u32) -> Result<()> {
        let mut cluster = start;
        while cluster >= 2 && cluster < END_OF_CHAIN {
            let next = self.next_cluster(cluster)?;
            self.write_fat_entry(cluster, 0)?;
            cluster = next;
        }
        Ok(())
    }

    /// Every non-deleted, non-long-name, non-terminator entry in the
    /// directory chain rooted at `dir_cluster`, with its on-disk
    /// location.
    fn scan_dir(&self, dir_cluster: u32) -> Result<Vec<(EntryLocation, RawDirEntry)>> {
        let mut out = Vec::new();
        let mut cluster = dir_cluster;
        'clusters: while cluster >= 2 && cluster < END_OF_CHAIN {
            let sector = self.cluster_to_sector(cluster);
            for s in 0..self.sectors_per_cluster as u64 {
                let bh = self.cache.bread(self.device.as_ref(), sector + s)?;
                let entries_per_sector = SECTOR_SIZE / DIR_ENTRY_SIZE;
                for j in 0..entries_per_sector {
                    let off = j * DIR_ENTRY_SIZE;
                    let first_byte = bh.with_data(|d| d[off]);
                    if first_byte == 0x00 {
                        self.cache.brelse(&bh);
                        break 'clusters;
                    }
                    if first_byte == DELETED_MARK {
                        continue;
                    }
                    let raw = bh.with_data(|d| RawDirEntry::read(&d[off..off + DIR_ENTRY_SIZE]));
                    if raw.attr == ATTR_LONG_NAME {
                        continue;
                    }
                    out.push((
                        EntryLocation {
                            sector: sector + s,
                            offset: off,
                        },
                        raw,
                    ));
                }
                self.cache.brelse(&bh);
            }
            cluster = self.next_cluster(cluster)?;
        }
        Ok(out)
    }

    /// Appends a new entry to the directory chain rooted at
    /// `dir_cluster`, extending the chain if every cluster is full.
    fn add_entry(
        &self,
        dir_cluster: u32,
        name: &str,
        cluster: u32,
        size: u32,
        is_dir: bool,
    ) -> Result<EntryLocation> {
        let fat_name = format_name(name);
        let attr = if is_dir { ATTR_DIRECTORY } else { 0x20 };
        let mut cluster = dir_cluster;
        loop {
            let sector = self.cluster_to_sector(cluster);
            for s in 0..self.sectors_per_cluster as u64 {
                let bh = self.cache.bread(self.device.as_ref(), sector + s)?;
                let entries_per_sector = SECTOR_SIZE / DIR_ENTRY_SIZE;
                for j in 0..entries_per_sector {
                    let off = j * DIR_ENTRY_SIZE;
                    let first_byte = bh.with_data(|d| d[off]);
                    if first_byte == 0x00 || first_byte == DELETED_MARK {
                        bh.with_data_mut(|d| {
                            RawDirEntry::write(&mut d[off..off + DIR_ENTRY_SIZE], fat_name, attr, cluster, size);
                        });
                        self.cache.mark_buffer_dirty(&bh);
                        self.cache.sync_dirty_buffer(self.device.as_ref(), &bh)?;
                        let loc = EntryLocation {
                            sector: sector + s,
                            offset: off,
                        };
                        self.cache.brelse(&bh);
                        return Ok(loc);
                    }
                }
                self.cache.brelse(&bh);
            }
            let next = self.next_cluster(cluster)?;
            cluster = if next >= END_OF_CHAIN {
                self.alloc_cluster(Some(cluster))?
            } else {
                next
            };
        }
    }

    fn mark_deleted(&self, loc: EntryLocation) -> Result<()> {
        let bh = self.cache.bread(self.device.as_ref(), loc.sector)?;
        bh.with_data_mut(|d| d[loc.offset] = DELETED_MARK);
        self.cache.mark_buffer_dirty(&bh);
        self.cache.sync_dirty_buffer(self.device.as_ref(), &bh)?;
        self.cache.brelse(&bh);
        Ok(())
    }

    fn patch_entry(&self, loc: EntryLocation, cluster: u32, size: u32) -> Result<()> {
        let bh = self.cache.bread(self.device.as_ref(), loc.sector)?;
        bh.with_data_mut(|d| {
            d[loc.offset + 20..loc.offset + 22].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
            d[loc.offset + 26..loc.offset + 28].copy_from_slice(&(cluster as u16).to_le_bytes());
            d[loc.offset + 28..loc.offset + 32].copy_from_slice(&size.to_le_bytes());
        });
        self.cache.mark_buffer_dirty(&bh);
        self.cache.sync_dirty_buffer(self.device.as_ref(), &bh)?;
        self.cache.brelse(&bh);
        Ok(())
    }
}

fn meta_for(mode: u32, size: u64) -> InodeMetadata {
    InodeMetadata {
        mode,
        size,
        nlink: 1,
        uid: 0,
        gid: 0,
        atime: 0,
        mtime: 0,
        block_size: SECTOR_SIZE as u32,
    }
}

struct FatDirOps {
    sb: Arc<Fat32Sb>,
    cluster: u32,
}

fn make_inode_for_entry(sb: &Arc<Fat32Sb>, loc: EntryLocation, entry: &RawDirEntry) -> Arc<Inode> {
    if entry.attr & ATTR_DIRECTORY != 0 {
        Inode::new(
            alloc_ino(),
            InodeType::Directory,
            meta_for(0o755 | 0o040000, 0),
            Arc::new(FatDirOps {
                sb: sb.clone(),
                cluster: entry.cluster,
            }),
            Weak::new(),
            None,
        )
    } else {
        Inode::new(
            alloc_ino(),
            InodeType::Regular,
            meta_for(0o644, entry.size as u64),
            Arc::new(FatFileOps {
                sb: sb.clone(),
                first_cluster: AtomicU32::new(entry.cluster),
                size: AtomicU64::new(entry.size as u64),
                loc: SpinLock::new(loc),
            }),
            Weak::new(),
            None,
        )
    }
}

impl InodeOps for FatDirOps {
    fn lookup(&self, name: &str) -> Result<Arc<Inode>> {
        let target = format_name(name);
        let entries = self.sb.scan_dir(self.cluster)?;
        let (loc, entry) = entries
            .into_iter()
            .find(|(_, e)| e.name == target)
            .ok_or(KError::NoEnt)?;
        Ok(make_inode_for_entry(&self.sb, loc, &entry))
    }

    fn create(&self, name: &str, _mode: u32) -> Result<Arc<Inode>> {
        if self.lookup(name).is_ok() {
            return Err(KError::Exists);
        }
        let cluster = self.sb.alloc_cluster(None)?;
        let loc = self
            .sb
            .add_entry(self.cluster, name, cluster, 0, false)
            .inspect_err(|_| {
                let _ = self.sb.free_chain(cluster);
            })?;
        Ok(Inode::new(
            alloc_ino(),
            InodeType::Regular,
            meta_for(0o644, 0),
            Arc::new(FatFileOps {
                sb: self.sb.clone(),
                first_cluster: AtomicU32::new(cluster),
                size: AtomicU64::new(0),
                loc: SpinLock::new(loc),
            }),
            Weak::new(),
            None,
        ))
    }

    fn mkdir(&self, name: &str, _mode: u32) -> Result<Arc<Inode>> {
        if self.lookup(name).is_ok() {
            return Err(KError::Exists);
        }
        let cluster = self.sb.alloc_cluster(None)?;
        self.sb.add_entry(self.cluster, name, cluster, 0, true)?;
        let parent_cluster = if self.cluster == self.sb.root_cluster {
            0
        } else {
            self.cluster
        };
        self.sb.add_entry(cluster, ".", cluster, 0, true)?;
        self.sb.add_entry(cluster, "..", parent_cluster, 0, true)?;
        Ok(Inode::new(
            alloc_ino(),
            InodeType::Directory,
            meta_for(0o755 | 0o040000, 0),
            Arc::new(FatDirOps {
                sb: self.sb.clone(),
                cluster,
            }),
            Weak::new(),
            None,
        ))
    }

    fn mknod(&self, name: &str, mode: u32, inode_type: InodeType) -> Result<Arc<Inode>> {
        if inode_type != InodeType::Regular {
            return Err(KError::NoSys);
        }
        self.create(name, mode)
    }

    fn unlink(&self, name: &str) -> Result<()> {
        let target = format_name(name);
        let entries = self.sb.scan_dir(self.cluster)?;
        let (loc, entry) = entries
            .into_iter()
            .find(|(_, e)| e.name == target)
            .ok_or(KError::NoEnt)?;
        if entry.attr & ATTR_DIRECTORY != 0 {
            return Err(KError::IsDir);
        }
        self.sb.mark_deleted(loc)?;
        self.sb.free_chain(entry.cluster)?;
        Ok(())
    }

    fn rmdir(&self, name: &str) -> Result<()> {
        let target = format_name(name);
        let entries = self.sb.scan_dir(self.cluster)?;
        let (loc, entry) = entries
            .into_iter()
            .find(|(_, e)| e.name == target)
            .ok_or(KError::NoEnt)?;
        if entry.attr & ATTR_DIRECTORY == 0 {
            return Err(KError::NotDir);
        }
        let children = self.sb.scan_dir(entry.cluster)?;
        if children.iter().any(|(_, e)| parse_name(&e.name) != "." && parse_name(&e.name) != "..") {
            return Err(KError::Inval);
        }
        self.sb.mark_deleted(loc)?;
        self.sb.free_chain(entry.cluster)?;
        Ok(())
    }

    fn readdir(&self, index: usize) -> Result<Option<DirEntry>> {
        let entries = self.sb.scan_dir(self.cluster)?;
        match entries.get(index) {
            Some((_, entry)) => Ok(Some(DirEntry {
                name: parse_name(&entry.name),
                inode_type: if entry.attr & ATTR_DIRECTORY != 0 {
                    InodeType::Directory
                } else {
                    InodeType::Regular
                },
            })),
            None => Ok(None),
        }
    }
}

struct FatFileOps {
    sb: Arc<Fat32Sb>,
    first_cluster: AtomicU32,
    size: AtomicU64,
    loc: SpinLock<EntryLocation>,
}

impl InodeOps for FatFileOps {
    fn lookup(&self, _name: &str) -> Result<Arc<Inode>> {
        Err(KError::NotDir)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let size = self.size.load(Ordering::Acquire);
        if offset >= size {
            return Ok(0);
        }
        let to_read = core::cmp::min(buf.len() as u64, size - offset) as usize;
        let cluster_size = self.sb.bytes_per_cluster() as u64;
        let mut cluster = self.first_cluster.load(Ordering::Acquire);
        let mut skip = offset / cluster_size;
        let mut cluster_offset = (offset % cluster_size) as usize;
        while skip > 0 {
            if cluster < 2 || cluster >= END_OF_CHAIN {
                return Ok(0);
            }
            cluster = self.sb.next_cluster(cluster)?;
            skip -= 1;
        }

        let mut read = 0usize;
        while read < to_read && cluster >= 2 && cluster < END_OF_CHAIN {
            let sector_base = self.sb.cluster_to_sector(cluster);
            let mut pos_in_cluster = cluster_offset;
            while read < to_read && pos_in_cluster < cluster_size as usize {
                let sector_index = pos_in_cluster / SECTOR_SIZE;
                let byte_in_sector = pos_in_cluster % SECTOR_SIZE;
                let bh = self.sb.cache.bread(self.sb.device.as_ref(), sector_base + sector_index as u64)?;
                let chunk = core::cmp::min(SECTOR_SIZE - byte_in_sector, to_read - read);
                bh.with_data(|d| {
                    buf[read..read + chunk].copy_from_slice(&d[byte_in_sector..byte_in_sector + chunk]);
                });
                self.sb.cache.brelse(&bh);
                read += chunk;
                pos_in_cluster += chunk;
            }
            cluster_offset = 0;
            cluster = self.sb.next_cluster(cluster)?;
        }
        Ok(read)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        let cluster_size = self.sb.bytes_per_cluster() as u64;
        let mut cluster = self.first_cluster.load(Ordering::Acquire);
        if cluster < 2 {
            cluster = self.sb.alloc_cluster(None)?;
            self.first_cluster.store(cluster, Ordering::Release);
        }
        let mut skip = offset / cluster_size;
        while skip > 0 {
            let next = self.sb.next_cluster(cluster)?;
            cluster = if next >= END_OF_CHAIN {
                self.sb.alloc_cluster(Some(cluster))?
            } else {
                next
            };
            skip -= 1;
        }
        let mut cluster_offset = (offset % cluster_size) as usize;

        let mut written = 0usize;
        while written < buf.len() {
            let sector_index = cluster_offset / SECTOR_SIZE;
            let byte_in_sector = cluster_offset % SECTOR_SIZE;
            let sector = self.sb.cluster_to_sector(cluster) + sector_index as u64;
            let bh = self.sb.cache.bread(self.sb.device.as_ref(), sector)?;
            let chunk = core::cmp::min(SECTOR_SIZE - byte_in_sector, buf.len() - written);
            bh.with_data_mut(|d| {
                d[byte_in_sector..byte_in_sector + chunk].copy_from_slice(&buf[written..written + chunk]);
            });
            self.sb.cache.mark_buffer_dirty(&bh);
            self.sb.cache.sync_dirty_buffer(self.sb.device.as_ref(), &bh)?;
            self.sb.cache.brelse(&bh);

            written += chunk;
            cluster_offset += chunk;
            if cluster_offset >= cluster_size as usize && written < buf.len() {
                cluster_offset = 0;
                let next = self.sb.next_cluster(cluster)?;
                cluster = if next >= END_OF_CHAIN {
                    self.sb.alloc_cluster(Some(cluster))?
                } else {
                    next
                };
            }
        }

        let new_size = self.size.load(Ordering::Acquire).max(offset + buf.len() as u64);
        self.size.store(new_size, Ordering::Release);
        let loc = *self.loc.lock();
        self.sb
            .patch_entry(loc, self.first_cluster.load(Ordering::Acquire), new_size as u32)?;
        Ok(written)
    }
}

struct FatSuperblockOps;
impl SuperblockOps for FatSuperblockOps {}

/// The `fat32` filesystem type.
pub struct Fat32;

impl FileSystemType for Fat32 {
    fn name(&self) -> &str {
        "fat32"
    }

    fn mount(&self, dev: Option<Arc<dyn BlockDevice>>, _data: &str) -> Result<Arc<Superblock>> {
        let device = dev.ok_or(KError::Inval)?;
        let fat_sb = Fat32Sb::mount(device)?;
        let sb = Superblock::new(
            fat_sb.bytes_per_sector,
            BOOT_SIGNATURE as u32,
            Arc::new(FatSuperblockOps),
        );
        let root_ops = Arc::new(FatDirOps {
            sb: fat_sb.clone(),
            cluster: fat_sb.root_cluster,
        });
        let root_inode = Inode::new(
            alloc_ino(),
            InodeType::Directory,
            meta_for(0o755 | 0o040000, 0),
            root_ops,
            Weak::new(),
            None,
        );
        let root_dentry = crate::dentry::Dentry::new_root(String::from("/"));
        root_dentry.instantiate(root_inode.clone());
        sb.set_root(root_dentry);
        sb.track_inode(root_inode);
        Ok(sb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::BTreeMap;

    struct MemDisk {
        block_size: u32,
        blocks: SpinLock<BTreeMap<u64, Vec<u8>>>,
    }

    impl BlockDevice for MemDisk {
        fn device_id(&self) -> u64 {
            1
        }
        fn block_size(&self) -> u32 {
            self.block_size
        }
        fn read_block(&self, block_number: u64, buf: &mut [u8]) -> Result<()> {
            let blocks = self.blocks.lock();
            if let Some(data) = blocks.get(&block_number) {
                buf.copy_from_slice(data);
            } else {
                buf.fill(0);
            }
            Ok(())
        }
        fn write_block(&self, block_number: u64, buf: &[u8]) -> Result<()> {
            self.blocks.lock().insert(block_number, buf.to_vec());
            Ok(())
        }
    }

    /// Builds a minimal FAT32 image: 1 reserved sector, one 512-byte
    /// FAT, 8 sectors/cluster, root at cluster 2.
    fn formatted_disk() -> Arc<MemDisk> {
        let disk = Arc::new(MemDisk {
            block_size: SECTOR_SIZE as u32,
            blocks: SpinLock::new(BTreeMap::new()),
        });
        let mut boot = alloc::vec![0u8; SECTOR_SIZE];
        boot[11..13].copy_from_slice(&(SECTOR_SIZE as u16).to_le_bytes());
        boot[13] = 8;
        boot[14..16].copy_from_slice(&1u16.to_le_bytes());
        boot[16] = 1;
        boot[32..36].copy_from_slice(&2048u32.to_le_bytes());
        boot[36..40].copy_from_slice(&1u32.to_le_bytes());
        boot[44..48].copy_from_slice(&2u32.to_le_bytes());
        boot[510] = 0x55;
        boot[511] = 0xAA;
        disk.blocks.lock().insert(0, boot);

        let mut fat = alloc::vec![0u8; SECTOR_SIZE];
        fat[8..12].copy_from_slice(&0x0FFF_FFFFu32.to_le_bytes());
        disk.blocks.lock().insert(1, fat);
        disk
    }

    fn mount() -> Arc<Superblock> {
        let disk = formatted_disk();
        Fat32.mount(Some(disk), "").unwrap()
    }

    #[test]
    fn mount_parses_boot_sector() {
        let sb = mount();
        assert_eq!(sb.magic, BOOT_SIGNATURE as u32);
    }

    #[test]
    fn create_then_write_then_read_round_trips() {
        let sb = mount();
        let root = sb.root().unwrap().inode().unwrap();
        let file = root.ops().create("hi.txt", 0o644).unwrap();
        file.ops().write_at(0, b"hello").unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(file.ops().read_at(0, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn mkdir_then_create_then_readdir_has_dot_dotdot_and_file() {
        let sb = mount();
        let root = sb.root().unwrap().inode().unwrap();
        let a = root.ops().mkdir("a", 0o755).unwrap();
        a.ops().create("hi.txt", 0o644).unwrap();

        let mut names = Vec::new();
        let mut i = 0;
        while let Some(entry) = a.ops().readdir(i).unwrap() {
            names.push(entry.name);
            i += 1;
        }
        assert!(names.contains(&String::from(".")));
        assert!(names.contains(&String::from("..")));
        assert!(names.contains(&String::from("HI.TXT")) || names.contains(&String::from("hi.txt")));
    }

    #[test]
    fn name_formatting_uppercases_and_splits_8_3() {
        assert_eq!(&format_name("hi.txt"), b"HI      TXT");
        assert_eq!(&format_name("README"), b"README     ");
    }

    #[test]
    fn unlink_then_lookup_is_noent() {
        let sb = mount();
        let root = sb.root().unwrap().inode().unwrap();
        root.ops().create("tmp.txt", 0o644).unwrap();
        root.ops().unlink("tmp.txt").unwrap();
        assert_eq!(root.ops().lookup("tmp.txt").unwrap_err(), KError::NoEnt);
    }
}
