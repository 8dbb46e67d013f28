//! Bootloader-agnostic boot information, parsed from whichever of the
//! two multiboot protocols the loader used (spec §6).
//!
//! Multiboot 1 hands the kernel a fixed `multiboot_info` struct pointed
//! to by `ebx`, identified by magic `0x2BADB002` in `eax`. Multiboot 2
//! hands a tag stream instead, identified by `0x36D76289`. Both are
//! parsed into the same [`BootInfo`] so the rest of the kernel never
//! cares which one booted it.
//!
//! Field decoding is implemented against plain `&[u8]` slices rather
//! than pointer casts, so the byte layout can be exercised under
//! `cargo test` without a real boot-time pointer; only the slice
//! construction at the very top of each `parse_*` function is unsafe.

extern crate alloc;

use alloc::vec::Vec;

use talon_core::addr::PhysAddr;
use talon_mm::pmm::PhysMemoryRegion;

/// Magic value `eax` holds when a multiboot-1 loader hands off control.
pub const MULTIBOOT1_MAGIC: u32 = 0x2BAD_B002;
/// Magic value `eax` holds when a multiboot-2 loader hands off control.
pub const MULTIBOOT2_MAGIC: u32 = 0x36D7_6289;

/// Parsed boot information, independent of which multiboot version
/// produced it.
#[derive(Debug, Default, Clone)]
pub struct BootInfo {
    /// Physical memory regions, in the order the loader reported them.
    pub memory_map: Vec<PhysMemoryRegion>,
    /// Physical address and size of the module loaded as the initrd,
    /// if the loader passed one.
    pub initrd: Option<(PhysAddr, u64)>,
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_ne_bytes(bytes[offset..offset + 4].try_into().expect("4 bytes"))
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    u64::from_ne_bytes(bytes[offset..offset + 8].try_into().expect("8 bytes"))
}

const MB1_HEADER_LEN: usize = 52;
const MB1_FLAG_MODS: u32 = 1 << 3;
const MB1_FLAG_MMAP: u32 = 1 << 6;
const MB1_MMAP_ENTRY_FIXED_LEN: usize = 20; // size(4) + base(8) + length(8), excludes the trailing kind field in the size count
const MB1_MODULE_ENTRY_LEN: usize = 16;

/// Decodes a multiboot-1 fixed header plus its memory map and first
/// module entry, given the header bytes and a byte source for
/// dereferencing the `mmap_addr`/`mods_addr` pointers it contains.
fn decode_multiboot1(header: &[u8], deref: impl Fn(u32, usize) -> Vec<u8>) -> BootInfo {
    let flags = read_u32(header, 0);
    let mods_count = read_u32(header, 20);
    let mods_addr = read_u32(header, 24);
    let mmap_length = read_u32(header, 44);
    let mmap_addr = read_u32(header, 48);

    let mut boot_info = BootInfo::default();

    if flags & MB1_FLAG_MMAP != 0 {
        let mmap = deref(mmap_addr, mmap_length as usize);
        let mut cursor = 0usize;
        while cursor + MB1_MMAP_ENTRY_FIXED_LEN + 4 <= mmap.len() {
            let size = read_u32(&mmap, cursor);
            let base_addr = read_u64(&mmap, cursor + 4);
            let length = read_u64(&mmap, cursor + 12);
            let kind = read_u32(&mmap, cursor + 20);
            boot_info.memory_map.push(PhysMemoryRegion {
                start: PhysAddr::new(base_addr),
                size: length,
                usable: kind == 1,
            });
            // `size` excludes itself.
            cursor += size as usize + 4;
        }
    }

    if flags & MB1_FLAG_MODS != 0 && mods_count > 0 {
        let module = deref(mods_addr, MB1_MODULE_ENTRY_LEN);
        let mod_start = read_u32(&module, 0);
        let mod_end = read_u32(&module, 4);
        boot_info.initrd = Some((PhysAddr::new(mod_start as u64), (mod_end - mod_start) as u64));
    }

    boot_info
}

/// Parses a multiboot-1 info struct at `info_addr` (already translated
/// to an accessible virtual address, typically via the HHDM).
///
/// # Safety
///
/// `info_addr` must point to a valid `multiboot_info` struct, and every
/// `mmap`/module region it references must lie entirely in mapped
/// memory.
pub unsafe fn parse_multiboot1(info_addr: usize) -> BootInfo {
    // SAFETY: caller guarantees `info_addr..+MB1_HEADER_LEN` is mapped.
    let header = unsafe { core::slice::from_raw_parts(info_addr as *const u8, MB1_HEADER_LEN) };
    decode_multiboot1(header, |addr, len| {
        // SAFETY: caller guarantees every region the header points to
        // is mapped; `len` is derived from the same trusted header.
        unsafe { core::slice::from_raw_parts(addr as usize as *const u8, len) }.to_vec()
    })
}

const MB2_TAG_END: u32 = 0;
const MB2_TAG_MMAP: u32 = 6;
const MB2_TAG_MODULE: u32 = 3;
const MB2_MEMORY_AVAILABLE: u32 = 1;
const MB2_TAG_HEADER_LEN: usize = 8;

/// Decodes a multiboot-2 tag stream (everything after the 8-byte
/// `(total_size, reserved)` header) into [`BootInfo`].
fn decode_multiboot2(tags: &[u8]) -> BootInfo {
    let mut boot_info = BootInfo::default();
    let mut cursor = 0usize;

    while cursor + MB2_TAG_HEADER_LEN <= tags.len() {
        let kind = read_u32(tags, cursor);
        let size = read_u32(tags, cursor + 4) as usize;
        if kind == MB2_TAG_END {
            break;
        }
        let body = &tags[cursor + MB2_TAG_HEADER_LEN..cursor + size];

        match kind {
            MB2_TAG_MMAP => {
                let entry_size = read_u32(body, 0) as usize;
                let entries = &body[8..];
                let mut entry_cursor = 0usize;
                while entry_cursor + entry_size <= entries.len() {
                    let base_addr = read_u64(entries, entry_cursor);
                    let length = read_u64(entries, entry_cursor + 8);
                    let region_kind = read_u32(entries, entry_cursor + 16);
                    boot_info.memory_map.push(PhysMemoryRegion {
                        start: PhysAddr::new(base_addr),
                        size: length,
                        usable: region_kind == MB2_MEMORY_AVAILABLE,
                    });
                    entry_cursor += entry_size;
                }
            }
            MB2_TAG_MODULE => {
                let mod_start = read_u32(body, 0);
                let mod_end = read_u32(body, 4);
                boot_info.initrd =
                    Some((PhysAddr::new(mod_start as u64), (mod_end - mod_start) as u64));
            }
            _ => {}
        }

        // Tags are 8-byte aligned.
        cursor += size.div_ceil(8) * 8;
    }

    boot_info
}

/// Parses a multiboot-2 tag stream starting at `info_addr`.
///
/// # Safety
///
/// `info_addr` must point to a valid multiboot-2 boot information
/// structure (an 8-byte `(total_size, reserved)` header followed by a
/// tag stream terminated by an `MB2_TAG_END` tag), entirely within
/// mapped memory, and `total_size` must not overstate the mapped span.
pub unsafe fn parse_multiboot2(info_addr: usize) -> BootInfo {
    // SAFETY: caller guarantees the first 8 bytes are mapped and hold
    // a valid `total_size`.
    let total_size = unsafe { read_u32(core::slice::from_raw_parts(info_addr as *const u8, 8), 0) };
    // SAFETY: caller guarantees `info_addr..info_addr+total_size` is
    // mapped, per the function's contract.
    let all = unsafe { core::slice::from_raw_parts(info_addr as *const u8, total_size as usize) };
    decode_multiboot2(&all[8..])
}

/// Dispatches on the handoff magic, tolerant to either protocol (spec
/// §6). Returns `None` for an unrecognized magic.
///
/// # Safety
///
/// Same contract as [`parse_multiboot1`]/[`parse_multiboot2`], applied
/// to whichever one `magic` selects.
pub unsafe fn parse(magic: u32, info_addr: usize) -> Option<BootInfo> {
    match magic {
        MULTIBOOT1_MAGIC => Some(unsafe { parse_multiboot1(info_addr) }),
        MULTIBOOT2_MAGIC => Some(unsafe { parse_multiboot2(info_addr) }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le_u32(v: u32) -> [u8; 4] {
        v.to_ne_bytes()
    }
    fn le_u64(v: u64) -> [u8; 8] {
        v.to_ne_bytes()
    }

    #[test]
    fn multiboot1_mmap_and_module_decode() {
        let mut mmap = Vec::new();
        for (base, len, kind) in [(0x0u64, 0x9_0000u64, 1u32), (0x10_0000, 0x0f00_0000, 2)] {
            mmap.extend_from_slice(&le_u32(20)); // size excludes itself
            mmap.extend_from_slice(&le_u64(base));
            mmap.extend_from_slice(&le_u64(len));
            mmap.extend_from_slice(&le_u32(kind));
        }
        let mut module = Vec::new();
        module.extend_from_slice(&le_u32(0x20_0000));
        module.extend_from_slice(&le_u32(0x20_1000));
        module.extend_from_slice(&le_u32(0));
        module.extend_from_slice(&le_u32(0));

        let mut header = alloc::vec![0u8; MB1_HEADER_LEN];
        header[0..4].copy_from_slice(&le_u32(MB1_FLAG_MMAP | MB1_FLAG_MODS));
        header[20..24].copy_from_slice(&le_u32(1)); // mods_count
        header[24..28].copy_from_slice(&le_u32(0xAAAA)); // mods_addr (opaque token)
        header[44..48].copy_from_slice(&le_u32(mmap.len() as u32));
        header[48..52].copy_from_slice(&le_u32(0xBBBB)); // mmap_addr (opaque token)

        let parsed = decode_multiboot1(&header, |addr, len| {
            if addr == 0xAAAA {
                assert_eq!(len, MB1_MODULE_ENTRY_LEN);
                module.clone()
            } else if addr == 0xBBBB {
                mmap[..len].to_vec()
            } else {
                panic!("unexpected deref address {addr:#x}")
            }
        });

        assert_eq!(parsed.memory_map.len(), 2);
        assert!(parsed.memory_map[0].usable);
        assert!(!parsed.memory_map[1].usable);
        assert_eq!(parsed.memory_map[1].start, PhysAddr::new(0x10_0000));
        assert_eq!(parsed.initrd, Some((PhysAddr::new(0x20_0000), 0x1000)));
    }

    #[test]
    fn multiboot2_mmap_and_module_tags_decode() {
        let mut tags = Vec::new();

        // mmap tag: header(8) + entry_size/version(8) + 2 entries(24 each)
        let mmap_entry_size = 24u32;
        let mmap_tag_size = 8 + 8 + 2 * mmap_entry_size;
        tags.extend_from_slice(&le_u32(MB2_TAG_MMAP));
        tags.extend_from_slice(&le_u32(mmap_tag_size));
        tags.extend_from_slice(&le_u32(mmap_entry_size));
        tags.extend_from_slice(&le_u32(0)); // entry_version
        for (base, len, kind) in [(0x0u64, 0x9_0000u64, 1u32), (0x10_0000, 0x0f00_0000, 2)] {
            tags.extend_from_slice(&le_u64(base));
            tags.extend_from_slice(&le_u64(len));
            tags.extend_from_slice(&le_u32(kind));
            tags.extend_from_slice(&le_u32(0));
        }
        while tags.len() % 8 != 0 {
            tags.push(0);
        }

        // module tag
        let module_tag_size = 16u32;
        tags.extend_from_slice(&le_u32(MB2_TAG_MODULE));
        tags.extend_from_slice(&le_u32(module_tag_size));
        tags.extend_from_slice(&le_u32(0x20_0000));
        tags.extend_from_slice(&le_u32(0x20_1000));
        while tags.len() % 8 != 0 {
            tags.push(0);
        }

        // end tag
        tags.extend_from_slice(&le_u32(MB2_TAG_END));
        tags.extend_from_slice(&le_u32(8));

        let parsed = decode_multiboot2(&tags);
        assert_eq!(parsed.memory_map.len(), 2);
        assert!(parsed.memory_map[0].usable);
        assert!(!parsed.memory_map[1].usable);
        assert_eq!(parsed.initrd, Some((PhysAddr::new(0x20_0000), 0x1000)));
    }

    #[test]
    fn parse_returns_none_for_unrecognized_magic() {
        assert!(unsafe { parse(0xdead_beef, 0) }.is_none());
    }
}
