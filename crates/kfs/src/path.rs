//! Path resolution: walks a `/`-separated path component by component,
//! consulting the dcache before falling back to the backend's `lookup`,
//! and crossing mount points at each step (spec §4.H.2).

use alloc::string::String;
use alloc::sync::Arc;

use talon_core::error::{KError, Result};

use crate::dentry::{Dentry, DentryCache};
use crate::mount::{MountTable, Vfsmount};

/// A resolved filesystem location: the mount it lives in plus the
/// dentry within that mount.
#[derive(Clone)]
pub struct LookupResult {
    /// The mount this dentry belongs to.
    pub mount: Arc<Vfsmount>,
    /// The resolved dentry.
    pub dentry: Arc<Dentry>,
}

/// Descends into the filesystem mounted at `(mount, dentry)`, if any,
/// repeating until the deepest mount covering that point is reached.
fn cross_mounts(mounts: &MountTable, mut here: LookupResult) -> LookupResult {
    while let Some(sub) = mounts.lookup(&here.mount, &here.dentry) {
        let root = sub.root.clone();
        here = LookupResult {
            mount: sub,
            dentry: root,
        };
    }
    here
}

/// Ascends out of `here` to its parent, crossing back out of a mount if
/// `here` is that mount's root.
fn ascend(here: LookupResult) -> LookupResult {
    if let Some(parent_dentry) = here.dentry.parent() {
        return LookupResult {
            mount: here.mount,
            dentry: parent_dentry,
        };
    }
    match (&here.mount.parent, &here.mount.mountpoint) {
        (Some(parent_mount), Some(mountpoint)) => LookupResult {
            mount: parent_mount.clone(),
            dentry: mountpoint.clone(),
        },
        _ => here,
    }
}

/// Looks up `name` as a child of `here`, first in the dcache, then via
/// the backend's `InodeOps::lookup`, populating the dcache on a
/// backend hit.
fn step(dcache: &DentryCache, here: &LookupResult, name: &str) -> Result<Arc<Dentry>> {
    if let Some(hit) = dcache.d_lookup(&here.dentry, name) {
        if hit.inode().is_some() {
            return Ok(hit);
        }
        return Err(KError::NoEnt);
    }

    let parent_inode = here.dentry.inode().ok_or(KError::NotDir)?;
    let child_inode = parent_inode.ops().lookup(name)?;
    let child_dentry = dcache.alloc_dentry(&here.dentry, name);
    dcache.d_add(&child_dentry, child_inode);
    Ok(child_dentry)
}

/// Resolves `path` starting from `root` (used for absolute paths) or
/// `cwd` (used for relative paths).
///
/// Fails with [`KError::NoEnt`] if a component does not exist, or
/// [`KError::NotDir`] if an intermediate component is not a directory.
pub fn resolve_path(
    dcache: &DentryCache,
    mounts: &MountTable,
    root: &LookupResult,
    cwd: &LookupResult,
    path: &str,
) -> Result<LookupResult> {
    let mut here = if path.starts_with('/') {
        cross_mounts(mounts, root.clone())
    } else {
        cross_mounts(mounts, cwd.clone())
    };

    for component in path.split('/') {
        match component {
            "" | "." => continue,
            ".." => here = cross_mounts(mounts, ascend(here)),
            name => {
                if here.dentry.inode().map(|i| i.inode_type()) != Some(crate::inode::InodeType::Directory)
                {
                    return Err(KError::NotDir);
                }
                let dentry = step(dcache, &here, name)?;
                here = cross_mounts(
                    mounts,
                    LookupResult {
                        mount: here.mount,
                        dentry,
                    },
                );
            }
        }
    }
    Ok(here)
}

/// Splits `path` into its parent directory path and final component
/// name, as needed by `create`/`mkdir`/`unlink`/`rename`.
pub fn split_parent(path: &str) -> (String, String) {
    match path.rfind('/') {
        Some(0) => (String::from("/"), String::from(&path[1..])),
        Some(idx) => (String::from(&path[..idx]), String::from(&path[idx + 1..])),
        None => (String::from("."), String::from(path)),
    }
}
