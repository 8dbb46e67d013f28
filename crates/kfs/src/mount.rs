//! Mount table: `(parent mount, mountpoint dentry) -> mounted subtree`.

use alloc::sync::Arc;
use alloc::vec::Vec;

use talon_core::error::{KError, Result};
use talon_core::sync::SpinLock;

use crate::dentry::Dentry;
use crate::superblock::Superblock;

/// One mounted filesystem: its root dentry, the mount it hangs off of,
/// and the dentry within that parent it is mounted at.
pub struct Vfsmount {
    /// Root dentry of the mounted subtree.
    pub root: Arc<Dentry>,
    /// The superblock backing this mount.
    pub superblock: Arc<Superblock>,
    /// The parent mount this one hangs off of, or `None` for the
    /// filesystem root mount.
    pub parent: Option<Arc<Vfsmount>>,
    /// The dentry in `parent` this subtree is mounted at.
    pub mountpoint: Option<Arc<Dentry>>,
}

/// The global table of active mounts.
pub struct MountTable {
    mounts: SpinLock<Vec<Arc<Vfsmount>>>,
}

impl MountTable {
    /// Creates an empty mount table.
    pub fn new() -> Self {
        Self {
            mounts: SpinLock::new(Vec::new()),
        }
    }

    /// Registers the root mount (no parent, no mountpoint dentry).
    pub fn mount_root(&self, root: Arc<Dentry>, superblock: Arc<Superblock>) -> Arc<Vfsmount> {
        let mnt = Arc::new(Vfsmount {
            root,
            superblock,
            parent: None,
            mountpoint: None,
        });
        self.mounts.lock().push(mnt.clone());
        mnt
    }

    /// Mounts `superblock`'s root dentry at `mountpoint` within `parent`.
    ///
    /// Fails with [`KError::Exists`] if `(parent, mountpoint)` is already
    /// a mount point, enforcing the uniqueness invariant of spec §3.
    pub fn mount(
        &self,
        parent: &Arc<Vfsmount>,
        mountpoint: &Arc<Dentry>,
        root: Arc<Dentry>,
        superblock: Arc<Superblock>,
    ) -> Result<Arc<Vfsmount>> {
        let mut mounts = self.mounts.lock();
        if mounts.iter().any(|m| {
            m.parent
                .as_ref()
                .is_some_and(|p| Arc::ptr_eq(p, parent))
                && m.mountpoint
                    .as_ref()
                    .is_some_and(|mp| Arc::ptr_eq(mp, mountpoint))
        }) {
            return Err(KError::Exists);
        }
        let mnt = Arc::new(Vfsmount {
            root,
            superblock,
            parent: Some(parent.clone()),
            mountpoint: Some(mountpoint.clone()),
        });
        mounts.push(mnt.clone());
        Ok(mnt)
    }

    /// Looks up the mount rooted at `(parent, mountpoint)`, if any.
    pub fn lookup(&self, parent: &Arc<Vfsmount>, mountpoint: &Arc<Dentry>) -> Option<Arc<Vfsmount>> {
        self.mounts
            .lock()
            .iter()
            .find(|m| {
                m.parent
                    .as_ref()
                    .is_some_and(|p| Arc::ptr_eq(p, parent))
                    && m.mountpoint
                        .as_ref()
                        .is_some_and(|mp| Arc::ptr_eq(mp, mountpoint))
            })
            .cloned()
    }

    /// Removes a mount from the table (used by `umount`).
    pub fn remove(&self, mnt: &Arc<Vfsmount>) {
        self.mounts
            .lock()
            .retain(|m| !Arc::ptr_eq(m, mnt));
    }
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::superblock::Superblock;

    #[test]
    fn duplicate_mount_point_is_rejected() {
        let table = MountTable::new();
        let root_dentry = Dentry::new_root("/".into());
        let sb = Superblock::new_for_test();
        let root_mnt = table.mount_root(root_dentry.clone(), sb.clone());

        let mountpoint = Dentry::alloc(&root_dentry, "mnt".into());
        let sub_root = Dentry::new_root("mnt-root".into());
        let sub_sb = Superblock::new_for_test();

        table
            .mount(&root_mnt, &mountpoint, sub_root.clone(), sub_sb.clone())
            .unwrap();
        assert_eq!(
            table.mount(&root_mnt, &mountpoint, sub_root, sub_sb),
            Err(KError::Exists)
        );
    }
}
