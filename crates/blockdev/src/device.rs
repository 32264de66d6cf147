//! The abstract block device tree: the [`BlockDev`] trait every driver
//! implements, and the recursion helpers shared across drivers that have
//! children (currently only the replicated-mirror driver does).

use crate::error::Result;

/// Synchronisation state of a device, aggregated bottom-up from a device's
/// own state and that of its children. `percent` and `eta_seconds` are
/// `None` whenever the underlying driver has no notion of progress (thin-LV,
/// file-backed) or no sync is in flight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncStatus {
    pub percent: Option<f64>,
    pub eta_seconds: Option<u64>,
    pub is_degraded: bool,
    pub local_disk_degraded: bool,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            percent: None,
            eta_seconds: None,
            is_degraded: false,
            local_disk_degraded: false,
        }
    }
}

/// Target of a [`BlockDev::rename`]: the fields a driver needs to decide
/// whether the rename is even possible, before attempting it. Only the
/// thin-LV driver honours this; every other driver rejects rename outright.
#[derive(Debug, Clone)]
pub struct RenameTarget {
    pub group: Option<String>,
    pub name: String,
}

impl SyncStatus {
    /// Combine this status with a child's, taking the worse-case view: the
    /// lowest progress, the longest remaining time, and degraded if either
    /// side is degraded.
    pub fn combine(self, other: SyncStatus) -> SyncStatus {
        SyncStatus {
            percent: match (self.percent, other.percent) {
                (None, p) | (p, None) => p,
                (Some(a), Some(b)) => Some(a.min(b)),
            },
            eta_seconds: match (self.eta_seconds, other.eta_seconds) {
                (None, p) | (p, None) => p,
                (Some(a), Some(b)) => Some(a.max(b)),
            },
            is_degraded: self.is_degraded || other.is_degraded,
            local_disk_degraded: self.local_disk_degraded || other.local_disk_degraded,
        }
    }
}

/// A block device: a node in the abstract device tree. Every driver
/// (thin-LV, replicated-mirror, file-backed) implements this trait;
/// callers hold devices as `Box<dyn BlockDev>` since the tree is
/// heterogeneous (a mirror's children are themselves block devices of
/// whatever concrete type backs it).
pub trait BlockDev: std::fmt::Debug {
    /// The path under `/dev` (or equivalent) the kernel exposes this device
    /// at, once assembled. Absent before assembly or after shutdown.
    fn dev_path(&self) -> Option<&str>;
    /// The kernel major number, when this driver's kernel identity includes
    /// one (file-backed devices never do).
    fn major(&self) -> Option<u32>;
    /// The kernel minor number, when this driver's kernel identity includes
    /// one.
    fn minor(&self) -> Option<u32>;

    fn children(&self) -> &[Box<dyn BlockDev>];
    fn children_mut(&mut self) -> &mut Vec<Box<dyn BlockDev>>;

    /// Discover whether a device matching this instance's identity already
    /// exists at the kernel level. Idempotent; never mutates kernel state,
    /// only this instance's view of it.
    fn attach(&mut self) -> Result<bool>;

    /// Bring the device up from already-existing components (as opposed to
    /// [`BlockDev::attach`], which only discovers what's already up).
    /// Returns `false` on a recoverable failure, propagating only on a
    /// failure a caller cannot reasonably retry past.
    fn assemble(&mut self) -> Result<bool>;

    /// Tear the device down without destroying its backing storage.
    /// Idempotent: tearing down an already-torn-down device succeeds.
    fn shutdown(&mut self) -> Result<bool> {
        Ok(true)
    }

    /// Destroy the device and its backing storage. Idempotent: removing an
    /// already-absent device succeeds.
    fn remove(&mut self) -> Result<bool>;

    /// Make the device ready for active use (for drbd, promote to primary).
    fn open(&mut self, _force: bool) -> Result<()> {
        Ok(())
    }

    /// Release the device from active use.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Re-point this device at a new unique id. Most drivers don't support
    /// this; the default rejects it as a caller contract violation.
    fn rename(&mut self, _new_id: &RenameTarget) -> Result<()> {
        Err(crate::error::Error::programmer(
            "rename not supported for this device type",
        ))
    }

    /// Attach a caller-supplied annotation to the device (and, by default,
    /// to every child). Drivers with no native notion of metadata simply
    /// forward to children.
    fn set_info(&mut self, text: &str) -> Result<()> {
        forward_set_info(self.children_mut(), text)
    }

    /// Throttle resynchronisation bandwidth, in KB/s. The default forwards
    /// to children only; drivers with a native notion of sync (the
    /// replicated mirror) layer their own action on top.
    fn set_sync_speed(&mut self, kb_per_sec: u64) -> Result<bool> {
        forward_sync_speed(self.children_mut(), kb_per_sec)
    }

    /// This device's own synchronisation state, not including children.
    fn get_sync_status(&mut self) -> Result<SyncStatus> {
        Ok(SyncStatus::default())
    }

    /// This device's synchronisation state combined with every child's,
    /// worst-case.
    fn combined_sync_status(&mut self) -> Result<SyncStatus> {
        let mut status = self.get_sync_status()?;
        for i in 0..self.children().len() {
            let child_status = self.children_mut()[i].get_sync_status()?;
            status = status.combine(child_status);
        }
        Ok(status)
    }
}

pub(crate) fn forward_set_info(children: &mut [Box<dyn BlockDev>], text: &str) -> Result<()> {
    for child in children {
        child.set_info(text)?;
    }
    Ok(())
}

pub(crate) fn forward_sync_speed(children: &mut [Box<dyn BlockDev>], kb_per_sec: u64) -> Result<bool> {
    let mut result = true;
    for child in children {
        result = result && child.set_sync_speed(kb_per_sec)?;
    }
    Ok(result)
}

/// Recurse assembly into `children`, in list order. A child that fails to
/// assemble or open aborts the whole recursion: every child (not just the
/// ones already brought up) is shut down before returning, mirroring the
/// way each driver's `shutdown` tolerates being called on a device that was
/// never actually assembled.
pub(crate) fn assemble_children(children: &mut [Box<dyn BlockDev>]) -> Result<bool> {
    let mut status = true;
    for child in children.iter_mut() {
        if !status {
            break;
        }
        status = status && child.assemble()?;
        if !status {
            break;
        }
        if let Err(err) = child.open(false) {
            for c in children_unchecked(children) {
                let _ = c.shutdown();
            }
            return Err(err);
        }
    }
    if !status {
        for c in children_unchecked(children) {
            let _ = c.shutdown();
        }
    }
    Ok(status)
}

/// Helper to get a fresh mutable iterator over the same slice from within a
/// loop that already holds one; safe because this only ever runs after the
/// primary iteration has been abandoned (via `break`/`return`).
fn children_unchecked(children: &mut [Box<dyn BlockDev>]) -> impl Iterator<Item = &mut Box<dyn BlockDev>> {
    children.iter_mut()
}
