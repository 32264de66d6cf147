//! Block device abstraction layer.
//!
//! Three drivers share one abstract device tree ([`device::BlockDev`]):
//! a thin logical volume ([`lv::LogicalVolume`]), a network-replicated
//! DRBD 8 mirror over local storage ([`drbd::ReplicatedMirror`]), and a
//! plain backing file ([`file::FileStorage`]). [`factory`] dispatches
//! construction, discovery and assembly across the three by device-type
//! tag.
//!
//! Every driver goes through the [`stackdev_utils::Runner`] seam for
//! subprocess invocation, so the whole stack can be exercised in tests
//! with [`stackdev_utils::FakeRunner`] instead of real `lvs`/`drbdsetup`/
//! `drbdmeta` binaries.

mod config_parser;
mod device;
mod drbd;
mod error;
mod factory;
mod file;
mod lv;
mod proc_status;

pub use device::{BlockDev, RenameTarget, SyncStatus};
pub use drbd::{MirrorId, ReplicatedMirror};
pub use error::{Error, Result};
pub use factory::{attach_or_assemble, create, find, DeviceType, UniqueId};
pub use file::{FileId, FileStorage};
pub use lv::{LogicalVolume, LvId};
