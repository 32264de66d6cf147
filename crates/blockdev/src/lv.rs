//! The thin logical volume driver: an LVM logical volume used directly as a
//! block device, with no redundancy of its own.

use std::sync::Arc;

use regex::Regex;
use stackdev_utils::Runner;

use crate::device::{BlockDev, RenameTarget, SyncStatus};
use crate::error::{Error, Result};

/// A logical volume's identity: the volume group it lives in and its name
/// within that group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LvId {
    pub vg: String,
    pub lv: String,
}

#[derive(Debug)]
pub struct LogicalVolume {
    id: LvId,
    runner: Arc<dyn Runner>,
    dev_path: String,
    major: Option<u32>,
    minor: Option<u32>,
    /// Always empty: a thin-LV is a leaf in the device tree. Kept as a real
    /// field (rather than synthesised on demand) so `children_mut` can hand
    /// out an ordinary `&mut Vec`.
    children: Vec<Box<dyn BlockDev>>,
}

/// Up to 128 characters are allowed as an LVM tag; anything past that is
/// silently dropped rather than rejected.
const MAX_TAG_LEN: usize = 128;

fn sanitize_tag(text: &str) -> String {
    let leading_re = Regex::new("^[^A-Za-z0-9_+.]").unwrap();
    let body_re = Regex::new("[^-A-Za-z0-9_+.]").unwrap();
    let text = leading_re.replace(text, "_").into_owned();
    let text = body_re.replace_all(&text, "_").into_owned();
    text.chars().take(MAX_TAG_LEN).collect()
}

impl LogicalVolume {
    /// Construct a handle for `id` and immediately attempt to discover
    /// whether it already exists. Never fails: a failed discovery just
    /// leaves the handle unattached, exactly like a fresh, not-yet-created
    /// logical volume.
    pub fn new(id: LvId, runner: Arc<dyn Runner>) -> Self {
        let dev_path = format!("/dev/{}/{}", id.vg, id.lv);
        let mut lv = Self {
            id,
            runner,
            dev_path,
            major: None,
            minor: None,
            children: Vec::new(),
        };
        let _ = lv.attach();
        lv
    }

    /// List of (free space in MiB, name) for every allocatable physical
    /// volume in `vg`, sorted by descending free space.
    fn pv_info(runner: &Arc<dyn Runner>, vg: &str) -> Result<Vec<(f64, String)>> {
        let result = runner.run(&[
            "pvs",
            "--noheadings",
            "--nosuffix",
            "--units=m",
            "-opv_name,vg_name,pv_free,pv_attr",
            "--separator=:",
        ]);
        if result.failed {
            return Err(Error::from_run_result("Can't get the PV list", &result));
        }
        let mut pvs = Vec::new();
        for line in result.stdout.lines() {
            let fields: Vec<&str> = line.trim().split(':').collect();
            if fields.len() != 4 {
                continue;
            }
            let (name, line_vg, free, attr) = (fields[0], fields[1], fields[2], fields[3]);
            if line_vg != vg {
                continue;
            }
            if !attr.starts_with('a') {
                continue;
            }
            let Ok(free_mib) = free.parse::<f64>() else {
                continue;
            };
            pvs.push((free_mib, name.to_string()));
        }
        pvs.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
        Ok(pvs)
    }

    /// Create a new logical volume of `size_mib` in `id.vg`, spread across
    /// whichever physical volumes have the most free space.
    pub fn create(id: LvId, children: Vec<Box<dyn BlockDev>>, size_mib: u64, runner: Arc<dyn Runner>) -> Result<Self> {
        if !children.is_empty() {
            return Err(Error::programmer("Invalid setup for the thin-lv device"));
        }
        let pvs = Self::pv_info(&runner, &id.vg)?;
        if pvs.is_empty() {
            return Err(Error::block_device(format!(
                "Can't compute PV info for vg {}",
                id.vg
            )));
        }
        let total_free: f64 = pvs.iter().map(|(free, _)| free).sum();
        if total_free < size_mib as f64 {
            return Err(Error::block_device(format!(
                "Not enough free space: required {size_mib}, available {total_free}"
            )));
        }
        let pv_names: Vec<&str> = pvs.iter().map(|(_, name)| name.as_str()).collect();
        let mut argv: Vec<&str> = vec!["lvcreate"];
        let size_arg = format!("-L{size_mib}m");
        argv.push(&size_arg);
        argv.push("-n");
        argv.push(&id.lv);
        argv.push(&id.vg);
        argv.extend(pv_names.iter().copied());
        let result = runner.run(&argv);
        if result.failed {
            return Err(Error::from_run_result(
                &format!("Can't create LV {} on {}", id.lv, id.vg),
                &result,
            ));
        }
        Ok(Self::new(id, runner))
    }

    /// Create (or replace, if one already exists) a point-in-time snapshot
    /// of this volume, of `size_mib`. Returns the new snapshot's name.
    pub fn snapshot(&self, size_mib: u64) -> Result<String> {
        let snap_name = format!("{}.snap", self.id.lv);
        let mut stale = LogicalVolume::new(
            LvId {
                vg: self.id.vg.clone(),
                lv: snap_name.clone(),
            },
            self.runner.clone(),
        );
        let _ = stale.remove();

        let pvs = Self::pv_info(&self.runner, &self.id.vg)?;
        let Some((largest_free, _)) = pvs.first().copied() else {
            return Err(Error::block_device(format!(
                "Can't compute PV info for vg {}",
                self.id.vg
            )));
        };
        if largest_free < size_mib as f64 {
            return Err(Error::block_device(format!(
                "Not enough free space: required {size_mib}, available {largest_free} in a single PV"
            )));
        }
        let size_arg = format!("-L{size_mib}m");
        let name_arg = format!("-n{snap_name}");
        let result = self
            .runner
            .run(&["lvcreate", &size_arg, "-s", &name_arg, &self.dev_path]);
        if result.failed {
            return Err(Error::from_run_result(
                &format!("Can't snapshot block device {}", self.dev_path),
                &result,
            ));
        }
        Ok(snap_name)
    }

    pub fn id(&self) -> &LvId {
        &self.id
    }
}

impl BlockDev for LogicalVolume {
    fn dev_path(&self) -> Option<&str> {
        Some(&self.dev_path)
    }

    fn major(&self) -> Option<u32> {
        self.major
    }

    fn minor(&self) -> Option<u32> {
        self.minor
    }

    fn children(&self) -> &[Box<dyn BlockDev>] {
        &self.children
    }

    fn children_mut(&mut self) -> &mut Vec<Box<dyn BlockDev>> {
        &mut self.children
    }

    fn attach(&mut self) -> Result<bool> {
        let re = Regex::new(r"^\s*Block device\s+(\d+):(\d+)").unwrap();
        let result = self.runner.run(&["lvdisplay", &self.dev_path]);
        if result.failed {
            self.major = None;
            self.minor = None;
            return Ok(false);
        }
        for line in result.stdout.lines() {
            if let Some(caps) = re.captures(line) {
                self.major = Some(caps[1].parse().unwrap());
                self.minor = Some(caps[2].parse().unwrap());
                return Ok(true);
            }
        }
        self.major = None;
        self.minor = None;
        Ok(false)
    }

    fn assemble(&mut self) -> Result<bool> {
        let result = self.runner.run(&["lvchange", "-ay", &self.dev_path]);
        if result.failed {
            tracing::error!(
                "Can't activate lv {}: {} - {}",
                self.dev_path,
                result.fail_reason,
                result.output()
            );
        }
        Ok(!result.failed)
    }

    fn remove(&mut self) -> Result<bool> {
        if self.minor.is_none() && !self.attach()? {
            return Ok(true);
        }
        let result = self
            .runner
            .run(&["lvremove", "-f", &format!("{}/{}", self.id.vg, self.id.lv)]);
        if result.failed {
            tracing::error!(
                "Can't remove lv {}: {} - {}",
                self.dev_path,
                result.fail_reason,
                result.output()
            );
        }
        Ok(!result.failed)
    }

    fn rename(&mut self, new_id: &RenameTarget) -> Result<()> {
        let Some(group) = &new_id.group else {
            return Err(Error::value("rename target for a thin-lv needs a volume group"));
        };
        if *group != self.id.vg {
            return Err(Error::programmer(
                "Can't move a logical volume across volume groups",
            ));
        }
        let result = self.runner.run(&[
            "lvrename",
            &self.id.vg,
            &self.id.lv,
            &new_id.name,
        ]);
        if result.failed {
            return Err(Error::from_run_result(
                &format!("Failed to rename the logical volume {}", self.id.lv),
                &result,
            ));
        }
        self.id.lv = new_id.name.clone();
        self.dev_path = format!("/dev/{}/{}", self.id.vg, self.id.lv);
        Ok(())
    }

    fn set_info(&mut self, text: &str) -> Result<()> {
        let text = sanitize_tag(text);
        let result = self
            .runner
            .run(&["lvchange", "--addtag", &text, &self.dev_path]);
        if result.failed {
            return Err(Error::from_run_result(
                &format!("Can't set tag on logical volume {}", self.dev_path),
                &result,
            ));
        }
        Ok(())
    }

    fn get_sync_status(&mut self) -> Result<SyncStatus> {
        let result = self
            .runner
            .run(&["lvs", "--noheadings", "-olv_attr", &self.dev_path]);
        if result.failed {
            return Ok(SyncStatus {
                percent: None,
                eta_seconds: None,
                is_degraded: true,
                local_disk_degraded: true,
            });
        }
        let attr = result.stdout.trim();
        if attr.chars().count() != 6 {
            return Ok(SyncStatus {
                percent: None,
                eta_seconds: None,
                is_degraded: true,
                local_disk_degraded: true,
            });
        }
        let ldisk = attr.chars().next() == Some('v');
        Ok(SyncStatus {
            percent: None,
            eta_seconds: None,
            is_degraded: ldisk,
            local_disk_degraded: ldisk,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackdev_utils::FakeRunner;

    #[test]
    fn create_picks_pvs_by_descending_free_space() {
        let runner = FakeRunner::new();
        runner.on(
            &["pvs"],
            "/dev/sda:vg0:2048.00:a--\n/dev/sdb:vg0:4096.00:a--\n",
        );
        runner.on(&["lvcreate"], "");
        runner.on(&["lvdisplay"], "  Block device  253:4\n");
        let lv = LogicalVolume::create(
            LvId { vg: "vg0".into(), lv: "lv1".into() },
            vec![],
            1024,
            runner.clone(),
        )
        .unwrap();
        assert_eq!(lv.dev_path(), Some("/dev/vg0/lv1"));
        let calls = runner.calls();
        let lvcreate_call = calls.iter().find(|c| c[0] == "lvcreate").unwrap();
        assert_eq!(
            lvcreate_call,
            &vec!["lvcreate", "-L1024m", "-n", "lv1", "vg0", "/dev/sdb", "/dev/sda"]
        );
    }

    #[test]
    fn create_rejects_insufficient_total_space() {
        let runner = FakeRunner::new();
        runner.on(&["pvs"], "/dev/sda:vg0:100.00:a--\n");
        let err = LogicalVolume::create(
            LvId { vg: "vg0".into(), lv: "lv1".into() },
            vec![],
            1024,
            runner,
        )
        .unwrap_err();
        assert!(matches!(err, Error::BlockDevice { .. }));
    }

    #[test]
    fn attach_parses_major_minor() {
        let runner = FakeRunner::new();
        runner.on(&["lvdisplay"], "  Block device  253:7\n");
        let lv = LogicalVolume::new(LvId { vg: "vg0".into(), lv: "lv1".into() }, runner);
        assert_eq!(lv.major(), Some(253));
        assert_eq!(lv.minor(), Some(7));
    }

    #[test]
    fn remove_is_idempotent_when_never_attached() {
        let runner = FakeRunner::new();
        runner.on_failure(&["lvdisplay"], "not found", "");
        let mut lv = LogicalVolume::new(LvId { vg: "vg0".into(), lv: "gone".into() }, runner);
        assert!(lv.remove().unwrap());
    }

    #[test]
    fn rename_rejects_cross_vg() {
        let runner = FakeRunner::new();
        runner.on_failure(&["lvdisplay"], "not found", "");
        let mut lv = LogicalVolume::new(LvId { vg: "vg0".into(), lv: "lv1".into() }, runner);
        let err = lv
            .rename(&RenameTarget { group: Some("vg1".into()), name: "lv2".into() })
            .unwrap_err();
        assert!(matches!(err, Error::Programmer(_)));
    }

    #[test]
    fn sync_status_is_degraded_when_attribute_string_is_malformed() {
        let runner = FakeRunner::new();
        runner.on(&["lvdisplay"], "  Block device  253:4\n");
        runner.on(&["lvs"], "too-long-attr-string");
        let mut lv = LogicalVolume::new(LvId { vg: "vg0".into(), lv: "lv1".into() }, runner);
        let status = lv.get_sync_status().unwrap();
        assert!(status.is_degraded);
        assert!(status.local_disk_degraded);
        assert_eq!(status.percent, None);
        assert_eq!(status.eta_seconds, None);
    }

    #[test]
    fn set_info_sanitizes_disallowed_characters() {
        assert_eq!(sanitize_tag("foo bar"), "foo_bar");
        assert_eq!(sanitize_tag(" lead"), "_lead");
        assert_eq!(sanitize_tag(&"x".repeat(200)).len(), 128);
    }
}
