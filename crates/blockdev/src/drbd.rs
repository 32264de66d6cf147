//! The replicated-mirror driver: DRBD 8, layered over a local backing
//! device and a local meta-data device, mirrored over the network to a
//! remote peer running the same stack.

use std::sync::Arc;
use std::time::Duration;

use stackdev_utils::Runner;

use crate::config_parser::{self, ShowInfo};
use crate::device::{assemble_children, BlockDev, RenameTarget, SyncStatus};
use crate::error::{Error, Result};
use crate::proc_status;

const DRBD_MAJOR: u32 = 147;
const DEFAULT_PROC_DRBD: &str = "/proc/drbd";
const META_MIN_BYTES: u64 = 128 * 1024 * 1024;
const META_MAX_BYTES: u64 = (128 + 32) * 1024 * 1024;

/// A replicated mirror's identity: the local and remote (host, port) pairs
/// it connects over. Any of the four may be absent, which models a
/// diskless-without-peers device that is local storage only.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MirrorId {
    pub local_host: Option<String>,
    pub local_port: Option<u16>,
    pub remote_host: Option<String>,
    pub remote_port: Option<u16>,
}

#[derive(Debug)]
pub struct ReplicatedMirror {
    id: MirrorId,
    children: Vec<Box<dyn BlockDev>>,
    runner: Arc<dyn Runner>,
    proc_path: String,
    minor: Option<u32>,
    dev_path: Option<String>,
    poll_interval: Duration,
    poll_attempts: u32,
    dual_primary: bool,
    hmac: Option<String>,
    secret: Option<String>,
}

fn dev_path_for(minor: u32) -> String {
    format!("/dev/drbd{minor}")
}

impl ReplicatedMirror {
    pub fn new(id: MirrorId, children: Vec<Box<dyn BlockDev>>, runner: Arc<dyn Runner>) -> Result<Self> {
        Self::with_proc_path(id, children, runner, DEFAULT_PROC_DRBD)
    }

    /// Like [`Self::new`], but reading kernel status from `proc_path`
    /// instead of the real `/proc/drbd`. Exists so tests can supply a fixed
    /// fixture file instead of depending on a real DRBD kernel module.
    pub fn with_proc_path(
        id: MirrorId,
        children: Vec<Box<dyn BlockDev>>,
        runner: Arc<dyn Runner>,
        proc_path: impl Into<String>,
    ) -> Result<Self> {
        if !matches!(children.len(), 0 | 2) {
            return Err(Error::value(format!(
                "Invalid configuration data: expected 0 or 2 children, got {}",
                children.len()
            )));
        }
        let proc_path = proc_path.into();
        let version = proc_status::parse_version(&proc_status::read_proc_data(&proc_path)?)?;
        if version.k_major != 8 {
            return Err(Error::block_device(format!(
                "Mismatch in DRBD kernel version and requested usage: kernel is {}.{}, this driver wants 8.x",
                version.k_major, version.k_minor
            )));
        }
        let mut dev = Self {
            id,
            children,
            runner,
            proc_path,
            minor: None,
            dev_path: None,
            poll_interval: Duration::from_secs(1),
            poll_attempts: 10,
            dual_primary: false,
            hmac: None,
            secret: None,
        };
        dev.attach()?;
        Ok(dev)
    }

    /// Override the network-attach poll cadence. Production code never
    /// needs this; tests use it to keep a deliberately-timed-out poll fast.
    pub fn with_poll(mut self, interval: Duration, attempts: u32) -> Self {
        self.poll_interval = interval;
        self.poll_attempts = attempts;
        self
    }

    pub fn with_net_auth(mut self, dual_primary: bool, hmac: Option<String>, secret: Option<String>) -> Self {
        self.dual_primary = dual_primary;
        self.hmac = hmac;
        self.secret = secret;
        self
    }

    /// Create a new replicated mirror: verify the meta device's size, wipe
    /// and reinitialise its metadata, then bind it and the backing device
    /// to a fresh minor.
    pub fn create(id: MirrorId, mut children: Vec<Box<dyn BlockDev>>, runner: Arc<dyn Runner>) -> Result<Self> {
        if children.len() != 2 {
            return Err(Error::programmer("Invalid setup for the replicated-mirror device"));
        }
        children[1].assemble()?;
        if !children[1].attach()? {
            return Err(Error::block_device("Can't find meta device"));
        }
        let meta_dev_path = children[1]
            .dev_path()
            .ok_or_else(|| Error::block_device("meta device has no path after attach"))?
            .to_string();
        Self::check_meta_size(&runner, &meta_dev_path)?;
        let minor = proc_status::find_unused_minor(&proc_status::read_proc_data(DEFAULT_PROC_DRBD)?)?;
        Self::init_meta(&runner, minor, &meta_dev_path)?;
        if !Self::is_valid_meta(&runner, &meta_dev_path)? {
            return Err(Error::block_device(format!(
                "Cannot initialize meta device {meta_dev_path}"
            )));
        }
        Self::new(id, children, runner)
    }

    fn check_meta_size(runner: &Arc<dyn Runner>, meta_device: &str) -> Result<()> {
        let result = runner.run(&["blockdev", "--getsize", meta_device]);
        if result.failed {
            return Err(Error::from_run_result("Failed to get device size", &result));
        }
        let sectors: u64 = result
            .stdout
            .trim()
            .parse()
            .map_err(|_| Error::block_device(format!("Invalid output from blockdev: '{}'", result.stdout.trim())))?;
        let bytes = sectors * 512;
        if bytes < META_MIN_BYTES {
            return Err(Error::block_device(format!(
                "Meta device too small ({:.2}MiB)",
                bytes as f64 / 1024.0 / 1024.0
            )));
        }
        if bytes > META_MAX_BYTES {
            return Err(Error::block_device(format!(
                "Meta device too big ({:.2}MiB)",
                bytes as f64 / 1024.0 / 1024.0
            )));
        }
        Ok(())
    }

    fn init_meta(runner: &Arc<dyn Runner>, minor: u32, dev_path: &str) -> Result<()> {
        let result = runner.run(&[
            "drbdmeta",
            "--force",
            &dev_path_for(minor),
            "v08",
            dev_path,
            "0",
            "create-md",
        ]);
        if result.failed {
            return Err(Error::from_run_result("Can't initialize meta device", &result));
        }
        Ok(())
    }

    fn is_valid_meta(runner: &Arc<dyn Runner>, meta_device: &str) -> Result<bool> {
        let minor = proc_status::find_unused_minor(&proc_status::read_proc_data(DEFAULT_PROC_DRBD)?)?;
        let result = runner.run(&["drbdmeta", &dev_path_for(minor), "v08", meta_device, "0", "dstate"]);
        if result.failed {
            tracing::error!("Invalid meta device {meta_device}: {}", result.output());
            return Ok(false);
        }
        Ok(true)
    }

    /// Add a local backing device and meta device to a mirror that was
    /// created diskless, binding it to kernel-level local storage.
    pub fn add_children(&mut self, mut devices: Vec<Box<dyn BlockDev>>) -> Result<()> {
        let Some(minor) = self.minor else {
            return Err(Error::block_device("Can't attach to replicated mirror during add_children"));
        };
        if devices.len() != 2 {
            return Err(Error::block_device("Need two devices for add_children"));
        }
        let info = self.get_dev_info(minor)?;
        if info.local_dev.is_some() {
            return Err(Error::block_device("Replicated mirror already attached to a local disk"));
        }
        devices[0].open(false)?;
        devices[1].open(false)?;
        let meta_dev_path = devices[1]
            .dev_path()
            .ok_or_else(|| Error::block_device("Children not ready during add_children"))?
            .to_string();
        let backend_dev_path = devices[0]
            .dev_path()
            .ok_or_else(|| Error::block_device("Children not ready during add_children"))?
            .to_string();
        Self::check_meta_size(&self.runner, &meta_dev_path)?;
        let meta_minor = proc_status::find_unused_minor(&proc_status::read_proc_data(&self.proc_path)?)?;
        Self::init_meta(&self.runner, meta_minor, &meta_dev_path)?;
        if !Self::is_valid_meta(&self.runner, &meta_dev_path)? {
            return Err(Error::block_device("Cannot initialize meta device"));
        }
        if !self.assemble_local(minor, &backend_dev_path, &meta_dev_path)? {
            return Err(Error::block_device("Can't attach to local storage"));
        }
        self.children = devices;
        Ok(())
    }

    /// Detach local storage, reverting to a diskless (network-only) mirror.
    pub fn remove_children(&mut self, devices: &[Box<dyn BlockDev>]) -> Result<()> {
        let Some(minor) = self.minor else {
            return Err(Error::block_device("Can't attach to replicated mirror during remove_children"));
        };
        let info = self.get_dev_info(minor)?;
        if info.local_dev.is_none() {
            return Ok(());
        }
        if self.children.len() != 2 {
            return Err(Error::block_device(format!(
                "We don't have two children: {}",
                self.children.len()
            )));
        }
        if devices.len() != 2 {
            return Err(Error::block_device("We need two devices in remove_children"));
        }
        for (child, dev) in self.children.iter().zip(devices.iter()) {
            if dev.dev_path() != child.dev_path() {
                return Err(Error::block_device(format!(
                    "Mismatch in local storage ({:?} != {:?}) in remove_children",
                    dev.dev_path(),
                    child.dev_path()
                )));
            }
        }
        if !self.shutdown_local(minor)? {
            return Err(Error::block_device("Can't detach from local storage"));
        }
        self.children.clear();
        Ok(())
    }

    fn get_show_data(&self, minor: u32) -> Result<String> {
        let minor_str = dev_path_for(minor);
        let result = self.runner.run(&["drbdsetup", &minor_str, "show"]);
        if result.failed {
            return Err(Error::from_run_result(
                &format!("Can't display the drbd config for minor {minor}"),
                &result,
            ));
        }
        Ok(result.stdout)
    }

    fn get_dev_info(&self, minor: u32) -> Result<ShowInfo> {
        config_parser::parse_show(&self.get_show_data(minor)?)
    }

    fn matches_local(&self, info: &ShowInfo) -> bool {
        let (backend, meta) = match self.children.as_slice() {
            [b, m] => (Some(b), Some(m)),
            _ => (None, None),
        };

        let local_ok = match backend {
            Some(b) => info.local_dev.as_deref() == b.dev_path(),
            None => info.local_dev.is_none(),
        };
        let meta_ok = match meta {
            Some(m) => info.meta_dev.as_deref() == m.dev_path() && info.meta_index == Some(0),
            None => info.meta_dev.is_none() && info.meta_index.is_none(),
        };
        local_ok && meta_ok
    }

    fn matches_net(&self, info: &ShowInfo) -> bool {
        if self.id.local_host.is_none()
            && info.local_addr.is_none()
            && self.id.remote_host.is_none()
            && info.remote_addr.is_none()
        {
            return true;
        }
        if self.id.local_host.is_none() {
            return false;
        }
        let (Some(local_addr), Some(remote_addr)) = (&info.local_addr, &info.remote_addr) else {
            return false;
        };
        Some(local_addr.0.clone()) == self.id.local_host
            && Some(local_addr.1) == self.id.local_port
            && Some(remote_addr.0.clone()) == self.id.remote_host
            && Some(remote_addr.1) == self.id.remote_port
    }

    fn assemble_local(&self, minor: u32, backend: &str, meta: &str) -> Result<bool> {
        if !Self::is_valid_meta(&self.runner, meta)? {
            return Ok(false);
        }
        let result = self.runner.run(&[
            "drbdsetup",
            &dev_path_for(minor),
            "disk",
            backend,
            meta,
            "0",
            "-e",
            "detach",
            "--create-device",
        ]);
        if result.failed {
            tracing::error!("Can't attach local disk: {}", result.output());
        }
        Ok(!result.failed)
    }

    /// Configure the network half of the device, or (if any endpoint is
    /// absent) simply disconnect it.
    fn assemble_net(&self, minor: u32, protocol: &str) -> Result<bool> {
        let (Some(lh), Some(lp), Some(rh), Some(rp)) = (
            self.id.local_host.clone(),
            self.id.local_port,
            self.id.remote_host.clone(),
            self.id.remote_port,
        ) else {
            return self.shutdown_net(minor);
        };

        let dev_path = dev_path_for(minor);
        let local = format!("{lh}:{lp}");
        let remote = format!("{rh}:{rp}");
        let mut argv: Vec<&str> = vec![
            "drbdsetup",
            &dev_path,
            "net",
            &local,
            &remote,
            protocol,
            "-A",
            "discard-zero-changes",
            "-B",
            "consensus",
            "--create-device",
        ];
        if self.dual_primary {
            argv.push("-m");
        }
        if let (Some(hmac), Some(secret)) = (&self.hmac, &self.secret) {
            argv.push("-a");
            argv.push(hmac);
            argv.push("-x");
            argv.push(secret);
        }
        let result = self.runner.run(&argv);
        if result.failed {
            tracing::error!(
                "Can't setup network for drbd device: {} - {}",
                result.fail_reason,
                result.output()
            );
            return Ok(false);
        }

        for attempt in 0..self.poll_attempts {
            let info = self.get_dev_info(minor)?;
            let matches = matches!(
                (&info.local_addr, &info.remote_addr),
                (Some(l), Some(r)) if l == &(lh.clone(), lp) && r == &(rh.clone(), rp)
            );
            if matches {
                return Ok(true);
            }
            if attempt + 1 < self.poll_attempts {
                std::thread::sleep(self.poll_interval);
            }
        }
        tracing::error!("Timeout while configuring network");
        Ok(false)
    }

    fn shutdown_local(&self, minor: u32) -> Result<bool> {
        let result = self.runner.run(&["drbdsetup", &dev_path_for(minor), "detach"]);
        if result.failed {
            tracing::error!("Can't detach local device: {}", result.output());
        }
        Ok(!result.failed)
    }

    fn shutdown_net(&self, minor: u32) -> Result<bool> {
        let result = self.runner.run(&["drbdsetup", &dev_path_for(minor), "disconnect"]);
        if result.failed {
            tracing::error!("Can't shutdown network: {}", result.output());
        }
        Ok(!result.failed)
    }

    fn shutdown_all(&self, minor: u32) -> Result<bool> {
        let result = self.runner.run(&["drbdsetup", &dev_path_for(minor), "down"]);
        if result.failed {
            tracing::error!("Can't shutdown drbd device: {}", result.output());
        }
        Ok(!result.failed)
    }

    fn set_from_minor(&mut self, minor: Option<u32>) {
        match minor {
            None => {
                self.minor = None;
                self.dev_path = None;
            }
            Some(m) => {
                self.minor = Some(m);
                self.dev_path = Some(dev_path_for(m));
            }
        }
    }
}

impl BlockDev for ReplicatedMirror {
    fn dev_path(&self) -> Option<&str> {
        self.dev_path.as_deref()
    }

    fn major(&self) -> Option<u32> {
        Some(DRBD_MAJOR)
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
        let used = proc_status::used_devs(&proc_status::read_proc_data(&self.proc_path)?);
        let mut bound: Option<u32> = None;
        for minor in used.keys().copied() {
            let info = self.get_dev_info(minor)?;
            let match_l = self.matches_local(&info);
            let match_r = self.matches_net(&info);

            if match_l && match_r {
                bound = Some(minor);
                break;
            }
            if match_l && !match_r && info.local_addr.is_none() {
                if self.assemble_net(minor, "C")? {
                    let info2 = self.get_dev_info(minor)?;
                    if self.matches_net(&info2) {
                        bound = Some(minor);
                        break;
                    }
                }
            }
            if match_r && info.local_dev.is_none() {
                bound = Some(minor);
                break;
            }
            if match_l && info.local_dev.is_some() && !match_r && info.local_addr.is_some() {
                if !self.shutdown_net(minor)? {
                    return Err(Error::block_device(
                        "Device has correct local storage, wrong remote peer and is unable to disconnect in order to attach to the correct peer",
                    ));
                }
                if self.assemble_net(minor, "C")? {
                    let info2 = self.get_dev_info(minor)?;
                    if self.matches_net(&info2) {
                        bound = Some(minor);
                        break;
                    }
                }
            }
        }
        self.set_from_minor(bound);
        Ok(bound.is_some())
    }

    fn assemble(&mut self) -> Result<bool> {
        self.attach()?;
        if self.minor.is_some() {
            tracing::info!("Already assembled");
            return Ok(true);
        }

        if !assemble_children(&mut self.children)? {
            return Ok(false);
        }

        let minor = proc_status::find_unused_minor(&proc_status::read_proc_data(&self.proc_path)?)?;
        let mut need_localdev_teardown = false;
        if let [backend, meta] = self.children.as_slice() {
            let (backend_path, meta_path) = (
                backend.dev_path().map(str::to_string),
                meta.dev_path().map(str::to_string),
            );
            if let (Some(backend_path), Some(meta_path)) = (backend_path, meta_path) {
                if !self.assemble_local(minor, &backend_path, &meta_path)? {
                    return Ok(false);
                }
                need_localdev_teardown = true;
            }
        }
        if self.id.local_host.is_some()
            && self.id.local_port.is_some()
            && self.id.remote_host.is_some()
            && self.id.remote_port.is_some()
            && !self.assemble_net(minor, "C")?
        {
            if need_localdev_teardown {
                tracing::error!("net setup failed, tearing down local device");
                let _ = self.shutdown_all(minor);
            }
            return Ok(false);
        }
        self.set_from_minor(Some(minor));
        Ok(true)
    }

    fn shutdown(&mut self) -> Result<bool> {
        if self.minor.is_none() && !self.attach()? {
            tracing::info!("DRBD device not attached to a device during shutdown");
            return Ok(true);
        }
        let minor = self.minor.unwrap();
        if !self.shutdown_all(minor)? {
            return Ok(false);
        }
        self.minor = None;
        self.dev_path = None;
        Ok(true)
    }

    fn remove(&mut self) -> Result<bool> {
        self.shutdown()
    }

    fn open(&mut self, force: bool) -> Result<()> {
        if self.minor.is_none() && !self.attach()? {
            return Err(Error::block_device("DRBD cannot attach to a device during open"));
        }
        let dev_path = self.dev_path.clone().unwrap();
        let mut argv = vec!["drbdsetup", dev_path.as_str(), "primary"];
        if force {
            argv.push("-o");
        }
        let result = self.runner.run(&argv);
        if result.failed {
            let msg = format!("Can't make drbd device primary: {}", result.output());
            return Err(Error::block_device(msg));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.minor.is_none() && !self.attach()? {
            return Err(Error::block_device("Can't find device"));
        }
        let dev_path = self.dev_path.clone().unwrap();
        let result = self.runner.run(&["drbdsetup", &dev_path, "secondary"]);
        if result.failed {
            return Err(Error::block_device(format!(
                "Can't switch drbd device to secondary: {}",
                result.output()
            )));
        }
        Ok(())
    }

    fn rename(&mut self, _new_id: &RenameTarget) -> Result<()> {
        Err(Error::programmer("Can't rename a drbd device"))
    }

    fn set_sync_speed(&mut self, kb_per_sec: u64) -> Result<bool> {
        let children_result = crate::device::forward_sync_speed(&mut self.children, kb_per_sec)?;
        let Some(dev_path) = self.dev_path.clone() else {
            tracing::info!("Instance not attached to a device");
            return Ok(false);
        };
        let kb = kb_per_sec.to_string();
        let result = self.runner.run(&["drbdsetup", &dev_path, "syncer", "-r", &kb]);
        if result.failed {
            tracing::error!("Can't change syncer rate: {} - {}", result.fail_reason, result.output());
        }
        Ok(!result.failed && children_result)
    }

    fn get_sync_status(&mut self) -> Result<SyncStatus> {
        if self.minor.is_none() && !self.attach()? {
            return Err(Error::block_device("Can't attach to device in GetSyncStatus"));
        }
        let minor = self.minor.unwrap();
        let proc_info = proc_status::used_devs(&proc_status::read_proc_data(&self.proc_path)?);
        let line = proc_info
            .get(&minor)
            .ok_or_else(|| Error::block_device(format!("Can't find myself in /proc (minor {minor})")))?;
        let status = proc_status::parse_sync_status(minor, line)?;
        Ok(SyncStatus {
            percent: status.percent,
            eta_seconds: status.eta_seconds,
            is_degraded: status.is_degraded,
            local_disk_degraded: status.local_disk_degraded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{FileId, FileStorage};
    use indoc::indoc;
    use stackdev_utils::FakeRunner;
    use std::io::Write;

    fn proc_fixture(dir: &tempfile::TempDir, contents: &str) -> String {
        let path = dir.path().join("drbd");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path.to_str().unwrap().to_string()
    }

    fn diskless_id() -> MirrorId {
        MirrorId::default()
    }

    #[test]
    fn rejects_non_v8_kernel() {
        let dir = tempfile::tempdir().unwrap();
        let path = proc_fixture(&dir, "version: 9.0.0 (api:1/proto:1)\n");
        let runner = FakeRunner::new();
        let err = ReplicatedMirror::with_proc_path(diskless_id(), vec![], runner, path).unwrap_err();
        assert!(matches!(err, Error::BlockDevice { .. }));
    }

    #[test]
    fn rejects_wrong_children_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = proc_fixture(&dir, "version: 8.3.11 (api:88/proto:86-96)\n");
        let runner = FakeRunner::new();
        let backing: Box<dyn BlockDev> = Box::new(FileStorage::new(
            FileId { driver: "file".into(), path: "/tmp/backing".into() },
            runner.clone(),
        ));
        let err = ReplicatedMirror::with_proc_path(diskless_id(), vec![backing], runner, path).unwrap_err();
        assert!(matches!(err, Error::Value(_)));
    }

    #[test]
    fn attach_finds_fully_matching_minor() {
        let dir = tempfile::tempdir().unwrap();
        let path = proc_fixture(
            &dir,
            "version: 8.3.11 (api:88/proto:86-96)\n 0: cs:Connected ro:Primary/Secondary ds:UpToDate/UpToDate C r-----\n",
        );
        let runner = FakeRunner::new();
        runner.on(
            &["drbdsetup", "/dev/drbd0", "show"],
            indoc! {"
                _this_host {
                    address 10.0.0.1:11000;
                }
                _remote_host {
                    address 10.0.0.2:11000;
                }
            "},
        );
        let id = MirrorId {
            local_host: Some("10.0.0.1".into()),
            local_port: Some(11000),
            remote_host: Some("10.0.0.2".into()),
            remote_port: Some(11000),
        };
        let dev = ReplicatedMirror::with_proc_path(id, vec![], runner, path).unwrap();
        assert_eq!(dev.minor(), Some(0));
        assert_eq!(dev.dev_path(), Some("/dev/drbd0"));
    }

    #[test]
    fn attach_finds_nothing_when_no_minor_matches() {
        let dir = tempfile::tempdir().unwrap();
        let path = proc_fixture(
            &dir,
            "version: 8.3.11 (api:88/proto:86-96)\n 0: cs:Connected ro:Primary/Secondary ds:UpToDate/UpToDate C r-----\n",
        );
        let runner = FakeRunner::new();
        runner.on(
            &["drbdsetup", "/dev/drbd0", "show"],
            indoc! {"
                _this_host {
                    address 10.0.0.9:11000;
                }
                _remote_host {
                    address 10.0.0.10:11000;
                }
            "},
        );
        let id = MirrorId {
            local_host: Some("10.0.0.1".into()),
            local_port: Some(11000),
            remote_host: Some("10.0.0.2".into()),
            remote_port: Some(11000),
        };
        let dev = ReplicatedMirror::with_proc_path(id, vec![], runner, path).unwrap();
        assert_eq!(dev.minor(), None);
    }

    #[test]
    fn rename_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = proc_fixture(&dir, "version: 8.3.11 (api:88/proto:86-96)\n");
        let runner = FakeRunner::new();
        let mut dev = ReplicatedMirror::with_proc_path(diskless_id(), vec![], runner, path).unwrap();
        let err = dev
            .rename(&RenameTarget { group: None, name: "x".into() })
            .unwrap_err();
        assert!(matches!(err, Error::Programmer(_)));
    }

    fn meta_size_sectors(mib: u64) -> String {
        (mib * 1024 * 1024 / 512).to_string()
    }

    #[test]
    fn meta_size_accepts_the_inclusive_boundaries() {
        let runner = FakeRunner::new();
        runner.on(&["blockdev", "--getsize"], &meta_size_sectors(128));
        ReplicatedMirror::check_meta_size(&runner, "/dev/vg0/meta").unwrap();

        let runner = FakeRunner::new();
        runner.on(&["blockdev", "--getsize"], &meta_size_sectors(160));
        ReplicatedMirror::check_meta_size(&runner, "/dev/vg0/meta").unwrap();
    }

    #[test]
    fn meta_size_rejects_just_outside_the_boundaries() {
        let runner = FakeRunner::new();
        runner.on(&["blockdev", "--getsize"], &meta_size_sectors(127));
        assert!(ReplicatedMirror::check_meta_size(&runner, "/dev/vg0/meta").is_err());

        let runner = FakeRunner::new();
        runner.on(&["blockdev", "--getsize"], &meta_size_sectors(161));
        assert!(ReplicatedMirror::check_meta_size(&runner, "/dev/vg0/meta").is_err());
    }

    #[test]
    fn shutdown_is_idempotent_when_never_attached() {
        let dir = tempfile::tempdir().unwrap();
        let path = proc_fixture(&dir, "version: 8.3.11 (api:88/proto:86-96)\n");
        let runner = FakeRunner::new();
        let mut dev = ReplicatedMirror::with_proc_path(diskless_id(), vec![], runner, path).unwrap();
        assert!(dev.shutdown().unwrap());
    }
}
