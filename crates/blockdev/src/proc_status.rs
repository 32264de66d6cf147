//! Reading and parsing `/proc/drbd`, the kernel's own view of every DRBD
//! minor currently known to it. Every replicated-mirror driver instance
//! re-derives its view of the world from this file rather than trusting its
//! own cached state, since another process (or a previous, crashed
//! instance) may have changed things underneath it.

use std::collections::BTreeMap;
use std::fs;

use regex::Regex;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrbdVersion {
    pub k_major: u32,
    pub k_minor: u32,
    pub k_point: u32,
}

/// Read `/proc/drbd` (or, in tests, a stand-in path) into lines. Errors if
/// the file can't be read at all or is empty; the kernel module being
/// unloaded looks the same as the file not existing from here.
pub fn read_proc_data(path: &str) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path)
        .map_err(|e| Error::block_device(format!("Can't read any data from {path}: {e}")))?;
    let lines: Vec<String> = contents.lines().map(str::to_string).collect();
    if lines.is_empty() {
        return Err(Error::block_device(format!(
            "Can't read any data from {path}"
        )));
    }
    Ok(lines)
}

/// Parse the version header, the first line of `/proc/drbd`, e.g.
/// `version: 8.3.11 (api:88/proto:86-96)`. Rejects anything but kernel
/// major version 8; this crate's replicated-mirror driver only knows the
/// DRBD 8 wire and tool surface.
pub fn parse_version(lines: &[String]) -> Result<DrbdVersion> {
    let re = Regex::new(r"^version:\s*(\d+)\.(\d+)\.(\d+)").unwrap();
    let first = lines
        .first()
        .ok_or_else(|| Error::block_device("empty /proc/drbd"))?;
    let caps = re
        .captures(first)
        .ok_or_else(|| Error::block_device(format!("Can't parse version line: {first}")))?;
    let k_major: u32 = caps[1].parse().unwrap();
    let k_minor: u32 = caps[2].parse().unwrap();
    let k_point: u32 = caps[3].parse().unwrap();
    if k_major != 8 {
        return Err(Error::block_device(format!(
            "Mismatch in DRBD kernel version and requested ganeti usage: kernel is {k_major}.{k_minor}.{k_point}"
        )));
    }
    Ok(DrbdVersion {
        k_major,
        k_minor,
        k_point,
    })
}

/// Collate continuation lines under the minor header they belong to. Each
/// minor's block in `/proc/drbd` starts with a line like ` 0: cs:Connected
/// ...` and is followed by zero or more indented continuation lines (sync
/// progress, resync data) that belong to the same minor.
fn massage(lines: &[String]) -> BTreeMap<u32, String> {
    let header_re = Regex::new(r"^\s*(\d+):\s*(.*)$").unwrap();
    let mut out: BTreeMap<u32, String> = BTreeMap::new();
    let mut current: Option<u32> = None;
    for line in lines {
        if let Some(caps) = header_re.captures(line) {
            let minor: u32 = caps[1].parse().unwrap();
            out.insert(minor, caps[2].to_string());
            current = Some(minor);
        } else if let Some(minor) = current {
            if let Some(entry) = out.get_mut(&minor) {
                entry.push(' ');
                entry.push_str(line.trim());
            }
        }
    }
    out
}

/// Minors `/proc/drbd` reports as configured (not `cs:Unconfigured`),
/// in ascending order, mapped to their full collated status line.
pub fn used_devs(lines: &[String]) -> BTreeMap<u32, String> {
    massage(lines)
        .into_iter()
        .filter(|(_, line)| !line.contains("cs:Unconfigured"))
        .collect()
}

const MAX_MINORS: u32 = 255;

/// An unused minor, for kernel-level allocation. Minors are dynamic on DRBD
/// 8.x: any number up to a max minor count the kernel has never been told
/// about is free. Prefer a minor the kernel already knows but has never
/// configured (`cs:Unconfigured`) over allocating a brand-new one, since the
/// former costs nothing to reuse.
pub fn find_unused_minor(lines: &[String]) -> Result<u32> {
    let unused_re = Regex::new(r"^ *([0-9]+): cs:Unconfigured$").unwrap();
    let used_re = Regex::new(r"^ *([0-9]+): cs:").unwrap();
    let mut highest: Option<u32> = None;
    for line in lines {
        if let Some(caps) = unused_re.captures(line) {
            return Ok(caps[1].parse().unwrap());
        }
        if let Some(caps) = used_re.captures(line) {
            let minor: u32 = caps[1].parse().unwrap();
            highest = Some(highest.map_or(minor, |h| h.max(minor)));
        }
    }
    let Some(highest) = highest else {
        return Ok(0);
    };
    if highest >= MAX_MINORS {
        return Err(Error::block_device("Can't find a free DRBD minor"));
    }
    Ok(highest + 1)
}

/// Sync progress parsed from a minor's collated status line, e.g.
/// `... sync'ed: 12.3% (1234/5678)M ... finish: 0:01:02 ...`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcSyncStatus {
    pub percent: Option<f64>,
    pub eta_seconds: Option<u64>,
    pub is_degraded: bool,
    pub local_disk_degraded: bool,
}

/// Parse the connection/disk state and (if resyncing) progress from a
/// single minor's collated `/proc/drbd` line. Errors if the line doesn't
/// even carry a recognisable `cs:`/`ds:` pair, which should never happen
/// for a minor that `used_devs` reported as configured.
pub fn parse_sync_status(minor: u32, line: &str) -> Result<ProcSyncStatus> {
    let progress_re =
        Regex::new(r"sync'ed: *([0-9.]+)%.*finish: ([0-9]+):([0-9]+):([0-9]+) ").unwrap();
    let state_re = Regex::new(r"cs:(\w+).*ds:(\w+)/(\w+)").unwrap();

    let (percent, eta_seconds) = match progress_re.captures(line) {
        Some(caps) => {
            let percent: f64 = caps[1].parse().unwrap();
            let h: u64 = caps[2].parse().unwrap();
            let m: u64 = caps[3].parse().unwrap();
            let s: u64 = caps[4].parse().unwrap();
            (Some(percent), Some(h * 3600 + m * 60 + s))
        }
        None => (None, None),
    };

    let caps = state_re.captures(line).ok_or_else(|| {
        Error::block_device(format!("Can't find my data in /proc (minor {minor})"))
    })?;
    let client_state = &caps[1];
    let local_disk_state = &caps[2];
    let local_disk_degraded = local_disk_state != "UpToDate";
    let is_degraded = client_state != "Connected" || local_disk_degraded;

    Ok(ProcSyncStatus {
        percent,
        eta_seconds,
        is_degraded,
        local_disk_degraded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "version: 8.3.11 (api:88/proto:86-96)\n\
srcversion: ABCDEF0123456789ABCDEF0\n\
 0: cs:Connected ro:Primary/Secondary ds:UpToDate/UpToDate C r-----\n\
    ns:1048576 nr:0 dw:0 dr:1048576 al:0 bm:0 lo:0 pe:0 ua:0 ap:0 ep:1 wo:b oos:0\n\
 2: cs:Unconfigured\n\
 4: cs:SyncSource ro:Primary/Secondary ds:UpToDate/Inconsistent C r-----\n\
    ns:10240 nr:0 dw:0 dr:10240 al:0 bm:0 lo:0 pe:4 ua:0 ap:0 ep:1 wo:b oos:1048576\n\
    [>....................] sync'ed: 12.3% (1234/5678)M\n\
    \tfinish: 0:01:02 speed: 10,000 (10,000) K/sec\n";

    fn lines() -> Vec<String> {
        SAMPLE.lines().map(str::to_string).collect()
    }

    #[test]
    fn parses_version() {
        let v = parse_version(&lines()).unwrap();
        assert_eq!(v, DrbdVersion { k_major: 8, k_minor: 3, k_point: 11 });
    }

    #[test]
    fn rejects_non_v8_kernel() {
        let bad = vec!["version: 9.0.0 (api:1/proto:1)".to_string()];
        assert!(parse_version(&bad).is_err());
    }

    #[test]
    fn used_devs_excludes_unconfigured_and_collates_continuations() {
        let used = used_devs(&lines());
        assert!(!used.contains_key(&2));
        let minor4 = &used[&4];
        assert!(minor4.contains("sync'ed: 12.3%"));
        assert!(minor4.contains("finish: 0:01:02"));
    }

    #[test]
    fn finds_unconfigured_minor_before_allocating_a_new_one() {
        assert_eq!(find_unused_minor(&lines()).unwrap(), 2);
    }

    #[test]
    fn allocates_past_the_highest_used_minor_when_none_are_unconfigured() {
        let data = vec![
            "version: 8.3.11 (api:88/proto:86-96)".to_string(),
            " 0: cs:Connected ro:Primary/Secondary ds:UpToDate/UpToDate C r-----".to_string(),
            " 254: cs:Connected ro:Primary/Secondary ds:UpToDate/UpToDate C r-----".to_string(),
        ];
        assert_eq!(find_unused_minor(&data).unwrap(), 255);
    }

    #[test]
    fn fails_when_the_highest_used_minor_is_already_the_last_one() {
        let data = vec![
            "version: 8.3.11 (api:88/proto:86-96)".to_string(),
            " 255: cs:Connected ro:Primary/Secondary ds:UpToDate/UpToDate C r-----".to_string(),
        ];
        assert!(find_unused_minor(&data).is_err());
    }

    #[test]
    fn no_minors_in_use_allocates_zero() {
        let data = vec!["version: 8.3.11 (api:88/proto:86-96)".to_string()];
        assert_eq!(find_unused_minor(&data).unwrap(), 0);
    }

    #[test]
    fn parses_sync_progress_and_eta() {
        let used = used_devs(&lines());
        let status = parse_sync_status(4, &used[&4]).unwrap();
        assert_eq!(status.percent, Some(12.3));
        assert_eq!(status.eta_seconds, Some(62));
        // Not connected to the peer, so degraded overall, but the local
        // disk itself is UpToDate (this node is the sync *source*).
        assert!(status.is_degraded);
        assert!(!status.local_disk_degraded);
    }

    #[test]
    fn connected_up_to_date_is_not_degraded() {
        let used = used_devs(&lines());
        let status = parse_sync_status(0, &used[&0]).unwrap();
        assert!(!status.is_degraded);
        assert!(!status.local_disk_degraded);
    }

    #[test]
    fn errors_when_state_is_unparseable() {
        assert!(parse_sync_status(9, "garbage with no state fields").is_err());
    }
}
