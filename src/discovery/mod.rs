//! Locating a running Companions host and the port it listens on.
//!
//! Discovery runs two searches in strict order and returns the first port
//! found:
//!
//! 1. A process whose name contains one of [`HOST_EXECUTABLES`], tried in
//!    list order. Its port record sits next to its executable.
//! 2. An install marker directory ([`INSTALL_MARKER`]) under a mounted volume
//!    root or the home directory, together with a running development host
//!    ([`DEV_HOST_EXECUTABLE`]). The record lives at
//!    `<marker>/companions/v1/portnum.dat`.
//!
//! Only the first matching process per name is considered.

pub mod port_file;
pub mod probe;

use std::path::PathBuf;

use tracing::{debug, info};

use crate::Result;
use port_file::{read_port, PORTNUM_FILE};
use probe::{ProcessInfo, SystemProbe};

/// Packaged host executables, most preferred first.
pub const HOST_EXECUTABLES: &[&str] = &["CompanionsMicroServer64.exe", "CompanionsServer64.exe"];

/// Development-mode host process name.
pub const DEV_HOST_EXECUTABLE: &str = "allegro.exe";

/// Directory marking a source install.
pub const INSTALL_MARKER: &str = "qrg";

/// Location of the port record relative to the install marker.
#[must_use]
pub fn install_port_file(marker: &std::path::Path) -> PathBuf {
    marker.join("companions").join("v1").join(PORTNUM_FILE)
}

fn find_named<'a>(processes: &'a [ProcessInfo], name: &str) -> Option<&'a ProcessInfo> {
    processes.iter().find(|p| p.name.contains(name))
}

/// Search this machine for a live host and return its port.
///
/// `Ok(None)` means nothing usable was found; callers fall back to their
/// default port.
///
/// # Errors
///
/// Returns `AppError::PortVerificationFailed` when `verify` is set and the
/// first usable record was written by a different process.
pub fn discover(probe: &dyn SystemProbe, verify: bool) -> Result<Option<u16>> {
    debug!(verify, "checking for companions");
    let processes = probe.processes();

    let packaged = HOST_EXECUTABLES
        .iter()
        .find_map(|name| find_named(&processes, name));

    if let Some(host) = packaged {
        if let Some(ref exe) = host.exe {
            let path = exe.with_file_name(PORTNUM_FILE);
            if let Some(port) = read_port(&path, host.pid, verify)? {
                info!(pid = host.pid, name = %host.name, port, "found running companions executable");
                return Ok(Some(port));
            }
        } else {
            debug!(pid = host.pid, name = %host.name, "companions process has no resolvable executable path");
        }
    }

    let marker = probe
        .candidate_roots()
        .into_iter()
        .map(|root| root.join(INSTALL_MARKER))
        .find(|candidate| candidate.is_dir());
    let dev_host = find_named(&processes, DEV_HOST_EXECUTABLE);

    if let (Some(marker), Some(dev_host)) = (marker, dev_host) {
        let path = install_port_file(&marker);
        if let Some(port) = read_port(&path, dev_host.pid, verify)? {
            info!(pid = dev_host.pid, marker = %marker.display(), port, "found development companions");
            return Ok(Some(port));
        }
    }

    debug!("no running companions found");
    Ok(None)
}
