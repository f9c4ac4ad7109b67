//! Queries against the local machine used by discovery: the process table
//! and the directories an install marker may live under.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use sysinfo::{Disks, ProcessRefreshKind, RefreshKind, System, UpdateKind};

/// One entry of the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Process id.
    pub pid: u32,
    /// Executable name as reported by the OS (may include a `.exe` suffix).
    pub name: String,
    /// Full executable path when it can be resolved.
    pub exe: Option<PathBuf>,
}

/// Source of process and filesystem facts for discovery.
///
/// The production implementation is [`HostSystem`]; tests substitute a
/// canned table.
pub trait SystemProbe: Send + Sync {
    /// Running processes in enumeration order.
    fn processes(&self) -> Vec<ProcessInfo>;

    /// Directories searched for the install marker, in order: every mounted
    /// volume root, then the user's home directory.
    fn candidate_roots(&self) -> Vec<PathBuf>;
}

/// [`SystemProbe`] backed by the running OS through `sysinfo`.
///
/// Processes are listed in pid order. Volume roots are the mount points
/// `sysinfo` reports (`C:\`, `D:\`, ... on Windows).
#[derive(Debug, Default, Clone, Copy)]
pub struct HostSystem;

impl SystemProbe for HostSystem {
    fn processes(&self) -> Vec<ProcessInfo> {
        let refresh = ProcessRefreshKind::nothing()
            .with_exe(UpdateKind::OnlyIfNotSet)
            .with_cmd(UpdateKind::OnlyIfNotSet);
        let system = System::new_with_specifics(RefreshKind::nothing().with_processes(refresh));

        let mut out: Vec<ProcessInfo> = system
            .processes()
            .iter()
            .map(|(pid, process)| {
                process_info(
                    pid.as_u32(),
                    &process.name().to_string_lossy(),
                    process.cmd(),
                    process.exe(),
                )
            })
            .collect();
        out.sort_by_key(|info| info.pid);
        out
    }

    fn candidate_roots(&self) -> Vec<PathBuf> {
        let disks = Disks::new_with_refreshed_list();
        let mut roots = Vec::new();
        for disk in disks.list() {
            push_unique(&mut roots, disk.mount_point().to_path_buf());
        }
        if roots.is_empty() {
            roots.push(PathBuf::from(std::path::MAIN_SEPARATOR_STR));
        }
        if let Some(home) = dirs::home_dir() {
            push_unique(&mut roots, home);
        }
        roots
    }
}

/// Build a table entry, preferring the first command-line argument over the
/// OS name: the OS truncates names on Linux, and a host run under an
/// emulator only shows its real executable there.
fn process_info(pid: u32, os_name: &str, cmd: &[OsString], exe: Option<&Path>) -> ProcessInfo {
    let argv0 = cmd
        .first()
        .map(|arg| arg.to_string_lossy().into_owned())
        .filter(|arg| !arg.is_empty());

    let name = argv0
        .as_deref()
        .map_or(os_name, base_name)
        .to_owned();
    let exe = argv0
        .as_deref()
        .map(Path::new)
        .filter(|path| path.is_absolute() && path.exists())
        .or(exe)
        .map(Path::to_path_buf);

    ProcessInfo { pid, name, exe }
}

fn push_unique(roots: &mut Vec<PathBuf>, path: PathBuf) {
    if !roots.contains(&path) {
        roots.push(path);
    }
}

/// Last component of a path written with either separator, so Windows
/// command lines seen under an emulator still yield `Foo.exe`.
fn base_name(raw: &str) -> &str {
    raw.rsplit(['/', '\\']).next().unwrap_or(raw)
}
