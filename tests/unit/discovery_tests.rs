//! Unit tests for host discovery against a canned process table.

use std::fs;
use std::path::{Path, PathBuf};

use companions_agent::discovery::port_file::PORTNUM_FILE;
use companions_agent::discovery::probe::{ProcessInfo, SystemProbe};
use companions_agent::discovery::{discover, install_port_file, INSTALL_MARKER};
use companions_agent::AppError;

struct FakeProbe {
    processes: Vec<ProcessInfo>,
    roots: Vec<PathBuf>,
}

impl SystemProbe for FakeProbe {
    fn processes(&self) -> Vec<ProcessInfo> {
        self.processes.clone()
    }

    fn candidate_roots(&self) -> Vec<PathBuf> {
        self.roots.clone()
    }
}

fn process(pid: u32, name: &str, exe: Option<PathBuf>) -> ProcessInfo {
    ProcessInfo {
        pid,
        name: name.to_owned(),
        exe,
    }
}

fn write_port(path: &Path, pid: u32, port: u16) {
    fs::create_dir_all(path.parent().expect("parent dir")).expect("create dirs");
    fs::write(path, format!("{{\"pid\": {pid}, \"port\": {port}}}")).expect("write port file");
}

/// A machine with no host process yields nothing.
#[test]
fn nothing_running_is_none() {
    let probe = FakeProbe {
        processes: vec![process(10, "bash", None)],
        roots: Vec::new(),
    };
    assert_eq!(discover(&probe, false).expect("no error"), None);
}

/// The packaged host's record sits next to its executable.
#[test]
fn finds_packaged_host_next_to_executable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let exe = dir.path().join("CompanionsServer64.exe");
    write_port(&dir.path().join(PORTNUM_FILE), 300, 9555);

    let probe = FakeProbe {
        processes: vec![process(300, "CompanionsServer64.exe", Some(exe))],
        roots: Vec::new(),
    };
    assert_eq!(discover(&probe, true).expect("verified"), Some(9555));
}

/// The micro server wins over the full server regardless of process order.
#[test]
fn micro_server_is_preferred() {
    let full = tempfile::tempdir().expect("tempdir");
    let micro = tempfile::tempdir().expect("tempdir");
    write_port(&full.path().join(PORTNUM_FILE), 1, 9001);
    write_port(&micro.path().join(PORTNUM_FILE), 2, 9002);

    let probe = FakeProbe {
        processes: vec![
            process(1, "CompanionsServer64.exe", Some(full.path().join("CompanionsServer64.exe"))),
            process(
                2,
                "CompanionsMicroServer64.exe",
                Some(micro.path().join("CompanionsMicroServer64.exe")),
            ),
        ],
        roots: Vec::new(),
    };
    assert_eq!(discover(&probe, false).expect("no error"), Some(9002));
}

/// A packaged host takes precedence over a development install.
#[test]
fn packaged_host_beats_dev_install() {
    let packaged = tempfile::tempdir().expect("tempdir");
    write_port(&packaged.path().join(PORTNUM_FILE), 5, 9100);
    let root = tempfile::tempdir().expect("tempdir");
    write_port(&install_port_file(&root.path().join(INSTALL_MARKER)), 6, 9200);

    let probe = FakeProbe {
        processes: vec![
            process(6, "allegro.exe", None),
            process(5, "CompanionsMicroServer64.exe", Some(packaged.path().join("x.exe"))),
        ],
        roots: vec![root.path().to_path_buf()],
    };
    assert_eq!(discover(&probe, false).expect("no error"), Some(9100));
}

/// A development host is found through the install marker directory.
#[test]
fn finds_dev_host_through_install_marker() {
    let empty_root = tempfile::tempdir().expect("tempdir");
    let root = tempfile::tempdir().expect("tempdir");
    write_port(&install_port_file(&root.path().join(INSTALL_MARKER)), 77, 9300);

    let probe = FakeProbe {
        processes: vec![process(77, "allegro.exe", None)],
        roots: vec![empty_root.path().to_path_buf(), root.path().to_path_buf()],
    };
    assert_eq!(discover(&probe, true).expect("verified"), Some(9300));
}

/// An install marker without a running development host is ignored.
#[test]
fn marker_without_dev_process_is_none() {
    let root = tempfile::tempdir().expect("tempdir");
    write_port(&install_port_file(&root.path().join(INSTALL_MARKER)), 77, 9300);

    let probe = FakeProbe {
        processes: Vec::new(),
        roots: vec![root.path().to_path_buf()],
    };
    assert_eq!(discover(&probe, false).expect("no error"), None);
}

/// Under verification a record from another process is an error.
#[test]
fn verification_failure_propagates() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_port(&dir.path().join(PORTNUM_FILE), 999, 9555);

    let probe = FakeProbe {
        processes: vec![process(300, "CompanionsServer64.exe", Some(dir.path().join("s.exe")))],
        roots: Vec::new(),
    };
    let err = discover(&probe, true).expect_err("pid mismatch");
    assert!(matches!(err, AppError::PortVerificationFailed(_)), "got {err:?}");
}
