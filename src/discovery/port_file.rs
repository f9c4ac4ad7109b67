//! Reader for the `portnum.dat` record a host writes once its socket server
//! is listening.
//!
//! The first line of the file is a JSON object such as
//! `{"pid": 4242, "port": 9000}`.

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// File name of the port record.
pub const PORTNUM_FILE: &str = "portnum.dat";

/// Parsed port record. Only `port` is required.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct PortRecord {
    /// Port the host opened.
    pub port: Option<u16>,
    /// Process id of the host that wrote the record.
    pub pid: Option<u32>,
}

/// Read the host port from a port record file.
///
/// Returns `Ok(None)` when the file is missing, unreadable as a record, or
/// lacks a `port` field. With `verify` set the record's `pid` must be present
/// and equal to `expected_pid`.
///
/// # Errors
///
/// Returns `AppError::PortVerificationFailed` on a pid mismatch under
/// `verify`, and `AppError::Io` when the file exists but cannot be read.
pub fn read_port(path: &Path, expected_pid: u32, verify: bool) -> Result<Option<u16>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "port file absent");
            return Ok(None);
        }
        Err(err) => {
            return Err(AppError::Io(format!(
                "failed to open {}: {err}",
                path.display()
            )))
        }
    };

    let mut line = String::new();
    BufReader::new(file)
        .read_line(&mut line)
        .map_err(|err| AppError::Io(format!("failed to read {}: {err}", path.display())))?;

    let record: PortRecord = match serde_json::from_str(line.trim()) {
        Ok(record) => record,
        Err(err) => {
            warn!(path = %path.display(), %err, "port file malformed, ignoring");
            return Ok(None);
        }
    };

    let Some(port) = record.port else {
        warn!(path = %path.display(), "port file has no port field, ignoring");
        return Ok(None);
    };

    if verify {
        match record.pid {
            Some(pid) if pid == expected_pid => {}
            Some(pid) => {
                return Err(AppError::PortVerificationFailed(format!(
                    "{} was written by pid {pid}, expected {expected_pid}",
                    path.display()
                )))
            }
            None => {
                return Err(AppError::PortVerificationFailed(format!(
                    "{} has no pid field, expected {expected_pid}",
                    path.display()
                )))
            }
        }
    }

    debug!(path = %path.display(), port, pid = ?record.pid, "port file read");
    Ok(Some(port))
}
