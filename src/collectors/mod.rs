pub mod partitions;
pub mod process;
pub mod system;

use crate::health::{NodeRecord, SysInfo};
use sysinfo::{System, SystemExt};
use thiserror::Error;
use tracing::debug;

/// Reason a single probe gave up.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("unsupported operating system {0}")]
    UnsupportedOs(&'static str),
    #[error("unable to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("{0}")]
    Unavailable(String),
}

impl ProbeError {
    pub fn unsupported_os() -> Self {
        ProbeError::UnsupportedOs(std::env::consts::OS)
    }

    pub fn read(path: impl Into<String>, source: std::io::Error) -> Self {
        ProbeError::Read {
            path: path.into(),
            source,
        }
    }
}

fn into_record<T>(addr: &str, probe: &str, result: Result<T, ProbeError>) -> NodeRecord<T> {
    match result {
        Ok(data) => NodeRecord::collected(addr, data),
        Err(err) => {
            debug!(addr, probe, error = %err, "probe failed");
            NodeRecord::failed(addr, err)
        }
    }
}

/// Collects every system snapshot of the local node.
pub fn collect_sys_info(addr: &str) -> SysInfo {
    SysInfo {
        cpus: vec![system::get_cpus(addr)],
        partitions: vec![partitions::get_partitions(addr)],
        osinfo: vec![system::get_os_info(addr)],
        meminfo: vec![system::get_mem_info(addr)],
        procinfo: vec![process::get_proc_info(addr)],
    }
}

pub fn local_addr() -> String {
    System::new()
        .host_name()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
