use crate::collectors::{into_record, ProbeError};
use crate::health::{NodeRecord, ProcInfo, ProcIoCounters, ProcMemInfo};
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;
use sysinfo::{PidExt, ProcessExt, System, SystemExt, UserExt};

/// Gap between the two process refreshes that `cpu_usage` is computed from.
const CPU_SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

/// Information about the current process.
pub fn get_proc_info(addr: &str) -> NodeRecord<ProcInfo> {
    into_record(addr, "procinfo", read_proc_info())
}

fn read_proc_info() -> Result<ProcInfo, ProbeError> {
    let pid = sysinfo::get_current_pid().map_err(|err| {
        ProbeError::Unavailable(format!("unable to determine current pid: {err}"))
    })?;

    let mut system = System::new();
    system.refresh_memory();
    system.refresh_processes();
    system.refresh_users_list();
    std::thread::sleep(CPU_SAMPLE_INTERVAL);
    if !system.refresh_process(pid) {
        return Err(ProbeError::Unavailable(format!(
            "process {} not found",
            pid.as_u32()
        )));
    }
    let process = system
        .process(pid)
        .ok_or_else(|| ProbeError::Unavailable(format!("process {} not found", pid.as_u32())))?;

    let mut children_pids: Vec<u32> = system
        .processes()
        .values()
        .filter(|p| p.parent() == Some(pid))
        .map(|p| p.pid().as_u32())
        .collect();
    children_pids.sort_unstable();

    let total_memory = system.total_memory();
    let mem_percent = if total_memory > 0 {
        (process.memory() as f64 / total_memory as f64 * 100.0) as f32
    } else {
        0.0
    };

    let username = process
        .user_id()
        .and_then(|uid| system.get_user_by_id(uid))
        .map(|user| user.name().to_string())
        .unwrap_or_default();

    let disk = process.disk_usage();
    let (num_threads, num_fds) = thread_and_fd_counts()?;
    let (uids, gids) = owner_ids(process);

    Ok(ProcInfo {
        pid: pid.as_u32(),
        ppid: process.parent().map(|p| p.as_u32()).unwrap_or(0),
        name: process.name().to_string(),
        cmd_line: process.cmd().join(" "),
        exec_path: process.exe().display().to_string(),
        cwd: process.cwd().display().to_string(),
        status: process.status().to_string(),
        create_time: (process.start_time() as i64).saturating_mul(1000),
        is_running: true,
        cpu_percent: process.cpu_usage() as f64,
        mem_percent,
        mem_info: ProcMemInfo {
            rss: process.memory(),
            vms: process.virtual_memory(),
        },
        io_counters: ProcIoCounters {
            read_bytes: disk.total_read_bytes,
            write_bytes: disk.total_written_bytes,
        },
        children_pids,
        num_threads,
        num_fds,
        uids,
        gids,
        username,
    })
}

#[cfg(unix)]
fn owner_ids(process: &sysinfo::Process) -> (Vec<u32>, Vec<u32>) {
    let uids = process.user_id().map(|uid| vec![**uid]).unwrap_or_default();
    let gids = process.group_id().map(|gid| vec![*gid]).unwrap_or_default();
    (uids, gids)
}

#[cfg(not(unix))]
fn owner_ids(_process: &sysinfo::Process) -> (Vec<u32>, Vec<u32>) {
    (Vec::new(), Vec::new())
}

#[cfg(target_os = "linux")]
fn thread_and_fd_counts() -> Result<(u32, u32), ProbeError> {
    Ok((count_entries("/proc/self/task")?, count_entries("/proc/self/fd")?))
}

#[cfg(not(target_os = "linux"))]
fn thread_and_fd_counts() -> Result<(u32, u32), ProbeError> {
    Ok((0, 0))
}

#[cfg(target_os = "linux")]
fn count_entries(path: &str) -> Result<u32, ProbeError> {
    let entries = fs::read_dir(path).map_err(|source| ProbeError::read(path, source))?;
    Ok(entries.flatten().count() as u32)
}
