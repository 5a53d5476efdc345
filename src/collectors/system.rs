use crate::collectors::{into_record, ProbeError};
use crate::health::{Cpu, CpuSet, HostInfo, MemInfo, NodeRecord, OsInfo, TemperatureSensor};
use std::collections::BTreeMap;
#[cfg(target_os = "linux")]
use std::fs;
use sysinfo::{ComponentExt, CpuExt, System, SystemExt};
use tracing::debug;

#[cfg(target_os = "linux")]
const CPUINFO_PATH: &str = "/proc/cpuinfo";

pub fn get_cpus(addr: &str) -> NodeRecord<CpuSet> {
    into_record(addr, "cpus", read_cpus().map(|cpus| CpuSet { cpus }))
}

#[cfg(target_os = "linux")]
fn read_cpus() -> Result<Vec<Cpu>, ProbeError> {
    let text =
        fs::read_to_string(CPUINFO_PATH).map_err(|source| ProbeError::read(CPUINFO_PATH, source))?;
    let mut cpus = parse_cpuinfo(&text);
    if cpus.is_empty() {
        return Err(ProbeError::Unavailable(format!(
            "no processors listed in {CPUINFO_PATH}"
        )));
    }

    // Some architectures (arm64) omit model name and clock from cpuinfo.
    if let Some(summary) = sysinfo_package() {
        for cpu in cpus.iter_mut() {
            if cpu.model_name.is_empty() {
                cpu.model_name = summary.model_name.clone();
            }
            if cpu.vendor_id.is_empty() {
                cpu.vendor_id = summary.vendor_id.clone();
            }
            if cpu.mhz == 0.0 {
                cpu.mhz = summary.mhz;
            }
        }
    }
    Ok(cpus)
}

#[cfg(not(target_os = "linux"))]
fn read_cpus() -> Result<Vec<Cpu>, ProbeError> {
    sysinfo_package()
        .map(|cpu| vec![cpu])
        .ok_or_else(|| ProbeError::Unavailable("no cpu information available".to_string()))
}

/// Summarizes all sysinfo CPUs as a single package.
fn sysinfo_package() -> Option<Cpu> {
    let mut system = System::new();
    system.refresh_cpu();
    let first = system.cpus().first()?;
    Some(Cpu {
        vendor_id: first.vendor_id().to_string(),
        model_name: first.brand().to_string(),
        mhz: first.frequency() as f64,
        cores: system.cpus().len(),
        ..Cpu::default()
    })
}

/// Groups the logical processors of `/proc/cpuinfo` by physical package,
/// ordered by numeric package id.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn parse_cpuinfo(text: &str) -> Vec<Cpu> {
    let mut packages: BTreeMap<(Option<u64>, String), Cpu> = BTreeMap::new();
    for block in text.split("\n\n") {
        let mut cpu = Cpu::default();
        let mut is_processor = false;
        for line in block.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "processor" => is_processor = true,
                "vendor_id" => cpu.vendor_id = value.to_string(),
                "cpu family" => cpu.family = value.to_string(),
                "model" => cpu.model = value.to_string(),
                "model name" => cpu.model_name = value.to_string(),
                "stepping" => cpu.stepping = value.parse().unwrap_or(0),
                "physical id" => cpu.physical_id = value.to_string(),
                "cpu MHz" => cpu.mhz = value.parse().unwrap_or(0.0),
                "cache size" => {
                    cpu.cache_size = value.trim_end_matches("KB").trim().parse().unwrap_or(0)
                }
                "flags" | "Features" => {
                    cpu.flags = value.split_whitespace().map(str::to_string).collect()
                }
                "microcode" => cpu.microcode = value.to_string(),
                _ => {}
            }
        }
        if !is_processor {
            continue;
        }
        let key = (cpu.physical_id.parse().ok(), cpu.physical_id.clone());
        packages
            .entry(key)
            .and_modify(|package| package.cores += 1)
            .or_insert(Cpu { cores: 1, ..cpu });
    }
    packages.into_values().collect()
}

pub fn get_os_info(addr: &str) -> NodeRecord<OsInfo> {
    into_record(addr, "osinfo", read_os_info())
}

fn read_os_info() -> Result<OsInfo, ProbeError> {
    if !cfg!(target_os = "linux") {
        return Err(ProbeError::unsupported_os());
    }

    let mut system = System::new();
    system.refresh_processes();
    system.refresh_components_list();
    system.refresh_components();

    let hostname = system
        .host_name()
        .ok_or_else(|| ProbeError::Unavailable("unable to determine host name".to_string()))?;
    let info = HostInfo {
        hostname,
        uptime: system.uptime(),
        boot_time: system.boot_time(),
        procs: system.processes().len() as u64,
        os: std::env::consts::OS.to_string(),
        platform: system.distribution_id(),
        platform_version: system.os_version().unwrap_or_default(),
        kernel_version: system.kernel_version().unwrap_or_default(),
        kernel_arch: std::env::consts::ARCH.to_string(),
    };

    let sensors: Vec<TemperatureSensor> = system
        .components()
        .iter()
        .map(|c| TemperatureSensor {
            sensor_key: c.label().to_string(),
            sensor_temperature: c.temperature() as f64,
            sensor_high: c.max() as f64,
            sensor_critical: c.critical().map(f64::from).unwrap_or(0.0),
        })
        .collect();
    debug!(sensors = sensors.len(), procs = info.procs, "collected os info");

    Ok(OsInfo { info, sensors })
}

pub fn get_mem_info(addr: &str) -> NodeRecord<MemInfo> {
    into_record(addr, "meminfo", read_mem_info())
}

fn read_mem_info() -> Result<MemInfo, ProbeError> {
    let mut system = System::new();
    system.refresh_memory();
    let total = system.total_memory();
    if total == 0 {
        return Err(ProbeError::Unavailable(
            "unable to read memory information".to_string(),
        ));
    }
    Ok(MemInfo {
        total,
        available: system.available_memory(),
        swap_space_total: system.total_swap(),
        swap_space_free: system.free_swap(),
    })
}
