use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Health info version 0, sent by servers that predate versioning.
pub const HEALTH_INFO_VERSION_0: &str = "";
/// Health info version 1.
pub const HEALTH_INFO_VERSION_1: &str = "1";
/// Current health info version understood by this client.
pub const HEALTH_INFO_VERSION: &str = HEALTH_INFO_VERSION_1;

/// Result of one probe: either collected data or the reason it failed.
///
/// Serialized flat next to the owning record's keys, so a failure is
/// `{"error": "..."}` and a success is the payload's own fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outcome<T> {
    Failed { error: String },
    Collected(T),
}

impl<T> Outcome<T> {
    pub fn collected(&self) -> Option<&T> {
        match self {
            Outcome::Collected(data) => Some(data),
            Outcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Outcome::Failed { error } => Some(error),
            Outcome::Collected(_) => None,
        }
    }
}

/// Per-node snapshot tagged with the node address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord<T> {
    pub addr: String,
    #[serde(flatten)]
    pub outcome: Outcome<T>,
}

impl<T> NodeRecord<T> {
    pub fn collected(addr: impl Into<String>, data: T) -> Self {
        Self {
            addr: addr.into(),
            outcome: Outcome::Collected(data),
        }
    }

    pub fn failed(addr: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            addr: addr.into(),
            outcome: Outcome::Failed {
                error: error.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cpu {
    #[serde(default)]
    pub vendor_id: String,
    #[serde(default)]
    pub family: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub stepping: i32,
    #[serde(default)]
    pub physical_id: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub mhz: f64,
    #[serde(default)]
    pub cache_size: i32,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub microcode: String,
    /// Logical processors in this package.
    #[serde(default)]
    pub cores: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuSet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cpus: Vec<Cpu>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionUsage {
    #[serde(default)]
    pub mountpoint: String,
    #[serde(default)]
    pub fs_type: String,
    #[serde(default)]
    pub mount_options: String,
    #[serde(default)]
    pub space_total: u64,
    #[serde(default)]
    pub space_free: u64,
    #[serde(default)]
    pub inode_total: u64,
    #[serde(default)]
    pub inode_free: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionEntry {
    #[serde(default)]
    pub device: String,
    #[serde(flatten)]
    pub outcome: Outcome<PartitionUsage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionSet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<PartitionEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInfo {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub uptime: u64,
    #[serde(default)]
    pub boot_time: u64,
    #[serde(default)]
    pub procs: u64,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub platform_version: String,
    #[serde(default)]
    pub kernel_version: String,
    #[serde(default)]
    pub kernel_arch: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureSensor {
    #[serde(default)]
    pub sensor_key: String,
    #[serde(default)]
    pub sensor_temperature: f64,
    #[serde(default)]
    pub sensor_high: f64,
    #[serde(default)]
    pub sensor_critical: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OsInfo {
    #[serde(default)]
    pub info: HostInfo,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sensors: Vec<TemperatureSensor>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemInfo {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub available: u64,
    #[serde(default)]
    pub swap_space_total: u64,
    #[serde(default)]
    pub swap_space_free: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcMemInfo {
    #[serde(default)]
    pub rss: u64,
    #[serde(default)]
    pub vms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcIoCounters {
    #[serde(default)]
    pub read_bytes: u64,
    #[serde(default)]
    pub write_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcInfo {
    #[serde(default)]
    pub pid: u32,
    #[serde(default)]
    pub ppid: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cmd_line: String,
    #[serde(default)]
    pub exec_path: String,
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub status: String,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub create_time: i64,
    #[serde(default)]
    pub is_running: bool,
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default)]
    pub mem_percent: f32,
    #[serde(default)]
    pub mem_info: ProcMemInfo,
    #[serde(default, rename = "iocounters")]
    pub io_counters: ProcIoCounters,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children_pids: Vec<u32>,
    #[serde(default)]
    pub num_threads: u32,
    #[serde(default)]
    pub num_fds: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uids: Vec<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gids: Vec<u32>,
    #[serde(default)]
    pub username: String,
}

/// Hardware and system information of every node in the cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SysInfo {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cpus: Vec<NodeRecord<CpuSet>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<NodeRecord<PartitionSet>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub osinfo: Vec<NodeRecord<OsInfo>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub meminfo: Vec<NodeRecord<MemInfo>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub procinfo: Vec<NodeRecord<ProcInfo>>,
}

/// Write latency of a drive in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Latency {
    #[serde(default)]
    pub avg: f64,
    #[serde(default)]
    pub max: f64,
    #[serde(default)]
    pub min: f64,
    #[serde(default)]
    pub percentile_50: f64,
    #[serde(default)]
    pub percentile_90: f64,
    #[serde(default)]
    pub percentile_99: f64,
}

/// Write throughput in bytes per second.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Throughput {
    #[serde(default)]
    pub avg: u64,
    #[serde(default)]
    pub max: u64,
    #[serde(default)]
    pub min: u64,
    #[serde(default)]
    pub percentile_50: u64,
    #[serde(default)]
    pub percentile_90: u64,
    #[serde(default)]
    pub percentile_99: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriveMeasurement {
    #[serde(default)]
    pub latency: Latency,
    #[serde(default)]
    pub throughput: Throughput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrivePerf {
    #[serde(default)]
    pub path: String,
    #[serde(flatten)]
    pub outcome: Outcome<DriveMeasurement>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrivePerfSet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub serial_perf: Vec<DrivePerf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parallel_perf: Vec<DrivePerf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerNetPerf {
    #[serde(default)]
    pub latency: Latency,
    #[serde(default)]
    pub throughput: Throughput,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetPerfSet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_peers: Vec<NodeRecord<PeerNetPerf>>,
}

/// Drive and network performance of the whole cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerfInfo {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drives: Vec<NodeRecord<DrivePerfSet>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub net: Vec<NodeRecord<NetPerfSet>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_parallel: Option<NodeRecord<NetPerfSet>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MinioHealthInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub config: ServerConfig,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub info: serde_json::Value,
}

/// Typed view of a cluster health report.
///
/// Fields this client does not model are ignored on decode; use the raw
/// document from the stream when the report must be kept intact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthInfo {
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sys: SysInfo,
    #[serde(default)]
    pub perf: PerfInfo,
    #[serde(default)]
    pub minio: MinioHealthInfo,
}

impl fmt::Display for HealthInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&data)
    }
}

/// Version and error prefix of a health report, read before the payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HealthInfoVersion {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl HealthInfoVersion {
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.is_empty())
    }

    pub fn is_supported(&self) -> bool {
        matches!(
            self.version.as_str(),
            HEALTH_INFO_VERSION_0 | HEALTH_INFO_VERSION
        )
    }
}

/// Category of health data a caller can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthDataType {
    PerfDrive,
    PerfNet,
    MinioInfo,
    MinioConfig,
    SysCpu,
    SysDriveHw,
    SysDocker,
    SysOsInfo,
    SysLoad,
    SysMem,
    SysNet,
    SysProcess,
}

impl HealthDataType {
    pub const ALL: [HealthDataType; 12] = [
        HealthDataType::PerfDrive,
        HealthDataType::PerfNet,
        HealthDataType::MinioInfo,
        HealthDataType::MinioConfig,
        HealthDataType::SysCpu,
        HealthDataType::SysDriveHw,
        HealthDataType::SysDocker,
        HealthDataType::SysOsInfo,
        HealthDataType::SysLoad,
        HealthDataType::SysMem,
        HealthDataType::SysNet,
        HealthDataType::SysProcess,
    ];

    pub fn iter() -> impl Iterator<Item = HealthDataType> {
        Self::ALL.into_iter()
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            HealthDataType::PerfDrive => "perfdrive",
            HealthDataType::PerfNet => "perfnet",
            HealthDataType::MinioInfo => "minioinfo",
            HealthDataType::MinioConfig => "minioconfig",
            HealthDataType::SysCpu => "syscpu",
            HealthDataType::SysDriveHw => "sysdrivehw",
            HealthDataType::SysDocker => "sysdocker",
            HealthDataType::SysOsInfo => "sysosinfo",
            HealthDataType::SysLoad => "sysload",
            HealthDataType::SysMem => "sysmem",
            HealthDataType::SysNet => "sysnet",
            HealthDataType::SysProcess => "sysprocess",
        }
    }
}

impl fmt::Display for HealthDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown health data type '{0}'")]
pub struct UnknownHealthDataType(pub String);

impl FromStr for HealthDataType {
    type Err = UnknownHealthDataType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownHealthDataType(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn all_types_are_unique_and_parse_back() {
        let names: HashSet<&str> = HealthDataType::iter().map(|t| t.as_str()).collect();
        assert_eq!(names.len(), 12);
        for t in HealthDataType::iter() {
            assert_eq!(t.as_str().parse::<HealthDataType>(), Ok(t));
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = "sysgpu".parse::<HealthDataType>().unwrap_err();
        assert_eq!(err, UnknownHealthDataType("sysgpu".to_string()));
        assert!(err.to_string().contains("sysgpu"));
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&HealthDataType::SysDriveHw).unwrap();
        assert_eq!(json, "\"sysdrivehw\"");
        let parsed: Vec<HealthDataType> =
            serde_json::from_str(r#"["minioconfig","sysosinfo"]"#).unwrap();
        assert_eq!(
            parsed,
            vec![HealthDataType::MinioConfig, HealthDataType::SysOsInfo]
        );
    }

    #[test]
    fn failed_record_serializes_without_payload() {
        let record: NodeRecord<MemInfo> = NodeRecord::failed("node1:9000", "no meminfo");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"addr": "node1:9000", "error": "no meminfo"})
        );
    }

    #[test]
    fn collected_record_is_flat_on_the_wire() {
        let record = NodeRecord::collected(
            "node1:9000",
            MemInfo {
                total: 16,
                available: 8,
                swap_space_total: 4,
                swap_space_free: 2,
            },
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["addr"], "node1:9000");
        assert_eq!(value["total"], 16);
        assert!(value.get("error").is_none());

        let back: NodeRecord<MemInfo> = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn record_with_error_decodes_as_failure() {
        let record: NodeRecord<OsInfo> = serde_json::from_str(
            r#"{"addr":"n2","error":"unsupported operating system darwin","info":{"hostname":""}}"#,
        )
        .unwrap();
        assert_eq!(
            record.outcome.error(),
            Some("unsupported operating system darwin")
        );
        assert!(record.outcome.collected().is_none());
    }

    #[test]
    fn health_info_decodes_server_report() {
        let text = r#"{
            "version": "1",
            "timestamp": "2021-03-04T05:06:07Z",
            "sys": {
                "cpus": [{"addr": "n1", "cpus": [{"vendor_id": "GenuineIntel", "cores": 8}]}],
                "partitions": [{"addr": "n1", "partitions": [
                    {"device": "/dev/sda1", "mountpoint": "/", "space_total": 100},
                    {"device": "/dev/sdb1", "error": "permission denied"}
                ]}],
                "meminfo": [{"addr": "n2", "error": "boom"}]
            },
            "perf": {
                "drives": [{"addr": "n1", "serial_perf": [{"path": "/data", "latency": {"avg": 0.5}}]}],
                "net_parallel": {"addr": "n1", "remote_peers": [{"addr": "n2", "throughput": {"avg": 10}}]}
            },
            "minio": {"config": {"config": {"region": "us-east-1"}}, "info": {"mode": "online"}}
        }"#;
        let info: HealthInfo = serde_json::from_str(text).unwrap();
        assert_eq!(info.version, "1");
        assert!(info.timestamp.is_some());

        let cpus = info.sys.cpus[0].outcome.collected().unwrap();
        assert_eq!(cpus.cpus[0].cores, 8);

        let parts = &info.sys.partitions[0].outcome.collected().unwrap().partitions;
        assert_eq!(parts[0].outcome.collected().unwrap().space_total, 100);
        assert_eq!(parts[1].outcome.error(), Some("permission denied"));

        assert_eq!(info.sys.meminfo[0].outcome.error(), Some("boom"));

        let drive = &info.perf.drives[0].outcome.collected().unwrap().serial_perf[0];
        assert_eq!(drive.path, "/data");
        assert_eq!(drive.outcome.collected().unwrap().latency.avg, 0.5);

        let peers = &info.perf.net_parallel.as_ref().unwrap().outcome;
        let peer = &peers.collected().unwrap().remote_peers[0];
        assert_eq!(peer.outcome.collected().unwrap().throughput.avg, 10);

        assert_eq!(info.minio.config.config["region"], "us-east-1");
        assert_eq!(info.minio.info["mode"], "online");
    }

    #[test]
    fn envelope_accepts_known_versions_only() {
        let v0: HealthInfoVersion = serde_json::from_str(r#"{"sys":{}}"#).unwrap();
        assert_eq!(v0.version, "");
        assert!(v0.is_supported());
        assert!(v0.error_message().is_none());

        let v1: HealthInfoVersion = serde_json::from_str(r#"{"version":"1","error":""}"#).unwrap();
        assert!(v1.is_supported());
        assert!(v1.error_message().is_none());

        let v2: HealthInfoVersion = serde_json::from_str(r#"{"version":"2"}"#).unwrap();
        assert!(!v2.is_supported());
    }

    #[test]
    fn display_is_compact_json() {
        let info = HealthInfo {
            version: HEALTH_INFO_VERSION.to_string(),
            ..HealthInfo::default()
        };
        let text = info.to_string();
        assert!(text.starts_with("{\"version\":\"1\""));
        assert!(!text.contains('\n'));
    }
}
