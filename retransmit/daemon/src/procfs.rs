//! Host CPU and memory statistics from procfs
//!
//! Reads the aggregate `cpu` line of `<proc>/stat` and a handful of
//! `<proc>/meminfo` keys. The proc root is a parameter so tests can point at
//! a fixture directory.

use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// USER_HZ assumed when converting jiffies to seconds
pub const CLOCK_TICKS_PER_SEC: f64 = 100.0;

#[derive(Error, Debug)]
pub enum ProcStatError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no aggregate cpu line in stat")]
    NoCpuLine,

    #[error("missing {field} in {file}")]
    MissingField {
        file: &'static str,
        field: &'static str,
    },

    #[error("invalid {field} value {value:?}")]
    InvalidValue { field: &'static str, value: String },
}

/// Cumulative CPU time in seconds, summed over all cores
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuUsage {
    pub user: f64,
    pub nice: f64,
    pub system: f64,
    pub idle: f64,
    pub io_wait: f64,
    pub irq: f64,
    pub soft_irq: f64,
    pub steal: f64,
    pub guest: f64,
    pub guest_nice: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuStat {
    pub total_usage: CpuUsage,
    pub logical_cores: usize,
}

impl CpuStat {
    /// Busy share of user plus system time against idle, in percent
    pub fn total_usage_percent(&self) -> f64 {
        let busy = self.total_usage.user + self.total_usage.system;
        let total = busy + self.total_usage.idle;
        if total == 0.0 {
            0.0
        } else {
            busy / total * 100.0
        }
    }

    /// One poll sample as printed by `machine-stats`
    pub fn sample(&self) -> CpuSample {
        CpuSample {
            total_usage_percent: self.total_usage_percent(),
            total_usage: self.total_usage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuSample {
    pub total_usage_percent: f64,
    pub total_usage: CpuUsage,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStat {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub available_bytes: u64,
    pub cached_bytes: u64,
}

/// Read `<proc_root>/stat`
pub fn cpu_stat(proc_root: &Path) -> Result<CpuStat, ProcStatError> {
    parse_cpu_stat(&read(&proc_root.join("stat"))?)
}

/// Read `<proc_root>/meminfo`
pub fn memory_stat(proc_root: &Path) -> Result<MemoryStat, ProcStatError> {
    parse_meminfo(&read(&proc_root.join("meminfo"))?)
}

fn read(path: &Path) -> Result<String, ProcStatError> {
    fs::read_to_string(path).map_err(|source| ProcStatError::Read {
        path: path.to_path_buf(),
        source,
    })
}

pub fn parse_cpu_stat(contents: &str) -> Result<CpuStat, ProcStatError> {
    const FIELDS: [&str; 10] = [
        "user",
        "nice",
        "system",
        "idle",
        "iowait",
        "irq",
        "softirq",
        "steal",
        "guest",
        "guest_nice",
    ];
    // Older kernels stop after steal or earlier; guest columns are optional.
    const REQUIRED: usize = 8;

    let mut aggregate = None;
    let mut logical_cores = 0;

    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("cpu ") {
            aggregate = Some(rest);
        } else if line
            .strip_prefix("cpu")
            .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
        {
            logical_cores += 1;
        }
    }

    let mut values = [0.0; 10];
    let mut columns = aggregate.ok_or(ProcStatError::NoCpuLine)?.split_whitespace();
    for (i, field) in FIELDS.into_iter().enumerate() {
        match columns.next() {
            Some(raw) => {
                let jiffies: u64 = raw.parse().map_err(|_| ProcStatError::InvalidValue {
                    field,
                    value: raw.to_string(),
                })?;
                values[i] = jiffies as f64 / CLOCK_TICKS_PER_SEC;
            }
            None if i < REQUIRED => {
                return Err(ProcStatError::MissingField {
                    file: "stat",
                    field,
                })
            }
            None => break,
        }
    }

    let [user, nice, system, idle, io_wait, irq, soft_irq, steal, guest, guest_nice] = values;
    Ok(CpuStat {
        total_usage: CpuUsage {
            user,
            nice,
            system,
            idle,
            io_wait,
            irq,
            soft_irq,
            steal,
            guest,
            guest_nice,
        },
        logical_cores,
    })
}

pub fn parse_meminfo(contents: &str) -> Result<MemoryStat, ProcStatError> {
    let mut total = None;
    let mut free = None;
    let mut available = None;
    let mut cached = None;

    for line in contents.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let (slot, field) = match key {
            "MemTotal" => (&mut total, "MemTotal"),
            "MemFree" => (&mut free, "MemFree"),
            "MemAvailable" => (&mut available, "MemAvailable"),
            "Cached" => (&mut cached, "Cached"),
            _ => continue,
        };
        *slot = Some(parse_meminfo_value(field, rest)?);
    }

    let require = |value: Option<u64>, field: &'static str| {
        value.ok_or(ProcStatError::MissingField {
            file: "meminfo",
            field,
        })
    };
    Ok(MemoryStat {
        total_bytes: require(total, "MemTotal")?,
        free_bytes: require(free, "MemFree")?,
        available_bytes: require(available, "MemAvailable")?,
        cached_bytes: require(cached, "Cached")?,
    })
}

fn parse_meminfo_value(field: &'static str, rest: &str) -> Result<u64, ProcStatError> {
    let invalid = || ProcStatError::InvalidValue {
        field,
        value: rest.trim().to_string(),
    };

    let mut parts = rest.split_whitespace();
    let amount: u64 = parts
        .next()
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(invalid)?;
    match parts.next() {
        Some("kB") => Ok(amount.saturating_mul(1024)),
        None => Ok(amount),
        Some(_) => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "\
cpu  10000 50 5000 85000 300 0 120 0 0 0
cpu0 5000 25 2500 42500 150 0 60 0 0 0
cpu1 5000 25 2500 42500 150 0 60 0 0 0
intr 123456 0 0
ctxt 987654
btime 1700000000
processes 4242
";

    const MEMINFO: &str = "\
MemTotal:       16384000 kB
MemFree:         2048000 kB
MemAvailable:    8192000 kB
Buffers:          512000 kB
Cached:          4096000 kB
SwapCached:            0 kB
";

    #[test]
    fn test_parse_cpu_stat() {
        let stat = parse_cpu_stat(STAT).unwrap();

        assert_eq!(stat.logical_cores, 2);
        assert_eq!(stat.total_usage.user, 100.0);
        assert_eq!(stat.total_usage.nice, 0.5);
        assert_eq!(stat.total_usage.system, 50.0);
        assert_eq!(stat.total_usage.idle, 850.0);
        assert_eq!(stat.total_usage.soft_irq, 1.2);
    }

    #[test]
    fn test_total_usage_percent() {
        let stat = parse_cpu_stat(STAT).unwrap();
        // (100 + 50) / (100 + 50 + 850)
        assert!((stat.total_usage_percent() - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_idle_machine_reports_zero() {
        assert_eq!(CpuStat::default().total_usage_percent(), 0.0);
    }

    #[test]
    fn test_old_kernel_without_guest_columns() {
        let stat = parse_cpu_stat("cpu  1 2 3 4 5 6 7 8\ncpu0 1 2 3 4 5 6 7 8\n").unwrap();
        assert_eq!(stat.total_usage.steal, 0.08);
        assert_eq!(stat.total_usage.guest, 0.0);
    }

    #[test]
    fn test_cpu_stat_errors() {
        assert!(matches!(
            parse_cpu_stat("intr 1 2 3\n"),
            Err(ProcStatError::NoCpuLine)
        ));
        assert!(matches!(
            parse_cpu_stat("cpu  1 2 3\n"),
            Err(ProcStatError::MissingField { field: "idle", .. })
        ));
        assert!(matches!(
            parse_cpu_stat("cpu  1 2 x 4 5 6 7 8\n"),
            Err(ProcStatError::InvalidValue { field: "system", .. })
        ));
    }

    #[test]
    fn test_sample_json_shape() {
        let sample = parse_cpu_stat(STAT).unwrap().sample();
        let value = serde_json::to_value(sample).unwrap();

        assert_eq!(value["totalUsagePercent"], 15.0);
        assert_eq!(value["totalUsage"]["ioWait"], 3.0);
        assert_eq!(value["totalUsage"]["softIrq"], 1.2);
    }

    #[test]
    fn test_parse_meminfo() {
        let mem = parse_meminfo(MEMINFO).unwrap();

        assert_eq!(mem.total_bytes, 16_384_000 * 1024);
        assert_eq!(mem.free_bytes, 2_048_000 * 1024);
        assert_eq!(mem.available_bytes, 8_192_000 * 1024);
        assert_eq!(mem.cached_bytes, 4_096_000 * 1024);
    }

    #[test]
    fn test_meminfo_missing_key() {
        let err = parse_meminfo("MemTotal: 1 kB\nMemFree: 1 kB\n").unwrap_err();
        assert!(matches!(
            err,
            ProcStatError::MissingField { field: "MemAvailable", .. }
        ));
    }

    #[test]
    fn test_meminfo_bad_value() {
        assert!(matches!(
            parse_meminfo("MemTotal: lots kB\n"),
            Err(ProcStatError::InvalidValue { field: "MemTotal", .. })
        ));
    }

    #[test]
    fn test_missing_proc_root() {
        assert!(matches!(
            cpu_stat(Path::new("/nonexistent-proc")),
            Err(ProcStatError::Read { .. })
        ));
    }
}
