//! Host CPU and network sampling from `/proc`.
//!
//! Both figures are deltas between consecutive samples. Hosts without the
//! `/proc` files report zeros.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

/// The busiest interface is re-detected after this long.
const IFACE_REDETECT: Duration = Duration::from_secs(60);

const IGNORED_IFACE_PREFIXES: [&str; 3] = ["docker", "br-", "loopback"];

/// One monitor sample, as served by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStats {
    /// CPU busy percentage, 0..=100.
    pub cpu: u8,
    /// Throughput of `net_iface` in bytes per second.
    pub net: u64,
    pub net_formatted: String,
    pub net_iface: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct CpuTimes {
    idle: u64,
    total: u64,
}

/// Stateful sampler; each call to [`sample`](Self::sample) reports the
/// change since the previous call.
#[derive(Debug)]
pub struct Monitor {
    proc_root: PathBuf,
    prev_cpu: CpuTimes,
    prev_net: Option<(u64, Instant)>,
    iface: Option<(String, Instant)>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    pub fn new() -> Self {
        Self::with_proc_root("/proc")
    }

    /// Sampler reading `stat` and `net/dev` below `proc_root`.
    pub fn with_proc_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            prev_cpu: CpuTimes::default(),
            prev_net: None,
            iface: None,
        }
    }

    pub fn sample(&mut self) -> MonitorStats {
        self.sample_at(Instant::now())
    }

    pub fn sample_at(&mut self, now: Instant) -> MonitorStats {
        let cpu = self.sample_cpu();
        let (net, net_iface) = self.sample_net(now);
        MonitorStats {
            cpu,
            net,
            net_formatted: format_rate(net),
            net_iface,
        }
    }

    fn read(&self, rel: &str) -> Option<String> {
        std::fs::read_to_string(self.proc_root.join(rel))
            .inspect_err(|e| debug!(file = rel, error = %e, "Monitor source unreadable"))
            .ok()
    }

    fn sample_cpu(&mut self) -> u8 {
        let Some(times) = self.read("stat").as_deref().and_then(parse_cpu_times) else {
            return 0;
        };
        let idle = times.idle.saturating_sub(self.prev_cpu.idle);
        let total = times.total.saturating_sub(self.prev_cpu.total);
        self.prev_cpu = times;
        busy_percent(idle, total)
    }

    fn sample_net(&mut self, now: Instant) -> (u64, Option<String>) {
        let Some(dev) = self.read("net/dev") else {
            return (0, None);
        };
        let counters = parse_net_dev(&dev);

        if self
            .iface
            .as_ref()
            .is_none_or(|(_, at)| now.saturating_duration_since(*at) >= IFACE_REDETECT)
        {
            self.iface = busiest_interface(&counters).map(|name| (name, now));
        }
        let Some((iface, _)) = self.iface.clone() else {
            return (0, None);
        };
        let bytes = counters
            .iter()
            .find(|(name, _)| *name == iface)
            .map_or(0, |&(_, total)| total);

        let rate = match self.prev_net.replace((bytes, now)) {
            Some((prev_bytes, prev_at)) => {
                rate_per_sec(bytes.saturating_sub(prev_bytes), now.saturating_duration_since(prev_at))
            }
            None => 0,
        };
        (rate, Some(iface))
    }
}

/// Aggregate `cpu` line of `/proc/stat`. Idle includes iowait.
fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .map(|f| f.parse().unwrap_or(0))
        .collect();
    if fields.len() < 4 {
        return None;
    }
    Some(CpuTimes {
        idle: fields[3] + fields.get(4).copied().unwrap_or(0),
        total: fields.iter().sum(),
    })
}

/// `(interface, rx_bytes + tx_bytes)` per line of `/proc/net/dev`.
fn parse_net_dev(dev: &str) -> Vec<(String, u64)> {
    dev.lines()
        .skip(2)
        .filter_map(|line| {
            let (name, rest) = line.split_once(':')?;
            let fields: Vec<u64> = rest
                .split_whitespace()
                .map(|f| f.parse().unwrap_or(0))
                .collect();
            let rx = fields.first().copied().unwrap_or(0);
            let tx = fields.get(8).copied().unwrap_or(0);
            Some((name.trim().to_string(), rx + tx))
        })
        .collect()
}

fn busiest_interface(counters: &[(String, u64)]) -> Option<String> {
    counters
        .iter()
        .filter(|(name, total)| {
            *total > 0
                && name != "lo"
                && !IGNORED_IFACE_PREFIXES.iter().any(|p| name.starts_with(p))
        })
        .max_by_key(|(_, total)| *total)
        .map(|(name, _)| name.clone())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn busy_percent(idle: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let busy = 1.0 - idle as f64 / total as f64;
    (busy * 100.0).round().clamp(0.0, 100.0) as u8
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn rate_per_sec(bytes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0;
    }
    (bytes as f64 / secs).round() as u64
}

/// `512 B/s`, `1.5 KB/s`, `2.0 MB/s`.
#[allow(clippy::cast_precision_loss)]
pub fn format_rate(bytes_per_sec: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    if bytes_per_sec < KIB {
        format!("{bytes_per_sec} B/s")
    } else if bytes_per_sec < MIB {
        format!("{:.1} KB/s", bytes_per_sec as f64 / KIB as f64)
    } else {
        format!("{:.1} MB/s", bytes_per_sec as f64 / MIB as f64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::Path;

    use super::*;

    const NET_DEV: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 9000000     100    0    0    0     0          0         0  9000000     100    0    0    0     0       0          0
docker0: 5000000     10    0    0    0     0          0         0  5000000      10    0    0    0     0       0          0
  eth0: 1000000     500    0    0    0     0          0         0   200000     300    0    0    0     0       0          0
 wlan0:    4000      20    0    0    0     0          0         0     1000      10    0    0    0     0       0          0
";

    fn write_proc(root: &Path, stat: &str, net_dev: &str) {
        std::fs::create_dir_all(root.join("net")).unwrap();
        std::fs::write(root.join("stat"), stat).unwrap();
        std::fs::write(root.join("net/dev"), net_dev).unwrap();
    }

    #[test]
    fn formats_rates() {
        assert_eq!(format_rate(0), "0 B/s");
        assert_eq!(format_rate(1023), "1023 B/s");
        assert_eq!(format_rate(1536), "1.5 KB/s");
        assert_eq!(format_rate(3 * 1024 * 1024 / 2), "1.5 MB/s");
    }

    #[test]
    fn parses_aggregate_cpu_line() {
        let stat = "cpu  100 0 50 800 50 0 0 0 0 0\ncpu0 50 0 25 400 25 0 0 0 0 0\n";
        assert_eq!(
            parse_cpu_times(stat),
            Some(CpuTimes {
                idle: 850,
                total: 1000
            })
        );
        assert_eq!(parse_cpu_times("intr 1 2 3"), None);
    }

    #[test]
    fn picks_busiest_real_interface() {
        let counters = parse_net_dev(NET_DEV);
        assert_eq!(counters.len(), 4);
        assert_eq!(busiest_interface(&counters).as_deref(), Some("eth0"));
    }

    #[test]
    fn samples_are_deltas() {
        let dir = tempfile::tempdir().unwrap();
        write_proc(dir.path(), "cpu  100 0 100 800 0 0 0 0\n", NET_DEV);
        let mut monitor = Monitor::with_proc_root(dir.path());
        let t0 = Instant::now();

        let first = monitor.sample_at(t0);
        assert_eq!(first.cpu, 20);
        assert_eq!(first.net, 0);
        assert_eq!(first.net_iface.as_deref(), Some("eth0"));

        let busier = NET_DEV.replace("  eth0: 1000000", "  eth0: 1002048");
        write_proc(dir.path(), "cpu  150 0 150 900 0 0 0 0\n", &busier);
        let second = monitor.sample_at(t0 + Duration::from_secs(2));
        assert_eq!(second.cpu, 50);
        assert_eq!(second.net, 1024);
        assert_eq!(second.net_formatted, "1.0 KB/s");
    }

    #[test]
    fn missing_proc_reports_zeros() {
        let mut monitor = Monitor::with_proc_root("/nonexistent/proc");
        let stats = monitor.sample();
        assert_eq!(stats.cpu, 0);
        assert_eq!(stats.net, 0);
        assert_eq!(stats.net_formatted, "0 B/s");
        assert_eq!(stats.net_iface, None);
    }
}
