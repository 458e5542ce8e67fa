use super::topology::NodeView;
use chrono::{DateTime, Local};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Write,
    Read,
}

impl ProbeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProbeKind::Write => "write",
            ProbeKind::Read => "read",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Running counters kept by the probe loop.
#[derive(Debug, Clone)]
pub struct ProbeStats {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Successful connections after the first one.
    pub reconnects: u64,
    pub started_at: DateTime<Local>,
    pub last_view: Option<NodeView>,
}

impl ProbeStats {
    pub fn new() -> Self {
        Self {
            total: 0,
            succeeded: 0,
            failed: 0,
            reconnects: 0,
            started_at: Local::now(),
            last_view: None,
        }
    }

    /// Percentage of successful iterations; 0 when nothing ran.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.succeeded as f64 * 100.0 / self.total as f64
    }
}

impl Default for ProbeStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary printed when the operator stops a probe.
pub struct Report<'a> {
    pub kind: ProbeKind,
    pub stats: &'a ProbeStats,
    pub elapsed: Duration,
    pub ended_at: DateTime<Local>,
}

impl Report<'_> {
    /// Writers report committed rows per second, readers report attempts per second.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        let count = match self.kind {
            ProbeKind::Write => self.stats.succeeded,
            ProbeKind::Read => self.stats.total,
        };
        count as f64 / secs
    }

    fn throughput_unit(&self) -> &'static str {
        match self.kind {
            ProbeKind::Write => "rows/s",
            ProbeKind::Read => "reads/s",
        }
    }
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const RULE: &str = "========================================";
        const THIN: &str = "----------------------------------------";
        let s = self.stats;
        let (last_node, last_standby) = match &s.last_view {
            Some(view) => (
                view.role.to_string(),
                format!("{} (state: {})", view.standby, view.sync_state),
            ),
            None => ("unknown".to_string(), "unknown".to_string()),
        };

        writeln!(f, "{RULE}")?;
        writeln!(f, "  primary/standby failover {} probe", self.kind)?;
        writeln!(f, "{RULE}")?;
        writeln!(f, "{:<14}: {}", "started", s.started_at.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f, "{:<14}: {}", "ended", self.ended_at.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f, "{:<14}: {:.2} s", "duration", self.elapsed.as_secs_f64())?;
        writeln!(f, "{:<14}: {}", "reconnects", s.reconnects)?;
        writeln!(f, "{:<14}: {}", "last node", last_node)?;
        writeln!(f, "{THIN}")?;
        writeln!(f, "{:<14}: {}", "iterations", s.total)?;
        writeln!(f, "{:<14}: {}", "succeeded", s.succeeded)?;
        writeln!(f, "{:<14}: {}", "failed", s.failed)?;
        writeln!(f, "{:<14}: {:.2}%", "success rate", s.success_rate())?;
        writeln!(
            f,
            "{:<14}: {:.2} {}",
            "throughput",
            self.throughput(),
            self.throughput_unit()
        )?;
        writeln!(f, "{:<14}: {}", "last standby", last_standby)?;
        write!(f, "{RULE}")
    }
}
