use tracing::instrument;

use crate::wireguard::{config, ServerRecord};

use super::{Gateway, Operator, ServiceError};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemoryInfo {
    pub total_kb: u64,
    pub available_kb: u64,
}

impl MemoryInfo {
    pub fn used_kb(&self) -> u64 {
        self.total_kb.saturating_sub(self.available_kb)
    }

    pub fn usage_percent(&self) -> f64 {
        if self.total_kb == 0 {
            return 0.0;
        }
        self.used_kb() as f64 / self.total_kb as f64 * 100.0
    }
}

/// Host information read from `/proc`; every field is best effort.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemInfo {
    pub uptime_secs: Option<u64>,
    pub memory: Option<MemoryInfo>,
    pub load_avg: Option<[String; 3]>,
}

impl SystemInfo {
    pub async fn read() -> Self {
        let read = |path: &'static str| async move { tokio::fs::read_to_string(path).await.ok() };
        Self {
            uptime_secs: read("/proc/uptime").await.as_deref().and_then(parse_uptime),
            memory: read("/proc/meminfo").await.as_deref().and_then(parse_meminfo),
            load_avg: read("/proc/loadavg").await.as_deref().and_then(parse_loadavg),
        }
    }
}

fn parse_uptime(s: &str) -> Option<u64> {
    let secs: f64 = s.split_whitespace().next()?.parse().ok()?;
    Some(secs as u64)
}

fn parse_meminfo(s: &str) -> Option<MemoryInfo> {
    let field = |name: &str| {
        s.lines()
            .find_map(|l| l.strip_prefix(name))
            .and_then(|rest| rest.trim_start_matches(':').split_whitespace().next())
            .and_then(|v| v.parse::<u64>().ok())
    };
    Some(MemoryInfo {
        total_kb: field("MemTotal")?,
        available_kb: field("MemAvailable")?,
    })
}

fn parse_loadavg(s: &str) -> Option<[String; 3]> {
    let mut it = s.split_whitespace().map(str::to_owned);
    Some([it.next()?, it.next()?, it.next()?])
}

#[derive(Debug, Clone, Default)]
pub struct ServerStatus {
    pub installed: bool,
    /// `None` when not installed.
    pub server: Option<ServerRecord>,
    pub parsed_peers: usize,
    pub system: SystemInfo,
}

impl ServerStatus {
    /// More peer markers than parsed peers means the config is damaged.
    pub fn corrupted(&self) -> bool {
        self.server
            .as_ref()
            .map_or(false, |s| s.peer_count != self.parsed_peers)
    }
}

impl Gateway {
    pub fn is_installed(&self) -> bool {
        self.settings.config_path.exists() && self.settings.script_path.exists()
    }

    #[instrument(skip(self))]
    pub async fn server_status(&self, operator: &Operator) -> Result<ServerStatus, ServiceError> {
        if !operator.authorized {
            return Err(ServiceError::AccessDenied);
        }

        let mut status = ServerStatus {
            installed: self.is_installed(),
            system: SystemInfo::read().await,
            ..Default::default()
        };
        if status.installed {
            let parsed = config::read(&self.settings.config_path).await?;
            status.parsed_peers = parsed.peers.len();
            status.server = Some(parsed.server);
        }
        Ok(status)
    }
}
