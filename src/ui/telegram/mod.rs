mod admin;
mod clients;
mod help;

use cidr::IpInet;
use clap::Parser;
use teloxide::{
    adaptors::DefaultParseMode,
    prelude::*,
    types::UpdateKind,
    utils::markdown::{bold, escape},
};

use std::{error::Error, fmt::Write, sync::Arc};

use crate::{
    service::{
        AddedClient, BackupReport, ConnectionStats, Gateway, Operator, OperatorInfo,
        OperatorQuota, PeerRecord, ServerStatus, ServiceError, UNLIMITED,
    },
    utils::{format_bytes, format_duration},
};

pub(crate) type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;

pub enum Answer {
    Success(String),
    Added(AddedClient),
    Peers(Vec<PeerRecord>),
    Stats(ConnectionStats),
    Status(ServerStatus),
    Backup(BackupReport),
    Operators(Vec<OperatorInfo>),
    Quota(i64, OperatorQuota),
    Error(String),
}

macro_rules! answer_from {
    ($ty:ty, $variant:ident) => {
        impl From<Result<$ty, ServiceError>> for Answer {
            fn from(r: Result<$ty, ServiceError>) -> Self {
                match r {
                    Ok(v) => Self::$variant(v),
                    Err(e) => Self::Error(e.to_string()),
                }
            }
        }
    };
}

answer_from!(AddedClient, Added);
answer_from!(Vec<PeerRecord>, Peers);
answer_from!(ConnectionStats, Stats);
answer_from!(ServerStatus, Status);
answer_from!(BackupReport, Backup);
answer_from!(Vec<OperatorInfo>, Operators);

impl Answer {
    pub fn ok(r: Result<impl std::fmt::Display, ServiceError>) -> Self {
        match r {
            Ok(msg) => Self::Success(msg.to_string()),
            Err(e) => Self::Error(e.to_string()),
        }
    }

    pub fn to_msg(&self) -> String {
        match self {
            Answer::Success(msg) => format!("✅ {}", escape(msg)),
            Answer::Error(e) => format!("❌ Error: {}", escape(e)),
            Answer::Added(added) => match &added.profile {
                Some(_) => format!("✅ Client {} created", bold(&escape(&added.name))),
                None => format!(
                    "⚠️ Client {} created but its config file was not found",
                    bold(&escape(&added.name))
                ),
            },
            Answer::Peers(peers) => {
                if peers.is_empty() {
                    return "No clients configured\\.".to_owned();
                }
                let mut res = format!("{}\n", bold("Clients:"));
                for p in peers {
                    let _ = writeln!(
                        res,
                        "{mark} {name} \\- {ips}{file}",
                        mark = if p.status.connected { "🟢" } else { "⚪" },
                        name = escape(&p.name),
                        ips = escape(&cidr_list(&p.allowed_ips)),
                        file = if p.config_file_exists() { "" } else { " \\(no file\\)" },
                    );
                }
                res
            }
            Answer::Stats(stats) => {
                let mut res = format!(
                    "{}\nClients: {}\nConnected: {}\nTotal: ↓{} ↑{}\n",
                    bold("Connection stats"),
                    stats.total_clients,
                    stats.connected_clients,
                    escape(&format_bytes(stats.total_transfer.rx)),
                    escape(&format_bytes(stats.total_transfer.tx)),
                );
                let now = time::OffsetDateTime::now_utc().unix_timestamp();
                for c in stats.clients.iter().filter(|c| c.status.connected) {
                    let handshake = c
                        .status
                        .last_handshake
                        .map(|t| format!("{} ago", format_duration(now.saturating_sub(t).max(0) as u64)))
                        .unwrap_or_else(|| "never".to_owned());
                    let transfer = c
                        .status
                        .transfer
                        .map(|t| format!("↓{} ↑{}", format_bytes(t.rx), format_bytes(t.tx)))
                        .unwrap_or_default();
                    let _ = writeln!(
                        res,
                        "\t{} \\- {} {}",
                        escape(&c.name),
                        escape(&handshake),
                        escape(&transfer)
                    );
                }
                res
            }
            Answer::Status(status) => {
                let mut res = format!("{}\n", bold("Server status"));
                let _ = writeln!(
                    res,
                    "WireGuard: {}",
                    if status.installed { "installed" } else { "not installed" }
                );
                if let Some(server) = &status.server {
                    let field = |v: Option<String>| escape(&v.unwrap_or_else(|| "unknown".into()));
                    let _ = writeln!(res, "Endpoint: {}", field(server.endpoint.clone()));
                    let _ = writeln!(res, "Port: {}", field(server.listen_port.map(|p| p.to_string())));
                    let _ = writeln!(res, "Address: {}", field(server.address.clone()));
                    let _ = writeln!(res, "Clients: {}", status.parsed_peers);
                    if status.corrupted() {
                        let _ = writeln!(
                            res,
                            "⚠️ {} peer blocks found, {} readable",
                            server.peer_count, status.parsed_peers
                        );
                    }
                }
                if let Some(up) = status.system.uptime_secs {
                    let _ = writeln!(res, "Uptime: {}", escape(&format_duration(up)));
                }
                if let Some(mem) = status.system.memory {
                    let _ = writeln!(
                        res,
                        "Memory: {} / {} \\({}%\\)",
                        escape(&format_bytes(mem.used_kb() * 1024)),
                        escape(&format_bytes(mem.total_kb * 1024)),
                        escape(&format!("{:.1}", mem.usage_percent()))
                    );
                }
                if let Some(load) = &status.system.load_avg {
                    let _ = writeln!(res, "Load: {}", escape(&load.join(" ")));
                }
                res
            }
            Answer::Backup(report) => {
                let mut res = format!(
                    "✅ Backup created with {} client configs",
                    report.included.len()
                );
                if !report.omitted.is_empty() {
                    let _ = write!(
                        res,
                        "\n⚠️ Missing config files: {}",
                        escape(&report.omitted.join(", "))
                    );
                }
                res
            }
            Answer::Operators(ops) => {
                let mut res = format!("{}\n", bold("Authorized users:"));
                for info in ops {
                    let _ = writeln!(
                        res,
                        "{} {}{} \\- {}",
                        if info.operator.is_owner { "👑" } else { "👤" },
                        escape(&info.operator.id.to_string()),
                        info.operator
                            .username
                            .as_deref()
                            .map(|u| format!(" @{}", escape(u)))
                            .unwrap_or_default(),
                        quota_summary(&info.quota)
                    );
                }
                res
            }
            Answer::Quota(id, quota) => format!(
                "Limits for {}: {}",
                escape(&id.to_string()),
                quota_summary(quota)
            ),
        }
    }
}

/// Allowed IPs with their prefix length, host routes included.
fn cidr_list(ips: &[IpInet]) -> String {
    ips.iter()
        .map(|ip| format!("{ip:#}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn quota_summary(q: &OperatorQuota) -> String {
    let limit = |v: i64| {
        if v == UNLIMITED {
            "∞".to_owned()
        } else {
            v.to_string()
        }
    };
    let flag = |b: bool| if b { "✓" } else { "✗" };
    escape(&format!(
        "clients {}, rate {}/min, backup {}, stats {}, manage {}",
        limit(q.max_clients),
        limit(q.rate_limit),
        flag(q.can_backup),
        flag(q.can_view_stats),
        flag(q.can_manage_clients),
    ))
}

async fn get_operator(upd: Update, service: Arc<Gateway>) -> Option<Operator> {
    let chat = upd.chat()?;
    match service.operator(chat.id.0).await {
        Ok(op) => Some(op),
        Err(e) => {
            tracing::warn!("operator lookup for {} failed: {e}", chat.id.0);
            None
        }
    }
}

async fn deny(bot: DefaultParseMode<Bot>, msg: Message) -> HandlerResult {
    bot.send_message(
        msg.chat.id,
        "❌ *Access Denied*\n\nYou are not authorized to use this bot\\.",
    )
    .await?;
    Ok(())
}

#[derive(Debug, Parser)]
pub struct Config {
    #[clap(long, short, env = "BOT_TOKEN", value_parser)]
    token: String,
}

pub async fn start(config: Config, service: Gateway) -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing::info!("Starting command bot...");

    let bot = Bot::new(config.token).parse_mode(teloxide::types::ParseMode::MarkdownV2);

    let ignore_update = |upd: Arc<Update>| {
        Box::pin(async move {
            if let UpdateKind::Message(msg) = &upd.kind {
                tracing::debug!("unhandled message in chat {}", msg.chat.id.0);
            }
        })
    };

    Dispatcher::builder(
        bot,
        dptree::entry()
            .filter_map_async(get_operator)
            .branch(
                Update::filter_message()
                    .filter(|op: Operator| !op.authorized)
                    .endpoint(deny),
            )
            .branch(help::entry())
            .branch(clients::entry())
            .branch(admin::entry()),
    )
    .dependencies(dptree::deps![Arc::new(service)])
    .default_handler(ignore_update)
    .build()
    .dispatch()
    .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::service::PeerStatus;

    fn peer(ips: &[&str]) -> PeerRecord {
        PeerRecord {
            name: "alice".to_owned(),
            public_key: "KA=".to_owned(),
            allowed_ips: ips.iter().map(|ip| ip.parse().unwrap()).collect(),
            profile: Some(PathBuf::from("/root/alice.conf")),
            owner_id: None,
            status: PeerStatus::default(),
        }
    }

    #[test]
    fn host_routes_keep_their_prefix() {
        let p = peer(&["10.7.0.2/32", "fddd:2c4:2c4:2c4::2/128"]);
        assert_eq!(
            cidr_list(&p.allowed_ips),
            "10.7.0.2/32, fddd:2c4:2c4:2c4::2/128"
        );

        let msg = Answer::Peers(vec![p]).to_msg();
        assert!(msg.contains("10\\.7\\.0\\.2/32"), "{msg}");
    }

    #[test]
    fn negative_ids_are_escaped() {
        let msg = Answer::Quota(-100, OperatorQuota::default()).to_msg();
        assert!(msg.starts_with("Limits for \\-100:"), "{msg}");
    }
}
