use std::path::{Path, PathBuf};

use cidr::IpInet;
use thiserror::Error;
use tracing::{instrument, warn};

const PEER_MARKER: &str = "# BEGIN_PEER";
const PEER_END_MARKER: &str = "# END_PEER";
const ENDPOINT_MARKER: &str = "# ENDPOINT";

#[derive(Debug, Error)]
#[error("can't read {path}: {source}")]
pub struct ParseError {
    pub path: PathBuf,
    pub source: std::io::Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerRecord {
    pub endpoint: Option<String>,
    pub listen_port: Option<u16>,
    pub address: Option<String>,
    /// Number of peer markers in the file, counted independently of parsing.
    pub peer_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    pub name: String,
    pub public_key: String,
    pub allowed_ips: Vec<IpInet>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedConfig {
    pub server: ServerRecord,
    pub peers: Vec<PeerEntry>,
}

impl ParsedConfig {
    /// `false` when some peer blocks were dropped as malformed.
    pub fn is_consistent(&self) -> bool {
        self.server.peer_count == self.peers.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.peers.iter().any(|p| p.name == name)
    }
}

#[derive(Default)]
struct PeerBlock {
    name: String,
    line: usize,
    in_peer_section: bool,
    public_key: Option<String>,
    allowed_ips: Option<String>,
}

impl PeerBlock {
    fn finish(self) -> Option<PeerEntry> {
        let reject = |reason: &str| {
            warn!(
                "skipping malformed peer block '{name}' at line {line}: {reason}",
                name = self.name,
                line = self.line
            );
            None
        };

        if self.name.is_empty() {
            return reject("empty name");
        }
        if !self.in_peer_section {
            return reject("no [Peer] section");
        }
        let Some(public_key) = self.public_key.as_deref().filter(|k| !k.is_empty()) else {
            return reject("missing PublicKey");
        };
        let Some(allowed_ips) = self.allowed_ips.as_deref() else {
            return reject("missing AllowedIPs");
        };
        let allowed_ips = match allowed_ips
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse::<IpInet>)
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(ips) if !ips.is_empty() => ips,
            Ok(_) => return reject("empty AllowedIPs"),
            Err(e) => return reject(&format!("bad AllowedIPs: {e}")),
        };

        Some(PeerEntry {
            name: self.name.clone(),
            public_key: public_key.to_owned(),
            allowed_ips,
        })
    }
}

fn key_value(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    Some((key.trim(), value.trim()))
}

/// Best-effort parse of the server configuration. Never fails: malformed peer
/// blocks are logged and left out of `peers`.
pub fn parse(text: &str) -> ParsedConfig {
    let mut server = ServerRecord::default();
    let mut peers = Vec::new();
    let mut current: Option<PeerBlock> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();

        if let Some(rest) = line.strip_prefix(PEER_MARKER) {
            server.peer_count += 1;
            if let Some(block) = current.take() {
                peers.extend(block.finish());
            }
            current = Some(PeerBlock {
                name: rest.trim().to_owned(),
                line: idx + 1,
                ..Default::default()
            });
            continue;
        }

        if line.starts_with(PEER_END_MARKER) {
            if let Some(block) = current.take() {
                peers.extend(block.finish());
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix(ENDPOINT_MARKER) {
            if server.endpoint.is_none() && !rest.trim().is_empty() {
                server.endpoint = Some(rest.trim().to_owned());
            }
            continue;
        }

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match current.as_mut() {
            Some(block) => {
                if line.eq_ignore_ascii_case("[Peer]") {
                    block.in_peer_section = true;
                } else if let Some((key, value)) = key_value(line) {
                    match key {
                        "PublicKey" => block.public_key = Some(value.to_owned()),
                        "AllowedIPs" => block.allowed_ips = Some(value.to_owned()),
                        _ => {}
                    }
                }
            }
            None => {
                if let Some((key, value)) = key_value(line) {
                    match key {
                        "ListenPort" if server.listen_port.is_none() => {
                            server.listen_port = value.parse().ok()
                        }
                        "Address" if server.address.is_none() => {
                            server.address = Some(value.to_owned())
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    if let Some(block) = current.take() {
        peers.extend(block.finish());
    }

    ParsedConfig { server, peers }
}

#[instrument]
pub async fn read(path: &Path) -> Result<ParsedConfig, ParseError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ParseError {
            path: path.to_owned(),
            source,
        })?;
    let parsed = parse(&text);
    if !parsed.is_consistent() {
        warn!(
            "{path} has {markers} peer markers but only {parsed} valid peers",
            path = path.display(),
            markers = parsed.server.peer_count,
            parsed = parsed.peers.len()
        );
    }
    Ok(parsed)
}
