use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    command::{self, CommandError},
    traits::StatusSource,
};

const DUMP_FIELDS: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transfer {
    pub rx: u64,
    pub tx: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveStatus {
    /// Unix seconds; `None` when the daemon reports no handshake yet.
    pub last_handshake: Option<i64>,
    pub transfer: Transfer,
}

/// Parses `wg show <iface> dump` output into `public key -> live status`.
///
/// The first line describes the interface itself and is skipped, as is any
/// line without exactly eight tab separated fields.
pub fn parse_dump(dump: &str) -> HashMap<String, LiveStatus> {
    let mut res = HashMap::new();

    for line in dump.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != DUMP_FIELDS {
            debug!("skip dump line with {} fields", fields.len());
            continue;
        }
        let (Ok(handshake), Ok(rx), Ok(tx)) = (
            fields[4].parse::<i64>(),
            fields[5].parse::<u64>(),
            fields[6].parse::<u64>(),
        ) else {
            debug!("skip dump line with non-numeric counters");
            continue;
        };

        res.insert(
            fields[0].to_owned(),
            LiveStatus {
                last_handshake: (handshake != 0).then_some(handshake),
                transfer: Transfer { rx, tx },
            },
        );
    }

    res
}

/// Queries the daemon; any failure degrades to an empty mapping.
pub async fn probe(source: &dyn StatusSource) -> HashMap<String, LiveStatus> {
    match source.dump().await {
        Ok(dump) => parse_dump(&dump),
        Err(e) => {
            warn!("status query failed, treating all peers as disconnected: {e}");
            HashMap::new()
        }
    }
}

#[derive(Debug, Error)]
pub enum StatusError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("wg exited with {0:?}: {1}")]
    Exit(Option<i32>, String),
}

/// Live status through the `wg` command line tool.
pub struct WgShow {
    interface: String,
    timeout: Duration,
}

impl WgShow {
    pub fn new(interface: String, timeout: Duration) -> Self {
        Self { interface, timeout }
    }
}

#[async_trait]
impl StatusSource for WgShow {
    async fn dump(&self) -> Result<String, StatusError> {
        let out = command::run("wg", ["show", self.interface.as_str(), "dump"], self.timeout).await?;
        if !out.success() {
            return Err(StatusError::Exit(out.code, out.diagnostic()));
        }
        Ok(out.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "cHJpdg==\tcHVi\t51820\toff
KA=\t(none)\t203.0.113.5:41000\t10.7.0.2/32\t1700000000\t100\t200\toff
KB=\t(none)\t(none)\t10.7.0.3/32\t0\t0\t0\toff
broken\tline
";

    #[test]
    fn skips_header_and_short_lines() {
        let status = parse_dump(DUMP);
        assert_eq!(status.len(), 2);
        assert!(!status.contains_key("cHJpdg=="));

        let ka = status["KA="];
        assert_eq!(ka.last_handshake, Some(1_700_000_000));
        assert_eq!(ka.transfer, Transfer { rx: 100, tx: 200 });

        let kb = status["KB="];
        assert_eq!(kb.last_handshake, None);
    }

    #[test]
    fn empty_dump_is_empty_mapping() {
        assert!(parse_dump("").is_empty());
        assert!(parse_dump("only-the-interface-line\ta\tb\tc").is_empty());
    }

    struct Failing;

    #[async_trait]
    impl StatusSource for Failing {
        async fn dump(&self) -> Result<String, StatusError> {
            Err(StatusError::Exit(Some(1), "Unable to access interface".into()))
        }
    }

    #[tokio::test]
    async fn failed_query_degrades_to_empty() {
        assert!(probe(&Failing).await.is_empty());
    }
}
