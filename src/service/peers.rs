use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
};

use cidr::IpInet;
use tracing::{instrument, warn};

use crate::wireguard::{
    config, status, LiveStatus, ParsedConfig, PeerEntry, ProfileLocator, Transfer,
};

use super::{Action, Gateway, Operator, ServiceError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerStatus {
    pub connected: bool,
    pub last_handshake: Option<i64>,
    pub transfer: Option<Transfer>,
}

impl From<Option<&LiveStatus>> for PeerStatus {
    fn from(live: Option<&LiveStatus>) -> Self {
        match live {
            Some(live) => Self {
                connected: true,
                last_handshake: live.last_handshake,
                transfer: (live.transfer != Transfer::default()).then_some(live.transfer),
            },
            None => Self::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub name: String,
    pub public_key: String,
    pub allowed_ips: Vec<IpInet>,
    pub profile: Option<PathBuf>,
    pub owner_id: Option<i64>,
    pub status: PeerStatus,
}

impl PeerRecord {
    pub fn config_file_exists(&self) -> bool {
        self.profile.is_some()
    }
}

/// Joins parsed peers with live status by public key. Duplicate names keep
/// the first occurrence.
pub fn merge(
    peers: Vec<PeerEntry>,
    live: &HashMap<String, LiveStatus>,
    owners: &HashMap<String, i64>,
    profiles: &ProfileLocator,
) -> Vec<PeerRecord> {
    let mut seen = HashSet::new();
    let mut res = Vec::with_capacity(peers.len());

    for peer in peers {
        if !seen.insert(peer.name.clone()) {
            warn!("duplicate peer name '{}' in config, keeping the first", peer.name);
            continue;
        }
        res.push(PeerRecord {
            status: live.get(&peer.public_key).into(),
            profile: profiles.find(&peer.name),
            owner_id: owners.get(&peer.name).copied(),
            name: peer.name,
            public_key: peer.public_key,
            allowed_ips: peer.allowed_ips,
        });
    }

    res
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub total_clients: usize,
    pub connected_clients: usize,
    pub total_transfer: Transfer,
    pub clients: Vec<PeerRecord>,
}

impl ConnectionStats {
    pub fn from_peers(clients: Vec<PeerRecord>) -> Self {
        let mut stats = Self {
            total_clients: clients.len(),
            ..Default::default()
        };
        for c in clients.iter().filter(|c| c.status.connected) {
            stats.connected_clients += 1;
            if let Some(t) = c.status.transfer {
                stats.total_transfer.rx += t.rx;
                stats.total_transfer.tx += t.tx;
            }
        }
        stats.clients = clients;
        stats
    }
}

impl Gateway {
    pub(crate) async fn snapshot(&self) -> Result<ParsedConfig, ServiceError> {
        Ok(config::read(&self.settings.config_path).await?)
    }

    /// Fresh registry view. Never cached and never takes the mutation lock.
    pub(crate) async fn registry(&self) -> Result<Vec<PeerRecord>, ServiceError> {
        let parsed = self.snapshot().await?;
        let live = status::probe(self.status.as_ref()).await;
        let owners = self.database.peer_owners().await?;

        Ok(merge(parsed.peers, &live, &owners, &self.profiles))
    }

    #[instrument(skip(self))]
    pub async fn list_peers(&self, operator: &Operator) -> Result<Vec<PeerRecord>, ServiceError> {
        if !operator.authorized {
            return Err(ServiceError::AccessDenied);
        }
        self.registry().await
    }

    #[instrument(skip(self))]
    pub async fn connection_stats(
        &self,
        operator: &Operator,
    ) -> Result<ConnectionStats, ServiceError> {
        self.require(operator, Action::ViewStats).await?;
        Ok(ConnectionStats::from_peers(self.registry().await?))
    }

    /// Contents of the exported profile for `name`.
    #[instrument(skip(self))]
    pub async fn client_profile(
        &self,
        operator: &Operator,
        name: &str,
    ) -> Result<(PathBuf, String), ServiceError> {
        if !operator.authorized {
            return Err(ServiceError::AccessDenied);
        }
        let path = self
            .profiles
            .find(name)
            .ok_or_else(|| ServiceError::NotFound(name.to_owned()))?;
        let content = tokio::fs::read_to_string(&path).await?;
        Ok((path, content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::{Fixture, OWNER};

    fn entry(name: &str, key: &str) -> PeerEntry {
        PeerEntry {
            name: name.into(),
            public_key: key.into(),
            allowed_ips: vec!["10.7.0.2/32".parse().unwrap()],
        }
    }

    #[test]
    fn absent_key_is_disconnected() {
        let live = HashMap::from([(
            "KA".to_owned(),
            LiveStatus {
                last_handshake: Some(1_700_000_000),
                transfer: Transfer { rx: 100, tx: 200 },
            },
        )]);
        let merged = merge(
            vec![entry("alice", "KA"), entry("bob", "KB")],
            &live,
            &HashMap::new(),
            &ProfileLocator::new(vec![]),
        );

        assert_eq!(merged[0].name, "alice");
        assert!(merged[0].status.connected);
        assert_eq!(merged[0].status.transfer, Some(Transfer { rx: 100, tx: 200 }));

        assert_eq!(merged[1].name, "bob");
        assert_eq!(merged[1].status, PeerStatus::default());
        assert!(!merged[1].status.connected);
        assert_eq!(merged[1].status.last_handshake, None);
        assert_eq!(merged[1].status.transfer, None);
    }

    #[test]
    fn duplicate_names_collapse_to_first() {
        let merged = merge(
            vec![entry("alice", "K1"), entry("alice", "K2"), entry("bob", "K3")],
            &HashMap::new(),
            &HashMap::new(),
            &ProfileLocator::new(vec![]),
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].public_key, "K1");
    }

    #[test]
    fn owner_and_profile_are_attached() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("alice.conf"), "[Interface]").unwrap();
        let merged = merge(
            vec![entry("alice", "K1"), entry("bob", "K2")],
            &HashMap::new(),
            &HashMap::from([("bob".to_owned(), 9)]),
            &ProfileLocator::new(vec![dir.path().into()]),
        );
        assert!(merged[0].config_file_exists());
        assert_eq!(merged[0].owner_id, None);
        assert!(!merged[1].config_file_exists());
        assert_eq!(merged[1].owner_id, Some(9));
    }

    #[tokio::test]
    async fn list_peers_correlates_live_status() {
        let fx = Fixture::new().await;
        fx.write_config(&[("alice", "KA"), ("bob", "KB")]);
        fx.status.set_dump(
            "PRIV\tPUB\t51820\toff\nKA\t(none)\t198.51.100.1:5000\t10.7.0.2/32\t1700000000\t100\t200\toff\n",
        );

        let owner = fx.gateway.operator(OWNER).await.unwrap();
        let peers = fx.gateway.list_peers(&owner).await.unwrap();

        assert_eq!(peers.len(), 2);
        assert!(peers[0].status.connected);
        assert_eq!(peers[0].status.transfer, Some(Transfer { rx: 100, tx: 200 }));
        assert!(!peers[1].status.connected);
        assert_eq!(peers[1].status.transfer, None);

        let stats = fx.gateway.connection_stats(&owner).await.unwrap();
        assert_eq!(stats.total_clients, 2);
        assert_eq!(stats.connected_clients, 1);
        assert_eq!(stats.total_transfer, Transfer { rx: 100, tx: 200 });
    }

    #[tokio::test]
    async fn unauthorized_cannot_list() {
        let fx = Fixture::new().await;
        fx.write_config(&[("alice", "KA")]);
        let stranger = fx.gateway.operator(12345).await.unwrap();
        assert!(matches!(
            fx.gateway.list_peers(&stranger).await,
            Err(ServiceError::AccessDenied)
        ));
    }

    #[tokio::test]
    async fn missing_config_surfaces_parse_error() {
        let fx = Fixture::new().await;
        let owner = fx.gateway.operator(OWNER).await.unwrap();
        assert!(matches!(
            fx.gateway.list_peers(&owner).await,
            Err(ServiceError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn client_profile_reads_located_file() {
        let fx = Fixture::new().await;
        fx.write_profile("alice");
        let owner = fx.gateway.operator(OWNER).await.unwrap();

        let (path, content) = fx.gateway.client_profile(&owner, "alice").await.unwrap();
        assert!(path.ends_with("alice.conf"));
        assert!(content.contains("[Interface]"));
        assert!(matches!(
            fx.gateway.client_profile(&owner, "nobody").await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
