pub mod backup;
pub mod error;
pub mod operators;
pub mod peers;
pub mod provisioning;
pub mod quota;
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use tokio::sync::Mutex;
use tracing::instrument;

pub use backup::*;
pub use error::*;
pub use operators::*;
pub use peers::*;
pub use provisioning::*;
pub use quota::*;
pub use status::*;

use crate::{
    database::Database,
    traits::{Provisioner, StatusSource},
    wireguard::{ProfileLocator, Timeouts, WgScript, WgShow},
};

#[derive(Debug, Parser)]
pub struct Config {
    #[clap(long, env = "OWNER_ID", value_parser)]
    owner_id: i64,
    /// Extra operators authorized at startup, comma separated.
    #[clap(long, env = "AUTHORIZED_USERS", value_parser, use_value_delimiter = true)]
    authorized_users: Vec<i64>,
    #[clap(long, env = "WIREGUARD_SCRIPT_PATH", value_parser, default_value = "./wireguard.sh")]
    script_path: PathBuf,
    #[clap(
        long,
        env = "WIREGUARD_CONFIG_PATH",
        value_parser,
        default_value = "/etc/wireguard/wg0.conf"
    )]
    config_path: PathBuf,
    #[clap(long, env = "WG_INTERFACE", value_parser, default_value = "wg0")]
    interface: String,
    #[clap(long, env = "MAX_CLIENTS_PER_USER", value_parser, default_value_t = 100)]
    max_clients: i64,
    #[clap(long, env = "RATE_LIMIT_PER_USER", value_parser, default_value_t = 10)]
    rate_limit: i64,
    /// Where backups are written, defaults to the export directory.
    #[clap(long, env = "BACKUP_DIR", value_parser)]
    backup_dir: Option<PathBuf>,
    /// Extra directories searched for exported client profiles.
    #[clap(long, env = "PROFILE_SEARCH_PATHS", value_parser, use_value_delimiter = true)]
    profile_search_paths: Vec<PathBuf>,
    #[clap(long, env = "STATUS_TIMEOUT", value_parser, default_value_t = 30)]
    status_timeout_secs: u64,
}

/// Startup configuration, resolved once and never mutated.
#[derive(Debug, Clone)]
pub struct Settings {
    pub owner_id: i64,
    pub authorized_users: Vec<i64>,
    pub script_path: PathBuf,
    pub config_path: PathBuf,
    pub backup_dir: PathBuf,
    pub default_quota: OperatorQuota,
    pub timeouts: Timeouts,
}

impl Settings {
    fn from_config(config: &Config) -> Self {
        Self {
            owner_id: config.owner_id,
            authorized_users: config.authorized_users.clone(),
            script_path: config.script_path.clone(),
            config_path: config.config_path.clone(),
            backup_dir: config
                .backup_dir
                .clone()
                .unwrap_or_else(crate::wireguard::profile::export_directory),
            default_quota: OperatorQuota {
                max_clients: config.max_clients,
                rate_limit: config.rate_limit,
                ..OperatorQuota::default()
            },
            timeouts: Timeouts::default(),
        }
    }
}

/// Mutation-side state. Holding the lock is required to run the script or to
/// read the config file for a mutation.
struct Shared {
    provisioner: Arc<dyn Provisioner>,
}

#[derive(Clone)]
pub struct Gateway {
    database: Database,
    settings: Arc<Settings>,

    shared: Arc<Mutex<Shared>>,

    status: Arc<dyn StatusSource>,
    profiles: ProfileLocator,
}

impl Gateway {
    #[instrument(skip(db))]
    pub async fn new(config: Config, db: Database) -> Result<Self, ServiceError> {
        let settings = Settings::from_config(&config);
        let provisioner = Arc::new(WgScript::new(settings.script_path.clone()));
        let status = Arc::new(WgShow::new(
            config.interface.clone(),
            Duration::from_secs(config.status_timeout_secs),
        ));
        let profiles = ProfileLocator::standard(&config.profile_search_paths);

        Ok(Self::with_parts(settings, db, provisioner, status, profiles))
    }

    pub fn with_parts(
        settings: Settings,
        database: Database,
        provisioner: Arc<dyn Provisioner>,
        status: Arc<dyn StatusSource>,
        profiles: ProfileLocator,
    ) -> Self {
        Self {
            database,
            settings: Arc::new(settings),
            shared: Arc::new(Mutex::new(Shared { provisioner })),
            status,
            profiles,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Seeds the owner and the environment provided operators. Stored
    /// usernames and quotas are left untouched.
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<(), ServiceError> {
        self.database.add_operator(self.settings.owner_id, None).await?;
        for &id in &self.settings.authorized_users {
            if self.database.add_operator(id, None).await? && id != self.settings.owner_id {
                self.database
                    .set_quota(id, &self.settings.default_quota)
                    .await?;
            }
        }
        Ok(())
    }
}
