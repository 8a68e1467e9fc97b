use std::{
    collections::HashMap,
    fs::File,
    path::{Path, PathBuf},
};

use flate2::{write::GzEncoder, Compression};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::wireguard::ProfileLocator;

use super::{merge, Action, Gateway, Operator, ServiceError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupReport {
    pub path: PathBuf,
    pub server_config: bool,
    pub included: Vec<String>,
    /// Peers whose profile could not be located or opened.
    pub omitted: Vec<String>,
}

pub fn backup_file_name(now: OffsetDateTime) -> String {
    format!(
        "wireguard_backup_{:04}{:02}{:02}_{:02}{:02}{:02}.tar.gz",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

struct ArchivePlan {
    target: PathBuf,
    server_config: Option<(PathBuf, String)>,
    /// `(peer name, located profile)`
    clients: Vec<(String, Option<PathBuf>)>,
}

/// Writes the archive, removing the partial file if anything fails.
fn write_archive(plan: ArchivePlan) -> Result<BackupReport, ServiceError> {
    let target = plan.target.clone();
    let res = fill_archive(plan);
    if res.is_err() {
        if let Err(e) = std::fs::remove_file(&target) {
            warn!("partial backup {} not removed: {e}", target.display());
        }
    }
    res
}

fn fill_archive(plan: ArchivePlan) -> Result<BackupReport, ServiceError> {
    let file = File::create(&plan.target)?;
    let mut tar = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    let mut report = BackupReport {
        path: plan.target.clone(),
        ..Default::default()
    };

    if let Some((path, name)) = &plan.server_config {
        match File::open(path) {
            Ok(mut f) => {
                tar.append_file(name, &mut f)?;
                report.server_config = true;
            }
            Err(e) => warn!("server config {} not added: {e}", path.display()),
        }
    }

    for (name, profile) in plan.clients {
        let Some(profile) = profile else {
            warn!("no profile found for {name}, omitted from backup");
            report.omitted.push(name);
            continue;
        };
        match File::open(&profile) {
            Ok(mut f) => {
                tar.append_file(Path::new("clients").join(ProfileLocator::file_name(&name)), &mut f)?;
                report.included.push(name);
            }
            Err(e) => {
                warn!("profile {} not added: {e}", profile.display());
                report.omitted.push(name);
            }
        }
    }

    tar.into_inner()?.finish()?;
    Ok(report)
}

impl Gateway {
    /// Archives the server config and every locatable client profile.
    #[instrument(skip(self))]
    pub async fn backup_configs(&self, operator: &Operator) -> Result<BackupReport, ServiceError> {
        self.require(operator, Action::Backup).await?;
        let _shared = self.shared.lock().await;

        let peers = match self.snapshot().await {
            Ok(parsed) => parsed.peers,
            Err(ServiceError::Parse(e)) => {
                warn!("backing up without peers: {e}");
                vec![]
            }
            Err(e) => return Err(e),
        };
        let clients = merge(peers, &HashMap::new(), &HashMap::new(), &self.profiles)
            .into_iter()
            .map(|p| (p.name, p.profile))
            .collect();

        let config_path = &self.settings.config_path;
        let server_config = config_path
            .file_name()
            .filter(|_| config_path.is_file())
            .map(|n| (config_path.clone(), n.to_string_lossy().into_owned()));

        tokio::fs::create_dir_all(&self.settings.backup_dir).await?;
        let plan = ArchivePlan {
            target: self
                .settings
                .backup_dir
                .join(backup_file_name(OffsetDateTime::now_utc())),
            server_config,
            clients,
        };

        let report = tokio::task::spawn_blocking(move || write_archive(plan)).await??;
        info!(
            "backup {} written with {} clients, {} omitted",
            report.path.display(),
            report.included.len(),
            report.omitted.len()
        );
        Ok(report)
    }
}
