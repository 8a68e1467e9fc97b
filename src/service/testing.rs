//! Fakes for the script and the daemon, plus a gateway wired to a temp dir.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tempfile::TempDir;

use crate::{
    command::{CommandError, CommandOutput},
    database::{tests::temp_db, Database},
    traits::{Provisioner, StatusSource},
    wireguard::{
        config::tests::{peer_block, server_section},
        ProfileLocator, ScriptOperation, StatusError, Timeouts,
    },
};

use super::{Gateway, OperatorQuota, Settings};

pub const OWNER: i64 = 1000;

#[derive(Debug, Clone)]
pub struct Behavior {
    /// Exit code reported by the script.
    pub code: i32,
    /// Whether a successful run actually changes the config file.
    pub mutate: bool,
    /// Whether `--addclient` exports a profile.
    pub write_profile: bool,
    pub timeout: bool,
    pub delay: Duration,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            code: 0,
            mutate: true,
            write_profile: true,
            timeout: false,
            delay: Duration::ZERO,
        }
    }
}

pub struct FakeProvisioner {
    config_path: PathBuf,
    script_path: PathBuf,
    profile_dir: PathBuf,
    pub behavior: Mutex<Behavior>,
    pub calls: Mutex<Vec<ScriptOperation>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeProvisioner {
    pub fn invocations(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn apply(&self, op: &ScriptOperation) {
        let behavior = self.behavior.lock().unwrap().clone();
        if behavior.code != 0 || !behavior.mutate {
            return;
        }
        match op {
            ScriptOperation::AddClient { name, .. } => {
                let mut text = std::fs::read_to_string(&self.config_path).unwrap();
                let octet = 2 + text.matches("# BEGIN_PEER").count() as u8;
                text += &peer_block(name, &format!("KEY-{name}="), octet);
                std::fs::write(&self.config_path, text).unwrap();
                if behavior.write_profile {
                    std::fs::write(
                        self.profile_dir.join(format!("{name}.conf")),
                        format!("[Interface]\n# {name}\n"),
                    )
                    .unwrap();
                }
            }
            ScriptOperation::RemoveClient { name } => {
                let text = std::fs::read_to_string(&self.config_path).unwrap();
                let mut out = String::new();
                let mut skipping = false;
                for line in text.lines() {
                    if line == format!("# BEGIN_PEER {name}") {
                        skipping = true;
                    }
                    if !skipping {
                        out.push_str(line);
                        out.push('\n');
                    }
                    if line == format!("# END_PEER {name}") {
                        skipping = false;
                    }
                }
                std::fs::write(&self.config_path, out).unwrap();
            }
            ScriptOperation::Install => {
                std::fs::write(&self.config_path, server_section()).unwrap();
                std::fs::write(&self.script_path, "#!/bin/bash\n").unwrap();
            }
        }
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn execute(
        &self,
        op: &ScriptOperation,
        limit: Duration,
    ) -> Result<CommandOutput, CommandError> {
        self.calls.lock().unwrap().push(op.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let behavior = self.behavior.lock().unwrap().clone();
        tokio::time::sleep(behavior.delay).await;
        self.apply(op);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if behavior.timeout {
            return Err(CommandError::Timeout {
                program: "sudo".into(),
                limit,
            });
        }
        Ok(CommandOutput {
            code: Some(behavior.code),
            stdout: String::new(),
            stderr: if behavior.code == 0 {
                String::new()
            } else {
                "wireguard.sh: something broke".into()
            },
        })
    }
}

#[derive(Default)]
pub struct FakeStatus {
    dump: Mutex<Option<String>>,
}

impl FakeStatus {
    pub fn set_dump(&self, dump: &str) {
        *self.dump.lock().unwrap() = Some(dump.to_owned());
    }
}

#[async_trait]
impl StatusSource for FakeStatus {
    async fn dump(&self) -> Result<String, StatusError> {
        self.dump
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| StatusError::Exit(Some(1), "no such device".into()))
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub gateway: Gateway,
    pub database: Database,
    pub provisioner: Arc<FakeProvisioner>,
    pub status: Arc<FakeStatus>,
}

impl Fixture {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let profile_dir = dir.path().join("profiles");
        let backup_dir = dir.path().join("backups");
        std::fs::create_dir_all(&profile_dir).unwrap();
        std::fs::create_dir_all(&backup_dir).unwrap();

        let settings = Settings {
            owner_id: OWNER,
            authorized_users: vec![],
            script_path: dir.path().join("wireguard.sh"),
            config_path: dir.path().join("wg0.conf"),
            backup_dir,
            default_quota: OperatorQuota::default(),
            timeouts: Timeouts::default(),
        };
        let provisioner = Arc::new(FakeProvisioner {
            config_path: settings.config_path.clone(),
            script_path: settings.script_path.clone(),
            profile_dir: profile_dir.clone(),
            behavior: Mutex::new(Behavior::default()),
            calls: Mutex::new(vec![]),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });
        let status = Arc::new(FakeStatus::default());
        let database = temp_db(dir.path()).await;

        let gateway = Gateway::with_parts(
            settings,
            database.clone(),
            provisioner.clone(),
            status.clone(),
            ProfileLocator::new(vec![profile_dir]),
        );
        gateway.init().await.unwrap();

        Self {
            dir,
            gateway,
            database,
            provisioner,
            status,
        }
    }

    pub fn owner_id(&self) -> i64 {
        OWNER
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn config_path(&self) -> PathBuf {
        self.path("wg0.conf")
    }

    pub fn profile_dir(&self) -> PathBuf {
        self.path("profiles")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.path("backups")
    }

    pub fn write_raw_config(&self, text: &str) {
        std::fs::write(self.config_path(), text).unwrap();
    }

    /// Writes a config with one peer block per `(name, public key)`.
    pub fn write_config(&self, peers: &[(&str, &str)]) {
        let mut text = server_section();
        for (i, (name, key)) in peers.iter().enumerate() {
            text += &peer_block(name, key, i as u8 + 2);
        }
        self.write_raw_config(&text);
    }

    pub fn write_profile(&self, name: &str) {
        std::fs::write(
            self.profile_dir().join(format!("{name}.conf")),
            format!("[Interface]\n# {name}\n"),
        )
        .unwrap();
    }

    pub fn install_script(&self) {
        std::fs::write(self.path("wireguard.sh"), "#!/bin/bash\n").unwrap();
    }

    pub fn set_behavior(&self, f: impl FnOnce(&mut Behavior)) {
        f(&mut self.provisioner.behavior.lock().unwrap());
    }

    /// Authorizes `id` with `quota` and returns the resolved operator.
    pub async fn operator_with(&self, id: i64, quota: OperatorQuota) -> super::Operator {
        let owner = self.gateway.operator(OWNER).await.unwrap();
        self.gateway.authorize(&owner, id, None).await.unwrap();
        self.gateway.set_quota(&owner, id, quota).await.unwrap();
        self.gateway.operator(id).await.unwrap()
    }
}
