use std::{fmt, net::Ipv4Addr, path::PathBuf, time::Duration};

use async_trait::async_trait;

use crate::{
    command::{self, CommandError, CommandOutput},
    traits::Provisioner,
};

/// One invocation of the provisioning script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOperation {
    AddClient { name: String, dns: Vec<Ipv4Addr> },
    RemoveClient { name: String },
    Install,
}

impl ScriptOperation {
    pub fn args(&self) -> Vec<String> {
        match self {
            ScriptOperation::AddClient { name, dns } => {
                let mut args = vec!["--addclient".to_owned(), name.clone()];
                for (flag, ip) in ["--dns1", "--dns2"].into_iter().zip(dns) {
                    args.push(flag.to_owned());
                    args.push(ip.to_string());
                }
                args
            }
            ScriptOperation::RemoveClient { name } => {
                vec!["--removeclient".to_owned(), name.clone(), "--yes".to_owned()]
            }
            ScriptOperation::Install => vec!["--auto".to_owned()],
        }
    }
}

impl fmt::Display for ScriptOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptOperation::AddClient { name, .. } => write!(f, "add client {name}"),
            ScriptOperation::RemoveClient { name } => write!(f, "remove client {name}"),
            ScriptOperation::Install => f.write_str("install"),
        }
    }
}

/// Per-operation time limits.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub add: Duration,
    pub remove: Duration,
    pub install: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            add: Duration::from_secs(60),
            remove: Duration::from_secs(30),
            install: Duration::from_secs(300),
        }
    }
}

impl Timeouts {
    pub fn for_operation(&self, op: &ScriptOperation) -> Duration {
        match op {
            ScriptOperation::AddClient { .. } => self.add,
            ScriptOperation::RemoveClient { .. } => self.remove,
            ScriptOperation::Install => self.install,
        }
    }
}

/// Extra time `timeout(1)` waits after SIGTERM before it sends SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Exit codes of `timeout(1)` when the deadline fired: 124 after SIGTERM was
/// enough, 137 when the script had to be killed.
const TIMED_OUT: [i32; 2] = [124, 137];

/// Runs the installer script as
/// `sudo timeout --kill-after=5s <limit> bash <script> <args>`.
///
/// The deadline is enforced by `timeout` on the root side of sudo, so the
/// script itself is terminated. Killing the local `sudo` alone would leave it
/// running after the mutation lock is released.
pub struct WgScript {
    script: PathBuf,
}

impl WgScript {
    pub fn new(script: PathBuf) -> Self {
        Self { script }
    }

    fn invocation(&self, op: &ScriptOperation, limit: Duration) -> Vec<String> {
        let mut args = vec![
            "timeout".to_owned(),
            format!("--kill-after={}s", KILL_GRACE.as_secs()),
            format!("{}s", limit.as_secs().max(1)),
            "bash".to_owned(),
            self.script.display().to_string(),
        ];
        args.extend(op.args());
        args
    }
}

#[async_trait]
impl Provisioner for WgScript {
    async fn execute(
        &self,
        op: &ScriptOperation,
        limit: Duration,
    ) -> Result<CommandOutput, CommandError> {
        // local deadline is only a backstop for a hung sudo
        let backstop = limit + KILL_GRACE + Duration::from_secs(1);
        let out = command::run("sudo", self.invocation(op, limit), backstop).await?;
        match out.code {
            Some(code) if TIMED_OUT.contains(&code) => Err(CommandError::Timeout {
                program: self.script.display().to_string(),
                limit,
            }),
            _ => Ok(out),
        }
    }
}
