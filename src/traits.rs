use std::time::Duration;

use async_trait::async_trait;

use crate::{
    command::{CommandError, CommandOutput},
    wireguard::{ScriptOperation, StatusError},
};

/// The privileged provisioning script. Implementations run the operation
/// exactly once; callers never retry.
#[async_trait]
pub trait Provisioner: Sync + Send {
    async fn execute(
        &self,
        op: &ScriptOperation,
        limit: Duration,
    ) -> Result<CommandOutput, CommandError>;
}

/// Raw `wg show <iface> dump` text from the running daemon.
#[async_trait]
pub trait StatusSource: Sync + Send {
    async fn dump(&self) -> Result<String, StatusError>;
}
