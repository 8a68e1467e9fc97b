use std::{fmt, net::Ipv4Addr, path::PathBuf};

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{command::CommandOutput, wireguard::ScriptOperation};

use super::{Action, Gateway, Operator, ServiceError, Shared};

pub const MAX_NAME_LEN: usize = 15;
pub const DEFAULT_DNS: Ipv4Addr = Ipv4Addr::new(8, 8, 8, 8);
const MAX_DNS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Requested,
    Validating,
    Executing,
    Verifying,
    Completed,
    Failed,
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tracks one provisioning request through its states.
struct Request {
    id: Uuid,
    kind: &'static str,
    state: RequestState,
}

impl Request {
    fn new(kind: &'static str) -> Self {
        let req = Self {
            id: Uuid::new_v4(),
            kind,
            state: RequestState::Requested,
        };
        debug!(request = %req.id, "{kind} requested");
        req
    }

    fn advance(&mut self, next: RequestState) {
        debug!(request = %self.id, "{kind}: {from} -> {next}", kind = self.kind, from = self.state);
        self.state = next;
    }

    fn finish<T>(mut self, res: Result<T, ServiceError>) -> Result<T, ServiceError> {
        match &res {
            Ok(_) => {
                self.advance(RequestState::Completed);
                info!(request = %self.id, "{} completed", self.kind);
            }
            Err(e) => {
                let at = self.state;
                self.advance(RequestState::Failed);
                warn!(request = %self.id, "{} failed while {at}: {e}", self.kind);
            }
        }
        res
    }
}

/// Keeps `[A-Za-z0-9_-]` and cuts to fifteen characters.
pub fn sanitize_name(raw: &str) -> Result<String, ServiceError> {
    let name: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .take(MAX_NAME_LEN)
        .collect();

    if name.is_empty() {
        return Err(ServiceError::Validation(format!(
            "'{raw}' has no usable characters, use letters, digits, '_' or '-'"
        )));
    }
    Ok(name)
}

/// Parses up to two IPv4 resolvers; an empty list means [`DEFAULT_DNS`].
pub fn parse_dns<S: AsRef<str>>(entries: &[S]) -> Result<Vec<Ipv4Addr>, ServiceError> {
    let entries: Vec<&str> = entries
        .iter()
        .map(|e| e.as_ref().trim())
        .filter(|e| !e.is_empty())
        .collect();

    if entries.is_empty() {
        return Ok(vec![DEFAULT_DNS]);
    }
    if entries.len() > MAX_DNS {
        return Err(ServiceError::Validation(format!(
            "at most {MAX_DNS} dns servers are supported"
        )));
    }

    entries
        .into_iter()
        .map(|e| {
            e.parse::<Ipv4Addr>()
                .map_err(|_| ServiceError::Validation(format!("'{e}' is not an IPv4 address")))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedClient {
    pub name: String,
    /// `None` when the script succeeded but no exported profile was found.
    pub profile: Option<PathBuf>,
}

impl AddedClient {
    pub fn is_partial(&self) -> bool {
        self.profile.is_none()
    }
}

fn check_output(out: CommandOutput) -> Result<CommandOutput, ServiceError> {
    if out.success() {
        Ok(out)
    } else {
        Err(ServiceError::ScriptExecution(format!(
            "exit code {code}: {msg}",
            code = out
                .code
                .map_or_else(|| "none".to_owned(), |c| c.to_string()),
            msg = out.diagnostic()
        )))
    }
}

impl Gateway {
    async fn execute(&self, shared: &Shared, op: &ScriptOperation) -> Result<CommandOutput, ServiceError> {
        let limit = self.settings.timeouts.for_operation(op);
        let out = shared
            .provisioner
            .execute(op, limit)
            .await
            .map_err(|e| ServiceError::ScriptExecution(e.to_string()))?;
        check_output(out)
    }

    #[instrument(skip(self, dns))]
    pub async fn add_client<S: AsRef<str> + Send + Sync>(
        &self,
        operator: &Operator,
        name: &str,
        dns: &[S],
    ) -> Result<AddedClient, ServiceError> {
        let mut req = Request::new("add client");
        let shared = self.shared.lock().await;
        let res = self.add_client_locked(&shared, &mut req, operator, name, dns).await;
        req.finish(res)
    }

    async fn add_client_locked<S: AsRef<str>>(
        &self,
        shared: &Shared,
        req: &mut Request,
        operator: &Operator,
        raw_name: &str,
        dns: &[S],
    ) -> Result<AddedClient, ServiceError> {
        req.advance(RequestState::Validating);
        let name = sanitize_name(raw_name)?;
        let dns = parse_dns(dns)?;
        let snapshot = self.snapshot().await?;
        if snapshot.contains(&name) {
            return Err(ServiceError::AlreadyExists(name));
        }

        if !operator.authorized {
            return Err(ServiceError::AccessDenied);
        }
        let quota = self.quota(operator).await?;
        if !quota.allows(Action::ManageClients) {
            return Err(ServiceError::QuotaExceeded(
                "not allowed to manage clients".to_owned(),
            ));
        }
        let owned = self.owned_count(operator.id, &snapshot).await?;
        if !quota.has_room(owned) {
            return Err(ServiceError::QuotaExceeded(format!(
                "{owned} of {max} clients in use",
                max = quota.max_clients
            )));
        }

        req.advance(RequestState::Executing);
        let op = ScriptOperation::AddClient {
            name: name.clone(),
            dns,
        };
        self.execute(shared, &op).await?;

        req.advance(RequestState::Verifying);
        if !self.snapshot().await?.contains(&name) {
            return Err(ServiceError::Verification(format!(
                "script reported success but '{name}' is not in the config"
            )));
        }
        self.database.set_peer_owner(&name, operator.id).await?;

        let profile = self.profiles.find(&name);
        if profile.is_none() {
            warn!("client '{name}' created but its profile file was not found");
        }
        Ok(AddedClient { name, profile })
    }

    #[instrument(skip(self))]
    pub async fn remove_client(&self, operator: &Operator, name: &str) -> Result<(), ServiceError> {
        let mut req = Request::new("remove client");
        let shared = self.shared.lock().await;
        let res = self.remove_client_locked(&shared, &mut req, operator, name).await;
        req.finish(res)
    }

    async fn remove_client_locked(
        &self,
        shared: &Shared,
        req: &mut Request,
        operator: &Operator,
        name: &str,
    ) -> Result<(), ServiceError> {
        req.advance(RequestState::Validating);
        if !self.snapshot().await?.contains(name) {
            return Err(ServiceError::NotFound(name.to_owned()));
        }
        self.require(operator, Action::ManageClients).await?;

        req.advance(RequestState::Executing);
        let op = ScriptOperation::RemoveClient {
            name: name.to_owned(),
        };
        self.execute(shared, &op).await?;

        req.advance(RequestState::Verifying);
        if self.snapshot().await?.contains(name) {
            return Err(ServiceError::Verification(format!(
                "script reported success but '{name}' is still in the config"
            )));
        }
        self.database.rm_peer_owner(name).await?;
        Ok(())
    }

    /// One-time server installation; owner only.
    #[instrument(skip(self))]
    pub async fn install(&self, operator: &Operator) -> Result<(), ServiceError> {
        let mut req = Request::new("install");
        let shared = self.shared.lock().await;
        let res = self.install_locked(&shared, &mut req, operator).await;
        req.finish(res)
    }

    async fn install_locked(
        &self,
        shared: &Shared,
        req: &mut Request,
        operator: &Operator,
    ) -> Result<(), ServiceError> {
        req.advance(RequestState::Validating);
        if !operator.is_owner {
            return Err(ServiceError::AccessDenied);
        }
        if self.is_installed() {
            return Err(ServiceError::AlreadyInstalled);
        }

        req.advance(RequestState::Executing);
        self.execute(shared, &ScriptOperation::Install).await?;

        req.advance(RequestState::Verifying);
        if !self.settings.config_path.exists() {
            return Err(ServiceError::Verification(format!(
                "installer finished but {} does not exist",
                self.settings.config_path.display()
            )));
        }
        Ok(())
    }
}
