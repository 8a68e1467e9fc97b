use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::wireguard::ParsedConfig;

use super::{Gateway, ServiceError};

pub const UNLIMITED: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorQuota {
    /// `-1` means unlimited.
    pub max_clients: i64,
    /// Requests per minute, `-1` means unlimited. Stored and reported only.
    pub rate_limit: i64,
    pub can_backup: bool,
    pub can_view_stats: bool,
    pub can_manage_clients: bool,
}

impl Default for OperatorQuota {
    fn default() -> Self {
        Self {
            max_clients: 100,
            rate_limit: 10,
            can_backup: true,
            can_view_stats: true,
            can_manage_clients: true,
        }
    }
}

impl OperatorQuota {
    pub const OWNER: Self = Self {
        max_clients: UNLIMITED,
        rate_limit: UNLIMITED,
        can_backup: true,
        can_view_stats: true,
        can_manage_clients: true,
    };

    pub fn allows(&self, action: Action) -> bool {
        match action {
            Action::Backup => self.can_backup,
            Action::ViewStats => self.can_view_stats,
            Action::ManageClients => self.can_manage_clients,
        }
    }

    pub fn has_room(&self, owned: usize) -> bool {
        self.max_clients == UNLIMITED
            || usize::try_from(self.max_clients).map_or(false, |max| owned < max)
    }

    pub fn can_add_client(&self, owned: usize) -> bool {
        self.allows(Action::ManageClients) && self.has_room(owned)
    }

    /// Applies `value` to the field called `field`, as used by the chat
    /// `/limit` command.
    pub fn set_field(&mut self, field: &str, value: i64) -> Result<(), ServiceError> {
        let flag = |value: i64| match value {
            0 => Ok(false),
            1 => Ok(true),
            v => Err(ServiceError::Validation(format!(
                "{field} expects 0 or 1, got {v}"
            ))),
        };
        match field {
            "max_clients" | "maxClients" => self.max_clients = limit(field, value)?,
            "rate_limit" | "rateLimit" => self.rate_limit = limit(field, value)?,
            "backup" | "can_backup" | "canBackup" => self.can_backup = flag(value)?,
            "view_stats" | "viewStats" | "can_view_stats" | "canViewStats" => {
                self.can_view_stats = flag(value)?
            }
            "manage_clients" | "manageClients" | "can_manage_clients" | "canManageClients" => {
                self.can_manage_clients = flag(value)?
            }
            other => return Err(ServiceError::Validation(format!("unknown limit '{other}'"))),
        }
        Ok(())
    }
}

fn limit(field: &str, value: i64) -> Result<i64, ServiceError> {
    if value < UNLIMITED {
        return Err(ServiceError::Validation(format!(
            "{field} must be -1 (unlimited) or non-negative"
        )));
    }
    Ok(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Backup,
    ViewStats,
    ManageClients,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Backup => "backup",
            Action::ViewStats => "viewStats",
            Action::ManageClients => "manageClients",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    pub id: i64,
    pub username: Option<String>,
    pub is_owner: bool,
    pub authorized: bool,
}

/// Owner always gets [`OperatorQuota::OWNER`], whatever is stored.
pub fn effective_quota(
    operator: &Operator,
    stored: Option<OperatorQuota>,
    default: OperatorQuota,
) -> OperatorQuota {
    if operator.is_owner {
        OperatorQuota::OWNER
    } else {
        stored.unwrap_or(default)
    }
}

impl Gateway {
    #[instrument(skip(self))]
    pub async fn quota(&self, operator: &Operator) -> Result<OperatorQuota, ServiceError> {
        let stored = if operator.is_owner {
            None
        } else {
            self.database.quota(operator.id).await?
        };
        Ok(effective_quota(
            operator,
            stored,
            self.settings.default_quota,
        ))
    }

    #[instrument(skip(self))]
    pub async fn can_perform(&self, operator: &Operator, action: Action) -> Result<bool, ServiceError> {
        Ok(operator.authorized && self.quota(operator).await?.allows(action))
    }

    /// [`Gateway::can_perform`] or `AccessDenied`.
    pub(crate) async fn require(&self, operator: &Operator, action: Action) -> Result<(), ServiceError> {
        if self.can_perform(operator, action).await? {
            Ok(())
        } else {
            Err(ServiceError::AccessDenied)
        }
    }

    /// Peers created by `operator_id` that are still present in `snapshot`.
    pub(crate) async fn owned_count(
        &self,
        operator_id: i64,
        snapshot: &ParsedConfig,
    ) -> Result<usize, ServiceError> {
        let owners = self.database.peer_owners().await?;
        Ok(snapshot
            .peers
            .iter()
            .filter(|p| owners.get(&p.name) == Some(&operator_id))
            .count())
    }

    #[instrument(skip(self))]
    pub async fn can_add_client(&self, operator: &Operator) -> Result<bool, ServiceError> {
        if !operator.authorized {
            return Ok(false);
        }
        let quota = self.quota(operator).await?;
        let snapshot = crate::wireguard::config::read(&self.settings.config_path).await?;
        let owned = self.owned_count(operator.id, &snapshot).await?;
        Ok(quota.can_add_client(owned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::{Fixture, OWNER};

    fn operator(is_owner: bool) -> Operator {
        Operator {
            id: 42,
            username: None,
            is_owner,
            authorized: true,
        }
    }

    #[test]
    fn zero_max_always_rejects() {
        let q = OperatorQuota {
            max_clients: 0,
            ..Default::default()
        };
        for owned in [0, 1, 100] {
            assert!(!q.can_add_client(owned));
        }
    }

    #[test]
    fn unlimited_always_accepts() {
        let q = OperatorQuota {
            max_clients: UNLIMITED,
            ..Default::default()
        };
        for owned in [0, 1, 10_000, usize::MAX] {
            assert!(q.can_add_client(owned));
        }
    }

    #[test]
    fn room_is_strictly_below_max() {
        let q = OperatorQuota {
            max_clients: 2,
            ..Default::default()
        };
        assert!(q.can_add_client(1));
        assert!(!q.can_add_client(2));
    }

    #[test]
    fn manage_flag_gates_adding() {
        let q = OperatorQuota {
            max_clients: UNLIMITED,
            can_manage_clients: false,
            ..Default::default()
        };
        assert!(!q.can_add_client(0));
    }

    #[test]
    fn owner_quota_ignores_stored_record() {
        let stored = OperatorQuota {
            max_clients: 0,
            rate_limit: 1,
            can_backup: false,
            can_view_stats: false,
            can_manage_clients: false,
        };
        let q = effective_quota(&operator(true), Some(stored), OperatorQuota::default());
        assert_eq!(q, OperatorQuota::OWNER);

        let q = effective_quota(&operator(false), Some(stored), OperatorQuota::default());
        assert_eq!(q, stored);
        let q = effective_quota(&operator(false), None, OperatorQuota::default());
        assert_eq!(q, OperatorQuota::default());
    }

    #[test]
    fn set_field_validates() {
        let mut q = OperatorQuota::default();
        q.set_field("max_clients", -1).unwrap();
        q.set_field("backup", 0).unwrap();
        assert_eq!(q.max_clients, UNLIMITED);
        assert!(!q.can_backup);

        assert!(q.set_field("max_clients", -2).is_err());
        assert!(q.set_field("backup", 2).is_err());
        assert!(q.set_field("colour", 1).is_err());
    }

    #[test]
    fn quota_json_tolerates_missing_fields() {
        let q: OperatorQuota = serde_json::from_str(r#"{"max_clients": 3}"#).unwrap();
        assert_eq!(q.max_clients, 3);
        assert_eq!(q.rate_limit, 10);
        assert!(q.can_manage_clients);
    }

    #[tokio::test]
    async fn can_perform_follows_stored_flags() {
        let fx = Fixture::new().await;
        let owner = fx.gateway.operator(OWNER).await.unwrap();
        let restricted = fx
            .operator_with(
                7,
                OperatorQuota {
                    can_backup: false,
                    ..OperatorQuota::default()
                },
            )
            .await;

        for action in [Action::Backup, Action::ViewStats, Action::ManageClients] {
            assert!(fx.gateway.can_perform(&owner, action).await.unwrap());
        }
        assert!(!fx.gateway.can_perform(&restricted, Action::Backup).await.unwrap());
        assert!(fx.gateway.can_perform(&restricted, Action::ViewStats).await.unwrap());
        assert!(matches!(
            fx.gateway.require(&restricted, Action::Backup).await,
            Err(ServiceError::AccessDenied)
        ));
    }

    #[tokio::test]
    async fn unknown_users_can_do_nothing() {
        let fx = Fixture::new().await;
        let stranger = fx.gateway.operator(99).await.unwrap();
        assert!(!stranger.authorized);
        for action in [Action::Backup, Action::ViewStats, Action::ManageClients] {
            assert!(!fx.gateway.can_perform(&stranger, action).await.unwrap());
        }
    }
}
