use tracing::{info, instrument, warn};

use super::{Gateway, Operator, OperatorQuota, ServiceError};

#[derive(Debug, Clone)]
pub struct OperatorInfo {
    pub operator: Operator,
    pub quota: OperatorQuota,
}

impl Gateway {
    /// Resolves a chat user into an operator. The owner is always authorized.
    #[instrument(skip(self))]
    pub async fn operator(&self, id: i64) -> Result<Operator, ServiceError> {
        let stored = self.database.operator(id).await?;
        let is_owner = id == self.settings.owner_id;

        Ok(Operator {
            id,
            username: stored.as_ref().and_then(|s| s.username.clone()),
            is_owner,
            authorized: is_owner || stored.is_some(),
        })
    }

    fn require_owner(actor: &Operator) -> Result<(), ServiceError> {
        if actor.is_owner {
            Ok(())
        } else {
            Err(ServiceError::AccessDenied)
        }
    }

    /// Returns `true` when `id` was not authorized before.
    #[instrument(skip(self))]
    pub async fn authorize(
        &self,
        actor: &Operator,
        id: i64,
        username: Option<&str>,
    ) -> Result<bool, ServiceError> {
        Self::require_owner(actor)?;

        let added = self.database.add_operator(id, username).await?;
        if added && id != self.settings.owner_id {
            self.database
                .set_quota(id, &self.settings.default_quota)
                .await?;
        }
        info!("operator {id} authorized (new: {added})");
        Ok(added)
    }

    #[instrument(skip(self))]
    pub async fn revoke(&self, actor: &Operator, id: i64) -> Result<bool, ServiceError> {
        Self::require_owner(actor)?;
        if id == self.settings.owner_id {
            warn!("refusing to revoke the owner");
            return Err(ServiceError::AccessDenied);
        }

        Ok(self.database.rm_operator(id).await?)
    }

    /// Stores a quota for `id`. The owner's quota is fixed, so that is a no-op.
    #[instrument(skip(self))]
    pub async fn set_quota(
        &self,
        actor: &Operator,
        id: i64,
        quota: OperatorQuota,
    ) -> Result<(), ServiceError> {
        Self::require_owner(actor)?;
        if id == self.settings.owner_id {
            warn!("owner quota is fixed, ignoring update");
            return Ok(());
        }
        if self.database.operator(id).await?.is_none() {
            return Err(ServiceError::Validation(format!(
                "user {id} is not authorized"
            )));
        }

        Ok(self.database.set_quota(id, &quota).await?)
    }

    /// Changes a single quota field of `id`.
    #[instrument(skip(self))]
    pub async fn update_quota(
        &self,
        actor: &Operator,
        id: i64,
        field: &str,
        value: i64,
    ) -> Result<OperatorQuota, ServiceError> {
        Self::require_owner(actor)?;
        let target = self.operator(id).await?;
        let mut quota = self.quota(&target).await?;
        quota.set_field(field, value)?;
        self.set_quota(actor, id, quota).await?;

        self.quota(&target).await
    }

    /// Drops the stored quota so the defaults apply again.
    #[instrument(skip(self))]
    pub async fn reset_quota(&self, actor: &Operator, id: i64) -> Result<(), ServiceError> {
        Self::require_owner(actor)?;
        if id == self.settings.owner_id {
            return Ok(());
        }
        Ok(self.database.rm_quota(id).await?)
    }

    #[instrument(skip(self))]
    pub async fn operators(&self, actor: &Operator) -> Result<Vec<OperatorInfo>, ServiceError> {
        Self::require_owner(actor)?;

        let mut res = Vec::new();
        for stored in self.database.operators().await? {
            let operator = self.operator(stored.id).await?;
            let quota = self.quota(&operator).await?;
            res.push(OperatorInfo { operator, quota });
        }
        Ok(res)
    }
}
