use crate::error::{Result, ServiceError};
use serde::{Deserialize, Serialize};

pub type UserId = i64;

/// Access-control role carried by an authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Private,
    #[default]
    None,
}

/// The authenticated caller, passed explicitly to every operation that checks ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub role: Role,
}

impl Principal {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn admin(user_id: UserId) -> Self {
        Self::new(user_id, Role::Admin)
    }

    pub fn private(user_id: UserId) -> Self {
        Self::new(user_id, Role::Private)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Rejects callers that carry no registered user.
    pub fn ensure_registered(&self) -> Result<()> {
        if self.user_id < 1 {
            return Err(ServiceError::Forbidden(
                "Unregistered users are forbidden".to_string(),
            ));
        }
        Ok(())
    }

    /// Rejects non-admin callers acting on data owned by someone else.
    pub fn ensure_can_access(&self, owner: UserId) -> Result<()> {
        self.ensure_registered()?;
        if owner != self.user_id && !self.is_admin() {
            return Err(ServiceError::Forbidden(format!(
                "User {} may not access data of user {owner}",
                self.user_id
            )));
        }
        Ok(())
    }

    /// Resolves who owns an order being created or replaced.
    ///
    /// An absent or non-positive owner defaults to the caller; only admins may
    /// name somebody else.
    pub fn resolve_owner(&self, requested: Option<UserId>) -> Result<UserId> {
        self.ensure_registered()?;
        match requested {
            Some(owner) if owner > 0 => {
                self.ensure_can_access(owner)?;
                Ok(owner)
            }
            _ => Ok(self.user_id),
        }
    }
}
