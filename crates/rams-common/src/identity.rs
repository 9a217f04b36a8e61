//! Identity context
//!
//! Authentication happens upstream of the audit core. Whatever authenticates a
//! request injects an [`Actor`] into the request extensions. A gateway may
//! forward the `x-user-id` / `x-user-role` headers instead, which the server
//! honours only when configured to trust them. This module only models that
//! input.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CommonError;

/// Header carrying the authenticated user id, set by a trusted gateway
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying the authenticated user role, set by a trusted gateway
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Role of an authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full administrative access, including audit analytics and retention
    Admin,
    /// Read-only access to the audit trail
    Auditor,
    /// Research office staff managing projects and grants
    Manager,
    /// Regular researcher
    #[default]
    Researcher,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Auditor => "auditor",
            Self::Manager => "manager",
            Self::Researcher => "researcher",
        }
    }

    /// Whether this role may list and read individual audit records
    pub fn can_read_audit(&self) -> bool {
        matches!(self, Self::Admin | Self::Auditor)
    }

    /// Whether this role may run analytics, exports and retention cleanup
    pub fn is_privileged(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl FromStr for Role {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "auditor" => Ok(Self::Auditor),
            "manager" => Ok(Self::Manager),
            "researcher" => Ok(Self::Researcher),
            other => Err(CommonError::InvalidRole(other.to_string())),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Authenticated caller of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }

    /// Build an actor from raw header values.
    ///
    /// A missing role defaults to [`Role::Researcher`]; a missing or malformed
    /// id is an error.
    pub fn from_header_values(id: Option<&str>, role: Option<&str>) -> Result<Self, CommonError> {
        let raw_id = id.ok_or_else(|| CommonError::InvalidActorId("missing".to_string()))?;
        let id = Uuid::parse_str(raw_id.trim())
            .map_err(|_| CommonError::InvalidActorId(raw_id.to_string()))?;
        let role = match role {
            Some(raw) => raw.parse()?,
            None => Role::default(),
        };
        Ok(Self { id, role })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(" Auditor ".parse::<Role>().unwrap(), Role::Auditor);
        assert!(matches!(
            "superuser".parse::<Role>(),
            Err(CommonError::InvalidRole(_))
        ));
    }

    #[test]
    fn test_role_permissions() {
        assert!(Role::Admin.is_privileged());
        assert!(Role::Admin.can_read_audit());
        assert!(Role::Auditor.can_read_audit());
        assert!(!Role::Auditor.is_privileged());
        assert!(!Role::Manager.can_read_audit());
        assert!(!Role::Researcher.can_read_audit());
    }

    #[test]
    fn test_actor_from_headers() {
        let id = Uuid::new_v4();
        let actor = Actor::from_header_values(Some(&id.to_string()), Some("admin")).unwrap();
        assert_eq!(actor.id, id);
        assert_eq!(actor.role, Role::Admin);

        let actor = Actor::from_header_values(Some(&id.to_string()), None).unwrap();
        assert_eq!(actor.role, Role::Researcher);

        assert!(Actor::from_header_values(None, Some("admin")).is_err());
        assert!(Actor::from_header_values(Some("not-a-uuid"), None).is_err());
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&Role::Auditor).unwrap();
        assert_eq!(json, r#""auditor""#);
    }
}
