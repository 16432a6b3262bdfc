use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use utoipa::ToSchema;

use super::UserId;

/// Marketplace role held by a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Role {
    /// Guest booking accommodations.
    #[serde(rename = "ROLE_CLIENT")]
    Client,
    /// Host owning accommodations.
    #[serde(rename = "ROLE_OWNER")]
    Owner,
    /// Back-office administrator.
    #[serde(rename = "ROLE_ADMIN")]
    Admin,
}

impl Role {
    /// Wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Client => "ROLE_CLIENT",
            Role::Owner => "ROLE_OWNER",
            Role::Admin => "ROLE_ADMIN",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ROLE_CLIENT" | "CLIENT" => Ok(Role::Client),
            "ROLE_OWNER" | "OWNER" => Ok(Role::Owner),
            "ROLE_ADMIN" | "ADMIN" => Ok(Role::Admin),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// An authenticated identity making a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// User identifier.
    pub id: UserId,
    /// Name shown to the other participant.
    pub display_name: String,
    /// Roles granted to the user.
    pub roles: Vec<Role>,
}

impl Principal {
    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Clients and owners take part in conversations; admins only observe.
    #[must_use]
    pub fn is_participant_role(&self) -> bool {
        self.has_role(Role::Client) || self.has_role(Role::Owner)
    }

    #[must_use]
    pub fn summary(&self) -> ParticipantSummary {
        ParticipantSummary {
            id: self.id,
            display_name: self.display_name.clone(),
            roles: self.roles.clone(),
        }
    }
}

/// Public view of a participant embedded in published payloads.
///
/// Only identity fields are carried; contact details and credentials never
/// leave the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSummary {
    pub id: UserId,
    pub display_name: String,
    #[serde(default)]
    pub roles: Vec<Role>,
}

/// Response of `GET /api/mercure-token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HubCredentials {
    /// Signed subscription token.
    pub token: String,
    /// URL subscribers connect to.
    #[serde(rename = "mercureHubUrl")]
    pub hub_url: String,
}
