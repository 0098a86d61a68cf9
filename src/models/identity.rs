//! Enrolled identity data model.
//!
//! Identities are created and maintained by external roster management; the
//! reconciliation core only ever reads them through the roster gateway.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Student,
    Staff,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Staff => "staff",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "student" => Ok(Role::Student),
            "staff" => Ok(Role::Staff),
            _ => Err(anyhow!("unknown role '{value}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum IdentityStatus {
    Active,
    Inactive,
}

impl IdentityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityStatus::Active => "active",
            IdentityStatus::Inactive => "inactive",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "active" => Ok(IdentityStatus::Active),
            "inactive" => Ok(IdentityStatus::Inactive),
            _ => Err(anyhow!("unknown identity status '{value}'")),
        }
    }
}

/// One enrolled person. `scan_credential` is the RFID tag (or equivalent)
/// unique per active identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub identity_id: String,
    pub display_name: String,
    pub scan_credential: String,
    pub role: Role,
    pub status: IdentityStatus,
}

impl Identity {
    pub fn is_active(&self) -> bool {
        self.status == IdentityStatus::Active
    }
}
