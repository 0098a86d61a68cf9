//! Attendance outcome data model.
//!
//! An outcome is the result of reconciling one scan event or one
//! confirmation crossing. The core enforces at most one `accepted` outcome
//! per (session, identity) before any write reaches the roster gateway.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Method {
    /// Direct credential match (RFID scan).
    Primary,
    /// One-shot checkpoint image correlation.
    Secondary,
    /// Repeated confirmation in a live video session.
    VisualSession,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Primary => "primary",
            Method::Secondary => "secondary",
            Method::VisualSession => "visual-session",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "primary" => Ok(Method::Primary),
            "secondary" => Ok(Method::Secondary),
            "visual-session" => Ok(Method::VisualSession),
            _ => Err(anyhow!("unknown attendance method '{value}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Verdict {
    Accepted,
    Duplicate,
    Unknown,
    ProxySuspected,
    ProxyCleared,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Accepted => "accepted",
            Verdict::Duplicate => "duplicate",
            Verdict::Unknown => "unknown",
            Verdict::ProxySuspected => "proxy-suspected",
            Verdict::ProxyCleared => "proxy-cleared",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "accepted" => Ok(Verdict::Accepted),
            "duplicate" => Ok(Verdict::Duplicate),
            "unknown" => Ok(Verdict::Unknown),
            "proxy-suspected" => Ok(Verdict::ProxySuspected),
            "proxy-cleared" => Ok(Verdict::ProxyCleared),
            _ => Err(anyhow!("unknown verdict '{value}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceOutcome {
    pub session_id: String,
    pub identity_id: String,
    pub method: Method,
    /// 0.0–1.0. Primary acceptance is deterministic and carries 1.0.
    pub confidence: f64,
    pub decided_at: DateTime<Utc>,
    pub verdict: Verdict,
}

impl AttendanceOutcome {
    pub fn accepted(
        session_id: &str,
        identity_id: &str,
        method: Method,
        confidence: f64,
        decided_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            identity_id: identity_id.to_string(),
            method,
            confidence,
            decided_at,
            verdict: Verdict::Accepted,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.verdict == Verdict::Accepted
    }
}
