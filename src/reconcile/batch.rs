//! Batch reconciliation of primary-channel scan events.
//!
//! Turns one ordered batch of RFID scans into per-event verdicts, writes
//! accepted outcomes through the roster gateway, and scores the batch for
//! anomalies (unknown credentials, scan bursts) to decide whether a
//! secondary visual check should be requested.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ReconcilerConfig;
use crate::gateway::{RosterGateway, WriteAck};
use crate::models::{AttendanceOutcome, Method, ScanEvent, SessionContext, Verdict};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_info;

/// Per-event audit record: what each scan in the batch resolved to.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    pub scan_credential: String,
    pub identity_id: Option<String>,
    pub observed_at: DateTime<Utc>,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub session_id: String,
    /// One record per input event, in arrival order.
    pub records: Vec<ScanRecord>,
    /// Accepted outcomes written to the gateway during this call.
    pub outcomes: Vec<AttendanceOutcome>,
    pub accepted: usize,
    pub duplicates: usize,
    /// Unknown verdicts, including events rejected on input validation.
    pub unknown: usize,
    /// Subset of `unknown`: malformed or out-of-tolerance events.
    pub rejected_input: usize,
    pub unknown_rate: f64,
    pub burst_rate: f64,
    /// Set when either anomaly rate crosses its configured threshold; the
    /// sole trigger for a secondary verification checkpoint.
    pub requires_secondary_check: bool,
}

impl BatchResult {
    pub fn total(&self) -> usize {
        self.records.len()
    }

    /// Identity ids accepted in this batch.
    pub fn accepted_identities(&self) -> HashSet<String> {
        self.outcomes
            .iter()
            .filter(|o| o.is_accepted())
            .map(|o| o.identity_id.clone())
            .collect()
    }
}

/// Fraction of events whose gap to the previous scan on the same reader is
/// shorter than the configured minimum inter-scan interval. A high rate
/// suggests one person swiping a stack of tags.
fn burst_rate(events: &[ScanEvent], config: &ReconcilerConfig) -> f64 {
    if events.is_empty() {
        return 0.0;
    }

    let mut last_per_reader: HashMap<&str, DateTime<Utc>> = HashMap::new();
    let mut bursts = 0usize;

    for event in events {
        let reader = event.reader_id.as_deref().unwrap_or("");
        if let Some(previous) = last_per_reader.get(reader) {
            if event.observed_at - *previous < config.minimum_inter_scan {
                bursts += 1;
            }
        }
        last_per_reader.insert(reader, event.observed_at);
    }

    bursts as f64 / events.len() as f64
}

/// Reconcile one batch of scan events against the session roster.
///
/// Events are processed in arrival order; each one degrades to a recorded
/// verdict rather than aborting the batch. The only `Err` is gateway
/// unavailability, which is retryable: accepts already committed stand, and
/// re-submission turns them into duplicates.
pub async fn reconcile_batch<G: RosterGateway>(
    gateway: &G,
    config: &ReconcilerConfig,
    session: &SessionContext,
    events: &[ScanEvent],
) -> Result<BatchResult> {
    let mut records = Vec::with_capacity(events.len());
    let mut outcomes = Vec::new();
    let mut accepted = 0usize;
    let mut duplicates = 0usize;
    let mut unknown = 0usize;
    let mut rejected_input = 0usize;

    // Identities accepted earlier in this same batch; saves a gateway
    // round-trip for the common duplicate-tap case.
    let mut accepted_in_batch: HashSet<String> = HashSet::new();

    for event in events {
        let mut record = ScanRecord {
            scan_credential: event.scan_credential.clone(),
            identity_id: None,
            observed_at: event.observed_at,
            verdict: Verdict::Unknown,
        };

        if event.scan_credential.is_empty()
            || !session.within_tolerance(event.observed_at, config.scan_tolerance)
        {
            rejected_input += 1;
            unknown += 1;
            records.push(record);
            continue;
        }

        let identity = gateway
            .lookup_by_credential(&event.scan_credential)
            .await
            .with_context(|| {
                format!(
                    "credential lookup failed for session {}; batch is retryable",
                    session.session_id
                )
            })?;

        let Some(identity) = identity else {
            unknown += 1;
            records.push(record);
            continue;
        };

        if !identity.is_active() || !session.in_scope(&identity.identity_id) {
            unknown += 1;
            records.push(record);
            continue;
        }

        record.identity_id = Some(identity.identity_id.clone());

        let already_accepted = accepted_in_batch.contains(&identity.identity_id)
            || gateway
                .has_accepted_outcome(&session.session_id, &identity.identity_id)
                .await
                .with_context(|| {
                    format!(
                        "acceptance check failed for session {}; batch is retryable",
                        session.session_id
                    )
                })?;

        if already_accepted {
            duplicates += 1;
            record.verdict = Verdict::Duplicate;
            records.push(record);
            continue;
        }

        let outcome = AttendanceOutcome::accepted(
            &session.session_id,
            &identity.identity_id,
            Method::Primary,
            1.0,
            Utc::now(),
        );

        // The gateway write is the commit point; a conflict means a
        // concurrent batch got there first.
        match gateway.write_outcome(&outcome).await.with_context(|| {
            format!(
                "outcome write failed for session {}; batch is retryable",
                session.session_id
            )
        })? {
            WriteAck::Committed => {
                accepted += 1;
                accepted_in_batch.insert(identity.identity_id.clone());
                record.verdict = Verdict::Accepted;
                outcomes.push(outcome);
            }
            WriteAck::Conflict => {
                duplicates += 1;
                record.verdict = Verdict::Duplicate;
            }
        }

        records.push(record);
    }

    let total = events.len();
    let unknown_rate = if total == 0 {
        0.0
    } else {
        unknown as f64 / total as f64
    };
    let burst_rate = burst_rate(events, config);
    let requires_secondary_check =
        unknown_rate > config.unknown_rate_threshold || burst_rate > config.burst_threshold;

    log_info!(
        "Batch for session {}: {} events, {} accepted, {} duplicate, {} unknown ({} rejected on input), unknown_rate={:.2}, burst_rate={:.2}, secondary_check={}",
        session.session_id,
        total,
        accepted,
        duplicates,
        unknown,
        rejected_input,
        unknown_rate,
        burst_rate,
        requires_secondary_check
    );

    Ok(BatchResult {
        session_id: session.session_id.clone(),
        records,
        outcomes,
        accepted,
        duplicates,
        unknown,
        rejected_input,
        unknown_rate,
        burst_rate,
        requires_secondary_check,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use crate::gateway::MemoryRosterGateway;
    use crate::models::{Channel, Identity, IdentityStatus, Role};

    use super::*;

    fn active_student(id: &str, credential: &str) -> Identity {
        Identity {
            identity_id: id.to_string(),
            display_name: format!("Student {id}"),
            scan_credential: credential.to_string(),
            role: Role::Student,
            status: IdentityStatus::Active,
        }
    }

    fn session(roster: &[&str]) -> SessionContext {
        let now = Utc::now();
        SessionContext {
            session_id: "s1".to_string(),
            channel: Channel::Offline,
            window_start: now - Duration::minutes(5),
            window_end: now + Duration::minutes(55),
            roster_scope: roster.iter().map(|id| id.to_string()).collect(),
        }
    }

    fn scan(credential: &str, observed_at: DateTime<Utc>) -> ScanEvent {
        ScanEvent {
            session_id: "s1".to_string(),
            scan_credential: credential.to_string(),
            reader_id: Some("door-1".to_string()),
            observed_at,
        }
    }

    #[tokio::test]
    async fn known_and_unknown_credentials_split_as_expected() {
        let gateway = MemoryRosterGateway::with_identities([
            active_student("p1", "TAG-A"),
            active_student("p2", "TAG-B"),
        ]);
        let config = ReconcilerConfig::default();
        let session = session(&["p1", "p2"]);

        let t = Utc::now();
        let events = vec![
            scan("TAG-A", t),
            scan("TAG-B", t + Duration::seconds(10)),
            scan("TAG-C", t + Duration::seconds(20)),
        ];

        let result = reconcile_batch(&gateway, &config, &session, &events)
            .await
            .unwrap();

        assert_eq!(result.accepted, 2);
        assert_eq!(result.unknown, 1);
        assert_eq!(result.duplicates, 0);
        assert!((result.unknown_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(result.outcomes.len(), 2);
        assert!(result.outcomes.iter().all(|o| o.method == Method::Primary));
        assert!(result.outcomes.iter().all(|o| o.confidence == 1.0));
    }

    #[tokio::test]
    async fn resubmitted_batch_reports_duplicates() {
        let gateway = MemoryRosterGateway::with_identities([
            active_student("p1", "TAG-A"),
            active_student("p2", "TAG-B"),
        ]);
        let config = ReconcilerConfig::default();
        let session = session(&["p1", "p2"]);

        let t = Utc::now();
        let events = vec![
            scan("TAG-A", t),
            scan("TAG-B", t + Duration::seconds(10)),
            scan("TAG-C", t + Duration::seconds(20)),
        ];

        let first = reconcile_batch(&gateway, &config, &session, &events)
            .await
            .unwrap();
        assert_eq!(first.accepted, 2);

        let second = reconcile_batch(&gateway, &config, &session, &events)
            .await
            .unwrap();
        assert_eq!(second.accepted, 0);
        assert_eq!(second.duplicates, 2);
        assert_eq!(second.unknown, 1);
        assert!(second.outcomes.is_empty());

        // The accepted ledger still holds exactly one row per identity.
        let outcomes = gateway.outcomes_for_session("s1").await.unwrap();
        assert_eq!(outcomes.iter().filter(|o| o.is_accepted()).count(), 2);
    }

    #[tokio::test]
    async fn duplicate_tap_within_one_batch_is_counted_once() {
        let gateway = MemoryRosterGateway::with_identities([active_student("p1", "TAG-A")]);
        let config = ReconcilerConfig::default();
        let session = session(&["p1"]);

        let t = Utc::now();
        let events = vec![scan("TAG-A", t), scan("TAG-A", t + Duration::seconds(30))];

        let result = reconcile_batch(&gateway, &config, &session, &events)
            .await
            .unwrap();
        assert_eq!(result.accepted, 1);
        assert_eq!(result.duplicates, 1);
    }

    #[tokio::test]
    async fn inactive_and_out_of_scope_identities_are_unknown() {
        let mut inactive = active_student("p1", "TAG-A");
        inactive.status = IdentityStatus::Inactive;
        let gateway = MemoryRosterGateway::with_identities([
            inactive,
            active_student("p2", "TAG-B"),
        ]);
        let config = ReconcilerConfig::default();
        // p2 exists but is not on this session's roster.
        let session = session(&["p1"]);

        let t = Utc::now();
        let events = vec![scan("TAG-A", t), scan("TAG-B", t + Duration::seconds(5))];

        let result = reconcile_batch(&gateway, &config, &session, &events)
            .await
            .unwrap();
        assert_eq!(result.accepted, 0);
        assert_eq!(result.unknown, 2);
    }

    #[tokio::test]
    async fn out_of_tolerance_events_are_rejected_individually() {
        let gateway = MemoryRosterGateway::with_identities([active_student("p1", "TAG-A")]);
        let config = ReconcilerConfig::default();
        let session = session(&["p1"]);

        let t = Utc::now();
        let events = vec![
            scan("TAG-A", t - Duration::hours(3)),
            scan("TAG-A", t),
            scan("", t + Duration::seconds(5)),
        ];

        let result = reconcile_batch(&gateway, &config, &session, &events)
            .await
            .unwrap();
        assert_eq!(result.rejected_input, 2);
        assert_eq!(result.accepted, 1);
        assert_eq!(result.records[0].verdict, Verdict::Unknown);
        assert_eq!(result.records[1].verdict, Verdict::Accepted);
    }

    #[tokio::test]
    async fn burst_rate_flags_rapid_scans_on_one_reader() {
        let gateway = MemoryRosterGateway::with_identities([
            active_student("p1", "TAG-A"),
            active_student("p2", "TAG-B"),
            active_student("p3", "TAG-C"),
            active_student("p4", "TAG-D"),
        ]);
        let config = ReconcilerConfig::default();
        let session = session(&["p1", "p2", "p3", "p4"]);

        // Four taps within three seconds on the same reader: one person
        // swiping a stack of tags.
        let t = Utc::now();
        let events = vec![
            scan("TAG-A", t),
            scan("TAG-B", t + Duration::seconds(1)),
            scan("TAG-C", t + Duration::seconds(2)),
            scan("TAG-D", t + Duration::seconds(3)),
        ];

        let result = reconcile_batch(&gateway, &config, &session, &events)
            .await
            .unwrap();
        assert!(result.burst_rate > config.burst_threshold);
        assert!(result.requires_secondary_check);
    }

    #[tokio::test]
    async fn gateway_outage_aborts_but_committed_accepts_stand() {
        let gateway = MemoryRosterGateway::with_identities([
            active_student("p1", "TAG-A"),
            active_student("p2", "TAG-B"),
        ]);
        let config = ReconcilerConfig::default();
        let session = session(&["p1", "p2"]);

        let t = Utc::now();
        let first = reconcile_batch(&gateway, &config, &session, &[scan("TAG-A", t)])
            .await
            .unwrap();
        assert_eq!(first.accepted, 1);

        gateway.set_unavailable(true);
        let events = vec![scan("TAG-B", t + Duration::seconds(5))];
        assert!(reconcile_batch(&gateway, &config, &session, &events)
            .await
            .is_err());

        // Retry after the outage: the earlier accept is still there, the
        // new event lands cleanly.
        gateway.set_unavailable(false);
        let retry = reconcile_batch(&gateway, &config, &session, &events)
            .await
            .unwrap();
        assert_eq!(retry.accepted, 1);
        assert!(gateway.has_accepted_outcome("s1", "p1").await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_batches_accept_each_identity_exactly_once() {
        let gateway = std::sync::Arc::new(MemoryRosterGateway::with_identities([
            active_student("p1", "TAG-A"),
        ]));
        let config = ReconcilerConfig::default();
        let session = session(&["p1"]);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gateway = gateway.clone();
            let config = config.clone();
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                let events = vec![scan("TAG-A", Utc::now())];
                reconcile_batch(gateway.as_ref(), &config, &session, &events)
                    .await
                    .unwrap()
            }));
        }

        let mut total_accepted = 0;
        for handle in handles {
            total_accepted += handle.await.unwrap().accepted;
        }
        assert_eq!(total_accepted, 1);

        let outcomes = gateway.outcomes_for_session("s1").await.unwrap();
        assert_eq!(outcomes.iter().filter(|o| o.is_accepted()).count(), 1);
    }
}
