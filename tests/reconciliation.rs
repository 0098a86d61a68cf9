//! End-to-end reconciliation against the SQLite roster gateway.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::tempdir;

use rollcall::{
    AttendanceService, Channel, Identity, IdentityStatus, Method, ReconcilerConfig, Role,
    RosterGateway, ScanEvent, SessionContext, SqliteRosterGateway, Verdict, VisualDetection,
};

fn student(id: &str, credential: &str) -> Identity {
    Identity {
        identity_id: id.to_string(),
        display_name: format!("Student {id}"),
        scan_credential: credential.to_string(),
        role: Role::Student,
        status: IdentityStatus::Active,
    }
}

fn scan(session_id: &str, credential: &str) -> ScanEvent {
    ScanEvent {
        session_id: session_id.to_string(),
        scan_credential: credential.to_string(),
        reader_id: Some("door-1".to_string()),
        observed_at: Utc::now(),
    }
}

fn frame_match(session_id: &str, identity: &str, at: chrono::DateTime<Utc>) -> VisualDetection {
    VisualDetection {
        session_id: session_id.to_string(),
        matched_identity_id: Some(identity.to_string()),
        match_confidence: 0.85,
        observed_at: at,
        frame_ref: None,
    }
}

#[tokio::test]
async fn offline_class_with_proxy_check() {
    let dir = tempdir().unwrap();
    let gateway =
        Arc::new(SqliteRosterGateway::new(dir.path().join("roster.sqlite3")).unwrap());

    for identity in [
        student("p1", "TAG-A"),
        student("p2", "TAG-B"),
        student("p3", "TAG-C"),
    ] {
        gateway.upsert_identity(&identity).await.unwrap();
    }

    let service = AttendanceService::new(gateway.clone(), ReconcilerConfig::default());

    let now = Utc::now();
    let roster: HashSet<String> =
        ["p1", "p2", "p3"].iter().map(|s| s.to_string()).collect();
    service
        .open_session(SessionContext {
            session_id: "period-3".to_string(),
            channel: Channel::Offline,
            window_start: now - Duration::minutes(1),
            window_end: now + Duration::minutes(59),
            roster_scope: roster,
        })
        .await
        .unwrap();

    // Three taps, one of them an unenrolled tag.
    let batch = service
        .submit_batch(
            "period-3",
            &[
                scan("period-3", "TAG-A"),
                scan("period-3", "TAG-B"),
                scan("period-3", "TAG-Z"),
            ],
        )
        .await
        .unwrap();
    assert_eq!(batch.accepted, 2);
    assert_eq!(batch.unknown, 1);
    assert!(batch.requires_secondary_check);

    // The checkpoint image only finds p1.
    let correlation = service
        .submit_checkpoint(
            "period-3",
            &[frame_match("period-3", "p1", Utc::now())],
        )
        .await
        .unwrap();
    assert!(correlation.proxy_suspected.contains("p2"));
    assert_eq!(correlation.verified_present, 1);

    // Suspicion never revokes the primary acceptance.
    assert!(gateway
        .has_accepted_outcome("period-3", "p2")
        .await
        .unwrap());

    let settlement = service.close_session("period-3").await.unwrap();
    assert_eq!(settlement.proxy_suspected, vec!["p2".to_string()]);

    let outcomes = gateway.outcomes_for_session("period-3").await.unwrap();
    assert_eq!(outcomes.iter().filter(|o| o.is_accepted()).count(), 2);
}

#[tokio::test]
async fn accepted_outcomes_are_unique_across_channels() {
    let dir = tempdir().unwrap();
    let gateway =
        Arc::new(SqliteRosterGateway::new(dir.path().join("roster.sqlite3")).unwrap());
    gateway.upsert_identity(&student("p1", "TAG-A")).await.unwrap();

    let config = ReconcilerConfig {
        required_confirmations: 2,
        ..ReconcilerConfig::default()
    };
    let service = AttendanceService::new(gateway.clone(), config);

    let now = Utc::now();
    service
        .open_session(SessionContext {
            session_id: "hybrid-1".to_string(),
            channel: Channel::Online,
            window_start: now - Duration::minutes(1),
            window_end: now + Duration::minutes(59),
            roster_scope: ["p1".to_string()].into_iter().collect(),
        })
        .await
        .unwrap();

    // Primary acceptance lands first.
    let batch = service
        .submit_batch("hybrid-1", &[scan("hybrid-1", "TAG-A")])
        .await
        .unwrap();
    assert_eq!(batch.accepted, 1);

    // The live channel then confirms the same identity; the gateway write
    // conflicts, and the ledger keeps exactly one accepted row.
    service
        .submit_frame("hybrid-1", vec![frame_match("hybrid-1", "p1", now)])
        .await
        .unwrap();
    let ack = service
        .submit_frame(
            "hybrid-1",
            vec![frame_match("hybrid-1", "p1", now + Duration::seconds(15))],
        )
        .await
        .unwrap();
    assert_eq!(ack.newly_confirmed.len(), 1);

    let outcomes = gateway.outcomes_for_session("hybrid-1").await.unwrap();
    let accepted: Vec<_> = outcomes.iter().filter(|o| o.is_accepted()).collect();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].method, Method::Primary);

    let settlement = service.close_session("hybrid-1").await.unwrap();
    assert_eq!(settlement.confirmed.len(), 1);
}

#[tokio::test]
async fn session_stats_summarize_the_ledger() {
    let dir = tempdir().unwrap();
    let gateway =
        Arc::new(SqliteRosterGateway::new(dir.path().join("roster.sqlite3")).unwrap());
    gateway.upsert_identity(&student("p1", "TAG-A")).await.unwrap();
    gateway.upsert_identity(&student("p2", "TAG-B")).await.unwrap();

    let service = AttendanceService::new(gateway.clone(), ReconcilerConfig::default());

    let now = Utc::now();
    service
        .open_session(SessionContext {
            session_id: "s1".to_string(),
            channel: Channel::Offline,
            window_start: now - Duration::minutes(1),
            window_end: now + Duration::minutes(59),
            roster_scope: ["p1".to_string(), "p2".to_string()].into_iter().collect(),
        })
        .await
        .unwrap();

    service
        .submit_batch("s1", &[scan("s1", "TAG-A"), scan("s1", "TAG-B")])
        .await
        .unwrap();
    service
        .submit_checkpoint("s1", &[frame_match("s1", "p1", Utc::now())])
        .await
        .unwrap();

    let stats = service.session_stats("s1").await.unwrap();
    assert_eq!(stats.accepted_primary, 2);
    assert_eq!(stats.accepted_visual, 0);
    assert_eq!(stats.proxy_suspected, 1);
    assert_eq!(stats.proxy_cleared, 1);

    let outcomes = gateway.outcomes_for_session("s1").await.unwrap();
    assert!(outcomes
        .iter()
        .any(|o| o.verdict == Verdict::ProxySuspected && o.identity_id == "p2"));
}
