//! SQLite-backed roster gateway.
//!
//! A dedicated worker thread owns the `rusqlite` connection; callers submit
//! closures over a channel and await the reply on a oneshot. This keeps the
//! connection single-threaded while the async side stays free of blocking
//! calls. The accepted-outcome invariant is a partial unique index, so the
//! conditional write is a plain INSERT whose constraint violation maps to
//! [`WriteAck::Conflict`].

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info};
use rusqlite::{params, Connection, ErrorCode};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::models::{AttendanceOutcome, Identity, IdentityStatus, Method, Role, Verdict};

use super::{RosterGateway, WriteAck};

const CURRENT_SCHEMA_VERSION: i32 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE identities (
    identity_id      TEXT PRIMARY KEY,
    display_name     TEXT NOT NULL,
    scan_credential  TEXT NOT NULL UNIQUE,
    role             TEXT NOT NULL,
    status           TEXT NOT NULL
);

CREATE TABLE attendance_outcomes (
    id           TEXT PRIMARY KEY,
    session_id   TEXT NOT NULL,
    identity_id  TEXT NOT NULL,
    method       TEXT NOT NULL,
    confidence   REAL NOT NULL,
    verdict      TEXT NOT NULL,
    decided_at   TEXT NOT NULL
);

CREATE UNIQUE INDEX idx_outcomes_accepted
    ON attendance_outcomes (session_id, identity_id)
    WHERE verdict = 'accepted';

CREATE INDEX idx_outcomes_session
    ON attendance_outcomes (session_id, decided_at);
";

fn run_migrations(conn: &mut Connection) -> Result<()> {
    let mut version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;

    if version > CURRENT_SCHEMA_VERSION {
        bail!(
            "database version ({}) is newer than supported schema ({})",
            version,
            CURRENT_SCHEMA_VERSION
        );
    }

    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;

    while version < CURRENT_SCHEMA_VERSION {
        let next_version = version + 1;
        match next_version {
            1 => tx
                .execute_batch(SCHEMA_V1)
                .context("failed to apply schema v1")?,
            _ => bail!("unknown migration target version: {next_version}"),
        }
        version = next_version;
    }

    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    Ok(())
}

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct GatewayInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for GatewayInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to roster DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join roster DB thread: {join_err:?}");
            }
        }
    }
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid datetime '{value}': {err}"))
}

#[derive(Clone)]
pub struct SqliteRosterGateway {
    inner: Arc<GatewayInner>,
    db_path: Arc<PathBuf>,
}

impl SqliteRosterGateway {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("rollcall-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite database")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }
                if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
                    error!("Failed to enable foreign keys: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run roster migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("Roster DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Roster DB thread shutting down");
            })
            .with_context(|| "failed to spawn roster DB worker thread")?;

        ready_rx
            .recv()
            .context("roster DB worker exited before signaling readiness")??;

        info!("Roster gateway initialized at {}", db_path.display());

        Ok(Self {
            inner: Arc::new(GatewayInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Roster DB caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to roster DB thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("roster DB thread terminated unexpectedly"))?
    }

    /// Insert or replace one identity. Roster management is external to the
    /// core; this surface exists so embedders and tests can seed rosters.
    pub async fn upsert_identity(&self, identity: &Identity) -> Result<()> {
        let record = identity.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO identities (identity_id, display_name, scan_credential, role, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(identity_id) DO UPDATE SET
                     display_name = excluded.display_name,
                     scan_credential = excluded.scan_credential,
                     role = excluded.role,
                     status = excluded.status",
                params![
                    record.identity_id,
                    record.display_name,
                    record.scan_credential,
                    record.role.as_str(),
                    record.status.as_str(),
                ],
            )
            .with_context(|| "failed to upsert identity")?;
            Ok(())
        })
        .await
    }
}

fn outcome_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, f64, String, String)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

impl RosterGateway for SqliteRosterGateway {
    async fn lookup_by_credential(&self, credential: &str) -> Result<Option<Identity>> {
        let credential = credential.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT identity_id, display_name, scan_credential, role, status
                 FROM identities
                 WHERE scan_credential = ?1",
            )?;

            let mut rows = stmt.query(params![credential])?;
            let Some(row) = rows.next()? else {
                return Ok(None);
            };

            let role: String = row.get(3)?;
            let status: String = row.get(4)?;

            Ok(Some(Identity {
                identity_id: row.get(0)?,
                display_name: row.get(1)?,
                scan_credential: row.get(2)?,
                role: Role::parse(&role)?,
                status: IdentityStatus::parse(&status)?,
            }))
        })
        .await
    }

    async fn has_accepted_outcome(&self, session_id: &str, identity_id: &str) -> Result<bool> {
        let session_id = session_id.to_string();
        let identity_id = identity_id.to_string();
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM attendance_outcomes
                 WHERE session_id = ?1 AND identity_id = ?2 AND verdict = 'accepted'",
                params![session_id, identity_id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    async fn write_outcome(&self, outcome: &AttendanceOutcome) -> Result<WriteAck> {
        let record = outcome.clone();
        self.execute(move |conn| {
            let result = conn.execute(
                "INSERT INTO attendance_outcomes
                    (id, session_id, identity_id, method, confidence, verdict, decided_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    Uuid::new_v4().to_string(),
                    record.session_id,
                    record.identity_id,
                    record.method.as_str(),
                    record.confidence,
                    record.verdict.as_str(),
                    record.decided_at.to_rfc3339(),
                ],
            );

            match result {
                Ok(_) => Ok(WriteAck::Committed),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    // The partial unique index on accepted rows fired:
                    // another writer already committed this pair.
                    Ok(WriteAck::Conflict)
                }
                Err(err) => Err(anyhow::Error::new(err).context("failed to write outcome")),
            }
        })
        .await
    }

    async fn outcomes_for_session(&self, session_id: &str) -> Result<Vec<AttendanceOutcome>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, identity_id, method, confidence, verdict, decided_at
                 FROM attendance_outcomes
                 WHERE session_id = ?1
                 ORDER BY decided_at ASC",
            )?;

            let rows = stmt.query_map(params![session_id], outcome_from_row)?;

            let mut outcomes = Vec::new();
            for row in rows {
                let (session_id, identity_id, method, confidence, verdict, decided_at) = row?;
                outcomes.push(AttendanceOutcome {
                    session_id,
                    identity_id,
                    method: Method::parse(&method)?,
                    confidence,
                    decided_at: parse_datetime(&decided_at)?,
                    verdict: Verdict::parse(&verdict)?,
                });
            }
            Ok(outcomes)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::Utc;
    use tempfile::tempdir;

    use super::*;

    fn identity(id: &str, credential: &str) -> Identity {
        Identity {
            identity_id: id.to_string(),
            display_name: format!("Student {id}"),
            scan_credential: credential.to_string(),
            role: Role::Student,
            status: IdentityStatus::Active,
        }
    }

    fn open_gateway(dir: &tempfile::TempDir) -> SqliteRosterGateway {
        SqliteRosterGateway::new(dir.path().join("roster.sqlite3")).unwrap()
    }

    #[tokio::test]
    async fn lookup_resolves_seeded_identity() {
        let dir = tempdir().unwrap();
        let gateway = open_gateway(&dir);

        gateway.upsert_identity(&identity("p1", "RFID-001")).await.unwrap();

        let found = gateway.lookup_by_credential("RFID-001").await.unwrap();
        assert_eq!(found.unwrap().identity_id, "p1");

        let missing = gateway.lookup_by_credential("RFID-999").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn accepted_write_is_write_once() {
        let dir = tempdir().unwrap();
        let gateway = open_gateway(&dir);

        let outcome =
            AttendanceOutcome::accepted("s1", "p1", Method::Primary, 1.0, Utc::now());

        assert_eq!(
            gateway.write_outcome(&outcome).await.unwrap(),
            WriteAck::Committed
        );
        assert_eq!(
            gateway.write_outcome(&outcome).await.unwrap(),
            WriteAck::Conflict
        );
        assert!(gateway.has_accepted_outcome("s1", "p1").await.unwrap());
    }

    #[tokio::test]
    async fn non_accepted_verdicts_do_not_conflict() {
        let dir = tempdir().unwrap();
        let gateway = open_gateway(&dir);

        let accepted =
            AttendanceOutcome::accepted("s1", "p1", Method::Primary, 1.0, Utc::now());
        gateway.write_outcome(&accepted).await.unwrap();

        let suspected = AttendanceOutcome {
            verdict: Verdict::ProxySuspected,
            method: Method::Secondary,
            confidence: 0.4,
            ..accepted.clone()
        };
        assert_eq!(
            gateway.write_outcome(&suspected).await.unwrap(),
            WriteAck::Committed
        );

        let outcomes = gateway.outcomes_for_session("s1").await.unwrap();
        assert_eq!(outcomes.len(), 2);
        let verdicts: HashSet<_> = outcomes.iter().map(|o| o.verdict).collect();
        assert!(verdicts.contains(&Verdict::Accepted));
        assert!(verdicts.contains(&Verdict::ProxySuspected));
    }

    #[tokio::test]
    async fn concurrent_accepted_writes_commit_exactly_once() {
        let dir = tempdir().unwrap();
        let gateway = open_gateway(&dir);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gateway = gateway.clone();
            handles.push(tokio::spawn(async move {
                let outcome =
                    AttendanceOutcome::accepted("s1", "p1", Method::Primary, 1.0, Utc::now());
                gateway.write_outcome(&outcome).await.unwrap()
            }));
        }

        let mut committed = 0;
        for handle in handles {
            if handle.await.unwrap() == WriteAck::Committed {
                committed += 1;
            }
        }
        assert_eq!(committed, 1);
    }
}
