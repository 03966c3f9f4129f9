use anyhow::{bail, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::logging::{log, obj, v_str, Domain, Level};
use crate::snapshot::EngineSnapshot;

/// Optional SQLite persistence for engine snapshots. The engine itself is
/// purely in-memory; hosts that want state to survive restarts save here.
pub struct SnapshotStore {
    conn: Connection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSnapshot {
    pub id: i64,
    pub ts: u64,
    pub agent_id: String,
    pub state_hash: String,
}

impl SnapshotStore {
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self { conn: Connection::open(path)? })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts INTEGER NOT NULL,
                agent_id TEXT NOT NULL,
                state_hash TEXT NOT NULL,
                balance INTEGER NOT NULL,
                trust REAL NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS snapshots_agent ON snapshots (agent_id, id);
            COMMIT;",
        )?;
        Ok(())
    }

    pub fn save(&mut self, snapshot: &EngineSnapshot) -> Result<i64> {
        let body = serde_json::to_string(snapshot)?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO snapshots (ts, agent_id, state_hash, balance, trust, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                snapshot.exported_at as i64,
                snapshot.agent_id,
                snapshot.state_hash,
                snapshot.account.balance() as i64,
                snapshot.trust.trust,
                body
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        log(
            Level::Info,
            Domain::Storage,
            "snapshot_saved",
            obj(&[
                ("agent_id", v_str(&snapshot.agent_id)),
                ("state_hash", v_str(&snapshot.state_hash)),
                ("row", serde_json::json!(id)),
            ]),
        );
        Ok(id)
    }

    /// Most recent snapshot for the agent, validated before it is returned.
    pub fn load_latest(&self, agent_id: &str) -> Result<Option<EngineSnapshot>> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT body, state_hash FROM snapshots WHERE agent_id = ?1 ORDER BY id DESC LIMIT 1",
                params![agent_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let Some((body, state_hash)) = row else {
            return Ok(None);
        };
        let snapshot = EngineSnapshot::from_json(&body)?;
        if snapshot.state_hash != state_hash {
            bail!("snapshot row hash {} does not match body {}", state_hash, snapshot.state_hash);
        }
        snapshot.validate()?;
        Ok(Some(snapshot))
    }

    pub fn history(&self, agent_id: &str) -> Result<Vec<StoredSnapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, ts, agent_id, state_hash FROM snapshots WHERE agent_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![agent_id], |r| {
            Ok(StoredSnapshot {
                id: r.get(0)?,
                ts: r.get::<_, i64>(1)?.max(0) as u64,
                agent_id: r.get(2)?,
                state_hash: r.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
