use anyhow::{ensure, Context};
use commonware_codec::{DecodeExt, Encode};
use rusqlite::{params, Connection, OptionalExtension};
use slotfloor_execution::{MembershipChange, PlayCommit, Store};
use slotfloor_types::{
    BalanceSnapshot, BonusKind, GlobalAggregate, PlayerAggregate, TeamAggregate, TeamProfile,
};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// SQLite-backed [`Store`]. Player and team profiles are codec blobs; every balance and
/// counter moved by a play is an integer column updated additively.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("open slot database")?;
        init_schema_sqlite(&conn)?;
        info!(path = %path.display(), "slot database opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Nothing survives the process.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory slot database")?;
        init_schema_sqlite(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, action: &'static str, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> anyhow::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = match conn.lock() {
                Ok(conn) => conn,
                Err(poisoned) => {
                    warn!("slot database lock poisoned; recovering");
                    poisoned.into_inner()
                }
            };
            f(&mut conn)
        })
        .await
        .context("slot database task failed")?
        .context(action)
    }
}

fn init_schema_sqlite(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         CREATE TABLE IF NOT EXISTS players (
             player_id TEXT PRIMARY KEY,
             record BLOB NOT NULL
         );
         CREATE TABLE IF NOT EXISTS teams (
             team_id TEXT PRIMARY KEY,
             profile BLOB NOT NULL,
             total INTEGER NOT NULL,
             period INTEGER NOT NULL,
             period_started_at INTEGER NOT NULL
         );
         CREATE TABLE IF NOT EXISTS global_stats (
             id INTEGER PRIMARY KEY CHECK (id = 1),
             total_players INTEGER NOT NULL,
             total_plays INTEGER NOT NULL,
             total_big INTEGER NOT NULL,
             total_reg INTEGER NOT NULL,
             total INTEGER NOT NULL,
             period INTEGER NOT NULL,
             period_started_at INTEGER NOT NULL
         );",
    )
    .context("init slot database schema")?;
    Ok(())
}

fn upsert_player(conn: &Connection, player_id: &str, record: &[u8]) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO players (player_id, record) VALUES (?1, ?2)
         ON CONFLICT(player_id) DO UPDATE SET record = excluded.record",
        params![player_id, record],
    )?;
    Ok(())
}

struct EncodedPlayer {
    player_id: String,
    record: Vec<u8>,
}

impl From<&PlayerAggregate> for EncodedPlayer {
    fn from(player: &PlayerAggregate) -> Self {
        Self {
            player_id: player.player_id.clone(),
            record: player.encode().to_vec(),
        }
    }
}

impl Store for SqliteStore {
    async fn load_players(&self) -> anyhow::Result<Vec<PlayerAggregate>> {
        self.with_conn("load players", |conn| {
            let mut stmt = conn.prepare("SELECT player_id, record FROM players")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?;
            let mut players = Vec::new();
            for row in rows {
                let (player_id, bytes) = row?;
                let player = PlayerAggregate::decode(&mut bytes.as_slice())
                    .with_context(|| format!("decode player {player_id}"))?;
                players.push(player);
            }
            Ok(players)
        })
        .await
    }

    async fn load_teams(&self) -> anyhow::Result<Vec<TeamAggregate>> {
        self.with_conn("load teams", |conn| {
            let mut stmt = conn
                .prepare("SELECT team_id, profile, total, period, period_started_at FROM teams")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?;
            let mut teams = Vec::new();
            for row in rows {
                let (team_id, bytes, total, period, started_at) = row?;
                let profile = TeamProfile::decode(&mut bytes.as_slice())
                    .with_context(|| format!("decode team {team_id}"))?;
                teams.push(TeamAggregate {
                    profile,
                    balance: BalanceSnapshot {
                        total,
                        period,
                        period_started_at: started_at as u64,
                    },
                });
            }
            Ok(teams)
        })
        .await
    }

    async fn load_global(&self) -> anyhow::Result<Option<GlobalAggregate>> {
        self.with_conn("load global aggregate", |conn| {
            let global = conn
                .query_row(
                    "SELECT total_players, total_plays, total_big, total_reg, total, period,
                            period_started_at
                     FROM global_stats WHERE id = 1",
                    [],
                    |row| {
                        Ok(GlobalAggregate {
                            total_players: row.get::<_, i64>(0)? as u64,
                            total_plays: row.get::<_, i64>(1)? as u64,
                            total_big: row.get::<_, i64>(2)? as u64,
                            total_reg: row.get::<_, i64>(3)? as u64,
                            balance: BalanceSnapshot {
                                total: row.get(4)?,
                                period: row.get(5)?,
                                period_started_at: row.get::<_, i64>(6)? as u64,
                            },
                        })
                    },
                )
                .optional()?;
            Ok(global)
        })
        .await
    }

    async fn create_global(&self, global: &GlobalAggregate) -> anyhow::Result<()> {
        let global = global.clone();
        self.with_conn("create global aggregate", move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO global_stats
                     (id, total_players, total_plays, total_big, total_reg, total, period,
                      period_started_at)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    global.total_players as i64,
                    global.total_plays as i64,
                    global.total_big as i64,
                    global.total_reg as i64,
                    global.balance.total,
                    global.balance.period,
                    global.balance.period_started_at as i64,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn create_player(&self, player: &PlayerAggregate) -> anyhow::Result<()> {
        let player = EncodedPlayer::from(player);
        self.with_conn("create player", move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO players (player_id, record) VALUES (?1, ?2)",
                params![player.player_id, player.record],
            )?;
            let updated = tx.execute(
                "UPDATE global_stats SET total_players = total_players + 1 WHERE id = 1",
                [],
            )?;
            ensure!(updated == 1, "global aggregate missing");
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn save_player(&self, player: &PlayerAggregate) -> anyhow::Result<()> {
        let player = EncodedPlayer::from(player);
        self.with_conn("save player", move |conn| {
            upsert_player(conn, &player.player_id, &player.record)
        })
        .await
    }

    async fn apply_membership(&self, change: &MembershipChange) -> anyhow::Result<()> {
        let players: Vec<EncodedPlayer> = change.players.iter().map(EncodedPlayer::from).collect();
        let teams: Vec<(String, Vec<u8>, i64)> = change
            .upsert_teams
            .iter()
            .map(|profile| {
                (
                    profile.team_id.clone(),
                    profile.encode().to_vec(),
                    profile.created_at as i64,
                )
            })
            .collect();
        let deletes = change.delete_teams.clone();
        self.with_conn("apply membership", move |conn| {
            let tx = conn.transaction()?;
            for player in &players {
                upsert_player(&tx, &player.player_id, &player.record)?;
            }
            for (team_id, profile, created_at) in &teams {
                tx.execute(
                    "INSERT INTO teams (team_id, profile, total, period, period_started_at)
                     VALUES (?1, ?2, 0, 0, ?3)
                     ON CONFLICT(team_id) DO UPDATE SET profile = excluded.profile",
                    params![team_id, profile, created_at],
                )?;
            }
            for team_id in &deletes {
                tx.execute("DELETE FROM teams WHERE team_id = ?1", params![team_id])?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn commit_play(&self, commit: &PlayCommit) -> anyhow::Result<()> {
        let player = EncodedPlayer::from(&commit.player);
        let team_id = commit.team_id.clone();
        let delta = commit.delta;
        let plays = commit.plays as i64;
        let (big, reg) = match commit.bonus {
            Some(BonusKind::Big) => (1i64, 0i64),
            Some(BonusKind::Reg) => (0, 1),
            None => (0, 0),
        };
        self.with_conn("commit play", move |conn| {
            let tx = conn.transaction()?;
            upsert_player(&tx, &player.player_id, &player.record)?;
            if let Some(team_id) = &team_id {
                let updated = tx.execute(
                    "UPDATE teams SET total = total + ?1, period = period + ?1 WHERE team_id = ?2",
                    params![delta, team_id],
                )?;
                ensure!(updated == 1, "team {team_id} missing");
            }
            let updated = tx.execute(
                "UPDATE global_stats
                 SET total = total + ?1, period = period + ?1, total_plays = total_plays + ?2,
                     total_big = total_big + ?3, total_reg = total_reg + ?4
                 WHERE id = 1",
                params![delta, plays, big, reg],
            )?;
            ensure!(updated == 1, "global aggregate missing");
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn reset_team_period(&self, team_id: &str, started_at: u64) -> anyhow::Result<()> {
        let team_id = team_id.to_string();
        self.with_conn("reset team period", move |conn| {
            let updated = conn.execute(
                "UPDATE teams SET period = 0, period_started_at = ?1 WHERE team_id = ?2",
                params![started_at as i64, team_id],
            )?;
            ensure!(updated == 1, "team {team_id} missing");
            Ok(())
        })
        .await
    }

    async fn reset_global_period(&self, started_at: u64) -> anyhow::Result<()> {
        self.with_conn("reset global period", move |conn| {
            let updated = conn.execute(
                "UPDATE global_stats SET period = 0, period_started_at = ?1 WHERE id = 1",
                params![started_at as i64],
            )?;
            ensure!(updated == 1, "global aggregate missing");
            Ok(())
        })
        .await
    }
}
