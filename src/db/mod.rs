pub mod seed;
pub use seed::seed_demo_league;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::BTreeSet;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::*;

pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    // Strip the "sqlite:" prefix to get the file path, create parent dir if needed
    let file_path = database_url
        .strip_prefix("sqlite:///")
        .or_else(|| database_url.strip_prefix("sqlite://"))
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);

    if !file_path.starts_with(":memory:") {
        if let Some(parent) = std::path::Path::new(file_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePool::connect_with(options).await?;
    Ok(pool)
}

/// Called from the CLI where no pool exists yet.
pub async fn init_database(database_url: &str) -> Result<()> {
    let pool = create_pool(database_url).await?;
    init_database_with_pool(&pool).await
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS teams (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        region TEXT NOT NULL,
        logo_url TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS players (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        team_id TEXT,
        role TEXT NOT NULL DEFAULT 'Flex',
        region TEXT NOT NULL,
        current_price REAL NOT NULL DEFAULT 10.0,
        base_price REAL NOT NULL DEFAULT 10.0,
        cumulative_points REAL NOT NULL DEFAULT 0.0,
        matches_played INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL,
        FOREIGN KEY (team_id) REFERENCES teams (id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS matches (
        id TEXT PRIMARY KEY,
        external_id TEXT NOT NULL UNIQUE,
        event_name TEXT NOT NULL,
        source_url TEXT NOT NULL,
        team_a_id TEXT NOT NULL,
        team_b_id TEXT NOT NULL,
        score_a INTEGER NOT NULL DEFAULT 0,
        score_b INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'upcoming',
        format TEXT NOT NULL DEFAULT 'Bo3',
        processed INTEGER NOT NULL DEFAULT 0,
        match_date TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        FOREIGN KEY (team_a_id) REFERENCES teams (id),
        FOREIGN KEY (team_b_id) REFERENCES teams (id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS player_stat_lines (
        id TEXT PRIMARY KEY,
        match_id TEXT NOT NULL,
        player_id TEXT NOT NULL,
        team_id TEXT,
        agent TEXT,
        kills INTEGER NOT NULL DEFAULT 0,
        deaths INTEGER NOT NULL DEFAULT 0,
        assists INTEGER NOT NULL DEFAULT 0,
        acs REAL NOT NULL DEFAULT 0.0,
        adr REAL NOT NULL DEFAULT 0.0,
        kast REAL NOT NULL DEFAULT 0.0,
        hs_percent REAL NOT NULL DEFAULT 0.0,
        rating REAL NOT NULL DEFAULT 0.0,
        first_kills INTEGER NOT NULL DEFAULT 0,
        first_deaths INTEGER NOT NULL DEFAULT 0,
        clutches_won INTEGER NOT NULL DEFAULT 0,
        fantasy_points REAL NOT NULL DEFAULT 0.0,
        UNIQUE (match_id, player_id),
        FOREIGN KEY (match_id) REFERENCES matches (id),
        FOREIGN KEY (player_id) REFERENCES players (id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS price_history (
        id TEXT PRIMARY KEY,
        player_id TEXT NOT NULL,
        price REAL NOT NULL,
        recorded_at TEXT NOT NULL,
        FOREIGN KEY (player_id) REFERENCES players (id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS league_members (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        team_name TEXT NOT NULL,
        total_points REAL NOT NULL DEFAULT 0.0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rosters (
        league_member_id TEXT NOT NULL,
        player_id TEXT NOT NULL,
        PRIMARY KEY (league_member_id, player_id),
        FOREIGN KEY (league_member_id) REFERENCES league_members (id),
        FOREIGN KEY (player_id) REFERENCES players (id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS points_snapshots (
        id TEXT PRIMARY KEY,
        league_member_id TEXT NOT NULL,
        total_points REAL NOT NULL,
        recorded_at TEXT NOT NULL,
        FOREIGN KEY (league_member_id) REFERENCES league_members (id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_matches_status ON matches(status)",
    "CREATE INDEX IF NOT EXISTS idx_stat_lines_player ON player_stat_lines(player_id)",
    "CREATE INDEX IF NOT EXISTS idx_rosters_player ON rosters(player_id)",
    "CREATE INDEX IF NOT EXISTS idx_price_history_player ON price_history(player_id, recorded_at)",
];

/// Called from the server so schema creation shares the main pool.
pub async fn init_database_with_pool(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!("Database initialized successfully");
    Ok(())
}

/// In-memory database with the schema applied. One connection, so every
/// handle sees the same database.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_database_with_pool(&pool).await.unwrap();
    pool
}

// ── Row mapping ──────────────────────────────────────────────────────────────

fn decode_err(column: &str, err: impl std::fmt::Display) -> sqlx::Error {
    sqlx::Error::Decode(format!("column {}: {}", column, err).into())
}

fn ts(row: &SqliteRow, column: &str) -> sqlx::Result<DateTime<Utc>> {
    let raw: String = row.try_get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| decode_err(column, e))
}

fn parsed<T: FromStr<Err = String>>(row: &SqliteRow, column: &str) -> sqlx::Result<T> {
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(|e| decode_err(column, e))
}

fn team_from_row(row: &SqliteRow) -> sqlx::Result<Team> {
    Ok(Team {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        region: parsed(row, "region")?,
        logo_url: row.try_get("logo_url")?,
        created_at: ts(row, "created_at")?,
    })
}

fn player_from_row(row: &SqliteRow) -> sqlx::Result<Player> {
    Ok(Player {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        team_id: row.try_get("team_id")?,
        role: parsed(row, "role")?,
        region: parsed(row, "region")?,
        current_price: row.try_get("current_price")?,
        base_price: row.try_get("base_price")?,
        cumulative_points: row.try_get("cumulative_points")?,
        matches_played: row.try_get("matches_played")?,
        updated_at: ts(row, "updated_at")?,
    })
}

fn match_from_row(row: &SqliteRow) -> sqlx::Result<Match> {
    Ok(Match {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        event_name: row.try_get("event_name")?,
        source_url: row.try_get("source_url")?,
        team_a_id: row.try_get("team_a_id")?,
        team_b_id: row.try_get("team_b_id")?,
        score_a: row.try_get::<i64, _>("score_a")? as u32,
        score_b: row.try_get::<i64, _>("score_b")? as u32,
        status: parsed(row, "status")?,
        format: parsed(row, "format")?,
        processed: row.try_get("processed")?,
        match_date: ts(row, "match_date")?,
        updated_at: ts(row, "updated_at")?,
    })
}

fn stats_from_row(row: &SqliteRow) -> sqlx::Result<RawStats> {
    let count = |c: &str| row.try_get::<i64, _>(c).map(|v| v.max(0) as u32);
    Ok(RawStats {
        kills: count("kills")?,
        deaths: count("deaths")?,
        assists: count("assists")?,
        acs: row.try_get("acs")?,
        adr: row.try_get("adr")?,
        kast: row.try_get("kast")?,
        hs_percent: row.try_get("hs_percent")?,
        rating: row.try_get("rating")?,
        first_kills: count("first_kills")?,
        first_deaths: count("first_deaths")?,
        clutches_won: count("clutches_won")?,
    })
}

fn stat_line_from_row(row: &SqliteRow) -> sqlx::Result<PlayerStatLine> {
    Ok(PlayerStatLine {
        id: row.try_get("id")?,
        match_id: row.try_get("match_id")?,
        player_id: row.try_get("player_id")?,
        team_id: row.try_get("team_id")?,
        agent: row.try_get("agent")?,
        stats: stats_from_row(row)?,
        fantasy_points: row.try_get("fantasy_points")?,
    })
}

fn member_from_row(row: &SqliteRow) -> sqlx::Result<LeagueMember> {
    Ok(LeagueMember {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        team_name: row.try_get("team_name")?,
        total_points: row.try_get("total_points")?,
    })
}

// ── Teams ────────────────────────────────────────────────────────────────────

pub async fn find_team_by_name(conn: &mut SqliteConnection, name: &str) -> sqlx::Result<Option<Team>> {
    let row = sqlx::query("SELECT * FROM teams WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(team_from_row).transpose()
}

/// Insert the team unless the name exists. A stored team without a logo
/// adopts `logo_url` when one is given.
pub async fn upsert_team(
    conn: &mut SqliteConnection,
    name: &str,
    region: Region,
    logo_url: Option<&str>,
) -> sqlx::Result<Team> {
    sqlx::query(
        r#"INSERT INTO teams (id, name, region, logo_url, created_at)
           VALUES (?, ?, ?, ?, ?)
           ON CONFLICT(name) DO UPDATE SET
               logo_url = COALESCE(teams.logo_url, excluded.logo_url)"#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(name)
    .bind(region.as_str())
    .bind(logo_url)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;

    find_team_by_name(conn, name)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

// ── Players ──────────────────────────────────────────────────────────────────

pub async fn get_player(conn: &mut SqliteConnection, player_id: &str) -> sqlx::Result<Option<Player>> {
    let row = sqlx::query("SELECT * FROM players WHERE id = ?")
        .bind(player_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(player_from_row).transpose()
}

pub async fn get_player_by_name(conn: &mut SqliteConnection, name: &str) -> sqlx::Result<Option<Player>> {
    let row = sqlx::query("SELECT * FROM players WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(player_from_row).transpose()
}

/// Create the player at the initial price if the name is new; return the
/// stored row either way.
pub async fn insert_player_if_absent(
    conn: &mut SqliteConnection,
    name: &str,
    team_id: Option<&str>,
    role: PlayerRole,
    region: Region,
    initial_price: f64,
) -> sqlx::Result<Player> {
    sqlx::query(
        r#"INSERT INTO players
           (id, name, team_id, role, region, current_price, base_price,
            cumulative_points, matches_played, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, 0.0, 0, ?)
           ON CONFLICT(name) DO NOTHING"#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(name)
    .bind(team_id)
    .bind(role.as_str())
    .bind(region.as_str())
    .bind(initial_price)
    .bind(initial_price)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;

    get_player_by_name(conn, name)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

pub async fn set_player_team(conn: &mut SqliteConnection, player_id: &str, team_id: &str) -> sqlx::Result<()> {
    sqlx::query("UPDATE players SET team_id = ?, updated_at = ? WHERE id = ?")
        .bind(team_id)
        .bind(Utc::now().to_rfc3339())
        .bind(player_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn set_player_role(conn: &mut SqliteConnection, player_id: &str, role: PlayerRole) -> sqlx::Result<()> {
    sqlx::query("UPDATE players SET role = ?, updated_at = ? WHERE id = ?")
        .bind(role.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(player_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn update_player_rollup(
    conn: &mut SqliteConnection,
    player_id: &str,
    cumulative_points: f64,
    matches_played: i64,
    current_price: f64,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"UPDATE players
           SET cumulative_points = ?, matches_played = ?, current_price = ?, updated_at = ?
           WHERE id = ?"#,
    )
    .bind(cumulative_points)
    .bind(matches_played)
    .bind(current_price)
    .bind(Utc::now().to_rfc3339())
    .bind(player_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// All players, most expensive first.
pub async fn list_players(conn: &mut SqliteConnection) -> sqlx::Result<Vec<Player>> {
    let rows = sqlx::query("SELECT * FROM players ORDER BY current_price DESC, name ASC")
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(player_from_row).collect()
}

pub async fn list_player_ids(conn: &mut SqliteConnection) -> sqlx::Result<Vec<String>> {
    let rows = sqlx::query("SELECT id FROM players ORDER BY name")
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(|r| r.try_get("id")).collect()
}

// ── Matches ──────────────────────────────────────────────────────────────────

pub async fn get_match(conn: &mut SqliteConnection, match_id: &str) -> sqlx::Result<Option<Match>> {
    let row = sqlx::query("SELECT * FROM matches WHERE id = ?")
        .bind(match_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(match_from_row).transpose()
}

pub async fn get_match_by_external_id(
    conn: &mut SqliteConnection,
    external_id: &str,
) -> sqlx::Result<Option<Match>> {
    let row = sqlx::query("SELECT * FROM matches WHERE external_id = ?")
        .bind(external_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(match_from_row).transpose()
}

pub async fn list_matches(conn: &mut SqliteConnection) -> sqlx::Result<Vec<Match>> {
    let rows = sqlx::query("SELECT * FROM matches ORDER BY match_date ASC")
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(match_from_row).collect()
}

/// Insert or refresh a match keyed by `external_id`. Teams, score, status,
/// format, date and the processed flag always take the new values; the
/// stored id is kept.
pub async fn upsert_match(conn: &mut SqliteConnection, m: &Match) -> sqlx::Result<Match> {
    sqlx::query(
        r#"INSERT INTO matches
           (id, external_id, event_name, source_url, team_a_id, team_b_id,
            score_a, score_b, status, format, processed, match_date, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(external_id) DO UPDATE SET
               event_name = excluded.event_name,
               source_url = excluded.source_url,
               team_a_id  = excluded.team_a_id,
               team_b_id  = excluded.team_b_id,
               score_a    = excluded.score_a,
               score_b    = excluded.score_b,
               status     = excluded.status,
               format     = excluded.format,
               processed  = excluded.processed,
               match_date = excluded.match_date,
               updated_at = excluded.updated_at"#,
    )
    .bind(&m.id)
    .bind(&m.external_id)
    .bind(&m.event_name)
    .bind(&m.source_url)
    .bind(&m.team_a_id)
    .bind(&m.team_b_id)
    .bind(m.score_a as i64)
    .bind(m.score_b as i64)
    .bind(m.status.as_str())
    .bind(m.format.as_str())
    .bind(m.processed)
    .bind(m.match_date.to_rfc3339())
    .bind(m.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    get_match_by_external_id(conn, &m.external_id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

pub async fn mark_match_processed(conn: &mut SqliteConnection, match_id: &str) -> sqlx::Result<()> {
    sqlx::query("UPDATE matches SET processed = 1, updated_at = ? WHERE id = ?")
        .bind(Utc::now().to_rfc3339())
        .bind(match_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

// ── Stat lines ───────────────────────────────────────────────────────────────

/// Insert or update in place the line keyed by (match, player).
pub async fn upsert_stat_line(
    conn: &mut SqliteConnection,
    match_id: &str,
    player_id: &str,
    team_id: Option<&str>,
    agent: Option<&str>,
    stats: &RawStats,
    fantasy_points: f64,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"INSERT INTO player_stat_lines
           (id, match_id, player_id, team_id, agent, kills, deaths, assists, acs, adr,
            kast, hs_percent, rating, first_kills, first_deaths, clutches_won, fantasy_points)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(match_id, player_id) DO UPDATE SET
               team_id        = excluded.team_id,
               agent          = excluded.agent,
               kills          = excluded.kills,
               deaths         = excluded.deaths,
               assists        = excluded.assists,
               acs            = excluded.acs,
               adr            = excluded.adr,
               kast           = excluded.kast,
               hs_percent     = excluded.hs_percent,
               rating         = excluded.rating,
               first_kills    = excluded.first_kills,
               first_deaths   = excluded.first_deaths,
               clutches_won   = excluded.clutches_won,
               fantasy_points = excluded.fantasy_points"#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(match_id)
    .bind(player_id)
    .bind(team_id)
    .bind(agent)
    .bind(stats.kills as i64)
    .bind(stats.deaths as i64)
    .bind(stats.assists as i64)
    .bind(stats.acs)
    .bind(stats.adr)
    .bind(stats.kast)
    .bind(stats.hs_percent)
    .bind(stats.rating)
    .bind(stats.first_kills as i64)
    .bind(stats.first_deaths as i64)
    .bind(stats.clutches_won as i64)
    .bind(fantasy_points)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Remove every line of a match, returning the players that had one.
pub async fn delete_stat_lines_for_match(
    conn: &mut SqliteConnection,
    match_id: &str,
) -> sqlx::Result<Vec<String>> {
    let rows = sqlx::query("SELECT player_id FROM player_stat_lines WHERE match_id = ?")
        .bind(match_id)
        .fetch_all(&mut *conn)
        .await?;
    let player_ids = rows
        .iter()
        .map(|r| r.try_get("player_id"))
        .collect::<sqlx::Result<Vec<String>>>()?;

    sqlx::query("DELETE FROM player_stat_lines WHERE match_id = ?")
        .bind(match_id)
        .execute(&mut *conn)
        .await?;
    Ok(player_ids)
}

/// Remove the lines of a match whose player is not in `keep`, returning the
/// players that lost a line.
pub async fn delete_stat_lines_except(
    conn: &mut SqliteConnection,
    match_id: &str,
    keep: &[String],
) -> sqlx::Result<Vec<String>> {
    let rows = sqlx::query("SELECT player_id FROM player_stat_lines WHERE match_id = ?")
        .bind(match_id)
        .fetch_all(&mut *conn)
        .await?;
    let stale = rows
        .iter()
        .map(|r| r.try_get::<String, _>("player_id"))
        .filter(|id| id.as_ref().map_or(true, |id| !keep.contains(id)))
        .collect::<sqlx::Result<Vec<String>>>()?;

    for player_id in &stale {
        sqlx::query("DELETE FROM player_stat_lines WHERE match_id = ? AND player_id = ?")
            .bind(match_id)
            .bind(player_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(stale)
}

pub async fn list_stat_lines(conn: &mut SqliteConnection) -> sqlx::Result<Vec<PlayerStatLine>> {
    let rows = sqlx::query("SELECT * FROM player_stat_lines ORDER BY match_id, player_id")
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(stat_line_from_row).collect()
}

pub async fn stat_lines_for_match(
    conn: &mut SqliteConnection,
    match_id: &str,
) -> sqlx::Result<Vec<StatLineView>> {
    let rows = sqlx::query(
        r#"SELECT s.*, p.name AS player_name
           FROM player_stat_lines s
           JOIN players p ON p.id = s.player_id
           WHERE s.match_id = ?
           ORDER BY s.fantasy_points DESC, p.name ASC"#,
    )
    .bind(match_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(StatLineView {
                player_id: row.try_get("player_id")?,
                player_name: row.try_get("player_name")?,
                team_id: row.try_get("team_id")?,
                agent: row.try_get("agent")?,
                stats: stats_from_row(row)?,
                fantasy_points: row.try_get("fantasy_points")?,
            })
        })
        .collect()
}

pub async fn set_stat_line_points(conn: &mut SqliteConnection, line_id: &str, points: f64) -> sqlx::Result<()> {
    sqlx::query("UPDATE player_stat_lines SET fantasy_points = ? WHERE id = ?")
        .bind(points)
        .bind(line_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Every stat line of a player joined with its match status and date.
pub async fn points_history(conn: &mut SqliteConnection, player_id: &str) -> sqlx::Result<Vec<PointsRecord>> {
    let rows = sqlx::query(
        r#"SELECT s.fantasy_points, m.status, m.match_date
           FROM player_stat_lines s
           JOIN matches m ON m.id = s.match_id
           WHERE s.player_id = ?
           ORDER BY m.match_date DESC"#,
    )
    .bind(player_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(PointsRecord {
                points: row.try_get("fantasy_points")?,
                status: parsed(row, "status")?,
                match_date: ts(row, "match_date")?,
            })
        })
        .collect()
}

pub async fn agents_played(conn: &mut SqliteConnection, player_id: &str) -> sqlx::Result<Vec<String>> {
    let rows = sqlx::query(
        "SELECT agent FROM player_stat_lines WHERE player_id = ? AND agent IS NOT NULL",
    )
    .bind(player_id)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(|r| r.try_get("agent")).collect()
}

// ── Price history ────────────────────────────────────────────────────────────

pub async fn insert_price_history(conn: &mut SqliteConnection, player_id: &str, price: f64) -> sqlx::Result<()> {
    sqlx::query("INSERT INTO price_history (id, player_id, price, recorded_at) VALUES (?, ?, ?, ?)")
        .bind(Uuid::new_v4().to_string())
        .bind(player_id)
        .bind(price)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn price_history(conn: &mut SqliteConnection, player_id: &str) -> sqlx::Result<Vec<PriceHistoryEntry>> {
    let rows = sqlx::query("SELECT * FROM price_history WHERE player_id = ? ORDER BY recorded_at ASC")
        .bind(player_id)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter()
        .map(|row| {
            Ok(PriceHistoryEntry {
                id: row.try_get("id")?,
                player_id: row.try_get("player_id")?,
                price: row.try_get("price")?,
                recorded_at: ts(row, "recorded_at")?,
            })
        })
        .collect()
}

// ── League members & rosters ─────────────────────────────────────────────────

pub async fn insert_league_member(
    conn: &mut SqliteConnection,
    user_id: &str,
    team_name: &str,
) -> sqlx::Result<LeagueMember> {
    let member = LeagueMember {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        team_name: team_name.to_string(),
        total_points: 0.0,
    };
    sqlx::query("INSERT INTO league_members (id, user_id, team_name, total_points) VALUES (?, ?, ?, ?)")
        .bind(&member.id)
        .bind(&member.user_id)
        .bind(&member.team_name)
        .bind(member.total_points)
        .execute(&mut *conn)
        .await?;
    Ok(member)
}

pub async fn get_league_member(conn: &mut SqliteConnection, member_id: &str) -> sqlx::Result<Option<LeagueMember>> {
    let row = sqlx::query("SELECT * FROM league_members WHERE id = ?")
        .bind(member_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(member_from_row).transpose()
}

pub async fn list_league_members(conn: &mut SqliteConnection) -> sqlx::Result<Vec<LeagueMember>> {
    let rows = sqlx::query("SELECT * FROM league_members ORDER BY total_points DESC, team_name ASC")
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(member_from_row).collect()
}

pub async fn add_roster_entry(conn: &mut SqliteConnection, member_id: &str, player_id: &str) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO rosters (league_member_id, player_id) VALUES (?, ?) ON CONFLICT DO NOTHING",
    )
    .bind(member_id)
    .bind(player_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// League members whose roster holds any of `player_ids`.
pub async fn owners_of_players(
    conn: &mut SqliteConnection,
    player_ids: &[String],
) -> sqlx::Result<BTreeSet<String>> {
    let mut owners = BTreeSet::new();
    for player_id in player_ids {
        let rows = sqlx::query("SELECT league_member_id FROM rosters WHERE player_id = ?")
            .bind(player_id)
            .fetch_all(&mut *conn)
            .await?;
        for row in rows {
            owners.insert(row.try_get("league_member_id")?);
        }
    }
    Ok(owners)
}

pub async fn roster_points_total(conn: &mut SqliteConnection, member_id: &str) -> sqlx::Result<f64> {
    let row = sqlx::query(
        r#"SELECT COALESCE(SUM(p.cumulative_points), 0.0) AS total
           FROM rosters r
           JOIN players p ON p.id = r.player_id
           WHERE r.league_member_id = ?"#,
    )
    .bind(member_id)
    .fetch_one(&mut *conn)
    .await?;
    row.try_get("total")
}

pub async fn set_member_total(conn: &mut SqliteConnection, member_id: &str, total: f64) -> sqlx::Result<()> {
    sqlx::query("UPDATE league_members SET total_points = ? WHERE id = ?")
        .bind(total)
        .bind(member_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn insert_points_snapshot(conn: &mut SqliteConnection, member_id: &str, total: f64) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO points_snapshots (id, league_member_id, total_points, recorded_at) VALUES (?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(member_id)
    .bind(total)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn points_snapshots(conn: &mut SqliteConnection, member_id: &str) -> sqlx::Result<Vec<PointsSnapshot>> {
    let rows = sqlx::query(
        "SELECT * FROM points_snapshots WHERE league_member_id = ? ORDER BY recorded_at ASC",
    )
    .bind(member_id)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter()
        .map(|row| {
            Ok(PointsSnapshot {
                id: row.try_get("id")?,
                league_member_id: row.try_get("league_member_id")?,
                total_points: row.try_get("total_points")?,
                recorded_at: ts(row, "recorded_at")?,
            })
        })
        .collect()
}
