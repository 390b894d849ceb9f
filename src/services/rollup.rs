use sqlx::{SqliteConnection, SqlitePool};
use std::collections::{BTreeSet, HashMap};

use crate::db;
use crate::errors::SyncResult;
use crate::models::{MatchStatus, PlayerRole};
use crate::services::pricing;
use crate::services::scoring::{self, MatchContext};
use crate::utils::round2;

const PRICE_EPSILON: f64 = 1e-9;

/// When an owner's total gets a new points snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Snapshot {
    Always,
    OnChange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRollup {
    pub player_id: String,
    pub cumulative_points: f64,
    pub matches_played: i64,
    pub price: f64,
    pub price_changed: bool,
}

#[derive(Debug, Default)]
pub struct RecalibrationReport {
    pub players: usize,
    pub owners: usize,
    /// Matches with at least one line whose points changed.
    pub rescored_matches: BTreeSet<String>,
}

/// Rebuild a player's lifetime totals and price from their full history.
/// A price change appends one price history row.
pub async fn recompute_player(
    conn: &mut SqliteConnection,
    player_id: &str,
) -> sqlx::Result<Option<PlayerRollup>> {
    let Some(player) = db::get_player(conn, player_id).await? else {
        return Ok(None);
    };

    let history = db::points_history(conn, player_id).await?;
    let completed: Vec<f64> = history
        .iter()
        .filter(|r| r.status == MatchStatus::Completed)
        .map(|r| r.points)
        .collect();

    let cumulative_points = round2(completed.iter().sum());
    let matches_played = completed.len() as i64;
    let price = pricing::price(&history);
    let price_changed = (price - player.current_price).abs() > PRICE_EPSILON;

    db::update_player_rollup(conn, player_id, cumulative_points, matches_played, price).await?;
    if price_changed {
        db::insert_price_history(conn, player_id, price).await?;
        tracing::debug!("{}: price {} -> {}", player.name, player.current_price, price);
    }

    Ok(Some(PlayerRollup {
        player_id: player_id.to_string(),
        cumulative_points,
        matches_played,
        price,
        price_changed,
    }))
}

/// Recompute the total of every league member rostering one of `player_ids`.
/// Returns the number of owners updated.
pub async fn recompute_owners(
    conn: &mut SqliteConnection,
    player_ids: &[String],
    snapshot: Snapshot,
) -> sqlx::Result<usize> {
    let owners = db::owners_of_players(conn, player_ids).await?;
    for owner_id in &owners {
        let previous = db::get_league_member(conn, owner_id)
            .await?
            .map(|m| m.total_points);
        let total = round2(db::roster_points_total(conn, owner_id).await?);

        db::set_member_total(conn, owner_id, total).await?;
        let changed = previous.map_or(true, |p| (p - total).abs() > PRICE_EPSILON);
        if snapshot == Snapshot::Always || changed {
            db::insert_points_snapshot(conn, owner_id, total).await?;
        }
    }
    Ok(owners.len())
}

/// Roll up the players touched by one match and then their owners.
pub async fn propagate(conn: &mut SqliteConnection, player_ids: &[String]) -> sqlx::Result<usize> {
    for player_id in player_ids {
        recompute_player(conn, player_id).await?;
    }
    recompute_owners(conn, player_ids, Snapshot::Always).await
}

/// Maintenance pass: rescore every stored stat line with the current
/// formula, then roll up every player and owner. Runs in one transaction.
pub async fn recalibrate_all(pool: &SqlitePool) -> SyncResult<RecalibrationReport> {
    let mut tx = pool.begin().await?;
    let mut report = RecalibrationReport::default();

    let matches: HashMap<String, _> = db::list_matches(&mut tx)
        .await?
        .into_iter()
        .map(|m| (m.id.clone(), m))
        .collect();

    let lines = db::list_stat_lines(&mut tx).await?;
    tracing::info!("Rescoring {} stat lines", lines.len());
    for line in &lines {
        let Some(match_data) = matches.get(&line.match_id) else {
            continue;
        };
        let ctx = MatchContext::for_player(match_data, line.team_id.as_deref());
        let points = scoring::score(&line.stats, &ctx);
        if (points - line.fantasy_points).abs() > PRICE_EPSILON {
            db::set_stat_line_points(&mut tx, &line.id, points).await?;
            report.rescored_matches.insert(line.match_id.clone());
        }
    }

    let player_ids = db::list_player_ids(&mut tx).await?;
    for player_id in &player_ids {
        if recompute_player(&mut tx, player_id).await?.is_some() {
            report.players += 1;
        }
    }
    report.owners = recompute_owners(&mut tx, &player_ids, Snapshot::OnChange).await?;

    tx.commit().await?;
    tracing::info!(
        "Recalibrated {} players, {} owners ({} matches rescored)",
        report.players,
        report.owners,
        report.rescored_matches.len()
    );
    Ok(report)
}

/// Majority role over the agents played. Flex on a tie for first or when
/// three or more roles were played.
pub fn dominant_role(agents: &[String]) -> PlayerRole {
    let mut tally: HashMap<PlayerRole, usize> = HashMap::new();
    for agent in agents {
        let role = PlayerRole::from_agent(agent);
        if role != PlayerRole::Flex {
            *tally.entry(role).or_default() += 1;
        }
    }
    if tally.is_empty() || tally.len() >= 3 {
        return PlayerRole::Flex;
    }

    let best = tally.values().copied().max().unwrap_or(0);
    let mut leaders = tally.iter().filter(|(_, n)| **n == best).map(|(r, _)| *r);
    match (leaders.next(), leaders.next()) {
        (Some(role), None) => role,
        _ => PlayerRole::Flex,
    }
}

/// Re-derive every player's role from the agents in their stat lines.
/// Players without any known agent keep their role. Returns the number changed.
pub async fn reassign_roles(pool: &SqlitePool) -> SyncResult<usize> {
    let mut tx = pool.begin().await?;
    let players = db::list_players(&mut tx).await?;

    let mut changed = 0usize;
    for player in &players {
        let agents = db::agents_played(&mut tx, &player.id).await?;
        if agents.is_empty() {
            continue;
        }
        let role = dominant_role(&agents);
        if role != player.role {
            tracing::info!("{}: {} -> {}", player.name, player.role.as_str(), role.as_str());
            db::set_player_role(&mut tx, &player.id, role).await?;
            changed += 1;
        }
    }

    tx.commit().await?;
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::models::{Match, MatchFormat, RawStats, Region};
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn agents(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_dominant_role() {
        assert_eq!(dominant_role(&agents(&["Jett", "Raze", "Omen"])), PlayerRole::Duelist);
        assert_eq!(dominant_role(&agents(&["Jett", "Omen"])), PlayerRole::Flex);
        assert_eq!(dominant_role(&agents(&["Jett", "Omen", "Sova"])), PlayerRole::Flex);
        assert_eq!(dominant_role(&agents(&["Unknown", "Viper"])), PlayerRole::Controller);
        assert_eq!(dominant_role(&[]), PlayerRole::Flex);
    }

    /// Two completed matches for one rostered player.
    async fn fixture(pool: &SqlitePool) -> (String, String) {
        let mut conn = pool.acquire().await.unwrap();
        let a = db::upsert_team(&mut conn, "FNATIC", Region::Emea, None).await.unwrap();
        let b = db::upsert_team(&mut conn, "NAVI", Region::Emea, None).await.unwrap();
        let player = db::insert_player_if_absent(
            &mut conn,
            "Chronicle",
            Some(a.id.as_str()),
            PlayerRole::Flex,
            Region::Emea,
            pricing::INITIAL_PRICE,
        )
        .await
        .unwrap();

        for (i, kills) in [20u32, 25].iter().enumerate() {
            let date = Utc::now() - Duration::days(10 - i as i64);
            let m = db::upsert_match(
                &mut conn,
                &Match {
                    id: Uuid::new_v4().to_string(),
                    external_id: format!("70000{}", i),
                    event_name: "Kickoff".into(),
                    source_url: format!("/70000{}/fnc-vs-navi", i),
                    team_a_id: a.id.clone(),
                    team_b_id: b.id.clone(),
                    score_a: 2,
                    score_b: 1,
                    status: MatchStatus::Completed,
                    format: MatchFormat::Bo3,
                    processed: true,
                    match_date: date,
                    updated_at: date,
                },
            )
            .await
            .unwrap();
            let stats = RawStats { kills: *kills, deaths: 15, ..Default::default() };
            // stale points on purpose; recalibration must rewrite them
            db::upsert_stat_line(&mut conn, &m.id, &player.id, Some(a.id.as_str()), Some("Viper"), &stats, 1.0)
                .await
                .unwrap();
        }

        let member = db::insert_league_member(&mut conn, "u1", "Spike Rushers").await.unwrap();
        db::add_roster_entry(&mut conn, &member.id, &player.id).await.unwrap();
        (player.id, member.id)
    }

    #[tokio::test]
    async fn test_recompute_player_from_full_history() {
        let pool = test_pool().await;
        let (player_id, _) = fixture(&pool).await;
        let mut conn = pool.acquire().await.unwrap();

        let rollup = recompute_player(&mut conn, &player_id).await.unwrap().unwrap();
        assert_eq!(rollup.matches_played, 2);
        assert_eq!(rollup.cumulative_points, 2.0);
        assert!(rollup.price_changed);

        // second pass with the same history changes nothing
        let again = recompute_player(&mut conn, &player_id).await.unwrap().unwrap();
        assert_eq!(again.price, rollup.price);
        assert!(!again.price_changed);
        assert_eq!(db::price_history(&mut conn, &player_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_propagate_snapshots_owner_total() {
        let pool = test_pool().await;
        let (player_id, member_id) = fixture(&pool).await;
        let mut conn = pool.acquire().await.unwrap();

        let owners = propagate(&mut conn, &[player_id.clone()]).await.unwrap();
        assert_eq!(owners, 1);

        let member = db::get_league_member(&mut conn, &member_id).await.unwrap().unwrap();
        assert_eq!(member.total_points, 2.0);
        assert_eq!(db::points_snapshots(&mut conn, &member_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_recalibrate_twice_is_stable() {
        let pool = test_pool().await;
        let (player_id, member_id) = fixture(&pool).await;

        let first = recalibrate_all(&pool).await.unwrap();
        assert_eq!(first.players, 1);
        assert_eq!(first.rescored_matches.len(), 2);

        let (player_after_first, member_after_first) = {
            let mut conn = pool.acquire().await.unwrap();
            (
                db::get_player(&mut conn, &player_id).await.unwrap().unwrap(),
                db::get_league_member(&mut conn, &member_id).await.unwrap().unwrap(),
            )
        };

        let second = recalibrate_all(&pool).await.unwrap();
        assert!(second.rescored_matches.is_empty());

        let mut conn = pool.acquire().await.unwrap();
        let player = db::get_player(&mut conn, &player_id).await.unwrap().unwrap();
        let member = db::get_league_member(&mut conn, &member_id).await.unwrap().unwrap();
        assert_eq!(player.cumulative_points, player_after_first.cumulative_points);
        assert_eq!(player.current_price, player_after_first.current_price);
        assert_eq!(member.total_points, member_after_first.total_points);
        assert_eq!(db::price_history(&mut conn, &player_id).await.unwrap().len(), 1);
        assert_eq!(db::points_snapshots(&mut conn, &member_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reassign_roles_from_agents() {
        let pool = test_pool().await;
        let (player_id, _) = fixture(&pool).await;

        assert_eq!(reassign_roles(&pool).await.unwrap(), 1);
        assert_eq!(reassign_roles(&pool).await.unwrap(), 0);

        let mut conn = pool.acquire().await.unwrap();
        let player = db::get_player(&mut conn, &player_id).await.unwrap().unwrap();
        assert_eq!(player.role, PlayerRole::Controller);
    }
}
