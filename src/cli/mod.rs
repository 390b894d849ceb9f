use anyhow::{anyhow, Result};
use sqlx::SqlitePool;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::db::{self, create_pool, init_database_with_pool, list_players, seed_demo_league};
use crate::models::{EventDescriptor, Player, Region};
use crate::services::{CacheCoordinator, CacheStore, Fetcher, SyncService};

/// Pool with schema applied, plus the sync service wired to it.
pub async fn build_service(settings: &Settings, cancel: CancellationToken) -> Result<(SqlitePool, SyncService)> {
    let pool = create_pool(&settings.database_url).await?;
    init_database_with_pool(&pool).await?;

    let fetcher = Fetcher::new(settings)?;
    let store = CacheStore::connect(settings.redis_url.as_deref()).await;
    let cache = CacheCoordinator::new(store, settings.players_cache_ttl);
    let service = SyncService::new(pool.clone(), fetcher, cache, settings.throttle, cancel);
    Ok((pool, service))
}

/// Event from `--event/--name/--region`; the name defaults to the path.
pub fn event_from_args(path: String, name: Option<String>, region: &str) -> Result<EventDescriptor> {
    let region: Region = region.parse().map_err(|e: String| anyhow!(e))?;
    Ok(EventDescriptor {
        name: name.unwrap_or_else(|| path.clone()),
        path,
        region,
    })
}

pub async fn sync(service: &SyncService, event: Option<EventDescriptor>) -> Result<()> {
    let processed = match event {
        Some(event) => {
            println!("📥 Syncing {} ({})...", event.name, event.region.as_str());
            service.sync_event(&event).await
        }
        None => {
            println!("📥 Syncing every Kickoff event...");
            service.sync_all().await
        }
    };
    println!("✅ {} matches processed", processed);
    Ok(())
}

pub async fn resync(service: &SyncService, external_ids: &[String], event: EventDescriptor) -> Result<()> {
    if external_ids.is_empty() {
        println!("❌ Give at least one match id, e.g. vctsync resync 598939 --region EMEA");
        return Ok(());
    }
    println!("🔁 Re-syncing {} matches...", external_ids.len());
    let processed = service.resync_matches(external_ids, &event).await;
    println!("✅ {} of {} matches rewritten", processed, external_ids.len());
    Ok(())
}

pub async fn recalibrate(service: &SyncService) -> Result<()> {
    println!("🧮 Rescoring every stat line with the current formula...");
    let report = service.recalibrate_all().await?;
    println!(
        "✅ {} players, {} league members, {} matches with changed points",
        report.players,
        report.owners,
        report.rescored_matches.len()
    );
    Ok(())
}

pub async fn reassign_roles(service: &SyncService) -> Result<()> {
    let changed = service.reassign_roles().await?;
    println!("✅ {} player roles updated", changed);
    Ok(())
}

pub async fn leaderboard(pool: &SqlitePool, limit: usize, csv_path: Option<&Path>) -> Result<()> {
    let players = {
        let mut conn = pool.acquire().await?;
        list_players(&mut conn).await?
    };
    let top: Vec<Player> = players.into_iter().take(limit).collect();

    if top.is_empty() {
        println!("📭 No players stored yet. Try: vctsync sync --all");
        return Ok(());
    }

    println!("🏆 Top {} players by price:\n", top.len());
    for (i, p) in top.iter().enumerate() {
        println!(
            "{:>3}. {:<16} {:<10} {:>6.2}  {:>7.2} pts  ({} matches)",
            i + 1,
            p.name,
            p.role.as_str(),
            p.current_price,
            p.cumulative_points,
            p.matches_played
        );
    }

    if let Some(path) = csv_path {
        write_leaderboard_csv(path, &top)?;
        println!("\n💾 Written to {}", path.display());
    }
    Ok(())
}

fn write_leaderboard_csv(path: &Path, players: &[Player]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["rank", "name", "role", "region", "price", "points", "matches"])?;
    for (i, p) in players.iter().enumerate() {
        writer.write_record([
            (i + 1).to_string(),
            p.name.clone(),
            p.role.as_str().to_string(),
            p.region.as_str().to_string(),
            format!("{:.2}", p.current_price),
            format!("{:.2}", p.cumulative_points),
            p.matches_played.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub async fn seed_league(pool: &SqlitePool, members: usize, roster_size: usize) -> Result<()> {
    let created = seed_demo_league(pool, members, roster_size).await?;
    let mut conn = pool.acquire().await?;
    for member in db::list_league_members(&mut conn).await? {
        println!("   • {} ({})", member.team_name, member.user_id);
    }
    println!("✅ Seeded {} league members with {} players each", created, roster_size);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_player_if_absent, test_pool};
    use crate::models::PlayerRole;

    #[test]
    fn test_event_from_args() {
        let event = event_from_args("/event/matches/2682/x".into(), None, "americas").unwrap();
        assert_eq!(event.region, Region::Americas);
        assert_eq!(event.name, "/event/matches/2682/x");
        assert!(event_from_args("/e".into(), None, "moon").is_err());
    }

    #[tokio::test]
    async fn test_leaderboard_csv_export() {
        let pool = test_pool().await;
        {
            let mut conn = pool.acquire().await.unwrap();
            insert_player_if_absent(&mut conn, "aspas", None, PlayerRole::Duelist, Region::Americas, 10.0)
                .await
                .unwrap();
        }
        let path = std::env::temp_dir().join(format!("vctsync-{}.csv", uuid::Uuid::new_v4()));
        leaderboard(&pool, 10, Some(&path)).await.unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][1], "aspas");
        assert_eq!(&rows[0][4], "10.00");
        std::fs::remove_file(&path).ok();
    }
}
