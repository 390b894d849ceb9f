//! Drives fetch -> parse -> upsert for every match of an event.
//!
//! Each match is one atomic unit: teams, match row, players, stat lines, the
//! processed flag and the point/price rollup commit together or not at all.
//! A failed unit is logged and the batch moves on.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::default_events;
use crate::db;
use crate::errors::{SyncError, SyncResult, ValidationError};
use crate::models::{EventDescriptor, Match, MatchFormat, MatchStatus, PlayerRole, RawStats, Region, Team};
use crate::services::cache::CacheCoordinator;
use crate::services::event_parser::{self, ListingEntry};
use crate::services::fetcher::Fetcher;
use crate::services::match_parser::{self, MatchDetails, ParsedTeam};
use crate::services::pricing::INITIAL_PRICE;
use crate::services::rollup::{self, RecalibrationReport};
use crate::services::scoring::{self, MatchContext};

pub const TBD_TEAM_NAME: &str = "TBD";
const EXPECTED_ROSTER: usize = 5;

/// Reject a line whose float stats are negative, non-finite or above what the
/// source can produce.
pub fn validate_stats(player: &str, stats: &RawStats) -> Result<(), ValidationError> {
    let checks = [
        ("rating", stats.rating, 5.0),
        ("acs", stats.acs, 1000.0),
        ("adr", stats.adr, 1000.0),
        ("kast", stats.kast, 100.0),
        ("hs_percent", stats.hs_percent, 100.0),
    ];
    for (field, value, max) in checks {
        if !value.is_finite() || value < 0.0 || value > max {
            return Err(ValidationError {
                player: player.to_string(),
                field,
                value,
            });
        }
    }
    Ok(())
}

/// State shared by the matches of one sync run.
pub struct SyncContext {
    tbd_team: Team,
}

impl SyncContext {
    /// Ensure the TBD placeholder team exists before any match unit runs, so
    /// a rolled back unit can never take it with it.
    pub async fn prepare(pool: &SqlitePool) -> SyncResult<Self> {
        let mut conn = pool.acquire().await?;
        let tbd_team = db::upsert_team(&mut conn, TBD_TEAM_NAME, Region::Global, None).await?;
        debug!("Using TBD placeholder team (ID: {})", tbd_team.id);
        Ok(Self { tbd_team })
    }

    pub fn tbd_team(&self) -> &Team {
        &self.tbd_team
    }

    async fn resolve_team(
        &self,
        conn: &mut SqliteConnection,
        parsed: &ParsedTeam,
        region: Region,
    ) -> sqlx::Result<Team> {
        let name = parsed.name.trim();
        if name.is_empty() || name.eq_ignore_ascii_case(TBD_TEAM_NAME) {
            return Ok(self.tbd_team.clone());
        }
        db::upsert_team(conn, name, region, parsed.logo_url.as_deref()).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Applied,
    Skipped,
}

#[derive(Clone)]
pub struct SyncService {
    pool: SqlitePool,
    fetcher: Fetcher,
    cache: CacheCoordinator,
    throttle: Duration,
    cancel: CancellationToken,
}

impl SyncService {
    pub fn new(
        pool: SqlitePool,
        fetcher: Fetcher,
        cache: CacheCoordinator,
        throttle: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self { pool, fetcher, cache, throttle, cancel }
    }

    pub fn cache(&self) -> &CacheCoordinator {
        &self.cache
    }

    /// Sync every match on an event listing. Returns the number of matches
    /// written; per-match failures are logged, never returned.
    pub async fn sync_event(&self, event: &EventDescriptor) -> usize {
        info!("--- SYNCING EVENT: {} ---", event.name);

        if self.cancel.is_cancelled() {
            warn!("Sync cancelled before fetching {}", event.path);
            return 0;
        }
        let entries = match self.fetch_listing(event).await {
            Ok(entries) => entries,
            Err(e) => {
                error!("Cannot read listing for {}: {}", event.name, e);
                return 0;
            }
        };
        let ctx = match SyncContext::prepare(&self.pool).await {
            Ok(ctx) => ctx,
            Err(e) => {
                error!("Cannot prepare sync of {}: {}", event.name, e);
                return 0;
            }
        };

        let mut processed = 0;
        for entry in &entries {
            match self.sync_entry(&ctx, event, entry).await {
                Ok(Outcome::Applied) => processed += 1,
                Ok(Outcome::Skipped) => {}
                Err(SyncError::Cancelled) => {
                    warn!("Sync of {} cancelled after {} matches", event.name, processed);
                    break;
                }
                Err(e) => error!("Error processing match {}: {}", entry.external_id, e),
            }
        }

        info!(
            "--- EVENT SYNC COMPLETE: {} ({} of {} matches processed) ---",
            event.name,
            processed,
            entries.len()
        );
        processed
    }

    /// Every event of the built-in catalogue, one after the other.
    pub async fn sync_all(&self) -> usize {
        let mut total = 0;
        for event in default_events() {
            if self.cancel.is_cancelled() {
                break;
            }
            total += self.sync_event(&event).await;
        }
        info!("Catalogue sync finished: {} matches processed", total);
        total
    }

    /// Fetch specific match pages directly, bypassing the listing and the
    /// processed short-circuit.
    pub async fn resync_matches(&self, external_ids: &[String], event: &EventDescriptor) -> usize {
        let ctx = match SyncContext::prepare(&self.pool).await {
            Ok(ctx) => ctx,
            Err(e) => {
                error!("Cannot prepare resync: {}", e);
                return 0;
            }
        };

        let mut processed = 0;
        for external_id in external_ids {
            match self.resync_one(&ctx, event, external_id).await {
                Ok(_) => processed += 1,
                Err(SyncError::Cancelled) => break,
                Err(e) => error!("Error resyncing match {}: {}", external_id, e),
            }
        }
        info!("Resync finished: {} of {} matches", processed, external_ids.len());
        processed
    }

    async fn resync_one(&self, ctx: &SyncContext, event: &EventDescriptor, external_id: &str) -> SyncResult<Match> {
        self.throttle().await?;
        self.fetch_and_apply(ctx, event, &format!("/{}", external_id), external_id).await
    }

    /// Rescore and roll up everything, then evict what changed.
    pub async fn recalibrate_all(&self) -> SyncResult<RecalibrationReport> {
        let report = rollup::recalibrate_all(&self.pool).await?;
        for match_id in &report.rescored_matches {
            self.cache.invalidate_match_stats(match_id).await;
        }
        self.cache.invalidate_players().await;
        Ok(report)
    }

    pub async fn reassign_roles(&self) -> SyncResult<usize> {
        let changed = rollup::reassign_roles(&self.pool).await?;
        if changed > 0 {
            self.cache.invalidate_players().await;
        }
        Ok(changed)
    }

    async fn fetch_listing(&self, event: &EventDescriptor) -> SyncResult<Vec<ListingEntry>> {
        let html = self.fetcher.fetch_html(&self.fetcher.url_for(&event.path)).await?;
        let entries = event_parser::parse_event_listing(&html)?;
        info!("Found {} candidate matches for {}", entries.len(), event.name);
        Ok(entries)
    }

    /// Fixed delay before each fetch; wakes early on cancellation.
    async fn throttle(&self) -> SyncResult<()> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        debug!("Throttling: waiting {:?}", self.throttle);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SyncError::Cancelled),
            _ = tokio::time::sleep(self.throttle) => Ok(()),
        }
    }

    async fn sync_entry(
        &self,
        ctx: &SyncContext,
        event: &EventDescriptor,
        entry: &ListingEntry,
    ) -> SyncResult<Outcome> {
        let existing = {
            let mut conn = self.pool.acquire().await?;
            db::get_match_by_external_id(&mut conn, &entry.external_id).await?
        };

        if let Some(existing) = &existing {
            if existing.processed && existing.status == MatchStatus::Completed {
                debug!("Match {} already processed and completed, skipping", entry.external_id);
                return Ok(Outcome::Skipped);
            }
            if existing.status == MatchStatus::Live {
                info!(
                    "Updating LIVE match {} (listing says {})",
                    entry.external_id, entry.preliminary_status
                );
            } else if entry.preliminary_status == MatchStatus::Live {
                info!("Match {} is now LIVE (was {})", entry.external_id, existing.status);
            }
        }

        self.throttle().await?;
        self.fetch_and_apply(ctx, event, &entry.url, &entry.external_id).await?;
        Ok(Outcome::Applied)
    }

    async fn fetch_and_apply(
        &self,
        ctx: &SyncContext,
        event: &EventDescriptor,
        path: &str,
        external_id: &str,
    ) -> SyncResult<Match> {
        let url = self.fetcher.url_for(path);
        let html = self.fetcher.fetch_html(&url).await?;
        let details = match_parser::parse_match_page(&html)?;
        self.apply_match(ctx, event, external_id, &url, &details).await
    }

    /// Write one parsed match in a single transaction, then evict its cache
    /// keys. Nothing is written when any step fails.
    pub async fn apply_match(
        &self,
        ctx: &SyncContext,
        event: &EventDescriptor,
        external_id: &str,
        source_url: &str,
        details: &MatchDetails,
    ) -> SyncResult<Match> {
        let status = details.status;
        if status == MatchStatus::Completed {
            for p in &details.players {
                validate_stats(&p.name, &p.stats)?;
            }
        }
        let (score_a, score_b) = match status {
            MatchStatus::Upcoming => (0, 0),
            _ => (details.score_a, details.score_b),
        };

        let mut tx = self.pool.begin().await?;

        let team_a = ctx.resolve_team(&mut tx, &details.teams[0], event.region).await?;
        let team_b = ctx.resolve_team(&mut tx, &details.teams[1], event.region).await?;

        let previous = db::get_match_by_external_id(&mut tx, external_id).await?;
        if let Some(prev) = &previous {
            if prev.status != status {
                info!("Match {} status changed: {} -> {}", external_id, prev.status, status);
            }
            if prev.team_a_id != team_a.id || prev.team_b_id != team_b.id {
                info!(
                    "Match {} teams updated: ({}, {}) -> ({}, {})",
                    external_id, prev.team_a_id, prev.team_b_id, team_a.id, team_b.id
                );
            }
        }

        let now = Utc::now();
        let mut stored = db::upsert_match(
            &mut tx,
            &Match {
                id: previous
                    .as_ref()
                    .map(|m| m.id.clone())
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                external_id: external_id.to_string(),
                event_name: event.name.clone(),
                source_url: source_url.to_string(),
                team_a_id: team_a.id.clone(),
                team_b_id: team_b.id.clone(),
                score_a,
                score_b,
                status,
                format: MatchFormat::from_scores(score_a, score_b),
                processed: false,
                match_date: details
                    .date
                    .or(previous.as_ref().map(|m| m.match_date))
                    .unwrap_or(now),
                updated_at: now,
            },
        )
        .await?;

        if status == MatchStatus::Completed {
            let per_side = [0, 1].map(|i| details.players.iter().filter(|p| p.team_index == i).count());
            if per_side.iter().any(|n| *n < EXPECTED_ROSTER) {
                warn!(
                    "Match {}: incomplete rosters ({} vs {} players)",
                    external_id, per_side[0], per_side[1]
                );
            }
        }

        let mut touched = Vec::with_capacity(details.players.len());
        for parsed in &details.players {
            let team = if parsed.team_index == 0 { &team_a } else { &team_b };
            let role = parsed
                .agent
                .as_deref()
                .map(PlayerRole::from_agent)
                .unwrap_or(PlayerRole::Flex);

            let player = db::insert_player_if_absent(
                &mut tx,
                &parsed.name,
                Some(team.id.as_str()),
                role,
                event.region,
                INITIAL_PRICE,
            )
            .await?;
            if player.team_id.as_deref() != Some(team.id.as_str()) {
                db::set_player_team(&mut tx, &player.id, &team.id).await?;
            }

            if status == MatchStatus::Completed {
                let points = scoring::score(&parsed.stats, &MatchContext::for_player(&stored, Some(team.id.as_str())));
                db::upsert_stat_line(
                    &mut tx,
                    &stored.id,
                    &player.id,
                    Some(team.id.as_str()),
                    parsed.agent.as_deref(),
                    &parsed.stats,
                    points,
                )
                .await?;
                debug!("Player {}: {:.2} fantasy points", parsed.name, points);
                touched.push(player.id);
            }
        }

        if status == MatchStatus::Completed {
            db::mark_match_processed(&mut tx, &stored.id).await?;
            stored.processed = true;

            let dropped = db::delete_stat_lines_except(&mut tx, &stored.id, &touched).await?;
            if !dropped.is_empty() {
                warn!(
                    "Match {}: {} players no longer listed, dropped their stat lines",
                    external_id,
                    dropped.len()
                );
            }
            let mut affected = touched.clone();
            affected.extend(dropped);
            let owners = rollup::propagate(&mut tx, &affected).await?;
            info!(
                "Match {} processed: {} stat lines, {} league members updated",
                external_id,
                touched.len(),
                owners
            );
        } else {
            let removed = db::delete_stat_lines_for_match(&mut tx, &stored.id).await?;
            if !removed.is_empty() {
                warn!(
                    "Match {} is {}, dropped {} stat lines",
                    external_id,
                    status,
                    removed.len()
                );
                rollup::propagate(&mut tx, &removed).await?;
            }
        }

        tx.commit().await?;
        self.cache.invalidate_match(&stored.id).await;
        Ok(stored)
    }
}
