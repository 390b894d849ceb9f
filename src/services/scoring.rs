use crate::models::{Match, MatchStatus, RawStats};
use crate::utils::round2;

pub const MIN_POINTS: f64 = 0.0;
pub const MAX_POINTS: f64 = 20.0;

const KILL: f64 = 0.30;
const DEATH: f64 = -0.25;
const ASSIST: f64 = 0.20;
const FIRST_KILL: f64 = 0.8;
const FIRST_DEATH: f64 = -0.6;
const CLUTCH: f64 = 1.5;

const KD_DOMINANCE_FLOOR: f64 = 2.0;
const KD_DOMINANCE_WEIGHT: f64 = 1.5;

const WIN_BONUS: f64 = 1.5;
const SWEEP_BONUS: f64 = 0.5;

/// (threshold, bonus), highest first. First threshold met wins.
const ACS_TIERS: &[(f64, f64)] = &[(300.0, 3.0), (250.0, 2.0), (200.0, 1.0), (150.0, 0.5)];
const ADR_TIERS: &[(f64, f64)] = &[(120.0, 2.0), (100.0, 1.5), (80.0, 1.0), (60.0, 0.5)];
const RATING_TIERS: &[(f64, f64)] = &[(1.30, 2.5), (1.15, 1.5), (1.00, 0.75), (0.85, 0.25)];

/// What the scorer needs to know about the match a stat line belongs to.
#[derive(Debug, Clone, Default)]
pub struct MatchContext {
    pub status: Option<MatchStatus>,
    pub team_a_id: String,
    pub team_b_id: String,
    pub score_a: u32,
    pub score_b: u32,
    /// Team the player represented; `None` means no outcome bonus.
    pub player_team_id: Option<String>,
}

impl MatchContext {
    pub fn for_player(match_data: &Match, player_team_id: Option<&str>) -> Self {
        Self {
            status: Some(match_data.status),
            team_a_id: match_data.team_a_id.clone(),
            team_b_id: match_data.team_b_id.clone(),
            score_a: match_data.score_a,
            score_b: match_data.score_b,
            player_team_id: player_team_id.map(str::to_string),
        }
    }

    /// (own score, opponent score) when the player's team took part.
    fn own_and_opponent(&self) -> Option<(u32, u32)> {
        let team = self.player_team_id.as_deref()?;
        if team == self.team_a_id {
            Some((self.score_a, self.score_b))
        } else if team == self.team_b_id {
            Some((self.score_b, self.score_a))
        } else {
            None
        }
    }
}

fn tier_bonus(value: f64, tiers: &[(f64, f64)]) -> f64 {
    tiers
        .iter()
        .find(|(threshold, _)| value >= *threshold)
        .map(|(_, bonus)| *bonus)
        .unwrap_or(0.0)
}

/// Bonus for a kill/death ratio of 2.0 or better, scaled by how far past 2.0.
pub fn kd_dominance_bonus(kills: u32, deaths: u32) -> f64 {
    let ratio = kills as f64 / deaths.max(1) as f64;
    if ratio >= KD_DOMINANCE_FLOOR {
        (ratio - KD_DOMINANCE_FLOOR) * KD_DOMINANCE_WEIGHT
    } else {
        0.0
    }
}

/// Series outcome bonus: win, plus extra when the opponent took no maps.
pub fn outcome_bonus(ctx: &MatchContext) -> f64 {
    if ctx.status != Some(MatchStatus::Completed) {
        return 0.0;
    }
    match ctx.own_and_opponent() {
        Some((own, opp)) if own > opp => {
            if opp == 0 {
                WIN_BONUS + SWEEP_BONUS
            } else {
                WIN_BONUS
            }
        }
        _ => 0.0,
    }
}

/// Fantasy points for one stat line. Deterministic, clamped to [0, 20] and
/// rounded to 2 decimals.
pub fn score(stats: &RawStats, ctx: &MatchContext) -> f64 {
    let mut points = 0.0;

    points += stats.kills as f64 * KILL;
    points += stats.deaths as f64 * DEATH;
    points += stats.assists as f64 * ASSIST;
    points += kd_dominance_bonus(stats.kills, stats.deaths);

    points += tier_bonus(stats.acs, ACS_TIERS);
    points += tier_bonus(stats.adr, ADR_TIERS);
    points += tier_bonus(stats.rating, RATING_TIERS);

    points += stats.first_kills as f64 * FIRST_KILL;
    points += stats.first_deaths as f64 * FIRST_DEATH;
    points += stats.clutches_won as f64 * CLUTCH;

    points += outcome_bonus(ctx);

    round2(points.clamp(MIN_POINTS, MAX_POINTS))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_line() -> RawStats {
        RawStats {
            kills: 25,
            deaths: 18,
            assists: 5,
            acs: 275.5,
            adr: 165.3,
            rating: 1.35,
            first_kills: 5,
            first_deaths: 2,
            clutches_won: 2,
            ..Default::default()
        }
    }

    fn completed_ctx(score_a: u32, score_b: u32, player_team: &str) -> MatchContext {
        MatchContext {
            status: Some(MatchStatus::Completed),
            team_a_id: "team-a".to_string(),
            team_b_id: "team-b".to_string(),
            score_a,
            score_b,
            player_team_id: Some(player_team.to_string()),
        }
    }

    #[test]
    fn test_reference_line_without_outcome_bonus() {
        // 7.5 - 4.5 + 1.0 + 0 (K/D 1.39) + 2.0 (ACS) + 2.0 (ADR) + 2.5 (rating)
        // + 4.0 (FK) - 1.2 (FD) + 3.0 (clutches) = 16.3
        let points = score(&reference_line(), &MatchContext::default());
        assert!((points - 16.3).abs() < 1e-9, "got {}", points);
    }

    #[test]
    fn test_win_and_sweep_bonus() {
        let line = RawStats { kills: 10, deaths: 10, ..Default::default() };
        let base = score(&line, &MatchContext::default());

        let win = score(&line, &completed_ctx(2, 1, "team-a"));
        let sweep = score(&line, &completed_ctx(0, 2, "team-b"));
        let loss = score(&line, &completed_ctx(2, 1, "team-b"));

        assert!((win - base - 1.5).abs() < 1e-9);
        assert!((sweep - base - 2.0).abs() < 1e-9);
        assert_eq!(loss, base);
    }

    #[test]
    fn test_no_bonus_for_non_participant_or_unfinished_match() {
        let line = RawStats { kills: 10, deaths: 10, ..Default::default() };
        let base = score(&line, &MatchContext::default());

        assert_eq!(score(&line, &completed_ctx(2, 0, "someone-else")), base);

        let mut live = completed_ctx(2, 0, "team-a");
        live.status = Some(MatchStatus::Live);
        assert_eq!(score(&line, &live), base);
    }

    #[test]
    fn test_kd_dominance() {
        assert_eq!(kd_dominance_bonus(10, 10), 0.0);
        assert!((kd_dominance_bonus(30, 10) - 1.5).abs() < 1e-9);
        // zero deaths counts as one
        assert!((kd_dominance_bonus(4, 0) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_clamped_to_range() {
        let feeder = RawStats { deaths: 30, first_deaths: 10, ..Default::default() };
        assert_eq!(score(&feeder, &MatchContext::default()), MIN_POINTS);

        let monster = RawStats {
            kills: 45,
            deaths: 5,
            acs: 400.0,
            adr: 200.0,
            rating: 2.0,
            first_kills: 10,
            clutches_won: 5,
            ..Default::default()
        };
        assert_eq!(score(&monster, &completed_ctx(2, 0, "team-a")), MAX_POINTS);
    }

    #[test]
    fn test_deterministic_and_bounded_over_a_grid() {
        for kills in (0..40).step_by(7) {
            for deaths in (0..30).step_by(6) {
                for acs in [0.0, 149.9, 150.0, 250.0, 320.0] {
                    let line = RawStats {
                        kills,
                        deaths,
                        assists: kills / 2,
                        acs,
                        adr: acs / 2.0,
                        rating: acs / 220.0,
                        first_kills: kills / 8,
                        first_deaths: deaths / 8,
                        ..Default::default()
                    };
                    let ctx = completed_ctx(2, 0, "team-a");
                    let first = score(&line, &ctx);
                    assert_eq!(first, score(&line, &ctx));
                    assert!((MIN_POINTS..=MAX_POINTS).contains(&first));
                }
            }
        }
    }

    #[test]
    fn test_tier_boundaries_are_inclusive() {
        assert_eq!(tier_bonus(300.0, ACS_TIERS), 3.0);
        assert_eq!(tier_bonus(299.99, ACS_TIERS), 2.0);
        assert_eq!(tier_bonus(59.9, ADR_TIERS), 0.0);
        assert_eq!(tier_bonus(0.85, RATING_TIERS), 0.25);
    }
}
