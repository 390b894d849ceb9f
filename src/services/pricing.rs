use statrs::statistics::Statistics;

use crate::models::{MatchStatus, PointsRecord};
use crate::utils::round2;

pub const MIN_PRICE: f64 = 2.0;
pub const MAX_PRICE: f64 = 85.0;
/// Price of a player with no completed matches.
pub const INITIAL_PRICE: f64 = 10.0;

const RECENT_WINDOW: usize = 5;
const BASE_OFFSET: f64 = 5.0;
const POINTS_WEIGHT: f64 = 2.5;

fn consistency_multiplier(cv: f64) -> f64 {
    if cv < 0.15 {
        1.20
    } else if cv < 0.25 {
        1.10
    } else if cv < 0.40 {
        1.00
    } else if cv < 0.55 {
        0.95
    } else {
        0.85
    }
}

/// Last two matches against the rest of the window, most recent first.
fn trend_multiplier(recent_first: &[f64]) -> f64 {
    if recent_first.len() < 3 {
        return 1.0;
    }
    let latest = (&recent_first[..2]).mean();
    let older = (&recent_first[2..]).mean();

    if latest > older * 1.3 {
        1.12
    } else if latest > older * 1.1 {
        1.05
    } else if latest < older * 0.7 {
        0.90
    } else if latest < older * 0.9 {
        0.97
    } else {
        1.00
    }
}

fn participation_factor(completed_matches: usize) -> f64 {
    match completed_matches {
        0 | 1 => 0.50,
        2 => 0.70,
        3 => 0.85,
        4 => 0.95,
        _ => 1.00,
    }
}

/// Market price from a player's full point history.
///
/// Only completed matches count. The five most recent drive the base value,
/// consistency and trend; participation is keyed on the total completed count.
/// Always a function of the whole history, so recomputing is idempotent.
pub fn price(history: &[PointsRecord]) -> f64 {
    let mut completed: Vec<&PointsRecord> = history
        .iter()
        .filter(|r| r.status == MatchStatus::Completed)
        .collect();
    if completed.is_empty() {
        return INITIAL_PRICE;
    }
    completed.sort_by(|a, b| b.match_date.cmp(&a.match_date));

    let recent: Vec<f64> = completed
        .iter()
        .take(RECENT_WINDOW)
        .map(|r| r.points)
        .collect();

    let mean = recent.as_slice().mean();
    let base = BASE_OFFSET + mean * POINTS_WEIGHT;

    // sample standard deviation (n - 1)
    let std_dev = if recent.len() > 1 { recent.as_slice().std_dev() } else { 0.0 };
    let cv = std_dev / mean.max(1.0);

    let value = base
        * consistency_multiplier(cv)
        * trend_multiplier(&recent)
        * participation_factor(completed.len());

    round2(value.clamp(MIN_PRICE, MAX_PRICE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    /// Records oldest first, one day apart.
    fn history(points: &[f64]) -> Vec<PointsRecord> {
        let start = Utc.with_ymd_and_hms(2026, 1, 10, 18, 0, 0).unwrap();
        points
            .iter()
            .enumerate()
            .map(|(i, p)| PointsRecord {
                points: *p,
                status: MatchStatus::Completed,
                match_date: start + Duration::days(i as i64),
            })
            .collect()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_empty_history_is_initial_price() {
        assert_eq!(price(&[]), 10.0);
    }

    #[test]
    fn test_only_completed_matches_count() {
        let mut records = history(&[12.0]);
        records[0].status = MatchStatus::Live;
        assert_eq!(price(&records), INITIAL_PRICE);
    }

    #[test]
    fn test_single_match_is_heavily_discounted() {
        // (5 + 10 * 2.5) * 1.20 * 1.0 * 0.50
        assert!(approx(price(&history(&[10.0])), 18.0));
    }

    #[test]
    fn test_steady_veteran() {
        // (5 + 10 * 2.5) * 1.20 * 1.0 * 1.0
        assert!(approx(price(&history(&[10.0; 7])), 36.0));
    }

    #[test]
    fn test_rising_form_gets_momentum_bonus() {
        // most recent first: 16, 16, 8, 8, 8 -> mean 11.2, cv ~0.39
        let p = price(&history(&[8.0, 8.0, 8.0, 16.0, 16.0]));
        assert!(approx(p, 36.96), "got {}", p);
    }

    #[test]
    fn test_window_uses_most_recent_five() {
        // the two old zeros fall outside the window but still count for participation
        let with_old = price(&history(&[0.0, 0.0, 10.0, 10.0, 10.0, 10.0, 10.0]));
        let without = price(&history(&[10.0, 10.0, 10.0, 10.0, 10.0]));
        assert!(approx(with_old, without));
    }

    #[test]
    fn test_bounded_and_idempotent() {
        let samples: Vec<Vec<f64>> = vec![
            vec![0.0],
            vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            vec![20.0; 6],
            vec![20.0, 0.0, 20.0, 0.0, 20.0],
            vec![1.5, 19.0, 3.2],
        ];
        for points in samples {
            let records = history(&points);
            let p = price(&records);
            assert!((MIN_PRICE..=MAX_PRICE).contains(&p), "{} out of range", p);
            assert_eq!(p, price(&records));
        }
        // (5 + 0) * 1.20, no trend without growth
        assert!(approx(price(&history(&[0.0; 6])), 6.0));
    }
}
