use chrono::{DateTime, NaiveDateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use std::collections::{HashMap, HashSet};

use crate::errors::ParseError;
use crate::models::{MatchStatus, RawStats};
use crate::utils::{isolated_single_digits, validate_team_name};

/// Scores above this on either side are treated as a misread.
const MAX_PLAUSIBLE_SCORE: u32 = 5;
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTeam {
    pub name: String,
    pub logo_url: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPlayer {
    pub name: String,
    /// `None` when the page did not say (pre-match rosters).
    pub agent: Option<String>,
    /// 0 for the first team in the header, 1 for the second.
    pub team_index: usize,
    pub stats: RawStats,
}

#[derive(Debug, Clone)]
pub struct MatchDetails {
    pub teams: [ParsedTeam; 2],
    pub players: Vec<ParsedPlayer>,
    pub date: Option<DateTime<Utc>>,
    pub score_a: u32,
    pub score_b: u32,
    pub status: MatchStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Column {
    Kills,
    Deaths,
    Assists,
    Rating,
    Acs,
    Adr,
    Kast,
    HsPercent,
    FirstKills,
    FirstDeaths,
}

/// Stat-table header text (upper-cased) to column.
const HEADER_KEYS: &[(&str, Column)] = &[
    ("K", Column::Kills),
    ("D", Column::Deaths),
    ("A", Column::Assists),
    ("RATING", Column::Rating),
    ("ACS", Column::Acs),
    ("ADR", Column::Adr),
    ("KAST", Column::Kast),
    ("HS%", Column::HsPercent),
    ("FK", Column::FirstKills),
    ("FD", Column::FirstDeaths),
];

fn sel(css: &str) -> Result<Selector, ParseError> {
    Selector::parse(css).map_err(|_| ParseError::Selector(css.to_string()))
}

fn text_of(el: &ElementRef) -> String {
    el.text().collect::<String>()
}

/// First non-empty trimmed line of an element's text.
fn first_line(el: &ElementRef) -> String {
    text_of(el)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string()
}

fn normalize_logo(src: &str) -> String {
    if let Some(rest) = src.strip_prefix("//") {
        format!("https://{}", rest)
    } else {
        src.to_string()
    }
}

/// Parse a match detail page. Fails only when the two teams cannot be
/// identified; everything else degrades to empty/zero values.
pub fn parse_match_page(html: &str) -> Result<MatchDetails, ParseError> {
    let doc = Html::parse_document(html);

    let teams = parse_teams(&doc)?;

    let mut players = parse_stat_tables(&doc)?;
    if players.is_empty() {
        players = parse_header_rosters(&doc)?;
    }

    let date = parse_date(&doc)?;

    let mut status = detect_status(&doc)?;
    let (mut score_a, mut score_b) = (0, 0);
    if matches!(status, MatchStatus::Live | MatchStatus::Completed) {
        (score_a, score_b) = extract_score(&doc)?;
        if score_a > MAX_PLAUSIBLE_SCORE || score_b > MAX_PLAUSIBLE_SCORE {
            tracing::warn!(
                "Implausible score {}-{}, resetting to 0-0 and treating as upcoming",
                score_a,
                score_b
            );
            score_a = 0;
            score_b = 0;
            status = MatchStatus::Upcoming;
        }
    }

    Ok(MatchDetails { teams, players, date, score_a, score_b, status })
}

// ── Teams ────────────────────────────────────────────────────────────────────

fn parse_teams(doc: &Html) -> Result<[ParsedTeam; 2], ParseError> {
    let link_sel = sel(".match-header-link")?;
    let name_sel = sel(".match-header-link-name")?;
    let img_sel = sel("img")?;

    let mut teams = Vec::new();
    for link in doc.select(&link_sel) {
        let Some(name_el) = link.select(&name_sel).next() else {
            continue;
        };
        let name = first_line(&name_el);
        if !validate_team_name(&name) {
            continue;
        }
        let logo_url = link
            .select(&img_sel)
            .next()
            .and_then(|img| img.value().attr("src"))
            .map(normalize_logo);
        let url = link.value().attr("href").map(str::to_string);
        teams.push(ParsedTeam { name, logo_url, url });
    }

    let found = teams.len();
    <[ParsedTeam; 2]>::try_from(teams).map_err(|_| ParseError::TeamCount { found })
}

// ── Status & score ───────────────────────────────────────────────────────────

fn detect_status(doc: &Html) -> Result<MatchStatus, ParseError> {
    let note_sel = sel(".match-header-note .match-header-note-text")?;
    let vs_note_sel = sel(".match-header-vs-note")?;

    let note = doc.select(&note_sel).next().map(|e| text_of(&e).to_uppercase());
    let vs_note = doc.select(&vs_note_sel).next().map(|e| text_of(&e).to_uppercase());

    if note.as_deref().is_some_and(|t| t.contains("LIVE"))
        || vs_note.as_deref().is_some_and(|t| t.contains("LIVE"))
    {
        return Ok(MatchStatus::Live);
    }
    if vs_note
        .as_deref()
        .is_some_and(|t| t.contains("FINAL") || t.contains("COMPLETE"))
    {
        return Ok(MatchStatus::Completed);
    }

    // a side on a clinching count (2 in Bo3, 3 in Bo5) with a clear winner
    if let Some((a, b)) = spoiler_score(doc)? {
        if a != b && (a == 2 || b == 2 || a == 3 || b == 3) {
            return Ok(MatchStatus::Completed);
        }
    }

    Ok(MatchStatus::Upcoming)
}

fn spoiler_score(doc: &Html) -> Result<Option<(u32, u32)>, ParseError> {
    let span_sel = sel(".match-header-vs-score span.js-spoiler")?;
    let values: Vec<Option<u32>> = doc
        .select(&span_sel)
        .take(2)
        .map(|s| text_of(&s).trim().parse().ok())
        .collect();
    Ok(match values.as_slice() {
        [Some(a), Some(b)] => Some((*a, *b)),
        _ => None,
    })
}

/// Three strategies, first non-zero pair wins: spoiler spans, single-digit
/// child divs, then any isolated single digits in the score container.
fn extract_score(doc: &Html) -> Result<(u32, u32), ParseError> {
    let container_sel = sel(".match-header-vs-score")?;
    let Some(container) = doc.select(&container_sel).next() else {
        return Ok((0, 0));
    };

    if let Some(pair) = spoiler_score(doc)? {
        if pair != (0, 0) {
            return Ok(pair);
        }
    }

    let child_digits: Vec<u32> = container
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "div")
        .filter_map(|e| {
            let t = text_of(&e);
            let t = t.trim();
            if t.len() == 1 {
                t.chars().next()?.to_digit(10)
            } else {
                None
            }
        })
        .collect();
    if let [a, b, ..] = child_digits[..] {
        if (a, b) != (0, 0) {
            return Ok((a, b));
        }
    }

    let loose_digits = isolated_single_digits(&text_of(&container));
    if let [a, b, ..] = loose_digits[..] {
        return Ok((a, b));
    }

    Ok((0, 0))
}

// ── Stat tables ──────────────────────────────────────────────────────────────

/// Container holding the aggregate ("all maps") tables, if any.
fn all_maps_container(doc: &Html) -> Result<Option<ElementRef<'_>>, ParseError> {
    let game_sel = sel(".vm-stats-game")?;
    let nav_sel = sel(".vm-stats-gamesnav-item")?;

    let game_with_id = |id: &str| {
        doc.select(&game_sel)
            .find(|g| g.value().attr("data-game-id") == Some(id))
    };

    if let Some(all) = game_with_id("all") {
        return Ok(Some(all));
    }

    for item in doc.select(&nav_sel) {
        let label = text_of(&item).to_lowercase();
        if !(label.contains("all") || label.contains("overall")) {
            continue;
        }
        if let Some(id) = item.value().attr("data-game-id") {
            if let Some(game) = game_with_id(id) {
                return Ok(Some(game));
            }
        }
    }

    Ok(None)
}

/// Header map for a table, or `None` when it lacks K, D and A columns.
fn column_map(table: &ElementRef, th_sel: &Selector) -> Option<HashMap<Column, usize>> {
    let mut columns = HashMap::new();
    for (idx, th) in table.select(th_sel).enumerate() {
        let label = text_of(&th).trim().to_uppercase();
        if let Some((_, col)) = HEADER_KEYS.iter().find(|(key, _)| *key == label) {
            columns.entry(*col).or_insert(idx);
        }
    }
    let has_kda = [Column::Kills, Column::Deaths, Column::Assists]
        .iter()
        .all(|c| columns.contains_key(c));
    has_kda.then_some(columns)
}

/// Aggregate value of a stat cell: separators stripped, first line only.
fn cell_value(cell: &ElementRef) -> Option<String> {
    let raw = text_of(cell).replace(['/', '%'], "");
    raw.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

fn kda_tables<'a>(
    root: ElementRef<'a>,
    table_sel: &Selector,
    fallback_table_sel: &Selector,
    th_sel: &Selector,
) -> Vec<(ElementRef<'a>, HashMap<Column, usize>)> {
    let mut tables: Vec<ElementRef<'a>> = root.select(table_sel).collect();
    if tables.is_empty() {
        tables = root.select(fallback_table_sel).collect();
    }
    tables
        .into_iter()
        .filter_map(|t| column_map(&t, th_sel).map(|cols| (t, cols)))
        .collect()
}

fn parse_stat_tables(doc: &Html) -> Result<Vec<ParsedPlayer>, ParseError> {
    let table_sel = sel("table.wf-table-inset")?;
    let fallback_table_sel = sel(".wf-table-stats")?;
    let th_sel = sel("thead th")?;
    let row_sel = sel("tbody tr")?;
    let name_sel = sel(".mod-player")?;
    let alt_name_sel = sel(".text-of")?;
    let agent_sel = sel(".mod-agents img")?;
    let td_sel = sel("td")?;

    let tables = match all_maps_container(doc)? {
        Some(container) => kda_tables(container, &table_sel, &fallback_table_sel, &th_sel),
        // no aggregate tab: first K/D/A tables on the page, one per team
        None => {
            let mut tables =
                kda_tables(doc.root_element(), &table_sel, &fallback_table_sel, &th_sel);
            tables.truncate(2);
            tables
        }
    };

    let mut seen = HashSet::new();
    let mut players = Vec::new();

    for (table_idx, (table, columns)) in tables.iter().enumerate() {
        for row in table.select(&row_sel) {
            let Some(name_el) = row
                .select(&name_sel)
                .next()
                .or_else(|| row.select(&alt_name_sel).next())
            else {
                continue;
            };
            let name = first_line(&name_el);
            if name.chars().count() < 2 || !seen.insert(name.clone()) {
                continue;
            }

            let agent = row
                .select(&agent_sel)
                .next()
                .and_then(|img| {
                    let v = img.value();
                    v.attr("title")
                        .filter(|t| !t.trim().is_empty())
                        .or_else(|| v.attr("alt"))
                })
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty());

            let cells: Vec<ElementRef> = row.select(&td_sel).collect();
            let raw = |col: Column| -> Option<String> {
                let idx = *columns.get(&col)?;
                cell_value(cells.get(idx)?)
            };
            let int = |col: Column| raw(col).and_then(|v| v.parse::<u32>().ok()).unwrap_or(0);
            let float = |col: Column| raw(col).and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0);

            let kast = float(Column::Kast);
            let mut rating = float(Column::Rating);
            if rating == 0.0 && kast > 0.0 {
                rating = kast / 100.0;
            }

            players.push(ParsedPlayer {
                name,
                agent,
                team_index: table_idx % 2,
                stats: RawStats {
                    kills: int(Column::Kills),
                    deaths: int(Column::Deaths),
                    assists: int(Column::Assists),
                    acs: float(Column::Acs),
                    adr: float(Column::Adr),
                    kast,
                    hs_percent: float(Column::HsPercent),
                    rating,
                    first_kills: int(Column::FirstKills),
                    first_deaths: int(Column::FirstDeaths),
                    clutches_won: 0,
                },
            });
        }
    }

    Ok(players)
}

/// Pre-match pages have no tables; take the roster names from the header.
fn parse_header_rosters(doc: &Html) -> Result<Vec<ParsedPlayer>, ParseError> {
    let roster_sel = sel(".match-header-vs .match-header-vs-players")?;
    let link_sel = sel("a")?;

    let mut seen = HashSet::new();
    let mut players = Vec::new();
    for (team_index, roster) in doc.select(&roster_sel).take(2).enumerate() {
        for link in roster.select(&link_sel) {
            let name = first_line(&link);
            if name.is_empty() || !seen.insert(name.clone()) {
                continue;
            }
            players.push(ParsedPlayer {
                name,
                agent: None,
                team_index,
                stats: RawStats::default(),
            });
        }
    }
    Ok(players)
}

fn parse_date(doc: &Html) -> Result<Option<DateTime<Utc>>, ParseError> {
    let date_sel = sel(".moment-tz-convert[data-utc-ts]")?;
    Ok(doc
        .select(&date_sel)
        .next()
        .and_then(|e| e.value().attr("data-utc-ts"))
        .and_then(|ts| NaiveDateTime::parse_from_str(ts.trim(), DATE_FORMAT).ok())
        .map(|naive| naive.and_utc()))
}
