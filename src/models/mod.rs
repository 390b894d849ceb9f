use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── Enums ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerRole {
    Duelist,
    Initiator,
    Controller,
    Sentinel,
    Flex,
}

/// Agent name (lower-case) to the role it implies.
const AGENT_ROLES: &[(&str, PlayerRole)] = &[
    ("jett", PlayerRole::Duelist),
    ("raze", PlayerRole::Duelist),
    ("phoenix", PlayerRole::Duelist),
    ("reyna", PlayerRole::Duelist),
    ("yoru", PlayerRole::Duelist),
    ("neon", PlayerRole::Duelist),
    ("iso", PlayerRole::Duelist),
    ("waylay", PlayerRole::Duelist),
    ("sova", PlayerRole::Initiator),
    ("breach", PlayerRole::Initiator),
    ("skye", PlayerRole::Initiator),
    ("kay/o", PlayerRole::Initiator),
    ("fade", PlayerRole::Initiator),
    ("gekko", PlayerRole::Initiator),
    ("tejo", PlayerRole::Initiator),
    ("brimstone", PlayerRole::Controller),
    ("omen", PlayerRole::Controller),
    ("viper", PlayerRole::Controller),
    ("astra", PlayerRole::Controller),
    ("harbor", PlayerRole::Controller),
    ("clove", PlayerRole::Controller),
    ("killjoy", PlayerRole::Sentinel),
    ("cypher", PlayerRole::Sentinel),
    ("sage", PlayerRole::Sentinel),
    ("chamber", PlayerRole::Sentinel),
    ("deadlock", PlayerRole::Sentinel),
    ("vyse", PlayerRole::Sentinel),
    ("veto", PlayerRole::Sentinel),
];

impl PlayerRole {
    /// Role implied by an agent; unknown agents are Flex.
    pub fn from_agent(agent: &str) -> Self {
        let agent = agent.trim().to_lowercase();
        AGENT_ROLES
            .iter()
            .find(|(name, _)| *name == agent)
            .map(|(_, role)| *role)
            .unwrap_or(PlayerRole::Flex)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerRole::Duelist => "Duelist",
            PlayerRole::Initiator => "Initiator",
            PlayerRole::Controller => "Controller",
            PlayerRole::Sentinel => "Sentinel",
            PlayerRole::Flex => "Flex",
        }
    }
}

impl FromStr for PlayerRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Duelist" => Ok(PlayerRole::Duelist),
            "Initiator" => Ok(PlayerRole::Initiator),
            "Controller" => Ok(PlayerRole::Controller),
            "Sentinel" => Ok(PlayerRole::Sentinel),
            "Flex" => Ok(PlayerRole::Flex),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Region {
    Americas,
    #[serde(rename = "EMEA")]
    Emea,
    Pacific,
    #[serde(rename = "CN")]
    China,
    /// Placeholder region for the TBD team.
    Global,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Americas => "Americas",
            Region::Emea => "EMEA",
            Region::Pacific => "Pacific",
            Region::China => "CN",
            Region::Global => "GLOBAL",
        }
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AMERICAS" => Ok(Region::Americas),
            "EMEA" => Ok(Region::Emea),
            "PACIFIC" => Ok(Region::Pacific),
            "CN" | "CHINA" => Ok(Region::China),
            "GLOBAL" => Ok(Region::Global),
            other => Err(format!("unknown region '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Upcoming,
    Live,
    Completed,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Upcoming => "upcoming",
            MatchStatus::Live => "live",
            MatchStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upcoming" => Ok(MatchStatus::Upcoming),
            "live" => Ok(MatchStatus::Live),
            "completed" => Ok(MatchStatus::Completed),
            other => Err(format!("unknown match status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchFormat {
    Bo3,
    Bo5,
}

impl MatchFormat {
    /// Bo5 once either side reaches 3 or at least 4 maps were played.
    pub fn from_scores(score_a: u32, score_b: u32) -> Self {
        if score_a == 3 || score_b == 3 || score_a + score_b >= 4 {
            MatchFormat::Bo5
        } else {
            MatchFormat::Bo3
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchFormat::Bo3 => "Bo3",
            MatchFormat::Bo5 => "Bo5",
        }
    }
}

impl FromStr for MatchFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Bo3" => Ok(MatchFormat::Bo3),
            "Bo5" => Ok(MatchFormat::Bo5),
            other => Err(format!("unknown match format '{}'", other)),
        }
    }
}

// ── Stored records ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub region: Region,
    pub logo_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub team_id: Option<String>,
    pub role: PlayerRole,
    pub region: Region,
    pub current_price: f64,
    pub base_price: f64,
    pub cumulative_points: f64,
    pub matches_played: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub id: String,
    pub external_id: String,
    pub event_name: String,
    pub source_url: String,
    pub team_a_id: String,
    pub team_b_id: String,
    pub score_a: u32,
    pub score_b: u32,
    pub status: MatchStatus,
    pub format: MatchFormat,
    pub processed: bool,
    pub match_date: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Raw per-match counting stats as read from the source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawStats {
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
    pub acs: f64,
    pub adr: f64,
    pub kast: f64,
    pub hs_percent: f64,
    pub rating: f64,
    pub first_kills: u32,
    pub first_deaths: u32,
    pub clutches_won: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerStatLine {
    pub id: String,
    pub match_id: String,
    pub player_id: String,
    /// Team the player represented in this match.
    pub team_id: Option<String>,
    pub agent: Option<String>,
    pub stats: RawStats,
    pub fantasy_points: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceHistoryEntry {
    pub id: String,
    pub player_id: String,
    pub price: f64,
    pub recorded_at: DateTime<Utc>,
}

/// A fantasy-league participant whose total is the sum of their roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeagueMember {
    pub id: String,
    pub user_id: String,
    pub team_name: String,
    pub total_points: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsSnapshot {
    pub id: String,
    pub league_member_id: String,
    pub total_points: f64,
    pub recorded_at: DateTime<Utc>,
}

/// One stat line joined with the match fields the price engine needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsRecord {
    pub points: f64,
    pub status: MatchStatus,
    pub match_date: DateTime<Utc>,
}

/// Stat line row with the player name attached, as served on the read path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatLineView {
    pub player_id: String,
    pub player_name: String,
    pub team_id: Option<String>,
    pub agent: Option<String>,
    pub stats: RawStats,
    pub fantasy_points: f64,
}

// ── Sync inputs ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDescriptor {
    /// Path on the source host, e.g. `/event/matches/2682/vct-2026-americas-kickoff`.
    pub path: String,
    pub name: String,
    pub region: Region,
}

// API Response types
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: Utc::now(),
        }
    }
}
