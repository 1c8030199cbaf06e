//! Per-shape upstream schemas.
//!
//! The legacy endpoints and the current endpoints describe the same entities
//! with different field names and types. Each shape gets its own struct; any
//! field not named here lands in `extra` so nothing the upstream sends is lost.

use super::merge::Keyed;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Accepts `20`, `"20"` or `null`. Legacy endpoints send numbers as strings.
fn lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Text(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Accepts `true`/`false` or `1`/`0`.
fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Number(u8),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Bool(b) => b,
        Raw::Number(n) => n != 0,
    }))
}

// ── Machines ──────────────────────────────────────────────────────────────────

/// Item of `GET /machine/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyMachine {
    pub id: u64,
    pub name: Option<String>,
    pub os: Option<String>,
    pub ip: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub points: Option<u32>,
    #[serde(rename = "difficultyText")]
    pub difficulty_text: Option<String>,
    pub release: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub retired: Option<bool>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub user_owns: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub root_owns: Option<u32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Item of `GET /machines` and the `info` object of `GET /machine/profile/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentMachine {
    pub id: u64,
    pub name: Option<String>,
    pub os: Option<String>,
    pub ip: Option<String>,
    pub points: Option<u32>,
    #[serde(alias = "difficultyText")]
    pub difficulty_text: Option<String>,
    #[serde(alias = "release")]
    pub release_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub retired: Option<bool>,
    pub user_owns_count: Option<u32>,
    pub root_owns_count: Option<u32>,
    pub stars: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

// ── Challenges ────────────────────────────────────────────────────────────────

/// Item of `GET /challenge/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyChallenge {
    pub id: u64,
    pub name: Option<String>,
    pub difficulty: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub points: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub solves: Option<u32>,
    pub release_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub retired: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Item of `GET /challenges` and the `challenge` object of `GET /challenge/info/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentChallenge {
    pub id: u64,
    pub name: Option<String>,
    pub category_name: Option<String>,
    pub difficulty: Option<String>,
    pub points: Option<u32>,
    pub solves: Option<u32>,
    pub release_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub retired: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

// ── Members ───────────────────────────────────────────────────────────────────

/// Item of `GET /team/members/{team_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyMember {
    pub id: u64,
    pub name: Option<String>,
    pub rank: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub points: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub root_owns: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub user_owns: Option<u32>,
    pub avatar: Option<String>,
    pub role: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// The `profile` object of `GET /user/profile/basic/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentMember {
    pub id: u64,
    pub name: Option<String>,
    pub rank: Option<String>,
    pub points: Option<u32>,
    pub system_owns: Option<u32>,
    pub user_owns: Option<u32>,
    pub ranking: Option<u32>,
    pub country_name: Option<String>,
    pub avatar: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One entry of `GET /user/profile/activity/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub date: Option<String>,
    pub object_type: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub id: Option<u64>,
    pub name: Option<String>,
    pub points: Option<u32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

// ── Team ──────────────────────────────────────────────────────────────────────

/// Body of `GET /team/stats/owns/{team_id}`. Carries no id; the fetcher sets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyTeamStats {
    #[serde(default)]
    pub id: u64,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub rank: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub user_owns: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub system_owns: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub challenge_owns: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub first_bloods: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub respects: Option<u32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Body of `GET /team/info/{team_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentTeamStats {
    pub id: u64,
    pub name: Option<String>,
    pub points: Option<u32>,
    pub ranking: Option<u32>,
    pub motto: Option<String>,
    pub country_name: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

macro_rules! keyed {
    ($($shape:ty),* $(,)?) => {
        $(impl Keyed for $shape {
            fn id(&self) -> u64 {
                self.id
            }
        })*
    };
}

keyed!(
    LegacyMachine,
    CurrentMachine,
    LegacyChallenge,
    CurrentChallenge,
    LegacyMember,
    CurrentMember,
    LegacyTeamStats,
    CurrentTeamStats,
);
