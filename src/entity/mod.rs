//! Canonical entities.
//!
//! Each family is fetched from two upstream shapes (see [`shapes`]) and folded
//! into one canonical struct keyed by the upstream's numeric id. Merging goes
//! through [`Canonical::absorb`] with a [`Source`] tag:
//!
//! ```
//! use teamsync::entity::{merge_pair, LegacyMachine, CurrentMachine, Machine};
//!
//! let legacy: LegacyMachine =
//!     serde_json::from_value(serde_json::json!({"id": 7, "name": "Foo", "ip": "10.0.0.1"})).unwrap();
//! let current: CurrentMachine =
//!     serde_json::from_value(serde_json::json!({"id": 7, "name": "Foo", "points": 20})).unwrap();
//!
//! let machine: Machine = merge_pair(legacy, current);
//! assert_eq!(machine.ip.as_deref(), Some("10.0.0.1"));
//! assert_eq!(machine.points, Some(20));
//! ```

mod merge;
pub mod shapes;


pub use merge::{absorb_all, merge_pair, Canonical, Keyed, Shape, Source};
pub use shapes::{
    Activity, CurrentChallenge, CurrentMachine, CurrentMember, CurrentTeamStats, LegacyChallenge,
    LegacyMachine, LegacyMember, LegacyTeamStats,
};

use merge::{fill, fill_extra};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub type MachineSource = Source<LegacyMachine, CurrentMachine>;
pub type ChallengeSource = Source<LegacyChallenge, CurrentChallenge>;
pub type MemberSource = Source<LegacyMember, CurrentMember>;
pub type TeamStatsSource = Source<LegacyTeamStats, CurrentTeamStats>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retired: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_owns: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_owns: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stars: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Machine {
    const FIELDS: &'static [&'static str] = &["id", "name", "os", "ip", "points", "difficulty", "release", "retired", "user_owns", "root_owns", "stars"];
}

impl Canonical for Machine {
    type Legacy = LegacyMachine;
    type Current = CurrentMachine;

    fn empty(id: u64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn absorb(&mut self, source: MachineSource) {
        let shape = source.shape();
        match source {
            Source::Legacy(m) => {
                fill(&mut self.name, m.name, shape);
                fill(&mut self.os, m.os, shape);
                fill(&mut self.ip, m.ip, shape);
                fill(&mut self.points, m.points, shape);
                fill(&mut self.difficulty, m.difficulty_text, shape);
                fill(&mut self.release, m.release, shape);
                fill(&mut self.retired, m.retired, shape);
                fill(&mut self.user_owns, m.user_owns, shape);
                fill(&mut self.root_owns, m.root_owns, shape);
                fill_extra(&mut self.extra, m.extra, Self::FIELDS, shape);
            }
            Source::Current(m) => {
                fill(&mut self.name, m.name, shape);
                fill(&mut self.os, m.os, shape);
                fill(&mut self.ip, m.ip, shape);
                fill(&mut self.points, m.points, shape);
                fill(&mut self.difficulty, m.difficulty_text, shape);
                fill(&mut self.release, m.release_date, shape);
                fill(&mut self.retired, m.retired, shape);
                fill(&mut self.user_owns, m.user_owns_count, shape);
                fill(&mut self.root_owns, m.root_owns_count, shape);
                fill(&mut self.stars, m.stars, shape);
                fill_extra(&mut self.extra, m.extra, Self::FIELDS, shape);
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solves: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retired: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Challenge {
    const FIELDS: &'static [&'static str] = &["id", "name", "category", "difficulty", "points", "solves", "release", "retired"];
}

impl Canonical for Challenge {
    type Legacy = LegacyChallenge;
    type Current = CurrentChallenge;

    fn empty(id: u64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn absorb(&mut self, source: ChallengeSource) {
        let shape = source.shape();
        match source {
            Source::Legacy(c) => {
                fill(&mut self.name, c.name, shape);
                fill(&mut self.difficulty, c.difficulty, shape);
                fill(&mut self.points, c.points, shape);
                fill(&mut self.solves, c.solves, shape);
                fill(&mut self.release, c.release_date, shape);
                fill(&mut self.retired, c.retired, shape);
                fill_extra(&mut self.extra, c.extra, Self::FIELDS, shape);
            }
            Source::Current(c) => {
                fill(&mut self.name, c.name, shape);
                fill(&mut self.category, c.category_name, shape);
                fill(&mut self.difficulty, c.difficulty, shape);
                fill(&mut self.points, c.points, shape);
                fill(&mut self.solves, c.solves, shape);
                fill(&mut self.release, c.release_date, shape);
                fill(&mut self.retired, c.retired, shape);
                fill_extra(&mut self.extra, c.extra, Self::FIELDS, shape);
            }
        }
    }
}

/// Team member with profile and recent activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_owns: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_owns: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ranking: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub activity: Vec<Activity>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Member {
    const FIELDS: &'static [&'static str] = &["id", "name", "rank", "points", "root_owns", "user_owns", "ranking", "country", "avatar", "role", "activity"];
}

impl Canonical for Member {
    type Legacy = LegacyMember;
    type Current = CurrentMember;

    fn empty(id: u64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn absorb(&mut self, source: MemberSource) {
        let shape = source.shape();
        match source {
            Source::Legacy(m) => {
                fill(&mut self.name, m.name, shape);
                fill(&mut self.rank, m.rank, shape);
                fill(&mut self.points, m.points, shape);
                fill(&mut self.root_owns, m.root_owns, shape);
                fill(&mut self.user_owns, m.user_owns, shape);
                fill(&mut self.avatar, m.avatar, shape);
                fill(&mut self.role, m.role, shape);
                fill_extra(&mut self.extra, m.extra, Self::FIELDS, shape);
            }
            Source::Current(m) => {
                fill(&mut self.name, m.name, shape);
                fill(&mut self.rank, m.rank, shape);
                fill(&mut self.points, m.points, shape);
                fill(&mut self.root_owns, m.system_owns, shape);
                fill(&mut self.user_owns, m.user_owns, shape);
                fill(&mut self.ranking, m.ranking, shape);
                fill(&mut self.country, m.country_name, shape);
                fill(&mut self.avatar, m.avatar, shape);
                fill_extra(&mut self.extra, m.extra, Self::FIELDS, shape);
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamStats {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_owns: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_owns: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_owns: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_bloods: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub respects: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motto: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl TeamStats {
    const FIELDS: &'static [&'static str] = &["id", "name", "points", "rank", "user_owns", "system_owns", "challenge_owns", "first_bloods", "respects", "motto", "country"];
}

impl Canonical for TeamStats {
    type Legacy = LegacyTeamStats;
    type Current = CurrentTeamStats;

    fn empty(id: u64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn absorb(&mut self, source: TeamStatsSource) {
        let shape = source.shape();
        match source {
            Source::Legacy(t) => {
                fill(&mut self.rank, t.rank, shape);
                fill(&mut self.user_owns, t.user_owns, shape);
                fill(&mut self.system_owns, t.system_owns, shape);
                fill(&mut self.challenge_owns, t.challenge_owns, shape);
                fill(&mut self.first_bloods, t.first_bloods, shape);
                fill(&mut self.respects, t.respects, shape);
                fill_extra(&mut self.extra, t.extra, Self::FIELDS, shape);
            }
            Source::Current(t) => {
                fill(&mut self.name, t.name, shape);
                fill(&mut self.points, t.points, shape);
                fill(&mut self.rank, t.ranking, shape);
                fill(&mut self.motto, t.motto, shape);
                fill(&mut self.country, t.country_name, shape);
                fill_extra(&mut self.extra, t.extra, Self::FIELDS, shape);
            }
        }
    }
}
