//! Participant roster and population scoping.
//!
//! The roster is the arena of known participants; leaderboards are computed
//! over a scoped subset of it (whole org, one team, one department, or an
//! explicit id list).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A call-center agent taking part in the program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub department: String,
}

impl Participant {
    pub fn new(id: &str, display_name: &str, team: &str, department: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            team: team.to_string(),
            department: department.to_string(),
        }
    }

    /// Log label, `id@team` (`id` alone when unassigned)
    pub fn debug_tag(&self) -> String {
        if self.team.is_empty() {
            self.id.clone()
        } else {
            format!("{}@{}", self.id, self.team)
        }
    }
}

/// Which slice of the roster a leaderboard covers
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PopulationScope {
    #[default]
    Org,
    Team(String),
    Department(String),
    Explicit(Vec<String>),
}

impl PopulationScope {
    pub fn includes(&self, participant: &Participant) -> bool {
        match self {
            Self::Org => true,
            Self::Team(team) => participant.team == *team,
            Self::Department(dept) => participant.department == *dept,
            Self::Explicit(ids) => ids.iter().any(|id| *id == participant.id),
        }
    }
}

impl std::fmt::Display for PopulationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Org => write!(f, "org"),
            Self::Team(t) => write!(f, "team:{}", t),
            Self::Department(d) => write!(f, "department:{}", d),
            Self::Explicit(ids) => write!(f, "explicit:{}", ids.len()),
        }
    }
}

/// Participants keyed by id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Roster {
    participants: BTreeMap<String, Participant>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_participants(participants: impl IntoIterator<Item = Participant>) -> Self {
        let mut roster = Self::new();
        for p in participants {
            roster.insert(p);
        }
        roster
    }

    /// Insert or replace a participant
    pub fn insert(&mut self, participant: Participant) {
        self.participants.insert(participant.id.clone(), participant);
    }

    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.participants.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.participants.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    /// Participants inside `scope`, in id order
    pub fn population(&self, scope: &PopulationScope) -> Vec<&Participant> {
        self.iter().filter(|p| scope.includes(p)).collect()
    }
}
