use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Messages a WebSocket client sends to the contest hub
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ContestClientEvent {
    #[serde(rename_all = "camelCase")]
    JoinContest { contest_id: String, user_id: String },
    #[serde(rename_all = "camelCase")]
    LeaveContest { contest_id: String },
}

/// Messages pushed to every member of a contest room
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ContestServerEvent {
    LeaderboardUpdate(Leaderboard),
    #[serde(rename_all = "camelCase")]
    ContestStatus { contest_id: String, status: ContestPhase },
    #[serde(rename_all = "camelCase")]
    Joined { contest_id: String },
    #[serde(rename_all = "camelCase")]
    Left { contest_id: String },
    Error { message: String },
}

impl ContestServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ContestServerEvent::LeaderboardUpdate(_) => "leaderboard_update",
            ContestServerEvent::ContestStatus { .. } => "contest_status",
            ContestServerEvent::Joined { .. } => "joined",
            ContestServerEvent::Left { .. } => "left",
            ContestServerEvent::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContestPhase {
    Upcoming,
    Ongoing,
    Ended,
}

impl ContestPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContestPhase::Upcoming => "upcoming",
            ContestPhase::Ongoing => "ongoing",
            ContestPhase::Ended => "ended",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "upcoming" => Some(ContestPhase::Upcoming),
            "ongoing" => Some(ContestPhase::Ongoing),
            "ended" => Some(ContestPhase::Ended),
            _ => None,
        }
    }

    fn order(self) -> u8 {
        match self {
            ContestPhase::Upcoming => 0,
            ContestPhase::Ongoing => 1,
            ContestPhase::Ended => 2,
        }
    }
}

/// Start and end of a contest window
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContestSchedule {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl ContestSchedule {
    pub fn check(&self) -> Result<(), String> {
        if self.end_time <= self.start_time {
            return Err("endTime must be after startTime".to_string());
        }
        Ok(())
    }

    /// Both bounds are inclusive: the contest goes live at `start_time` and ends at `end_time`
    pub fn phase_at(&self, now: DateTime<Utc>) -> ContestPhase {
        if now >= self.end_time {
            ContestPhase::Ended
        } else if now >= self.start_time {
            ContestPhase::Ongoing
        } else {
            ContestPhase::Upcoming
        }
    }
}

/// Phase to switch to when the clock says `target`. Phases never move
/// backwards, so a contest ended by hand stays ended.
pub fn next_phase(current: Option<ContestPhase>, target: ContestPhase) -> Option<ContestPhase> {
    match current {
        Some(current) if current.order() >= target.order() => None,
        _ => Some(target),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: String,
    pub solved: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accepted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Leaderboard {
    pub contest_id: String,
    pub entries: Vec<LeaderboardEntry>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ContestStatusRequest {
    pub status: ContestPhase,
}
