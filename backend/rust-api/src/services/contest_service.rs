use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;

use super::contest_hub::ContestHub;
use super::AppState;
use crate::metrics::{record_cache_hit, record_cache_miss, track_cache_operation};
use crate::models::contest::{
    next_phase, ContestPhase, ContestSchedule, ContestServerEvent, Leaderboard, LeaderboardEntry,
};

const LEADERBOARD_CACHE_TTL_SECONDS: u64 = 300;
const SCHEDULED_CONTESTS_KEY: &str = "contests:scheduled";

fn scores_key(contest_id: &str) -> String {
    format!("contest:{}:scores", contest_id)
}

fn solved_key(contest_id: &str, user_id: &str) -> String {
    format!("contest:{}:solved:{}", contest_id, user_id)
}

fn last_accepted_key(contest_id: &str) -> String {
    format!("contest:{}:last_accepted", contest_id)
}

fn leaderboard_key(contest_id: &str) -> String {
    format!("contest:{}:leaderboard", contest_id)
}

fn status_key(contest_id: &str) -> String {
    format!("contest:{}:status", contest_id)
}

fn schedule_key(contest_id: &str) -> String {
    format!("contest:{}:schedule", contest_id)
}

/// Contest scoring kept in Redis plus room broadcasts through the hub
pub struct ContestService {
    redis: ConnectionManager,
    hub: Arc<ContestHub>,
}

impl ContestService {
    pub fn new(redis: ConnectionManager, hub: Arc<ContestHub>) -> Self {
        Self { redis, hub }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(state.redis.clone(), state.contests.clone())
    }

    /// Counts an accepted submission once per (user, problem) and pushes the
    /// refreshed leaderboard to the contest room.
    pub async fn record_accepted(
        &self,
        contest_id: &str,
        user_id: &str,
        problem_id: &str,
        accepted_at: DateTime<Utc>,
    ) -> Result<Option<Leaderboard>> {
        let mut conn = self.redis.clone();

        let solved_key = solved_key(contest_id, user_id);
        let newly_solved: i64 = track_cache_operation("sadd", async {
            redis::cmd("SADD")
                .arg(&solved_key)
                .arg(problem_id)
                .query_async(&mut conn)
                .await
                .context("Failed to record solved problem")
        })
        .await?;

        if newly_solved == 0 {
            return Ok(None);
        }

        let scores_key = scores_key(contest_id);
        let last_key = last_accepted_key(contest_id);
        track_cache_operation("zincrby", async {
            redis::pipe()
                .atomic()
                .cmd("ZINCRBY")
                .arg(&scores_key)
                .arg(1)
                .arg(user_id)
                .ignore()
                .cmd("HSET")
                .arg(&last_key)
                .arg(user_id)
                .arg(accepted_at.timestamp_millis())
                .ignore()
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to update contest score")
        })
        .await?;

        let leaderboard = self.rebuild_leaderboard(contest_id).await?;
        self.hub.publish(
            contest_id,
            ContestServerEvent::LeaderboardUpdate(leaderboard.clone()),
        );
        tracing::info!(contest_id, user_id, problem_id, "Contest leaderboard updated");

        Ok(Some(leaderboard))
    }

    pub async fn leaderboard(&self, contest_id: &str) -> Result<Leaderboard> {
        let mut conn = self.redis.clone();
        let key = leaderboard_key(contest_id);

        let cached: Option<String> = track_cache_operation("get", async {
            redis::cmd("GET")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .context("Failed to read cached leaderboard")
        })
        .await?;

        if let Some(json) = cached {
            if let Ok(leaderboard) = serde_json::from_str::<Leaderboard>(&json) {
                record_cache_hit();
                return Ok(leaderboard);
            }
        }
        record_cache_miss();

        self.rebuild_leaderboard(contest_id).await
    }

    async fn rebuild_leaderboard(&self, contest_id: &str) -> Result<Leaderboard> {
        let mut conn = self.redis.clone();

        let scores: Vec<(String, f64)> = redis::cmd("ZREVRANGE")
            .arg(scores_key(contest_id))
            .arg(0)
            .arg(-1)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await
            .context("Failed to read contest scores")?;

        let last_accepted: HashMap<String, i64> = redis::cmd("HGETALL")
            .arg(last_accepted_key(contest_id))
            .query_async(&mut conn)
            .await
            .context("Failed to read contest timestamps")?;

        let leaderboard = Leaderboard {
            contest_id: contest_id.to_string(),
            entries: rank_entries(scores, &last_accepted),
            updated_at: Utc::now(),
        };

        let key = leaderboard_key(contest_id);
        let json = serde_json::to_string(&leaderboard)?;
        track_cache_operation("setex", async {
            redis::cmd("SETEX")
                .arg(&key)
                .arg(LEADERBOARD_CACHE_TTL_SECONDS)
                .arg(json)
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to cache leaderboard")
        })
        .await?;

        Ok(leaderboard)
    }

    pub async fn set_status(&self, contest_id: &str, status: ContestPhase) -> Result<usize> {
        let mut conn = self.redis.clone();
        let key = status_key(contest_id);

        track_cache_operation("set", async {
            redis::cmd("SET")
                .arg(&key)
                .arg(status.as_str())
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to store contest status")
        })
        .await?;

        let delivered = self.hub.publish(
            contest_id,
            ContestServerEvent::ContestStatus {
                contest_id: contest_id.to_string(),
                status,
            },
        );
        tracing::info!(contest_id, status = status.as_str(), delivered, "Contest status broadcast");

        Ok(delivered)
    }

    /// Stores the contest window next to its status and applies the phase
    /// the clock already implies.
    pub async fn set_schedule(
        &self,
        contest_id: &str,
        schedule: ContestSchedule,
    ) -> Result<Option<ContestPhase>> {
        let mut conn = self.redis.clone();
        let key = schedule_key(contest_id);

        track_cache_operation("hset", async {
            redis::pipe()
                .atomic()
                .cmd("HSET")
                .arg(&key)
                .arg("start")
                .arg(schedule.start_time.timestamp_millis())
                .arg("end")
                .arg(schedule.end_time.timestamp_millis())
                .ignore()
                .cmd("SADD")
                .arg(SCHEDULED_CONTESTS_KEY)
                .arg(contest_id)
                .ignore()
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to store contest schedule")
        })
        .await?;

        tracing::info!(
            contest_id,
            start = %schedule.start_time,
            end = %schedule.end_time,
            "Contest scheduled"
        );
        self.advance(contest_id, Utc::now()).await
    }

    /// Moves every scheduled contest to the phase its window implies at `now`.
    /// Returns the contests that changed phase.
    pub async fn advance_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<(String, ContestPhase)>> {
        let mut conn = self.redis.clone();
        let contest_ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(SCHEDULED_CONTESTS_KEY)
            .query_async(&mut conn)
            .await
            .context("Failed to list scheduled contests")?;

        let mut moved = Vec::new();
        for contest_id in contest_ids {
            match self.advance(&contest_id, now).await {
                Ok(Some(phase)) => moved.push((contest_id, phase)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(contest_id = %contest_id, error = %e, "Contest phase update failed");
                }
            }
        }
        Ok(moved)
    }

    async fn advance(&self, contest_id: &str, now: DateTime<Utc>) -> Result<Option<ContestPhase>> {
        let mut conn = self.redis.clone();

        let (start, end): (Option<i64>, Option<i64>) = redis::cmd("HMGET")
            .arg(schedule_key(contest_id))
            .arg("start")
            .arg("end")
            .query_async(&mut conn)
            .await
            .context("Failed to read contest schedule")?;
        let stored: Option<String> = redis::cmd("GET")
            .arg(status_key(contest_id))
            .query_async(&mut conn)
            .await
            .context("Failed to read contest status")?;

        let schedule = start
            .zip(end)
            .and_then(|(start, end)| {
                Some(ContestSchedule {
                    start_time: DateTime::from_timestamp_millis(start)?,
                    end_time: DateTime::from_timestamp_millis(end)?,
                })
            });
        let Some(schedule) = schedule else {
            self.unschedule(contest_id).await?;
            return Ok(None);
        };

        let current = stored.as_deref().and_then(ContestPhase::parse);
        let next = next_phase(current, schedule.phase_at(now));
        if let Some(phase) = next {
            self.set_status(contest_id, phase).await?;
        }
        if next.or(current) == Some(ContestPhase::Ended) {
            self.unschedule(contest_id).await?;
        }
        Ok(next)
    }

    async fn unschedule(&self, contest_id: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        redis::cmd("SREM")
            .arg(SCHEDULED_CONTESTS_KEY)
            .arg(contest_id)
            .query_async::<()>(&mut conn)
            .await
            .context("Failed to drop finished contest from the schedule")
    }
}

/// Orders by problems solved, ties broken by the earlier last accepted submission
pub fn rank_entries(
    scores: Vec<(String, f64)>,
    last_accepted: &HashMap<String, i64>,
) -> Vec<LeaderboardEntry> {
    let mut rows: Vec<(String, u64, Option<i64>)> = scores
        .into_iter()
        .map(|(user, score)| {
            let at = last_accepted.get(&user).copied();
            (user, score.max(0.0) as u64, at)
        })
        .collect();

    rows.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| a.2.unwrap_or(i64::MAX).cmp(&b.2.unwrap_or(i64::MAX)))
            .then_with(|| a.0.cmp(&b.0))
    });

    rows.into_iter()
        .enumerate()
        .map(|(index, (user_id, solved, at))| LeaderboardEntry {
            rank: index + 1,
            user_id,
            solved,
            last_accepted_at: at.and_then(DateTime::from_timestamp_millis),
        })
        .collect()
}
