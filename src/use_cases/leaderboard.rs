use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::domain::entities::{LeaderboardEntry, LeaderboardPeriod};
use crate::domain::errors::DataFetchError;
use crate::domain::period::{days_remaining, month_period, rank_records};
use crate::domain::ports::{Clock, RemoteGateway};
use crate::use_cases::session::SessionManager;

pub const LEADERBOARD_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardView {
    pub period: LeaderboardPeriod,
    pub days_remaining: i64,
    pub entries: Vec<LeaderboardEntry>,
    // The signed-in user's row, when they made the top list.
    pub user_entry: Option<LeaderboardEntry>,
}

/// Monthly leaderboard reads for the current period.
#[derive(Clone)]
pub struct LeaderboardUseCase {
    pub gateway: Arc<dyn RemoteGateway>,
    pub session: SessionManager,
    pub clock: Arc<dyn Clock>,
}

impl LeaderboardUseCase {
    pub fn now(&self) -> DateTime<Utc> {
        let seconds = i64::try_from(self.clock.now_epoch_seconds()).unwrap_or(i64::MAX);
        DateTime::from_timestamp(seconds, 0).unwrap_or_default()
    }

    pub fn current_period(&self) -> LeaderboardPeriod {
        month_period(self.now())
    }

    pub fn days_remaining(&self) -> i64 {
        let now = self.now();
        days_remaining(month_period(now), now)
    }

    pub async fn fetch_leaderboard(&self) -> Result<Vec<LeaderboardEntry>, DataFetchError> {
        let period = self.current_period();
        let token = self.session.access_token();
        let records = self
            .gateway
            .fetch_leaderboard(token.as_deref(), period, LEADERBOARD_LIMIT)
            .await?;
        let mut entries = rank_records(records);
        entries.truncate(LEADERBOARD_LIMIT);
        Ok(entries)
    }

    pub async fn execute(&self) -> Result<LeaderboardView, DataFetchError> {
        let now = self.now();
        let period = month_period(now);
        let entries = self.fetch_leaderboard().await?;
        let user_entry = self
            .session
            .current_user()
            .and_then(|user| user_rank(&entries, &user.id).cloned());
        debug!(entries = entries.len(), "leaderboard loaded");
        Ok(LeaderboardView {
            period,
            days_remaining: days_remaining(period, now),
            entries,
            user_entry,
        })
    }
}

pub fn user_rank<'a>(
    entries: &'a [LeaderboardEntry],
    user_id: &str,
) -> Option<&'a LeaderboardEntry> {
    entries.iter().find(|entry| entry.user_id == user_id)
}

/// Periodically reloaded leaderboard; the refresh task stops when the feed is dropped.
pub struct LeaderboardFeed {
    rx: watch::Receiver<Option<LeaderboardView>>,
    task: JoinHandle<()>,
}

impl LeaderboardFeed {
    pub fn spawn(use_case: LeaderboardUseCase, every: Duration) -> Self {
        let (tx, rx) = watch::channel(None);
        let period = every.max(Duration::from_secs(1));
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match use_case.execute().await {
                    Ok(view) => {
                        if tx.send(Some(view)).is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(error = %err, "leaderboard refresh failed"),
                }
            }
        });
        Self { rx, task }
    }

    pub fn latest(&self) -> Option<LeaderboardView> {
        self.rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<LeaderboardView>> {
        self.rx.clone()
    }
}

impl Drop for LeaderboardFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}
