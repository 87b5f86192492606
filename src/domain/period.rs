use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use crate::domain::entities::{LeaderboardEntry, LeaderboardPeriod, LeaderboardRecord};

// Calendar month containing `now`.
pub fn month_period(now: DateTime<Utc>) -> LeaderboardPeriod {
    let today = now.date_naive();
    let start = today.with_day(1).unwrap_or(today);
    let end = first_day_of_next_month(start)
        .and_then(|next| next.pred_opt())
        .unwrap_or(today);
    LeaderboardPeriod { start, end }
}

/// Whole days from `now` until the start of the period's last day, rounded up.
/// The last day itself counts as zero.
pub fn days_remaining(period: LeaderboardPeriod, now: DateTime<Utc>) -> i64 {
    let Some(last_day) = period.end.and_hms_opt(0, 0, 0) else {
        return 0;
    };
    let remaining = last_day.and_utc() - now;
    if remaining <= Duration::zero() {
        return 0;
    }
    let whole = remaining.num_days();
    if remaining > Duration::days(whole) {
        whole + 1
    } else {
        whole
    }
}

// Order by points and attach 1-based ranks.
pub fn rank_records(mut records: Vec<LeaderboardRecord>) -> Vec<LeaderboardEntry> {
    records.sort_by(|a, b| b.points.cmp(&a.points));
    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| LeaderboardEntry {
            username: record
                .username
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| fallback_username(&record.user_id)),
            user_id: record.user_id,
            points: record.points,
            rank: index + 1,
        })
        .collect()
}

pub fn fallback_username(user_id: &str) -> String {
    let short: String = user_id.chars().take(8).collect();
    format!("User {short}")
}

fn first_day_of_next_month(start: NaiveDate) -> Option<NaiveDate> {
    if start.month() == 12 {
        NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
    }
}
