use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::providers::github::IssueDto;

/// Items carrying this label are parked on the author, not on maintainers.
pub const WAITING_ON_CONTRIBUTOR: &str = "Status: Waiting on Contributor";
pub const STALE_AFTER_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemRef {
    pub number: u64,
    pub title: String,
    pub url: String,
    pub author: String,
}

impl From<&IssueDto> for ItemRef {
    fn from(item: &IssueDto) -> Self {
        Self {
            number: item.number,
            title: item.title.clone(),
            url: item.html_url.clone(),
            author: item.author().to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ItemStats {
    pub open: usize,
    pub closed: usize,
    pub opened_this_period: usize,
    pub stale_count: usize,
    pub oldest_open: Option<NaiveDate>,
    pub oldest_open_days: i64,
    pub oldest_open_last_activity: i64,
    pub avg_time_to_close_hours: f64,
    pub open_list: Vec<ItemRef>,
    pub closed_list: Vec<ItemRef>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RepoStats {
    pub pr: ItemStats,
    pub issue: ItemStats,
}

/// Whether an item was opened or closed inside the window. The issues API
/// lists newest first, so a page with no such item ends pagination.
pub fn touches_window(item: &IssueDto, window_start: NaiveDate) -> bool {
    item.created_at.date_naive() >= window_start
        || item
            .closed_at
            .is_some_and(|closed| closed.date_naive() >= window_start)
}

pub fn compute(
    items: &[IssueDto],
    window_start: NaiveDate,
    today: NaiveDate,
    count_unmerged_prs: bool,
) -> RepoStats {
    let stale_cutoff = today - Duration::days(STALE_AFTER_DAYS);
    let mut stats = RepoStats::default();
    let (mut pr_close_hours, mut issue_close_hours) = (0.0, 0.0);

    for item in items {
        let is_pr = item.is_pull_request();
        let (bucket, close_hours) = if is_pr {
            (&mut stats.pr, &mut pr_close_hours)
        } else {
            (&mut stats.issue, &mut issue_close_hours)
        };
        let created = item.created_at.date_naive();
        let last_activity = item.updated_at.date_naive();

        if item.closed_at.is_none() && !item.has_label(WAITING_ON_CONTRIBUTOR) {
            if bucket.oldest_open.map_or(true, |oldest| created < oldest) {
                bucket.oldest_open = Some(created);
                bucket.oldest_open_days = (today - created).num_days();
                bucket.oldest_open_last_activity = (today - last_activity).num_days();
            }
            if last_activity < stale_cutoff {
                bucket.stale_count += 1;
            }
            bucket.open += 1;
            if created >= window_start {
                bucket.opened_this_period += 1;
                bucket.open_list.push(ItemRef::from(item));
            }
        }

        let Some(closed_at) = item.closed_at else {
            continue;
        };
        if closed_at.date_naive() < window_start {
            continue;
        }
        if is_pr && !count_unmerged_prs && !item.is_merged() {
            continue;
        }

        bucket.closed += 1;
        #[allow(clippy::cast_precision_loss)]
        let hours = (closed_at - item.created_at).num_seconds() as f64 / 3600.0;
        *close_hours += hours;
        bucket.closed_list.push(ItemRef::from(item));
    }

    for (bucket, total_hours) in [
        (&mut stats.pr, pr_close_hours),
        (&mut stats.issue, issue_close_hours),
    ] {
        if bucket.closed > 0 {
            #[allow(clippy::cast_precision_loss)]
            let avg = total_hours / bucket.closed as f64;
            bucket.avg_time_to_close_hours = avg;
        }
    }

    stats
}
