use crate::error::Result;
use crate::insights::{CiReport, RepoReport, Report};
use crate::repo_stats::{ItemRef, ItemStats, STALE_AFTER_DAYS};
use crate::streaks::FailureWindows;

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    pub no_links: bool,
    pub include_list: bool,
}

pub fn render_json(report: &Report, pretty: bool) -> Result<String> {
    let json = if pretty {
        serde_json::to_string_pretty(report)?
    } else {
        serde_json::to_string(report)?
    };
    Ok(json)
}

pub fn render_markdown(report: &Report, options: RenderOptions) -> String {
    report
        .repositories
        .iter()
        .map(|repo| render_repo(repo, options))
        .collect::<Vec<_>>()
        .join("\n")
}

fn link(text: &str, url: Option<&str>, options: RenderOptions) -> String {
    match url {
        Some(url) if !options.no_links => format!("[{text}]({url})"),
        _ => text.to_string(),
    }
}

fn render_repo(repo: &RepoReport, options: RenderOptions) -> String {
    let name = repo.full_name();
    let days = repo.settings.days;

    let mut lines = vec![if options.no_links {
        format!("* {name} Stats (Last {days} days) *")
    } else {
        format!("*_[{name}]({}) Stats (Last {days} days)_*", repo.url)
    }];

    if let Some(pr) = &repo.pr {
        render_item_stats(&mut lines, pr, "PR", options);
    }
    if let Some(issue) = &repo.issue {
        render_item_stats(&mut lines, issue, "Issue", options);
    }
    if let Some(ci) = &repo.ci {
        render_ci(&mut lines, ci, options);
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn render_item_list(lines: &mut Vec<String>, items: &[ItemRef], options: RenderOptions) {
    lines.extend(items.iter().map(|item| {
        let title = format!("{} (#{})", item.title, item.number);
        format!(
            "        * {} - @{}",
            link(&title, Some(&item.url), options),
            item.author
        )
    }));
}

fn format_duration(hours: f64) -> String {
    let round2 = |v: f64| (v * 100.0).round() / 100.0;
    if hours > 24.0 {
        format!("{} days", round2(hours / 24.0))
    } else {
        format!("{} hours", round2(hours))
    }
}

fn render_item_stats(
    lines: &mut Vec<String>,
    stats: &ItemStats,
    kind: &str,
    options: RenderOptions,
) {
    let plural = format!("{kind}s");

    lines.push(String::new());
    lines.push(format!("* {kind} Stats:"));
    lines.push(format!("    * Closed {plural}: {}", stats.closed));
    if options.include_list {
        render_item_list(lines, &stats.closed_list, options);
    }

    let listing = if options.include_list { "listing " } else { "" };
    lines.push(format!(
        "    * Open {plural}: {} ({listing}{} opened this period)",
        stats.open, stats.opened_this_period
    ));
    if options.include_list {
        render_item_list(lines, &stats.open_list, options);
    }

    if let Some(oldest) = stats.oldest_open {
        lines.push(format!(
            "    * Oldest Open {kind}: {oldest} ({} days open, last activity {} days ago)",
            stats.oldest_open_days, stats.oldest_open_last_activity
        ));
    }
    lines.push(format!(
        "    * Stale {kind} (>{STALE_AFTER_DAYS} days without comment): {}",
        stats.stale_count
    ));
    lines.push(format!(
        "    * Avg Time to Close {plural}: {}",
        format_duration(stats.avg_time_to_close_hours)
    ));
}

fn render_branch(
    lines: &mut Vec<String>,
    branch: &str,
    jobs: &FailureWindows,
    options: RenderOptions,
) {
    let line = format!("    * Branch: `{branch}`");
    if jobs.is_empty() {
        lines.push(format!("{line}: No job failures found! :tada:"));
        return;
    }

    lines.push(format!("{line} has the following failures:"));
    for (job, window) in jobs {
        let latest = window
            .latest
            .as_ref()
            .map_or("unknown", |l| l.status.as_str());
        lines.push(format!(
            "        * {}: {} days (latest: {latest})",
            link(job, window.url.as_deref(), options),
            window.broken_days()
        ));
    }
}

fn render_ci(lines: &mut Vec<String>, ci: &CiReport, options: RenderOptions) {
    lines.push(String::new());
    lines.push("* CI Stats:".to_string());
    match ci {
        CiReport::Collected { branches } => {
            for (branch, jobs) in branches {
                render_branch(lines, branch, jobs, options);
            }
        }
        CiReport::TimedOut { after_seconds } => lines.push(format!(
            "    * CI data collection timed out after {after_seconds} seconds"
        )),
    }
}
