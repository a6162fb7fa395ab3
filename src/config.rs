use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::ValueEnum;
use indexmap::IndexMap;
use log::{debug, info};
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::error::{CiStatsError, Result};

pub const CONFIG_FILE_NAME: &str = "ci_streaks.yml";
pub const DEFAULT_GITHUB_API: &str = "https://api.github.com/";
/// Longest reporting window accepted, in days.
pub const MAX_DAYS: u32 = 36_500;

// ---------------------------------------------------------------------------
// Enums shared with the command line
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Ci,
    Pr,
    Issue,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modes {
    pub ci: bool,
    pub pr: bool,
    pub issue: bool,
}

impl Modes {
    pub fn from_list(modes: &[Mode]) -> Self {
        let all = modes.contains(&Mode::All);
        Self {
            ci: all || modes.contains(&Mode::Ci),
            pr: all || modes.contains(&Mode::Pr),
            issue: all || modes.contains(&Mode::Issue),
        }
    }

    pub fn any_repo_stats(self) -> bool {
        self.pr || self.issue
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    #[serde(alias = "fatal")]
    #[value(alias = "fatal")]
    Error,
}

impl LogLevel {
    pub fn to_filter(self) -> log::LevelFilter {
        match self {
            Self::Trace => log::LevelFilter::Trace,
            Self::Debug => log::LevelFilter::Debug,
            Self::Info => log::LevelFilter::Info,
            Self::Warn => log::LevelFilter::Warn,
            Self::Error => log::LevelFilter::Error,
        }
    }
}

// ---------------------------------------------------------------------------
// TopN
// ---------------------------------------------------------------------------

/// "N" or "N%" of the repositories in a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum TopN {
    Count(usize),
    Percent(f64),
}

impl TopN {
    pub fn resolve(self, total: usize) -> usize {
        match self {
            Self::Count(n) => n,
            #[allow(
                clippy::cast_precision_loss,
                clippy::cast_possible_truncation,
                clippy::cast_sign_loss
            )]
            Self::Percent(p) => (p / 100.0 * total as f64).ceil() as usize,
        }
    }
}

impl FromStr for TopN {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(pct) = s.strip_suffix('%') {
            pct.trim()
                .parse::<f64>()
                .ok()
                .filter(|p| p.is_finite() && *p >= 0.0)
                .map(Self::Percent)
                .ok_or_else(|| format!("invalid percentage '{s}'"))
        } else {
            s.parse::<usize>()
                .map(Self::Count)
                .map_err(|_| format!("expected N or N%, got '{s}'"))
        }
    }
}

impl fmt::Display for TopN {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(n) => write!(f, "{n}"),
            Self::Percent(p) => write!(f, "{p}%"),
        }
    }
}

impl<'de> Deserialize<'de> for TopN {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Count(usize),
            Text(String),
        }

        match Raw::deserialize(d)? {
            Raw::Count(n) => Ok(Self::Count(n)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Axes for trimming the report down to the worst repositories.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TopNConfig {
    pub stale: Option<TopN>,
    pub oldest: Option<TopN>,
    pub time_to_close: Option<TopN>,
    pub stale_pr: Option<TopN>,
    pub stale_issue: Option<TopN>,
    pub oldest_pr: Option<TopN>,
    pub oldest_issue: Option<TopN>,
    pub time_to_close_pr: Option<TopN>,
    pub time_to_close_issue: Option<TopN>,
    pub most_broken_ci_days: Option<TopN>,
    pub most_broken_ci_jobs: Option<TopN>,
}

impl TopNConfig {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Fields set in `other` replace ours.
    #[must_use]
    pub fn overlay(mut self, other: &Self) -> Self {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(
            stale,
            oldest,
            time_to_close,
            stale_pr,
            stale_issue,
            oldest_pr,
            oldest_issue,
            time_to_close_pr,
            time_to_close_issue,
            most_broken_ci_days,
            most_broken_ci_jobs
        );
        self
    }
}

// ---------------------------------------------------------------------------
// File schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepoConfig {
    pub days: Option<u32>,
    #[serde(deserialize_with = "optional_branch_list")]
    pub branches: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrgConfig {
    pub days: Option<u32>,
    #[serde(deserialize_with = "optional_branch_list")]
    pub branches: Option<Vec<String>>,
    pub repositories: IndexMap<String, RepoConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Fallbacks used when neither the repo nor its org says otherwise.
    #[serde(deserialize_with = "branch_list")]
    pub default_branches: Vec<String>,
    pub default_days: u32,
    /// Run-wide overrides that beat every per-org and per-repo setting.
    pub days: Option<u32>,
    #[serde(deserialize_with = "optional_branch_list")]
    pub branches: Option<Vec<String>>,

    pub log_level: LogLevel,
    /// Seconds allowed for the CI section of one repository.
    pub ci_timeout: u64,
    pub no_links: bool,
    pub include_list: bool,
    pub count_unmerged_prs: bool,
    pub mode: Vec<Mode>,

    pub github_api_endpoint: Option<String>,
    pub github_token: Option<String>,
    pub buildkite_token: Option<String>,
    pub buildkite_org: Option<String>,
    pub limit_gh_ops_per_minute: Option<f64>,

    pub top_n: TopNConfig,
    pub organizations: IndexMap<String, OrgConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_branches: vec!["main".to_string()],
            default_days: 30,
            days: None,
            branches: None,
            log_level: LogLevel::Info,
            ci_timeout: 600,
            no_links: false,
            include_list: false,
            count_unmerged_prs: false,
            mode: vec![Mode::All],
            github_api_endpoint: None,
            github_token: None,
            buildkite_token: None,
            buildkite_org: None,
            limit_gh_ops_per_minute: None,
            top_n: TopNConfig::default(),
            organizations: IndexMap::new(),
        }
    }
}

fn split_branches<'a>(items: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    items
        .into_iter()
        .flat_map(|item| item.split(','))
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
        .collect()
}

/// Branches may be written as a YAML list or as "main, v2".
#[derive(Deserialize)]
#[serde(untagged)]
enum RawBranches {
    Csv(String),
    List(Vec<String>),
}

impl RawBranches {
    fn normalize(self) -> Vec<String> {
        match self {
            Self::Csv(s) => split_branches([s.as_str()]),
            Self::List(v) => split_branches(v.iter().map(String::as_str)),
        }
    }
}

fn branch_list<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<String>, D::Error> {
    RawBranches::deserialize(d).map(RawBranches::normalize)
}

fn optional_branch_list<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<Vec<String>>, D::Error> {
    Ok(Option::<RawBranches>::deserialize(d)?.map(RawBranches::normalize))
}

/// Splits a comma-separated command line value the same way the file does.
pub fn parse_branch_arg(value: &str) -> Vec<String> {
    split_branches([value])
}

// ---------------------------------------------------------------------------
// Overrides and effective settings
// ---------------------------------------------------------------------------

/// Command line values layered over the file. `None` leaves the file alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub days: Option<u32>,
    pub default_days: Option<u32>,
    pub branches: Option<Vec<String>>,
    pub default_branches: Option<Vec<String>>,
    pub mode: Option<Vec<Mode>>,
    pub log_level: Option<LogLevel>,
    pub ci_timeout: Option<u64>,
    pub include_list: bool,
    pub no_links: bool,
    pub count_unmerged_prs: bool,
    pub github_api_endpoint: Option<String>,
    pub buildkite_org: Option<String>,
    pub limit_gh_ops_per_minute: Option<f64>,
    pub top_n: TopNConfig,
}

/// What one repository will actually be reported with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoSettings {
    pub org: String,
    pub repo: String,
    pub days: u32,
    pub branches: Vec<String>,
}

impl RepoSettings {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.org, self.repo)
    }

    pub fn html_url(&self) -> String {
        format!("https://github.com/{}/{}", self.org, self.repo)
    }
}

impl Config {
    /// The explicitly named file, or the first `ci_streaks.yml` found in
    /// `./`, `~/.config/ci_streaks/`, `/etc`.
    pub fn find_file(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(CiStatsError::Config(format!(
                    "Specified config file '{}' not found",
                    path.display()
                )));
            }
            return Ok(Some(path.to_path_buf()));
        }

        let mut dirs = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            dirs.push(cwd);
        }
        if let Some(home) = home::home_dir() {
            dirs.push(home.join(".config").join("ci_streaks"));
        }
        dirs.push(PathBuf::from("/etc"));

        Ok(Self::search(&dirs))
    }

    fn search(dirs: &[PathBuf]) -> Option<PathBuf> {
        dirs.iter().map(|dir| dir.join(CONFIG_FILE_NAME)).find(|f| {
            debug!("Checking if {} exists...", f.display());
            f.exists()
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let cfg = Self::from_yaml(&data)?;
        info!("Loaded configuration from: {}", path.display());
        Ok(cfg)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(data)?)
    }

    #[must_use]
    pub fn with_overrides(mut self, o: &Overrides) -> Self {
        if o.days.is_some() {
            self.days = o.days;
        }
        if let Some(days) = o.default_days {
            self.default_days = days;
        }
        if o.branches.is_some() {
            self.branches.clone_from(&o.branches);
        }
        if let Some(branches) = &o.default_branches {
            self.default_branches.clone_from(branches);
        }
        if let Some(mode) = &o.mode {
            self.mode.clone_from(mode);
        }
        if let Some(level) = o.log_level {
            self.log_level = level;
        }
        if let Some(timeout) = o.ci_timeout {
            self.ci_timeout = timeout;
        }
        self.include_list |= o.include_list;
        self.no_links |= o.no_links;
        self.count_unmerged_prs |= o.count_unmerged_prs;
        if o.github_api_endpoint.is_some() {
            self.github_api_endpoint.clone_from(&o.github_api_endpoint);
        }
        if o.buildkite_org.is_some() {
            self.buildkite_org.clone_from(&o.buildkite_org);
        }
        if o.limit_gh_ops_per_minute.is_some() {
            self.limit_gh_ops_per_minute = o.limit_gh_ops_per_minute;
        }
        self.top_n = self.top_n.overlay(&o.top_n);
        self
    }

    pub fn modes(&self) -> Modes {
        Modes::from_list(&self.mode)
    }

    pub fn github_api_url(&self) -> &str {
        self.github_api_endpoint
            .as_deref()
            .unwrap_or(DEFAULT_GITHUB_API)
    }

    /// Pause between GitHub calls, if the config asks for one.
    pub fn github_call_delay(&self) -> Option<std::time::Duration> {
        self.limit_gh_ops_per_minute
            .filter(|rate| rate.is_finite() && *rate > 0.0)
            .and_then(|rate| std::time::Duration::try_from_secs_f64(60.0 / rate).ok())
    }

    /// Repositories to report on, each with its effective days and branches.
    ///
    /// `github_org`/`github_repo` narrow the configured set; repositories
    /// named on the command line but absent from the file are reported with
    /// defaults.
    pub fn repositories(
        &self,
        github_org: Option<&str>,
        github_repo: Option<&str>,
    ) -> Result<Vec<RepoSettings>> {
        let empty_org = OrgConfig::default();
        let empty_repo = RepoConfig::default();

        let settings: Vec<RepoSettings> = match (github_org, github_repo) {
            (None, Some(_)) => {
                return Err(CiStatsError::Config(
                    "--github-repo requires --github-org".to_string(),
                ))
            }
            (None, None) => self
                .organizations
                .iter()
                .flat_map(|(org, org_cfg)| {
                    org_cfg
                        .repositories
                        .iter()
                        .map(move |(repo, repo_cfg)| (org.as_str(), org_cfg, repo.as_str(), repo_cfg))
                })
                .map(|(org, org_cfg, repo, repo_cfg)| self.effective(org, org_cfg, repo, repo_cfg))
                .collect(),
            (Some(org), None) => {
                let org_cfg = self.organizations.get(org).unwrap_or(&empty_org);
                org_cfg
                    .repositories
                    .iter()
                    .map(|(repo, repo_cfg)| self.effective(org, org_cfg, repo, repo_cfg))
                    .collect()
            }
            (Some(org), Some(repo)) => {
                let org_cfg = self.organizations.get(org).unwrap_or(&empty_org);
                let repo_cfg = org_cfg.repositories.get(repo).unwrap_or(&empty_repo);
                vec![self.effective(org, org_cfg, repo, repo_cfg)]
            }
        };

        Ok(settings)
    }

    fn effective(
        &self,
        org: &str,
        org_cfg: &OrgConfig,
        repo: &str,
        repo_cfg: &RepoConfig,
    ) -> RepoSettings {
        let days = self
            .days
            .or(repo_cfg.days)
            .or(org_cfg.days)
            .unwrap_or(self.default_days);
        let branches = self
            .branches
            .as_ref()
            .or(repo_cfg.branches.as_ref())
            .or(org_cfg.branches.as_ref())
            .unwrap_or(&self.default_branches)
            .clone();

        RepoSettings {
            org: org.to_string(),
            repo: repo.to_string(),
            days,
            branches,
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigProblem> {
        let mut problems = Vec::new();

        if self.default_branches.is_empty() {
            problems.push(ConfigProblem::error("default_branches must not be empty"));
        }
        if matches!(&self.branches, Some(b) if b.is_empty()) {
            problems.push(ConfigProblem::error("branches must not be empty when set"));
        }
        if self.default_days == 0 || self.days == Some(0) {
            problems.push(ConfigProblem::warning(
                "a window of 0 days only covers today",
            ));
        }
        self.validate_days(&mut problems);
        if self.ci_timeout == 0 {
            problems.push(ConfigProblem::error("ci_timeout must be at least 1 second"));
        }
        if self.mode.is_empty() {
            problems.push(ConfigProblem::error("mode must list at least one of ci, pr, issue, all"));
        }
        if let Some(rate) = self.limit_gh_ops_per_minute {
            if !rate.is_finite() || rate <= 0.0 {
                problems.push(ConfigProblem::warning(format!(
                    "limit_gh_ops_per_minute={rate} is ignored; use a positive number"
                )));
            } else if self.github_call_delay().is_none() {
                problems.push(ConfigProblem::error(format!(
                    "limit_gh_ops_per_minute={rate} is too small to pace requests"
                )));
            }
        }
        if let Some(endpoint) = &self.github_api_endpoint {
            if let Err(e) = Url::parse(endpoint) {
                problems.push(ConfigProblem::error(format!(
                    "github_api_endpoint '{endpoint}' is not a valid URL: {e}"
                )));
            }
        }
        if self.organizations.is_empty() {
            problems.push(ConfigProblem::warning(
                "no organizations configured; only --github-org runs will report anything",
            ));
        }

        for (org, org_cfg) in &self.organizations {
            if org_cfg.repositories.is_empty() {
                problems.push(ConfigProblem::warning(format!(
                    "organization '{org}' has no repositories"
                )));
            }
            if matches!(&org_cfg.branches, Some(b) if b.is_empty()) {
                problems.push(ConfigProblem::error(format!(
                    "organization '{org}' has an empty branches list"
                )));
            }
            for (repo, repo_cfg) in &org_cfg.repositories {
                if matches!(&repo_cfg.branches, Some(b) if b.is_empty()) {
                    problems.push(ConfigProblem::error(format!(
                        "repository '{org}/{repo}' has an empty branches list"
                    )));
                }
            }
        }

        self.validate_top_n(&mut problems);
        problems
    }

    fn validate_days(&self, problems: &mut Vec<ConfigProblem>) {
        let mut check = |field: String, days: u32| {
            if days > MAX_DAYS {
                problems.push(ConfigProblem::error(format!(
                    "{field}={days} exceeds the maximum of {MAX_DAYS} days"
                )));
            }
        };

        check("default_days".to_string(), self.default_days);
        if let Some(days) = self.days {
            check("days".to_string(), days);
        }
        for (org, org_cfg) in &self.organizations {
            if let Some(days) = org_cfg.days {
                check(format!("organizations.{org}.days"), days);
            }
            for (repo, repo_cfg) in &org_cfg.repositories {
                if let Some(days) = repo_cfg.days {
                    check(format!("organizations.{org}.repositories.{repo}.days"), days);
                }
            }
        }
    }

    fn validate_top_n(&self, problems: &mut Vec<ConfigProblem>) {
        let modes = self.modes();
        let t = &self.top_n;
        let axes = [
            ("stale", t.stale, modes.any_repo_stats()),
            ("oldest", t.oldest, modes.any_repo_stats()),
            ("time_to_close", t.time_to_close, modes.any_repo_stats()),
            ("stale_pr", t.stale_pr, modes.pr),
            ("oldest_pr", t.oldest_pr, modes.pr),
            ("time_to_close_pr", t.time_to_close_pr, modes.pr),
            ("stale_issue", t.stale_issue, modes.issue),
            ("oldest_issue", t.oldest_issue, modes.issue),
            ("time_to_close_issue", t.time_to_close_issue, modes.issue),
            ("most_broken_ci_days", t.most_broken_ci_days, modes.ci),
            ("most_broken_ci_jobs", t.most_broken_ci_jobs, modes.ci),
        ];

        for (name, value, mode_active) in axes {
            let Some(value) = value else { continue };
            match value {
                TopN::Count(0) => problems.push(ConfigProblem::warning(format!(
                    "top_n.{name} is 0 and will select nothing"
                ))),
                TopN::Percent(p) if p == 0.0 || p > 100.0 => {
                    problems.push(ConfigProblem::warning(format!(
                        "top_n.{name} is {value}; expected a percentage in (0, 100]"
                    )));
                }
                _ => {}
            }
            if !mode_active {
                problems.push(ConfigProblem::warning(format!(
                    "top_n.{name} has no effect with the selected mode"
                )));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigProblem / Severity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigProblem {
    pub severity: Severity,
    pub message: String,
}

impl ConfigProblem {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for ConfigProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{level}: {}", self.message)
    }
}
