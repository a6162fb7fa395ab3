use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{info, warn};

use crate::auth::{gh_hosts_path, resolve_buildkite_token, resolve_github_token};
use crate::collect::Collector;
use crate::config::{parse_branch_arg, Config, LogLevel, Mode, Overrides, TopN, TopNConfig};
use crate::filter;
use crate::insights::Report;
use crate::providers::buildkite::{BuildkiteProvider, DEFAULT_GRAPHQL_URL};
use crate::providers::github::GitHubProvider;
use crate::report::{render_json, render_markdown, RenderOptions};

#[derive(Parser)]
#[command(name = "ci-streaks")]
#[command(
    author,
    version,
    about = "CI failure streaks and maintainer stats for GitHub repositories",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: first ci_streaks.yml in ., ~/.config/ci_streaks, /etc)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level, overriding the config file
    #[arg(short, long, global = true, value_enum)]
    log_level: Option<LogLevel>,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect stats and print the report
    Report(ReportArgs),
    /// Check the config file and list any problems
    Validate,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Markdown,
    Json,
}

#[derive(Args)]
struct ReportArgs {
    /// GitHub organization to report on
    #[arg(long)]
    github_org: Option<String>,

    /// Single repository within --github-org
    #[arg(long, requires = "github_org")]
    github_repo: Option<String>,

    /// Days to look back for every repository
    #[arg(short, long)]
    days: Option<u32>,

    /// Days to look back where nothing more specific is configured
    #[arg(short = 'D', long)]
    default_days: Option<u32>,

    /// Comma-separated branches for every repository
    #[arg(short, long)]
    branches: Option<String>,

    /// Comma-separated branches where nothing more specific is configured
    #[arg(short = 'B', long)]
    default_branches: Option<String>,

    /// Sections to produce
    #[arg(short, long, value_enum, value_delimiter = ',')]
    mode: Option<Vec<Mode>>,

    /// GitHub token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Buildkite API token
    #[arg(long, env = "BUILDKITE_TOKEN", hide_env_values = true)]
    buildkite_token: Option<String>,

    /// Buildkite organization whose pipelines are matched to repositories
    #[arg(long)]
    buildkite_org: Option<String>,

    /// GitHub API endpoint, for GitHub Enterprise
    #[arg(long)]
    github_api_endpoint: Option<String>,

    /// Cap on GitHub API calls per minute
    #[arg(long)]
    limit_gh_ops_per_minute: Option<f64>,

    /// Seconds allowed for the CI section of one repository
    #[arg(long)]
    ci_timeout: Option<u64>,

    /// List individual PRs and issues
    #[arg(long)]
    include_list: bool,

    /// Plain text instead of Markdown links
    #[arg(long)]
    no_links: bool,

    /// Count closed PRs that were never merged
    #[arg(long)]
    count_unmerged_prs: bool,

    #[command(flatten)]
    top_n: TopNArgs,

    /// Report as if today were this date (YYYY-MM-DD)
    #[arg(long)]
    as_of: Option<NaiveDate>,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Markdown)]
    format: OutputFormat,

    /// Pretty print JSON output
    #[arg(short, long, default_value_t = false)]
    pretty: bool,

    /// Output file path (defaults to stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

/// Each takes N or N% of the repositories in the run.
#[derive(Args)]
struct TopNArgs {
    /// Top repositories by stale PRs or issues
    #[arg(long, value_name = "N")]
    top_n_stale: Option<TopN>,
    /// Top repositories by oldest open PR or issue
    #[arg(long, value_name = "N")]
    top_n_oldest: Option<TopN>,
    /// Top repositories by average time to close PRs or issues
    #[arg(long, value_name = "N")]
    top_n_time_to_close: Option<TopN>,
    #[arg(long, value_name = "N")]
    top_n_stale_pr: Option<TopN>,
    #[arg(long, value_name = "N")]
    top_n_stale_issue: Option<TopN>,
    #[arg(long, value_name = "N")]
    top_n_oldest_pr: Option<TopN>,
    #[arg(long, value_name = "N")]
    top_n_oldest_issue: Option<TopN>,
    #[arg(long, value_name = "N")]
    top_n_time_to_close_pr: Option<TopN>,
    #[arg(long, value_name = "N")]
    top_n_time_to_close_issue: Option<TopN>,
    /// Top repositories by days of broken CI
    #[arg(long, value_name = "N")]
    top_n_most_broken_ci_days: Option<TopN>,
    /// Top repositories by number of broken CI jobs
    #[arg(long, value_name = "N")]
    top_n_most_broken_ci_jobs: Option<TopN>,
}

impl From<&TopNArgs> for TopNConfig {
    fn from(a: &TopNArgs) -> Self {
        Self {
            stale: a.top_n_stale,
            oldest: a.top_n_oldest,
            time_to_close: a.top_n_time_to_close,
            stale_pr: a.top_n_stale_pr,
            stale_issue: a.top_n_stale_issue,
            oldest_pr: a.top_n_oldest_pr,
            oldest_issue: a.top_n_oldest_issue,
            time_to_close_pr: a.top_n_time_to_close_pr,
            time_to_close_issue: a.top_n_time_to_close_issue,
            most_broken_ci_days: a.top_n_most_broken_ci_days,
            most_broken_ci_jobs: a.top_n_most_broken_ci_jobs,
        }
    }
}

impl ReportArgs {
    fn overrides(&self, log_level: Option<LogLevel>) -> Overrides {
        Overrides {
            days: self.days,
            default_days: self.default_days,
            branches: self.branches.as_deref().map(parse_branch_arg),
            default_branches: self.default_branches.as_deref().map(parse_branch_arg),
            mode: self.mode.clone(),
            log_level,
            ci_timeout: self.ci_timeout,
            include_list: self.include_list,
            no_links: self.no_links,
            count_unmerged_prs: self.count_unmerged_prs,
            github_api_endpoint: self.github_api_endpoint.clone(),
            buildkite_org: self.buildkite_org.clone(),
            limit_gh_ops_per_minute: self.limit_gh_ops_per_minute,
            top_n: TopNConfig::from(&self.top_n),
        }
    }

    async fn run(&self, config: &Config) -> Result<()> {
        let problems = config.validate();
        for problem in problems.iter().filter(|p| !p.is_error()) {
            warn!("Config {problem}");
        }
        if let Some(problem) = problems.iter().find(|p| p.is_error()) {
            bail!("Invalid configuration: {}", problem.message);
        }

        let repos = config.repositories(self.github_org.as_deref(), self.github_repo.as_deref())?;
        if repos.is_empty() {
            warn!("No organizations or repositories configured to process");
            return Ok(());
        }

        // Resolve tokens up front so a missing one fails before any work.
        let github_token = resolve_github_token(
            self.github_token.as_deref(),
            config.github_token.as_deref(),
            gh_hosts_path().as_deref(),
        )?;
        let github = GitHubProvider::new(
            config.github_api_url(),
            github_token,
            config.github_call_delay(),
        )?;

        let modes = config.modes();
        let buildkite_token =
            resolve_buildkite_token(self.buildkite_token.as_deref(), config.buildkite_token.as_deref());
        let buildkite = match (modes.ci, buildkite_token) {
            (false, _) => None,
            (true, Some(token)) => Some(
                BuildkiteProvider::connect(
                    DEFAULT_GRAPHQL_URL,
                    token,
                    config.buildkite_org.as_deref(),
                )
                .await?,
            ),
            (true, None) => {
                if let Some(org) = &config.buildkite_org {
                    bail!(
                        "Buildkite org '{org}' is configured but no Buildkite token was given. \
                         Use --buildkite-token or set $BUILDKITE_TOKEN"
                    );
                }
                None
            }
        };

        let today = self.as_of.unwrap_or_else(|| Utc::now().date_naive());
        let collector = Collector {
            github,
            buildkite,
            modes,
            ci_timeout: Duration::from_secs(config.ci_timeout),
            count_unmerged_prs: config.count_unmerged_prs,
        };

        info!("Processing {} repositories as of {today}", repos.len());
        let collected = collector.collect(repos, today).await;
        let report = Report {
            generated_at: Utc::now(),
            as_of: today,
            repositories: filter::select(collected, &config.top_n, modes),
        };

        let output = match self.format {
            OutputFormat::Markdown => render_markdown(
                &report,
                RenderOptions {
                    no_links: config.no_links,
                    include_list: config.include_list,
                },
            ),
            OutputFormat::Json => render_json(&report, self.pretty)?,
        };

        if let Some(output_path) = &self.output {
            std::fs::write(output_path, output)?;
            info!("Report written to: {}", output_path.display());
        } else {
            println!("{output}");
        }

        Ok(())
    }
}

impl Cli {
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    fn load_config(&self, overrides: &Overrides) -> Result<Config> {
        let config = match Config::find_file(self.config.as_deref())? {
            Some(path) => Config::load(&path)?,
            None => {
                info!("No config file found, using defaults");
                Config::default()
            }
        };
        let config = config.with_overrides(overrides);

        // RUST_LOG, when set, keeps the last word on verbosity.
        if std::env::var_os("RUST_LOG").is_none() {
            log::set_max_level(config.log_level.to_filter());
        }
        Ok(config)
    }

    pub async fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Report(args) => {
                let config = self.load_config(&args.overrides(self.log_level))?;
                args.run(&config).await
            }
            Commands::Validate => {
                let config = self.load_config(&Overrides {
                    log_level: self.log_level,
                    ..Overrides::default()
                })?;
                validate(&config)
            }
        }
    }
}

fn validate(config: &Config) -> Result<()> {
    let problems = config.validate();
    for problem in &problems {
        println!("{problem}");
    }

    let errors = problems.iter().filter(|p| p.is_error()).count();
    if errors > 0 {
        bail!("{errors} configuration error(s) found");
    }
    println!("Configuration OK ({} warning(s))", problems.len());
    Ok(())
}
