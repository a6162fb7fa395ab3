mod token;

pub use token::Token;

use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{CiStatsError, Result};

/// Location of the `gh` CLI's credential file.
pub fn gh_hosts_path() -> Option<PathBuf> {
    home::home_dir().map(|home| home.join(".config").join("gh").join("hosts.yml"))
}

/// Picks the first non-empty token from the command line (or `$GITHUB_TOKEN`),
/// the config file, and finally the `gh` CLI's stored credentials.
pub fn resolve_github_token(
    from_cli: Option<&str>,
    from_config: Option<&str>,
    gh_hosts: Option<&Path>,
) -> Result<Token> {
    if let Some(token) = non_empty(from_cli) {
        debug!("Using GitHub token from command line or environment");
        return Ok(token);
    }
    if let Some(token) = non_empty(from_config) {
        debug!("Using GitHub token from config file");
        return Ok(token);
    }
    if let Some(token) = gh_hosts.and_then(read_gh_hosts_token) {
        debug!("Using GitHub token from gh CLI config");
        return Ok(token);
    }

    Err(CiStatsError::Config(
        "GitHub token is missing. Provide one with --github-token, set $GITHUB_TOKEN, \
         or run `gh auth login`"
            .to_string(),
    ))
}

/// Buildkite has no credential helper: command line (or `$BUILDKITE_TOKEN`),
/// then the config file.
pub fn resolve_buildkite_token(
    from_cli: Option<&str>,
    from_config: Option<&str>,
) -> Option<Token> {
    non_empty(from_cli).or_else(|| non_empty(from_config))
}

fn non_empty(value: Option<&str>) -> Option<Token> {
    value.map(Token::from).filter(|t| !t.is_empty())
}

fn read_gh_hosts_token(path: &Path) -> Option<Token> {
    let contents = std::fs::read_to_string(path).ok()?;
    let hosts: serde_yaml::Value = serde_yaml::from_str(&contents).ok()?;
    let token = hosts.get("github.com")?.get("oauth_token")?.as_str()?;
    non_empty(Some(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn hosts_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_cli_token_wins() {
        let token = resolve_github_token(Some("cli"), Some("config"), None).unwrap();
        assert_eq!(token.as_str(), "cli");
    }

    #[test]
    fn test_blank_cli_token_falls_through_to_config() {
        let token = resolve_github_token(Some("  "), Some("config"), None).unwrap();
        assert_eq!(token.as_str(), "config");
    }

    #[test]
    fn test_gh_hosts_file_is_last_resort() {
        let file = hosts_file("github.com:\n    user: octocat\n    oauth_token: gho_fromgh\n");
        let token = resolve_github_token(None, None, Some(file.path())).unwrap();

        assert_eq!(token.as_str(), "gho_fromgh");
    }

    #[test]
    fn test_gh_hosts_without_github_entry_is_ignored() {
        let file = hosts_file("ghe.example.com:\n    oauth_token: other\n");
        let err = resolve_github_token(None, None, Some(file.path())).unwrap_err();

        assert!(matches!(err, CiStatsError::Config(_)));
        assert!(err.to_string().contains("gh auth login"));
    }

    #[test]
    fn test_missing_hosts_file_is_not_fatal_by_itself() {
        let err =
            resolve_github_token(None, None, Some(Path::new("/nonexistent/hosts.yml"))).unwrap_err();
        assert!(matches!(err, CiStatsError::Config(_)));
    }

    #[test]
    fn test_buildkite_token_resolution() {
        assert_eq!(
            resolve_buildkite_token(None, Some("bk")).unwrap().as_str(),
            "bk"
        );
        assert_eq!(
            resolve_buildkite_token(Some("cli"), Some("bk")).unwrap().as_str(),
            "cli"
        );
        assert!(resolve_buildkite_token(None, None).is_none());
    }
}
