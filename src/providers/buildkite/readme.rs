use std::sync::OnceLock;

use regex::Regex;

/// `(org, pipeline)` slugs of every Buildkite badge link in a README, in
/// order of appearance.
///
/// Only matches links that close a badge image, e.g.
/// `[![Build status](https://badge.buildkite.com/x.svg)](https://buildkite.com/org/pipe)`.
pub fn badge_pipelines(readme: &str) -> Vec<(String, String)> {
    static BADGE: OnceLock<Regex> = OnceLock::new();
    let badge = BADGE.get_or_init(|| {
        Regex::new(r"\)\]\((https://buildkite\.com/([^/]+)/([^/\)]+))\)")
            .expect("badge pattern is valid")
    });

    badge
        .captures_iter(readme)
        .map(|caps| (caps[2].to_string(), caps[3].to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finds_badges() {
        let readme = "# Widgets\n\n\
            [![Build status](https://badge.buildkite.com/abc.svg)](https://buildkite.com/octo/widgets-main)\n\
            [![Verify](https://badge.buildkite.com/def.svg?branch=main)](https://buildkite.com/chef/verify)\n";

        assert_eq!(
            badge_pipelines(readme),
            vec![
                ("octo".to_string(), "widgets-main".to_string()),
                ("chef".to_string(), "verify".to_string()),
            ]
        );
    }

    #[test]
    fn test_ignores_plain_links() {
        let readme = "See [our CI](https://buildkite.com/octo/widgets) for details.";
        assert!(badge_pipelines(readme).is_empty());
    }

    #[test]
    fn test_ignores_build_pages() {
        let readme = "[![x](b.svg)](https://buildkite.com/octo/widgets/builds/42)";
        assert!(badge_pipelines(readme).is_empty());
    }

    #[test]
    fn test_empty_readme() {
        assert!(badge_pipelines("").is_empty());
    }
}
