mod client;
mod provider;
mod url_utils;

pub use client::IssueDto;
pub use provider::GitHubProvider;
