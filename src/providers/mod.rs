pub mod buildkite;
pub mod github;
