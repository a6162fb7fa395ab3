mod client;
mod provider;
mod readme;

pub use client::DEFAULT_GRAPHQL_URL;
pub use provider::BuildkiteProvider;
