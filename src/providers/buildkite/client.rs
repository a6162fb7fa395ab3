mod core;
mod graphql;

pub use self::core::{BuildkiteClient, DEFAULT_GRAPHQL_URL};
pub use self::graphql::{BuildNode, PipelineRef};
