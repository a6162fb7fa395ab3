mod actions;
mod core;
mod issues;

pub use self::actions::{JobDto, WorkflowDto, WorkflowRunDto};
pub use self::core::{GitHubClient, PER_PAGE};
pub use self::issues::IssueDto;
