use url::form_urlencoded;

/// Runs page of a workflow filtered to one branch.
///
/// Linking the workflow rather than a single run sends readers to the whole
/// pass/fail history on that branch.
pub fn workflow_runs_url(repo_html_url: &str, workflow_path: &str, branch: &str) -> String {
    let file = workflow_file_name(workflow_path);
    let query: String = form_urlencoded::byte_serialize(format!("branch:{branch}").as_bytes()).collect();
    format!(
        "{}/actions/workflows/{file}?query={query}",
        repo_html_url.trim_end_matches('/')
    )
}

/// `https://github.com/o/r/blob/main/.github/workflows/ci.yml` -> `https://github.com/o/r`
pub fn repo_html_url_from_workflow(workflow_html_url: &str) -> Option<&str> {
    workflow_html_url
        .split_once("/blob/")
        .map(|(repo_url, _)| repo_url)
}

fn workflow_file_name(path: &str) -> &str {
    // .github/workflows/ci.yml -> ci.yml
    path.rsplit('/').next().unwrap_or(path)
}
