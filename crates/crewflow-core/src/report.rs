//! Markdown reports of a finished run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::pipeline::RunOutcome;
use crate::store::RecordStatus;

/// Render a run as markdown, headed `# <title> Result`.
pub fn render_markdown(title: &str, outcome: &RunOutcome) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {title} Result\n\n"));
    out.push_str(&format!(
        "- status: {}\n- pipeline: `{}`\n- tokens consumed: {}\n- budget remaining: {}\n",
        outcome.status, outcome.pipeline_id, outcome.tokens_consumed, outcome.remaining_budget
    ));
    if !outcome.spawned_agents.is_empty() {
        let spawned: Vec<String> = outcome
            .spawned_agents
            .iter()
            .map(|a| format!("`{a}`"))
            .collect();
        out.push_str(&format!("- recruited agents: {}\n", spawned.join(", ")));
    }
    out.push('\n');

    match &outcome.final_output {
        Some(text) => {
            out.push_str("## Final Output\n\n");
            out.push_str(text.trim_end());
            out.push_str("\n\n");
        }
        None => out.push_str("_No final output was produced._\n\n"),
    }

    out.push_str("## Tasks\n\n");
    out.push_str("| task | agent | status | attempts | tokens |\n");
    out.push_str("|---|---|---|---|---|\n");
    for record in &outcome.records {
        let status = match &record.status {
            RecordStatus::Succeeded => "succeeded".to_string(),
            RecordStatus::Failed { reason, .. } => format!("failed: {reason}"),
        };
        let agent = record
            .agent_id
            .as_ref()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            record.task_id, agent, status, record.attempts, record.tokens_consumed
        ));
    }

    let failures: Vec<_> = outcome
        .records
        .iter()
        .filter_map(|r| match &r.status {
            RecordStatus::Failed { detail, .. } => Some((&r.task_id, detail)),
            RecordStatus::Succeeded => None,
        })
        .collect();
    if !failures.is_empty() {
        out.push_str("\n## Failures\n\n");
        for (task_id, detail) in failures {
            out.push_str(&format!("- `{task_id}`: {detail}\n"));
        }
    }
    out
}

/// Write `markdown` to `dir/file_name`, creating `dir` if needed.
pub fn write_report(dir: &Path, file_name: &str, markdown: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {:?}", dir))?;
    let path = dir.join(file_name);
    std::fs::write(&path, markdown).with_context(|| format!("write {:?}", path))?;
    Ok(path)
}

/// Write the whole outcome as pretty JSON.
pub fn write_outcome_json(path: &Path, outcome: &RunOutcome) -> Result<()> {
    let content = serde_json::to_string_pretty(outcome).context("serialize run outcome")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineStatus;
    use crate::registry::AgentId;
    use crate::store::{FailureKind, ResultRecord};
    use crate::task::TaskId;

    fn outcome() -> RunOutcome {
        RunOutcome {
            pipeline_id: "p-1".to_string(),
            name: "space".to_string(),
            status: PipelineStatus::Failed {
                task_id: TaskId::from("plan"),
            },
            records: vec![
                ResultRecord::succeeded(
                    TaskId::from("analysis"),
                    AgentId::from("pm"),
                    "state report".to_string(),
                    120,
                    1,
                ),
                ResultRecord::failed(
                    TaskId::from("plan"),
                    Some(AgentId::from("lead")),
                    FailureKind::Timeout,
                    "timed out after 30000 ms",
                    4,
                ),
            ],
            final_output: None,
            first_failure: Some(TaskId::from("plan")),
            tokens_consumed: 120,
            remaining_budget: 880,
            spawned_agents: vec![],
            pipeline_transitions: vec![],
            transitions: vec![],
        }
    }

    #[test]
    fn test_render_starts_with_title_heading() {
        let md = render_markdown("Space Management Analysis", &outcome());
        assert!(md.starts_with("# Space Management Analysis Result\n\n"));
        assert!(md.contains("| analysis | pm | succeeded | 1 | 120 |"));
        assert!(md.contains("| plan | lead | failed: timeout | 4 | 0 |"));
        assert!(md.contains("- `plan`: timed out after 30000 ms"));
        assert!(md.contains("_No final output was produced._"));
    }

    #[test]
    fn test_write_report_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("output");
        let path = write_report(&out_dir, "result.md", "# x Result\n").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "# x Result\n");
    }

    #[test]
    fn test_write_outcome_json_round_trips_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outcome.json");
        write_outcome_json(&path, &outcome()).unwrap();
        let back: RunOutcome =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.status, outcome().status);
        assert_eq!(back.records.len(), 2);
    }
}
