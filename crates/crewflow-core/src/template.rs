//! Placeholder substitution of upstream task outputs.
//!
//! A placeholder is a task id wrapped in single or double braces:
//! `{analysis}` or `{{analysis}}`. Braces around anything that is not a bare
//! identifier (`{ a: 1 }`, `{/* x */}`) are left as literal text.
//!
//! A task may also carry named inputs, referenced as `{{input:name}}`. Inputs
//! are not task references: [`placeholders`] ignores them and they add no
//! dependency.
//!
//! Resolution is a single pass: text substituted from an upstream output or
//! an input is never scanned again, so a value containing `{x}` cannot
//! trigger a second lookup.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::store::ResultStore;
use crate::task::TaskId;

/// Errors produced while resolving a template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("placeholder {{{task_id}}} refers to a task that has not succeeded")]
    UnresolvedPlaceholder { task_id: TaskId },
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"\{\{input:([A-Za-z0-9_\-]+)\}\}|\{\{([A-Za-z0-9_\-]+)\}\}|\{([A-Za-z0-9_\-]+)\}",
        )
        .expect("placeholder pattern is valid")
    })
}

enum Reference<'t> {
    Input(&'t str),
    Task(&'t str),
}

fn reference<'t>(caps: &Captures<'t>) -> Reference<'t> {
    match caps.get(1) {
        Some(name) => Reference::Input(name.as_str()),
        None => Reference::Task(
            caps.get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default(),
        ),
    }
}

/// Distinct task ids referenced by `template`, in first-occurrence order.
pub fn placeholders(template: &str) -> Vec<TaskId> {
    let mut out: Vec<TaskId> = Vec::new();
    for caps in placeholder_pattern().captures_iter(template) {
        if let Reference::Task(id) = reference(&caps) {
            let id = TaskId::from(id);
            if !out.contains(&id) {
                out.push(id);
            }
        }
    }
    out
}

/// Distinct input names referenced by `template`, in first-occurrence order.
pub fn input_references(template: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in placeholder_pattern().captures_iter(template) {
        if let Reference::Input(name) = reference(&caps) {
            if !out.iter().any(|n| n == name) {
                out.push(name.to_string());
            }
        }
    }
    out
}

/// Substitute every placeholder with the referenced task's output.
///
/// Fails on the first placeholder whose task is absent from `store` or did
/// not succeed, regardless of how the pipeline was ordered.
pub fn resolve(template: &str, store: &ResultStore) -> Result<String, TemplateError> {
    resolve_with_inputs(template, &BTreeMap::new(), store)
}

/// [`resolve`], also substituting `{{input:name}}` from `inputs`. An input
/// reference with no value is left as written.
pub fn resolve_with_inputs(
    template: &str,
    inputs: &BTreeMap<String, String>,
    store: &ResultStore,
) -> Result<String, TemplateError> {
    let pattern = placeholder_pattern();
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in pattern.captures_iter(template) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&template[last..whole.start()]);
        match reference(&caps) {
            Reference::Input(name) => match inputs.get(name) {
                Some(value) => out.push_str(value),
                None => out.push_str(whole.as_str()),
            },
            Reference::Task(id) => {
                let task_id = TaskId::from(id);
                let output = store
                    .succeeded_output(&task_id)
                    .ok_or(TemplateError::UnresolvedPlaceholder { task_id })?;
                out.push_str(&output);
            }
        }
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AgentId;
    use crate::store::{FailureKind, ResultRecord};

    fn store_with(entries: &[(&str, &str)]) -> ResultStore {
        let store = ResultStore::new();
        for (id, text) in entries {
            store
                .insert(ResultRecord::succeeded(
                    TaskId::from(*id),
                    AgentId::from("pm"),
                    text.to_string(),
                    1,
                    1,
                ))
                .unwrap();
        }
        store
    }

    #[test]
    fn test_single_brace_placeholder_is_substituted() {
        let store = store_with(&[("task1", "X")]);
        assert_eq!(resolve("Use: {task1}", &store).unwrap(), "Use: X");
    }

    #[test]
    fn test_double_brace_placeholder_is_substituted() {
        let store = store_with(&[("analyze_current_state", "state report")]);
        let out = resolve("Based on {{analyze_current_state}}, design.", &store).unwrap();
        assert_eq!(out, "Based on state report, design.");
    }

    #[test]
    fn test_repeated_placeholders_all_resolve() {
        let store = store_with(&[("a", "1"), ("b", "2")]);
        let out = resolve("{a}+{b}={a}{b}", &store).unwrap();
        assert_eq!(out, "1+2=12");
        assert!(placeholders(&out).is_empty());
    }

    #[test]
    fn test_missing_task_is_unresolved() {
        let store = store_with(&[]);
        let err = resolve("Use: {task1}", &store).unwrap_err();
        assert_eq!(
            err,
            TemplateError::UnresolvedPlaceholder {
                task_id: TaskId::from("task1")
            }
        );
    }

    #[test]
    fn test_failed_task_is_unresolved() {
        let store = ResultStore::new();
        store
            .insert(ResultRecord::failed(
                TaskId::from("task1"),
                None,
                FailureKind::Timeout,
                "gave up",
                3,
            ))
            .unwrap();
        assert!(resolve("Use: {task1}", &store).is_err());
    }

    #[test]
    fn test_non_identifier_braces_are_literal() {
        let store = store_with(&[]);
        let template = "const s = create((set) => ({ user: null }));";
        assert_eq!(resolve(template, &store).unwrap(), template);
        assert!(placeholders(template).is_empty());
    }

    #[test]
    fn test_substituted_output_is_not_rescanned() {
        let store = store_with(&[("a", "{b}")]);
        assert_eq!(resolve("see {a}", &store).unwrap(), "see {b}");
    }

    #[test]
    fn test_input_text_is_not_read_as_placeholders() {
        let store = store_with(&[("review", "looks fine")]);
        let mut inputs = BTreeMap::new();
        inputs.insert(
            "code".to_string(),
            "<SpaceDropdown spaces={spaces} onSelect={onSelect} />".to_string(),
        );
        let template = "Review {{input:code}} after {review}";
        assert_eq!(placeholders(template), vec![TaskId::from("review")]);
        assert_eq!(input_references(template), vec!["code".to_string()]);
        assert_eq!(
            resolve_with_inputs(template, &inputs, &store).unwrap(),
            "Review <SpaceDropdown spaces={spaces} onSelect={onSelect} /> after looks fine"
        );
    }

    #[test]
    fn test_input_without_value_is_left_as_written() {
        let store = store_with(&[]);
        assert_eq!(
            resolve("raw {{input:code}}", &store).unwrap(),
            "raw {{input:code}}"
        );
    }

    #[test]
    fn test_placeholders_are_distinct_in_order() {
        let ids = placeholders("{{b}} then {a} then {b}");
        assert_eq!(ids, vec![TaskId::from("b"), TaskId::from("a")]);
    }
}
