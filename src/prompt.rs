//! Prompt template handling.
//!
//! Templates carry `{variable}` placeholders. Each well-known template has a
//! required-variable set; settings updates reject a template that lost one of
//! its placeholders, since the executor would then render a broken prompt.

/// Required `{placeholder}` tokens per well-known prompt template.
pub const PROMPT_REQUIREMENTS: &[(&str, &[&str])] = &[
    ("phase_0_planning", &["agent_name", "agent_context"]),
    (
        "task_execution_first",
        &["agent_name", "goal", "task_name", "task_description", "expected_output", "context"],
    ),
    (
        "task_execution_sequential",
        &[
            "agent_name",
            "goal",
            "task_id",
            "task_name",
            "task_description",
            "expected_output",
            "previous_tasks_context",
            "additional_context",
        ],
    ),
    (
        "task_validation",
        &["task_name", "task_description", "expected_output", "actual_output"],
    ),
    ("hidden_context", &[]),
];

/// Returns the required variables for a known prompt, or `None` for prompts
/// the crate does not recognize (those are accepted verbatim).
pub fn required_variables(name: &str) -> Option<&'static [&'static str]> {
    PROMPT_REQUIREMENTS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, vars)| *vars)
}

/// Required variables whose `{token}` is absent from `template`.
pub fn missing_variables(name: &str, template: &str) -> Vec<&'static str> {
    required_variables(name)
        .map(|vars| {
            vars.iter()
                .filter(|v| !template.contains(&format!("{{{v}}}")))
                .copied()
                .collect()
        })
        .unwrap_or_default()
}

/// Substitutes `{key}` placeholders with the given values. Unknown
/// placeholders are left in place.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}
