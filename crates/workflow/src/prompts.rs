//! Prompt text for each phase.

use pagepilot_core::plan::Plan;

pub const PLANNER_SYSTEM_PROMPT: &str = "You plan browser automation tasks. \
Answer with one JSON object describing the plan: objective, approach, steps, criticalPaths, \
estimatedSteps, complexityScore, confidence, potentialIssues and optimizations. \
Each step has step (1-based), action, target, reasoning and expectedOutcome, and may carry \
validationCriteria and one fallbackAction. Allowed actions: navigate, click, type, type_text, \
press_key, scroll, wait, getPageContext. Use at most 50 steps. You may add optimizedQuery \
(a clearer restatement of the request) and gaps (information the request is missing).";

pub const EVALUATOR_SYSTEM_PROMPT: &str = "You review the output of a browser automation agent. \
Answer with one JSON object: quality (excellent, good, acceptable, poor or failed), score, \
completeness and correctness in [0, 1], issues, successes, recommendations, shouldRetry, \
shouldProceed and, when a retry would help, retryStrategy with approach, focusAreas and modifications.";

pub const SUMMARIZER_SYSTEM_PROMPT: &str = "You write the final report of a browser automation task. \
Use exactly these sections as markdown headings: Summary, Goal Assessment, Key Findings, Next Steps. \
Base every statement on the trajectory and outcome you are given.";

const EXECUTION_SYSTEM_PROMPT: &str = "You are a browser automation agent. You act on the user's \
current browser tab through the tools you are given. Work through the plan below, calling one \
tool at a time and checking the result before moving on. Read the page with get_page_context \
whenever you are unsure what it shows. When the task is done, answer the user in plain text \
with what you found or did.";

pub fn planner_user_prompt(query: &str, current_url: Option<&str>, page_context: Option<&str>) -> String {
    let mut prompt = format!("Request: {query}\n");
    if let Some(url) = current_url {
        prompt.push_str(&format!("Current URL: {url}\n"));
    }
    if let Some(ctx) = page_context {
        prompt.push_str(&format!("Current page:\n{}\n", truncate(ctx, 4000)));
    }
    prompt
}

/// System prompt for the execution loop, before any retry block.
pub fn execution_system_prompt(plan: &Plan, current_url: Option<&str>, page_context: Option<&str>) -> String {
    let mut prompt = format!(
        "{EXECUTION_SYSTEM_PROMPT}\n\nObjective: {}\nApproach: {}\n\nPlan:\n{}\n",
        plan.objective,
        plan.approach,
        plan.describe_steps()
    );
    if !plan.critical_paths.is_empty() {
        let paths: Vec<String> = plan.critical_paths.iter().map(|n| n.to_string()).collect();
        prompt.push_str(&format!("Steps that must succeed: {}\n", paths.join(", ")));
    }
    if let Some(url) = current_url {
        prompt.push_str(&format!("\nCurrent URL: {url}\n"));
    }
    if let Some(ctx) = page_context {
        prompt.push_str(&format!("\nCurrent page:\n{}\n", truncate(ctx, 4000)));
    }
    prompt
}

/// Cut `text` to at most `max` characters on a char boundary.
pub fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[test]
    fn execution_prompt_lists_plan_steps() {
        let plan = pagepilot_agent::test_helpers::single_step_plan();
        let prompt = execution_system_prompt(&plan, Some("about:blank"), None);
        assert!(prompt.contains("1. navigate → https://example.com"));
        assert!(prompt.contains("Steps that must succeed: 1"));
        assert!(prompt.contains("Current URL: about:blank"));
    }
}
