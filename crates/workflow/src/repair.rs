//! Deterministic repair of model-produced plan JSON.
//!
//! Whatever the model sent, [`repair_plan`] returns a [`Plan`] that passes
//! [`Plan::validate`]: every action is in the closed set, there is at least
//! one step, no fallback is nested, and numbers are in range.

use pagepilot_core::plan::{FallbackAction, MAX_PLAN_STEPS, Plan, PlanAction, PlanStep};
use serde_json::{Map, Value};
use tracing::{debug, warn};

const DEFAULT_COMPLEXITY: f64 = 0.5;
const DEFAULT_CONFIDENCE: f64 = 0.7;

/// Known model spellings for each action, compared after lowercasing and
/// dropping `_`, `-` and spaces.
const ACTION_SYNONYMS: &[(&str, PlanAction)] = &[
    ("waitforelement", PlanAction::Wait),
    ("waitfor", PlanAction::Wait),
    ("waitforselector", PlanAction::Wait),
    ("sleep", PlanAction::Wait),
    ("pause", PlanAction::Wait),
    ("delay", PlanAction::Wait),
    ("getcontext", PlanAction::GetPageContext),
    ("getpageinfo", PlanAction::GetPageContext),
    ("getpagecontext", PlanAction::GetPageContext),
    ("pagecontext", PlanAction::GetPageContext),
    ("readpage", PlanAction::GetPageContext),
    ("read", PlanAction::GetPageContext),
    ("extract", PlanAction::GetPageContext),
    ("extractcontent", PlanAction::GetPageContext),
    ("goto", PlanAction::Navigate),
    ("open", PlanAction::Navigate),
    ("visit", PlanAction::Navigate),
    ("navigateto", PlanAction::Navigate),
    ("openurl", PlanAction::Navigate),
    ("input", PlanAction::TypeText),
    ("fill", PlanAction::TypeText),
    ("typetext", PlanAction::TypeText),
    ("entertext", PlanAction::TypeText),
    ("press", PlanAction::PressKey),
    ("keypress", PlanAction::PressKey),
    ("presskey", PlanAction::PressKey),
    ("tap", PlanAction::Click),
    ("clickelement", PlanAction::Click),
    ("scrollto", PlanAction::Scroll),
    ("scrolldown", PlanAction::Scroll),
    ("scrollup", PlanAction::Scroll),
];

/// Map any action spelling onto the closed set. Unknown actions become `wait`.
pub fn normalize_action(raw: &str) -> PlanAction {
    let trimmed = raw.trim();
    if let Some(action) = PlanAction::from_wire(trimmed) {
        return action;
    }

    let key: String = trimmed
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect();
    if let Some(action) = PlanAction::ALL
        .into_iter()
        .find(|a| a.as_str().replace('_', "").eq_ignore_ascii_case(&key))
    {
        return action;
    }

    match ACTION_SYNONYMS.iter().find(|(name, _)| *name == key) {
        Some((_, action)) => *action,
        None => {
            warn!(action = %raw, "Unknown plan action, substituting wait");
            PlanAction::Wait
        }
    }
}

/// Numbers sometimes arrive as strings ("0.8", "3 steps").
fn coerce_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.split_whitespace().next()?.trim_end_matches('%').parse().ok(),
        _ => None,
    }
    .filter(|n: &f64| n.is_finite())
}

fn coerce_u32(value: Option<&Value>) -> Option<u32> {
    coerce_f64(value).filter(|n| *n >= 1.0).map(|n| n.round() as u32)
}

fn text(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

fn strings(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => vec![],
    }
}

fn default_target(action: PlanAction) -> &'static str {
    match action {
        PlanAction::Wait => "1000",
        PlanAction::Scroll => "down",
        PlanAction::PressKey => "Enter",
        _ => "current page",
    }
}

/// Keep the first level of fallback only.
fn repair_fallback(value: Option<&Value>) -> Option<FallbackAction> {
    let obj = value?.as_object()?;
    let action = normalize_action(obj.get("action").and_then(Value::as_str)?);
    if obj.contains_key("fallbackAction") {
        debug!("Flattening nested fallback action");
    }
    Some(FallbackAction {
        action,
        target: text(obj, &["target"]).unwrap_or_else(|| default_target(action).to_string()),
        reasoning: text(obj, &["reasoning"]).unwrap_or_default(),
    })
}

fn repair_step(obj: &Map<String, Value>, number: u32) -> PlanStep {
    let action = normalize_action(
        obj.get("action")
            .or_else(|| obj.get("type"))
            .and_then(Value::as_str)
            .unwrap_or("wait"),
    );
    PlanStep {
        step: number,
        action,
        target: text(obj, &["target", "url", "selector", "value"])
            .unwrap_or_else(|| default_target(action).to_string()),
        reasoning: text(obj, &["reasoning", "description"])
            .unwrap_or_else(|| format!("Perform {action}")),
        expected_outcome: text(obj, &["expectedOutcome", "expected_outcome"])
            .unwrap_or_else(|| format!("{action} completes")),
        validation_criteria: text(obj, &["validationCriteria", "validation_criteria"]),
        fallback_action: repair_fallback(obj.get("fallbackAction").or_else(|| obj.get("fallback_action"))),
    }
}

/// Turn arbitrary model JSON into a valid plan for `query`.
pub fn repair_plan(raw: &Value, query: &str) -> Plan {
    let empty = Map::new();
    let mut obj = raw.as_object().unwrap_or(&empty);

    // Some models wrap the whole plan: {"plan": {...}}
    if !obj.contains_key("steps")
        && let Some(inner) = obj.get("plan").and_then(Value::as_object)
    {
        obj = inner;
    }

    let mut steps: Vec<PlanStep> = obj
        .get("steps")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_object)
                .take(MAX_PLAN_STEPS)
                .enumerate()
                .map(|(i, step)| repair_step(step, i as u32 + 1))
                .collect()
        })
        .unwrap_or_default();

    let defaulted = steps.is_empty();
    if defaulted {
        debug!("Plan has no usable steps, inserting a page-context step");
        steps.push(PlanStep::page_context(1));
    }

    let critical_paths: Vec<u32> = if defaulted {
        vec![1]
    } else {
        let mut paths: Vec<u32> = obj
            .get("criticalPaths")
            .or_else(|| obj.get("critical_paths"))
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|v| coerce_u32(Some(v))).collect())
            .unwrap_or_default();
        paths.retain(|n| (1..=steps.len() as u32).contains(n));
        paths.sort_unstable();
        paths.dedup();
        paths
    };

    // Confidence sometimes lands under a nested object
    let confidence = coerce_f64(obj.get("confidence"))
        .or_else(|| {
            ["metadata", "analysis", "assessment", "plan"]
                .iter()
                .filter_map(|k| obj.get(*k))
                .find_map(|v| coerce_f64(v.get("confidence")))
        })
        .unwrap_or(DEFAULT_CONFIDENCE);

    let estimated_steps = if defaulted {
        1
    } else {
        coerce_u32(obj.get("estimatedSteps").or_else(|| obj.get("estimated_steps")))
            .unwrap_or(steps.len() as u32)
            .min(MAX_PLAN_STEPS as u32)
    };

    Plan {
        objective: text(obj, &["objective", "goal"]).unwrap_or_else(|| query.trim().to_string()),
        approach: text(obj, &["approach", "strategy"])
            .unwrap_or_else(|| "Carry out the steps in order, checking the page as needed".to_string()),
        steps,
        critical_paths,
        estimated_steps,
        complexity_score: coerce_f64(obj.get("complexityScore").or_else(|| obj.get("complexity_score")))
            .unwrap_or(DEFAULT_COMPLEXITY)
            .clamp(0.0, 1.0),
        confidence: confidence.clamp(0.0, 1.0),
        potential_issues: strings(obj.get("potentialIssues").or_else(|| obj.get("potential_issues"))),
        optimizations: strings(obj.get("optimizations")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn synonyms_map_into_the_closed_set() {
        assert_eq!(normalize_action("waitForElement"), PlanAction::Wait);
        assert_eq!(normalize_action("getContext"), PlanAction::GetPageContext);
        assert_eq!(normalize_action("goto"), PlanAction::Navigate);
        assert_eq!(normalize_action("fill"), PlanAction::TypeText);
        assert_eq!(normalize_action("keypress"), PlanAction::PressKey);
        assert_eq!(normalize_action("tap"), PlanAction::Click);
        assert_eq!(normalize_action("PRESS_KEY"), PlanAction::PressKey);
        assert_eq!(normalize_action("get_page_context"), PlanAction::GetPageContext);
        assert_eq!(normalize_action("type"), PlanAction::Type);
        assert_eq!(normalize_action("teleport"), PlanAction::Wait);
    }

    #[test]
    fn missing_steps_get_the_default_step() {
        let plan = repair_plan(&json!({ "objective": "Find the price" }), "find the price");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].action, PlanAction::GetPageContext);
        assert_eq!(plan.estimated_steps, 1);
        assert_eq!(plan.critical_paths, vec![1]);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn non_object_input_still_yields_a_plan() {
        let plan = repair_plan(&json!("not a plan"), "read the page");
        assert_eq!(plan.objective, "read the page");
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn nested_fallbacks_are_flattened() {
        let raw = json!({
            "steps": [{
                "step": 1,
                "action": "click",
                "target": "#buy",
                "reasoning": "buy it",
                "expectedOutcome": "cart opens",
                "fallbackAction": {
                    "action": "waitFor",
                    "target": "#buy",
                    "fallbackAction": { "action": "click", "target": "#alt" }
                }
            }]
        });
        let plan = repair_plan(&raw, "buy");
        let fallback = plan.steps[0].fallback_action.as_ref().unwrap();
        assert_eq!(fallback.action, PlanAction::Wait);
        // FallbackAction has no nested field, so the round trip drops it
        let json = serde_json::to_value(&plan).unwrap();
        assert!(json["steps"][0]["fallbackAction"].get("fallbackAction").is_none());
    }

    #[test]
    fn numbers_are_coerced_and_clamped() {
        let raw = json!({
            "steps": [{ "action": "navigate", "target": "https://example.com" }],
            "complexityScore": "high",
            "estimatedSteps": "3 steps",
            "confidence": 1.7
        });
        let plan = repair_plan(&raw, "q");
        assert_eq!(plan.complexity_score, DEFAULT_COMPLEXITY);
        assert_eq!(plan.estimated_steps, 3);
        assert_eq!(plan.confidence, 1.0);
    }

    #[test]
    fn nested_confidence_is_hoisted() {
        let raw = json!({
            "steps": [{ "action": "getPageContext", "target": "page" }],
            "metadata": { "confidence": 0.42 }
        });
        assert_eq!(repair_plan(&raw, "q").confidence, 0.42);
    }

    #[test]
    fn steps_are_renumbered_and_paths_pruned() {
        let raw = json!({
            "steps": [
                { "step": 5, "action": "navigate", "target": "a.test" },
                { "step": 5, "action": "click", "target": "#go" },
                { "step": 2, "action": "getPageContext" }
            ],
            "criticalPaths": [1, 3, 9, 0, 3]
        });
        let plan = repair_plan(&raw, "q");
        let numbers: Vec<u32> = plan.steps.iter().map(|s| s.step).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(plan.critical_paths, vec![1, 3]);
        assert_eq!(plan.steps[2].target, "current page");
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn long_plans_are_truncated() {
        let steps: Vec<Value> = (0..80).map(|_| json!({ "action": "scroll", "target": "down" })).collect();
        let plan = repair_plan(&json!({ "steps": steps }), "q");
        assert_eq!(plan.steps.len(), MAX_PLAN_STEPS);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn wrapped_plan_is_unwrapped() {
        let raw = json!({ "plan": { "objective": "o", "steps": [{ "action": "visit", "target": "x.test" }] } });
        let plan = repair_plan(&raw, "q");
        assert_eq!(plan.objective, "o");
        assert_eq!(plan.steps[0].action, PlanAction::Navigate);
    }
}
