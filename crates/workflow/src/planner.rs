//! Planner: one schema-constrained model call, repaired into a [`Plan`].
//!
//! Planning never fails. Unparseable output is retried a bounded number of
//! times; after that, or on any transport error, a one-step fallback plan
//! with heuristic scores is returned.

use pagepilot_core::error::ProviderError;
use pagepilot_core::message::Message;
use pagepilot_core::plan::{Plan, PlanStep};
use pagepilot_core::provider::{Provider, ProviderRequest, ResponseFormat};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::ModelSettings;
use crate::prompts::{PLANNER_SYSTEM_PROMPT, planner_user_prompt};
use crate::repair::repair_plan;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningResult {
    pub plan: Plan,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimized_query: Option<String>,
    #[serde(default)]
    pub gaps: Vec<String>,
    /// The plan was computed locally because the model could not produce one
    #[serde(default)]
    pub fallback_used: bool,
}

impl PlanningResult {
    fn fallback(query: &str) -> Self {
        let plan = fallback_plan(query);
        Self {
            confidence: plan.confidence,
            plan,
            optimized_query: None,
            gaps: vec![],
            fallback_used: true,
        }
    }
}

pub struct Planner {
    provider: Arc<dyn Provider>,
    settings: ModelSettings,
    attempts: u32,
}

impl Planner {
    pub fn new(provider: Arc<dyn Provider>, settings: ModelSettings, attempts: u32) -> Self {
        Self {
            provider,
            settings,
            attempts: attempts.max(1),
        }
    }

    pub async fn plan(
        &self,
        query: &str,
        current_url: Option<&str>,
        page_context: Option<&str>,
    ) -> PlanningResult {
        let messages = vec![
            Message::system(PLANNER_SYSTEM_PROMPT),
            Message::user(planner_user_prompt(query, current_url, page_context)),
        ];

        for attempt in 1..=self.attempts {
            let request = ProviderRequest::new(&self.settings.model, messages.clone())
                .with_temperature(self.settings.temperature)
                .with_max_tokens(self.settings.max_tokens)
                .with_response_format(ResponseFormat::JsonSchema {
                    name: "plan".into(),
                    schema: Plan::json_schema(),
                });

            match self.provider.generate_structured(request).await {
                Ok(raw) => {
                    let plan = repair_plan(&raw, query);
                    if let Err(e) = plan.validate() {
                        warn!(error = %e, "Repaired plan is still invalid, using fallback plan");
                        break;
                    }
                    info!(
                        steps = plan.steps.len(),
                        confidence = plan.confidence,
                        complexity = plan.complexity_score,
                        attempt,
                        "Plan generated"
                    );
                    return PlanningResult {
                        confidence: plan.confidence,
                        optimized_query: raw
                            .get("optimizedQuery")
                            .and_then(|v| v.as_str())
                            .map(str::to_string)
                            .filter(|s| !s.trim().is_empty()),
                        gaps: raw
                            .get("gaps")
                            .and_then(|v| v.as_array())
                            .map(|gaps| gaps.iter().filter_map(|g| g.as_str().map(str::to_string)).collect())
                            .unwrap_or_default(),
                        plan,
                        fallback_used: false,
                    };
                }
                Err(e @ (ProviderError::InvalidOutput(_) | ProviderError::NoOutput(_))) => {
                    warn!(attempt, max_attempts = self.attempts, error = %e, "Planner output unusable");
                }
                Err(e) => {
                    warn!(error = %e, "Planner request failed, using fallback plan");
                    return PlanningResult::fallback(query);
                }
            }
        }

        warn!("Planner gave up, using fallback plan");
        PlanningResult::fallback(query)
    }
}

const MULTI_STEP: &[&str] = &[" and then ", " then ", "after that", "afterwards", " next ", "finally", " and "];
const FORM_INTERACTION: &[&str] = &[
    "fill", "type", "enter ", "submit", "form", "input", "login", "log in", "sign in", "sign up", "select",
    "checkbox",
];
const NAVIGATION: &[&str] = &["navigate", "go to", "open", "visit", "click", "link", "page"];
const SEARCH: &[&str] = &["search", "find", "look up", "lookup", "query"];
const DYNAMIC_CONTENT: &[&str] = &[
    "scroll", "wait", "load", "dynamic", "infinite", "popup", "modal", "dropdown", "refresh",
];
const CLARITY: &[&str] = &["http://", "https://", "\"", "exactly", "specific", "button", "the title"];
const VAGUENESS: &[&str] = &["something", "anything", "stuff", "maybe", "somehow", "whatever", "etc"];

fn mentions(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

/// Tokens that look like URLs or bare domains (`example.com/path`).
fn url_count(query: &str) -> usize {
    query
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| matches!(c, ',' | ';' | '(' | ')' | '"' | '\'') || c == '.'))
        .filter(|t| {
            if t.contains("://") {
                return true;
            }
            let host = t.split('/').next().unwrap_or_default();
            let labels: Vec<&str> = host.split('.').collect();
            labels.len() >= 2
                && labels.iter().all(|l| !l.is_empty() && l.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
                && labels
                    .last()
                    .is_some_and(|tld| tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic()))
        })
        .count()
}

/// Heuristic `(complexity_score, confidence)` for a query. Deterministic.
pub fn fallback_scores(query: &str) -> (f64, f64) {
    let lower = format!(" {} ", query.to_lowercase());

    let mut complexity: f64 = 0.0;
    for (keywords, weight) in [
        (MULTI_STEP, 0.2),
        (FORM_INTERACTION, 0.15),
        (NAVIGATION, 0.1),
        (SEARCH, 0.1),
        (DYNAMIC_CONTENT, 0.15),
    ] {
        if mentions(&lower, keywords) {
            complexity += weight;
        }
    }
    complexity += 0.1 * url_count(query) as f64;
    let complexity = complexity.min(1.0);

    let mut confidence = 0.9 - 0.3 * complexity;
    if mentions(&lower, CLARITY) {
        confidence += 0.2;
    }
    if mentions(&lower, VAGUENESS) {
        confidence -= 0.2;
    }

    (complexity, confidence.clamp(0.1, 1.0))
}

/// The minimal plan used when the model cannot plan: look at the page first.
pub fn fallback_plan(query: &str) -> Plan {
    let (complexity_score, confidence) = fallback_scores(query);
    Plan {
        objective: if query.trim().is_empty() {
            "Inspect the current page".to_string()
        } else {
            query.trim().to_string()
        },
        approach: "Read the current page, then decide on the next actions".to_string(),
        steps: vec![PlanStep::page_context(1)],
        critical_paths: vec![1],
        estimated_steps: 1,
        complexity_score,
        confidence,
        potential_issues: vec!["The planning model was unavailable; the plan covers only the first step".into()],
        optimizations: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagepilot_agent::test_helpers::{ScriptedProvider, ScriptedTurn};
    use pagepilot_core::plan::PlanAction;
    use serde_json::json;

    fn planner(turns: Vec<ScriptedTurn>) -> (Planner, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider::new(turns));
        (Planner::new(provider.clone(), ModelSettings::default(), 2), provider)
    }

    #[tokio::test]
    async fn plans_from_model_json() {
        let (planner, provider) = planner(vec![ScriptedTurn::json(json!({
            "objective": "Read the title of example.com",
            "approach": "Open then read",
            "steps": [
                { "step": 1, "action": "navigate", "target": "https://example.com", "reasoning": "open", "expectedOutcome": "loaded" },
                { "step": 2, "action": "getPageContext", "target": "page", "reasoning": "read", "expectedOutcome": "title known" }
            ],
            "criticalPaths": [1, 2],
            "estimatedSteps": 2,
            "complexityScore": 0.2,
            "confidence": 0.9,
            "optimizedQuery": "Open example.com and report its title"
        }))]);

        let result = planner.plan("navigate to example.com and read the title", None, None).await;
        assert!(!result.fallback_used);
        assert_eq!(result.plan.steps.len(), 2);
        assert_eq!(result.plan.steps[1].action, PlanAction::GetPageContext);
        assert_eq!(result.confidence, 0.9);
        assert_eq!(result.optimized_query.as_deref(), Some("Open example.com and report its title"));
        assert_eq!(provider.calls(), 1);

        let request = &provider.requests()[0];
        assert!(matches!(request.response_format, Some(ResponseFormat::JsonSchema { .. })));
    }

    #[tokio::test]
    async fn missing_steps_are_repaired() {
        let (planner, _) = planner(vec![ScriptedTurn::json(json!({ "objective": "x", "confidence": 0.8 }))]);
        let result = planner.plan("x", None, None).await;
        assert!(!result.fallback_used);
        assert_eq!(result.plan.steps.len(), 1);
        assert_eq!(result.plan.steps[0].action, PlanAction::GetPageContext);
        assert_eq!(result.plan.estimated_steps, 1);
        assert_eq!(result.plan.critical_paths, vec![1]);
    }

    #[tokio::test]
    async fn unparseable_output_is_retried_then_falls_back() {
        let (planner, provider) = planner(vec![
            ScriptedTurn::text("I think you should open the page."),
            ScriptedTurn::text("Sorry, no JSON today."),
        ]);
        let result = planner.plan("open example.com", None, None).await;
        assert!(result.fallback_used);
        assert_eq!(provider.calls(), 2);
        assert!(result.plan.validate().is_ok());
    }

    #[tokio::test]
    async fn second_attempt_can_succeed() {
        let (planner, _) = planner(vec![
            ScriptedTurn::text("no json"),
            ScriptedTurn::json(json!({ "steps": [{ "action": "scroll", "target": "down" }] })),
        ]);
        let result = planner.plan("scroll down", None, None).await;
        assert!(!result.fallback_used);
        assert_eq!(result.plan.steps[0].action, PlanAction::Scroll);
    }

    #[tokio::test]
    async fn transport_errors_fall_back_immediately() {
        let (planner, provider) = planner(vec![ScriptedTurn::error(ProviderError::Network("refused".into()))]);
        let result = planner.plan("read this page", None, None).await;
        assert!(result.fallback_used);
        assert_eq!(provider.calls(), 1);
        assert_eq!(result.plan.steps[0].action, PlanAction::GetPageContext);
    }

    #[test]
    fn fallback_scores_are_deterministic_and_bounded() {
        for query in [
            "",
            "read the page",
            "go to https://a.test and then fill the login form, submit, scroll and wait for https://b.test c.test d.org e.net",
            "do something with stuff maybe",
        ] {
            let first = fallback_scores(query);
            assert_eq!(first, fallback_scores(query));
            let (complexity, confidence) = first;
            assert!((0.0..=1.0).contains(&complexity));
            assert!((0.1..=1.0).contains(&confidence));
        }
    }

    #[test]
    fn fallback_score_components() {
        // navigation (0.1) + one URL (0.1)
        let (c, conf) = fallback_scores("visit example.com");
        assert!((c - 0.2).abs() < 1e-9);
        assert!((conf - (0.9 - 0.06)).abs() < 1e-9);

        // Everything at once caps at 1.0
        let (c, _) = fallback_scores(
            "go to a.test and then fill the form, search, scroll, b.test c.test d.test e.test f.test",
        );
        assert_eq!(c, 1.0);

        let (_, vague) = fallback_scores("do something");
        assert!((vague - 0.7).abs() < 1e-9);
    }

    #[test]
    fn fallback_plan_is_valid() {
        let plan = fallback_plan("read this page");
        assert!(plan.validate().is_ok());
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.critical_paths, vec![1]);
    }
}
