//! The plan model: the hand-off contract between planner and execution loop.
//!
//! A plan is an ordered list of browser actions drawn from a closed set.
//! Fallback actions nest at most one level, which the types enforce:
//! [`FallbackAction`] has no fallback of its own.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on plan length.
pub const MAX_PLAN_STEPS: usize = 50;

/// The closed set of plan actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanAction {
    #[serde(rename = "navigate")]
    Navigate,
    #[serde(rename = "click")]
    Click,
    #[serde(rename = "type")]
    Type,
    #[serde(rename = "type_text")]
    TypeText,
    #[serde(rename = "press_key")]
    PressKey,
    #[serde(rename = "scroll")]
    Scroll,
    #[serde(rename = "wait")]
    Wait,
    #[serde(rename = "getPageContext")]
    GetPageContext,
}

impl PlanAction {
    pub const ALL: [PlanAction; 8] = [
        PlanAction::Navigate,
        PlanAction::Click,
        PlanAction::Type,
        PlanAction::TypeText,
        PlanAction::PressKey,
        PlanAction::Scroll,
        PlanAction::Wait,
        PlanAction::GetPageContext,
    ];

    /// Wire name, as it appears in plan JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanAction::Navigate => "navigate",
            PlanAction::Click => "click",
            PlanAction::Type => "type",
            PlanAction::TypeText => "type_text",
            PlanAction::PressKey => "press_key",
            PlanAction::Scroll => "scroll",
            PlanAction::Wait => "wait",
            PlanAction::GetPageContext => "getPageContext",
        }
    }

    /// The browser tool that carries out this action.
    pub fn tool_name(&self) -> &'static str {
        match self {
            PlanAction::Navigate => "navigate",
            PlanAction::Click => "click",
            PlanAction::Type | PlanAction::TypeText => "type_text",
            PlanAction::PressKey => "press_key",
            PlanAction::Scroll => "scroll",
            PlanAction::Wait => "wait",
            PlanAction::GetPageContext => "get_page_context",
        }
    }

    /// Exact wire-name lookup. Synonym repair is the planner's job.
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == name)
    }
}

impl std::fmt::Display for PlanAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single-level alternative for a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackAction {
    pub action: PlanAction,
    pub target: String,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    /// 1-based position
    pub step: u32,
    pub action: PlanAction,

    /// URL, selector, literal text or direction depending on `action`
    pub target: String,
    pub reasoning: String,
    pub expected_outcome: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_criteria: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_action: Option<FallbackAction>,
}

impl PlanStep {
    /// The default "look at the page first" step.
    pub fn page_context(step: u32) -> Self {
        Self {
            step,
            action: PlanAction::GetPageContext,
            target: "current page".into(),
            reasoning: "Read the current page before acting".into(),
            expected_outcome: "Page URL, title and content are known".into(),
            validation_criteria: None,
            fallback_action: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub objective: String,
    pub approach: String,
    pub steps: Vec<PlanStep>,

    /// Step numbers that must succeed
    #[serde(default)]
    pub critical_paths: Vec<u32>,
    pub estimated_steps: u32,
    pub complexity_score: f64,
    pub confidence: f64,
    #[serde(default)]
    pub potential_issues: Vec<String>,
    #[serde(default)]
    pub optimizations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("plan has no steps")]
    Empty,

    #[error("plan has {0} steps (max {MAX_PLAN_STEPS})")]
    TooLong(usize),

    #[error("step numbers must be 1-based and increasing (found {found} after {previous})")]
    NonMonotonic { previous: u32, found: u32 },

    #[error("critical path {0} does not refer to a step")]
    DanglingCriticalPath(u32),

    #[error("step {step} has an empty {field}")]
    EmptyField { step: u32, field: &'static str },

    #[error("{field} = {value} is outside [0, 1]")]
    OutOfRange { field: &'static str, value: f64 },
}

impl Plan {
    /// Check every structural invariant of a plan.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.steps.is_empty() {
            return Err(PlanError::Empty);
        }
        if self.steps.len() > MAX_PLAN_STEPS {
            return Err(PlanError::TooLong(self.steps.len()));
        }

        let mut previous = 0;
        for step in &self.steps {
            if step.step <= previous {
                return Err(PlanError::NonMonotonic {
                    previous,
                    found: step.step,
                });
            }
            previous = step.step;

            for (field, value) in [
                ("target", &step.target),
                ("reasoning", &step.reasoning),
                ("expectedOutcome", &step.expected_outcome),
            ] {
                if value.trim().is_empty() {
                    return Err(PlanError::EmptyField {
                        step: step.step,
                        field,
                    });
                }
            }
        }

        if let Some(&missing) = self
            .critical_paths
            .iter()
            .find(|&&n| !self.steps.iter().any(|s| s.step == n))
        {
            return Err(PlanError::DanglingCriticalPath(missing));
        }

        for (field, value) in [
            ("complexityScore", self.complexity_score),
            ("confidence", self.confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PlanError::OutOfRange { field, value });
            }
        }

        Ok(())
    }

    /// One line per step, for prompts and fallback text.
    pub fn describe_steps(&self) -> String {
        self.steps
            .iter()
            .map(|s| format!("{}. {} → {} ({})", s.step, s.action, s.target, s.reasoning))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// JSON schema sent with the planner's structured-output request.
    pub fn json_schema() -> serde_json::Value {
        let actions: Vec<&str> = PlanAction::ALL.iter().map(|a| a.as_str()).collect();
        let unit = serde_json::json!({ "type": "number", "minimum": 0, "maximum": 1 });
        let fallback = serde_json::json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": actions },
                "target": { "type": "string" },
                "reasoning": { "type": "string" }
            },
            "required": ["action", "target"],
            "additionalProperties": false
        });

        serde_json::json!({
            "type": "object",
            "properties": {
                "objective": { "type": "string" },
                "approach": { "type": "string" },
                "steps": {
                    "type": "array",
                    "minItems": 1,
                    "maxItems": MAX_PLAN_STEPS,
                    "items": {
                        "type": "object",
                        "properties": {
                            "step": { "type": "integer", "minimum": 1 },
                            "action": { "type": "string", "enum": actions },
                            "target": { "type": "string", "minLength": 1 },
                            "reasoning": { "type": "string", "minLength": 1 },
                            "expectedOutcome": { "type": "string", "minLength": 1 },
                            "validationCriteria": { "type": "string" },
                            "fallbackAction": fallback
                        },
                        "required": ["step", "action", "target", "reasoning", "expectedOutcome"]
                    }
                },
                "criticalPaths": { "type": "array", "items": { "type": "integer", "minimum": 1 } },
                "estimatedSteps": { "type": "integer", "minimum": 1 },
                "complexityScore": unit,
                "confidence": unit,
                "potentialIssues": { "type": "array", "items": { "type": "string" } },
                "optimizations": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["objective", "approach", "steps", "estimatedSteps", "complexityScore", "confidence"]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(n: u32, action: PlanAction, target: &str) -> PlanStep {
        PlanStep {
            step: n,
            action,
            target: target.into(),
            reasoning: "because".into(),
            expected_outcome: "done".into(),
            validation_criteria: None,
            fallback_action: None,
        }
    }

    fn plan(steps: Vec<PlanStep>) -> Plan {
        Plan {
            objective: "read the title".into(),
            approach: "direct".into(),
            estimated_steps: steps.len() as u32,
            steps,
            critical_paths: vec![1],
            complexity_score: 0.2,
            confidence: 0.8,
            potential_issues: vec![],
            optimizations: vec![],
        }
    }

    #[test]
    fn wire_names() {
        let json = serde_json::to_string(&PlanAction::GetPageContext).unwrap();
        assert_eq!(json, "\"getPageContext\"");
        assert_eq!(PlanAction::from_wire("type_text"), Some(PlanAction::TypeText));
        assert_eq!(PlanAction::from_wire("waitForElement"), None);
        assert_eq!(PlanAction::Type.tool_name(), "type_text");
    }

    #[test]
    fn camel_case_round_trip() {
        let p = plan(vec![
            step(1, PlanAction::Navigate, "https://example.com"),
            step(2, PlanAction::GetPageContext, "page"),
        ]);
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["steps"][0]["expectedOutcome"], "done");
        assert_eq!(json["criticalPaths"][0], 1);
        let back: Plan = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn valid_plan_passes() {
        let p = plan(vec![
            step(1, PlanAction::Navigate, "https://example.com"),
            step(2, PlanAction::GetPageContext, "page"),
        ]);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn validation_failures() {
        assert_eq!(plan(vec![]).validate(), Err(PlanError::Empty));

        let dup = plan(vec![step(1, PlanAction::Click, "a"), step(1, PlanAction::Click, "b")]);
        assert!(matches!(dup.validate(), Err(PlanError::NonMonotonic { .. })));

        let mut dangling = plan(vec![step(1, PlanAction::Click, "a")]);
        dangling.critical_paths = vec![3];
        assert_eq!(dangling.validate(), Err(PlanError::DanglingCriticalPath(3)));

        let blank = plan(vec![step(1, PlanAction::Click, "  ")]);
        assert!(matches!(blank.validate(), Err(PlanError::EmptyField { field: "target", .. })));

        let mut hot = plan(vec![step(1, PlanAction::Click, "a")]);
        hot.confidence = 1.5;
        assert!(matches!(hot.validate(), Err(PlanError::OutOfRange { .. })));
    }

    #[test]
    fn nested_fallback_is_unrepresentable() {
        let json = serde_json::json!({
            "action": "click",
            "target": "#a",
            "fallbackAction": { "action": "wait", "target": "1000" }
        });
        let fb: FallbackAction = serde_json::from_value(json).unwrap();
        let back = serde_json::to_value(&fb).unwrap();
        assert!(back.get("fallbackAction").is_none());
    }

    #[test]
    fn schema_lists_closed_action_set() {
        let schema = Plan::json_schema();
        let actions = &schema["properties"]["steps"]["items"]["properties"]["action"]["enum"];
        assert_eq!(actions.as_array().unwrap().len(), 8);
        assert_eq!(schema["properties"]["steps"]["maxItems"], 50);
        assert!(
            schema["properties"]["steps"]["items"]["properties"]["fallbackAction"]["properties"]
                .get("fallbackAction")
                .is_none()
        );
    }
}
