//! `pagepilot plan`: run only the planning phase and print the result.

use pagepilot_config::AppConfig;
use pagepilot_workflow::{ModelSettings, Planner, PlanningResult};

pub async fn run(query: String, url: Option<String>, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let provider = pagepilot_providers::build_provider(&config)?;

    let planner = Planner::new(
        provider,
        ModelSettings::from_app(&config),
        config.workflow.planner_attempts,
    );
    let planning = planner.plan(&query, url.as_deref(), None).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&planning)?);
    } else {
        print!("{}", render(&planning));
    }
    Ok(())
}

fn render(planning: &PlanningResult) -> String {
    let plan = &planning.plan;
    let mut out = String::new();
    out.push_str(&format!("Objective:   {}\n", plan.objective));
    if !plan.approach.is_empty() {
        out.push_str(&format!("Approach:    {}\n", plan.approach));
    }
    out.push_str(&format!(
        "Complexity:  {:.2}   Confidence: {:.2}{}\n\n",
        plan.complexity_score,
        planning.confidence,
        if planning.fallback_used { "   (heuristic plan)" } else { "" }
    ));
    out.push_str(&plan.describe_steps());
    out.push('\n');
    if !plan.critical_paths.is_empty() {
        let critical: Vec<String> = plan.critical_paths.iter().map(u32::to_string).collect();
        out.push_str(&format!("\nMust succeed: {}\n", critical.join(", ")));
    }
    for issue in &plan.potential_issues {
        out.push_str(&format!("⚠️  {issue}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_plan_is_marked() {
        let planning = PlanningResult {
            plan: pagepilot_workflow::planner::fallback_plan("read the title"),
            confidence: 0.8,
            optimized_query: None,
            gaps: vec![],
            fallback_used: true,
        };
        let text = render(&planning);
        assert!(text.contains("(heuristic plan)"));
        assert!(text.contains("1. "));
    }
}
