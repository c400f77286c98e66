//! Terminal approval prompt for sensitive tool calls.

use async_trait::async_trait;
use pagepilot_core::approval::{ApprovalDecision, ApprovalRequest, Approver};
use std::io::{BufRead, Write};

/// Asks on stderr and reads `y`/`n` from stdin. Anything but yes rejects.
pub struct StdinApprover;

#[async_trait]
impl Approver for StdinApprover {
    async fn request_approval(&self, request: &ApprovalRequest) -> ApprovalDecision {
        eprintln!();
        eprintln!("  ⚠️  Approval needed: {}", request.tool_name);
        eprintln!("     Reason:    {}", request.reason);
        eprintln!("     Arguments: {}", request.arguments);
        eprint!("     Allow? [y/N] ");
        let _ = std::io::stderr().flush();

        let answer = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await;

        match answer {
            Ok(Ok(line)) if is_yes(&line) => ApprovalDecision::Approved,
            Ok(Ok(_)) => ApprovalDecision::Rejected {
                reason: Some("declined at the prompt".into()),
            },
            _ => ApprovalDecision::Rejected {
                reason: Some("could not read an answer from stdin".into()),
            },
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
