//! Placeholder specification written when no agent produced one.
//!
//! Downstream phases always need a spec artifact to read, so the stub carries
//! the story id, the detected tech stack, whatever requirements were gathered,
//! and empty sections for a human to fill in.

use chrono::Utc;

use crate::context::ExecutionContext;

pub fn generate_stub_markdown(ctx: &ExecutionContext, complexity: &str, requirements: &[String]) -> String {
    let mut lines = Vec::new();

    lines.push(format!("# Specification: {}", ctx.story_id()));
    lines.push(String::new());
    lines.push("> Stub specification: no spec-writing agent produced this document.".to_string());
    lines.push(format!("> Generated at: {}", Utc::now().to_rfc3339()));
    lines.push(format!("> Requirement source: {}", ctx.source()));
    if let Some(prd) = ctx.prd_path() {
        lines.push(format!("> PRD: {}", prd.display()));
    }
    let tech = match ctx.tech_stack() {
        Some(stack) if stack.marker.is_empty() => stack.language.clone(),
        Some(stack) => format!("{} (detected from {})", stack.language, stack.marker),
        None => "undetected".to_string(),
    };
    lines.push(format!("> Tech stack: {}", tech));
    lines.push(String::new());

    lines.push("## Overview".to_string());
    lines.push(String::new());
    lines.push(format!(
        "Describe the change requested by {} and the problem it solves.",
        ctx.story_id()
    ));
    lines.push(String::new());

    lines.push("## Requirements".to_string());
    lines.push(String::new());
    if requirements.is_empty() {
        lines.push("- (none gathered yet)".to_string());
    } else {
        for requirement in requirements {
            lines.push(format!("- {}", requirement));
        }
    }
    lines.push(String::new());

    lines.push("## Technical Approach".to_string());
    lines.push(String::new());
    lines.push(format!("Complexity: {}", complexity));
    lines.push(String::new());

    lines.push("## Acceptance Criteria".to_string());
    lines.push(String::new());
    lines.push("- [ ] Acceptance criteria defined".to_string());
    lines.push("- [ ] Tests cover the new behaviour".to_string());
    lines.push(String::new());

    lines.push("---".to_string());
    lines.push("*Replace this stub with a real specification before implementation.*".to_string());
    lines.push(String::new());

    lines.join("\n")
}
