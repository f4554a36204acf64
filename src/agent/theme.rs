//! The stock market-phase agent: renders a deterministic concept sheet
//! for the brief's theme. Pure text templating; same brief in, same
//! artifact bytes out.

use anyhow::Result;
use async_trait::async_trait;

use super::{Agent, AgentContext, AgentInput, AgentOutput, ArtifactSpec};
use crate::model::Brief;

/// Fixed design angles each theme is run through. Order matters: the
/// sheet numbers concepts by position.
const CONCEPT_ANGLES: [(&str, &str); 5] = [
    (
        "Endless Ascent",
        "one-touch vertical climb where the theme itself forms the obstacle course",
    ),
    (
        "Swarm Defense",
        "hold a single point against themed waves with upgrades between rounds",
    ),
    (
        "Loop Runner",
        "lane-switching runner through a looping, theme-dressed track",
    ),
    (
        "Merge Yard",
        "merge themed pieces into landmarks with idle income between sessions",
    ),
    (
        "Precision Drop",
        "physics drop-and-stack with themed blocks and near-miss scoring",
    ),
];

pub struct ThemeSynthesisAgent;

#[async_trait]
impl Agent for ThemeSynthesisAgent {
    fn name(&self) -> &'static str {
        "theme-synthesis"
    }

    async fn run(&self, input: AgentInput, ctx: &AgentContext) -> Result<AgentOutput> {
        let sheet = render_concept_sheet(&input.objective, &ctx.brief);
        let artifact = ctx.save_artifact(ArtifactSpec {
            kind: "theme-concepts".to_string(),
            extension: "md".to_string(),
            data: sheet.into_bytes(),
            meta: Some(serde_json::json!({
                "agent": self.name(),
                "theme": ctx.brief.theme,
                "concepts": CONCEPT_ANGLES.len(),
            })),
        })?;
        Ok(AgentOutput {
            summary: format!(
                "Drafted {} '{}' concepts for {}",
                CONCEPT_ANGLES.len(),
                ctx.brief.theme,
                ctx.brief.industry
            ),
            artifact,
        })
    }
}

fn render_concept_sheet(objective: &str, brief: &Brief) -> String {
    let mut sheet = String::new();
    sheet.push_str(&format!("# Theme concepts: {}\n\n", brief.theme));
    sheet.push_str(&format!("- Industry: {}\n", brief.industry));
    if let Some(audience) = &brief.audience {
        sheet.push_str(&format!("- Audience: {}\n", audience));
    }
    sheet.push_str(&format!("- Objective: {}\n", objective));
    if let Some(max_tokens) = brief.constraints.max_tokens {
        sheet.push_str(&format!("- Token ceiling: {}\n", max_tokens));
    }
    if let Some(budget) = brief.constraints.budget {
        sheet.push_str(&format!("- Budget: {}\n", budget));
    }
    if let Some(hours) = brief.constraints.timebox_hours {
        sheet.push_str(&format!("- Timebox: {}h\n", hours));
    }

    for (i, (title, pitch)) in CONCEPT_ANGLES.iter().enumerate() {
        sheet.push_str(&format!("\n## {}. {}: {}\n\n", i + 1, brief.theme, title));
        sheet.push_str(&format!(
            "A {} take on \"{}\": {}.\n",
            brief.industry, brief.theme, pitch
        ));
    }
    sheet
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BriefConstraints, Phase};
    use chrono::Utc;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn sample_brief() -> Brief {
        Brief {
            industry: "hypercasual".to_string(),
            theme: "neon skyline".to_string(),
            audience: None,
            goal: "Generate runner concepts".to_string(),
            constraints: BriefConstraints::default(),
        }
    }

    fn context_in(dir: &std::path::Path, brief: Brief) -> AgentContext {
        AgentContext::new(
            Uuid::new_v4(),
            Phase::Market,
            brief,
            Utc::now,
            dir.to_path_buf(),
        )
    }

    #[tokio::test]
    async fn test_agent_saves_one_markdown_artifact() {
        let dir = tempdir().unwrap();
        let ctx = context_in(dir.path(), sample_brief());
        let output = ThemeSynthesisAgent
            .run(
                AgentInput {
                    objective: "Generate runner concepts".to_string(),
                },
                &ctx,
            )
            .await
            .unwrap();

        assert!(output.artifact.path.ends_with("theme-concepts-001.md"));
        assert!(output.summary.contains("5"));
        assert!(output.summary.contains("neon skyline"));

        let (artifacts, blockers) = ctx.into_effects();
        assert_eq!(artifacts.len(), 1);
        assert!(blockers.is_empty());
    }

    #[tokio::test]
    async fn test_sheet_covers_brief_and_all_angles() {
        let dir = tempdir().unwrap();
        let mut brief = sample_brief();
        brief.audience = Some("commuters".to_string());
        brief.constraints.budget = Some(5000.0);
        let ctx = context_in(dir.path(), brief);
        let output = ThemeSynthesisAgent
            .run(
                AgentInput {
                    objective: "Generate runner concepts".to_string(),
                },
                &ctx,
            )
            .await
            .unwrap();

        let sheet = std::fs::read_to_string(&output.artifact.path).unwrap();
        assert!(sheet.contains("# Theme concepts: neon skyline"));
        assert!(sheet.contains("Industry: hypercasual"));
        assert!(sheet.contains("Audience: commuters"));
        assert!(sheet.contains("Budget: 5000"));
        for (title, _) in &CONCEPT_ANGLES {
            assert!(sheet.contains(title), "missing angle {}", title);
        }
    }

    #[tokio::test]
    async fn test_same_brief_produces_identical_bytes() {
        let dir_a = tempdir().unwrap();
        let dir_b = tempdir().unwrap();
        let input = || AgentInput {
            objective: "Generate runner concepts".to_string(),
        };

        let out_a = ThemeSynthesisAgent
            .run(input(), &context_in(dir_a.path(), sample_brief()))
            .await
            .unwrap();
        let out_b = ThemeSynthesisAgent
            .run(input(), &context_in(dir_b.path(), sample_brief()))
            .await
            .unwrap();

        assert_eq!(out_a.artifact.sha256, out_b.artifact.sha256);
    }

    #[test]
    fn test_audience_line_omitted_when_absent() {
        let sheet = render_concept_sheet("obj", &sample_brief());
        assert!(!sheet.contains("Audience:"));
    }
}
