//! Project planner facade
//!
//! Wraps a [`Pipeline`] whose final stage produces a `project-plan` value and
//! turns each submission into a typed [`ProjectPlan`].

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::cost::{CostError, estimate_cost};
use crate::crew::{ConfigError, Crew};
use crate::llm::LlmClient;
use crate::pipeline::{FailureKind, Pipeline, PipelineFailure, RunOutput, RunPolicy, StageOutput, UsageMetrics};
use crate::prompts::PromptLoader;
use crate::schema::{PROJECT_PLAN_SCHEMA, ProjectPlan, ROOT_PATH, SchemaRegistry, SchemaValidationError, Violation};

/// The five planning inputs
///
/// Defaults describe a small-business website project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlanInputs {
    pub project_type: String,
    pub industry: String,
    pub project_objectives: String,
    /// One member per line, with role
    pub team_members: String,
    /// One requirement per line
    pub project_requirements: String,
}

impl Default for PlanInputs {
    fn default() -> Self {
        Self {
            project_type: "Website".to_string(),
            industry: "Technology".to_string(),
            project_objectives: "Create a website for a small business".to_string(),
            team_members: [
                "- John Doe (Project Manager)",
                "- Jane Doe (Software Engineer)",
                "- Bob Smith (Designer)",
                "- Alice Johnson (QA Engineer)",
                "- Tom Brown (QA Engineer)",
            ]
            .join("\n"),
            project_requirements: [
                "- Create a responsive design that works well on desktop and mobile devices",
                "- Implement a modern, visually appealing user interface with a clean look",
                "- Develop a user-friendly navigation system with intuitive menu structure",
                "- Include an \"About Us\" page highlighting the company's history and values",
                "- Design a \"Services\" page showcasing the business's offerings with descriptions",
                "- Create a \"Contact Us\" page with a form and integrated map for communication",
                "- Implement a blog section for sharing industry news and company updates",
                "- Ensure fast loading times and optimize for search engines (SEO)",
                "- Integrate social media links and sharing capabilities",
                "- Include a testimonials section to showcase customer feedback and build trust",
            ]
            .join("\n"),
        }
    }
}

impl PlanInputs {
    /// Read inputs from YAML; absent keys keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        debug!(?path, "PlanInputs::load: called");
        let content = std::fs::read_to_string(path).context(format!("Failed to read inputs from {}", path.display()))?;
        serde_yaml::from_str(&content).context(format!("Failed to parse inputs from {}", path.display()))
    }

    /// Template variables keyed by field name
    pub fn to_variables(&self) -> HashMap<String, String> {
        HashMap::from([
            ("project_type".to_string(), self.project_type.clone()),
            ("industry".to_string(), self.industry.clone()),
            ("project_objectives".to_string(), self.project_objectives.clone()),
            ("team_members".to_string(), self.team_members.clone()),
            ("project_requirements".to_string(), self.project_requirements.clone()),
        ])
    }
}

/// A validated plan and what it cost to produce
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutcome {
    pub run_id: Uuid,
    pub plan: ProjectPlan,
    pub usage: UsageMetrics,
    pub stages: Vec<StageOutput>,
}

impl PlanOutcome {
    pub fn cost(&self, rate_per_million: f64) -> Result<f64, CostError> {
        estimate_cost(&self.usage, rate_per_million)
    }
}

/// Runs the planning crew and decodes its final answer
#[derive(Debug, Clone)]
pub struct ProjectPlanner {
    pipeline: Pipeline,
}

impl ProjectPlanner {
    /// Wrap a pipeline whose final stage yields a project plan
    pub fn new(pipeline: Pipeline) -> Result<Self, ConfigError> {
        debug!("ProjectPlanner::new: called");
        pipeline.crew().require_final_schema(PROJECT_PLAN_SCHEMA)?;
        Ok(Self { pipeline })
    }

    /// Build the crew, prompts and policy described by `config`
    pub fn from_config(config: &Config, llm: Arc<dyn LlmClient>) -> Result<Self> {
        debug!(crew = ?config.crew.path, prompts = ?config.prompts.dir, "ProjectPlanner::from_config: called");
        let schemas = SchemaRegistry::builtin();
        let crew = Crew::load_or_builtin(config.crew.path.as_deref(), &schemas).context("Failed to load crew")?;
        let prompts = PromptLoader::new(config.prompts.dir.as_deref()).context("Failed to load prompts")?;
        let policy = RunPolicy {
            max_repair_attempts: config.repair.max_attempts,
            max_tokens: config.llm.max_tokens,
        };

        let pipeline = Pipeline::new(Arc::new(crew), llm, Arc::new(prompts), policy);
        Ok(Self::new(pipeline)?)
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub async fn plan(&self, inputs: &PlanInputs) -> Result<PlanOutcome, PipelineFailure> {
        self.plan_variables(&inputs.to_variables()).await
    }

    /// Plan from an arbitrary variable map, for crews with other inputs
    pub async fn plan_variables(&self, variables: &HashMap<String, String>) -> Result<PlanOutcome, PipelineFailure> {
        debug!(variable_count = variables.len(), "ProjectPlanner::plan_variables: called");
        let output = self.pipeline.new_run().run(variables).await?;
        self.decode(output)
    }

    /// Like [`plan`](Self::plan), abandoning the run when `cancel` completes
    pub async fn plan_until<F>(&self, inputs: &PlanInputs, cancel: F) -> Result<PlanOutcome, PipelineFailure>
    where
        F: Future<Output = ()>,
    {
        let output = self.pipeline.new_run().run_until(&inputs.to_variables(), cancel).await?;
        self.decode(output)
    }

    fn decode(&self, output: RunOutput) -> Result<PlanOutcome, PipelineFailure> {
        let stage = self.pipeline.crew().final_stage().map(|s| s.name().to_string());
        let failure = |err: SchemaValidationError| PipelineFailure {
            run_id: output.run_id,
            kind: FailureKind::Schema(err),
            stage: stage.clone(),
            usage: output.usage,
        };

        let value = output
            .structured
            .as_ref()
            .ok_or_else(|| failure(SchemaValidationError::new(ROOT_PATH, Violation::Missing)))?;
        let plan = ProjectPlan::from_value(value).map_err(failure)?;

        info!(
            run_id = %output.run_id,
            tasks = plan.tasks.len(),
            milestones = plan.milestones.len(),
            "Project plan generated"
        );
        Ok(PlanOutcome {
            run_id: output.run_id,
            plan,
            usage: output.usage,
            stages: output.stages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::mock::MockLlmClient;
    use crate::llm::{CompletionResponse, TokenUsage};
    use serde_json::json;
    use tempfile::TempDir;

    fn planner(mock: Arc<MockLlmClient>) -> ProjectPlanner {
        ProjectPlanner::from_config(&Config::default(), mock).unwrap()
    }

    fn answer(content: &str) -> CompletionResponse {
        CompletionResponse::text(content, TokenUsage::new(1000, 250))
    }

    #[test]
    fn test_default_inputs_cover_builtin_crew() {
        let crew = Crew::builtin(&SchemaRegistry::builtin()).unwrap();
        let vars = PlanInputs::default().to_variables();
        for name in crew.required_variables() {
            assert!(vars.contains_key(&name), "default inputs lack {name}");
        }
        assert_eq!(vars["project_type"], "Website");
        assert_eq!(vars["team_members"].lines().count(), 5);
    }

    #[test]
    fn test_inputs_load_partial_yaml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("inputs.yml");
        std::fs::write(&path, "project_type: Mobile App\nindustry: Healthcare\n").unwrap();

        let inputs = PlanInputs::load(&path).unwrap();
        assert_eq!(inputs.project_type, "Mobile App");
        assert_eq!(inputs.industry, "Healthcare");
        assert_eq!(inputs.project_objectives, PlanInputs::default().project_objectives);
    }

    #[test]
    fn test_inputs_reject_unknown_key() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("inputs.yml");
        std::fs::write(&path, "project_type: Mobile App\nteam: |\n  - Ann (Lead)\n").unwrap();

        let err = PlanInputs::load(&path).unwrap_err();
        assert!(format!("{err:?}").contains("team"), "{err:?}");
    }

    #[tokio::test]
    async fn test_plan_with_builtin_crew() {
        let plan = json!({
            "tasks": [
                {"task_name": "Design mockups", "estimated_time_hours": 8.0, "required_resources": ["Bob Smith"]},
                {"task_name": "Build pages", "estimated_time_hours": 24.0, "required_resources": ["Jane Doe"]}
            ],
            "milestones": [
                {"milestone_name": "Design complete", "tasks": ["Design mockups"]},
                {"milestone_name": "Site live", "tasks": ["Build pages"]}
            ]
        });
        let mock = Arc::new(MockLlmClient::new(vec![
            answer("1. Design mockups\n2. Build pages"),
            answer("Design mockups: 8h\nBuild pages: 24h"),
            answer(&format!("```json\n{}\n```", plan)),
        ]));

        let outcome = planner(mock.clone()).plan(&PlanInputs::default()).await.unwrap();

        assert_eq!(outcome.plan.tasks.len(), 2);
        assert!((outcome.plan.total_hours() - 32.0).abs() < f64::EPSILON);
        assert_eq!(outcome.usage.prompt_tokens, 3000);
        assert_eq!(outcome.usage.completion_tokens, 750);
        assert_eq!(outcome.usage.successful_requests, 3);
        assert_eq!(outcome.stages.len(), 3);

        let cost = outcome.cost(0.150).unwrap();
        assert!((cost - 0.150 * 3750.0 / 1_000_000.0).abs() < 1e-12);

        let first = &mock.requests()[0];
        assert!(first.messages[0].content.contains("Website project for the Technology industry"));
        assert!(first.messages[0].content.contains("- Bob Smith (Designer)"));
    }

    #[tokio::test]
    async fn test_plan_surfaces_schema_failure() {
        let mock = Arc::new(MockLlmClient::new(vec![
            answer("a"),
            answer("b"),
            answer(r#"{"tasks": [], "milestones": [{"milestone_name": "M", "tasks": ["ghost"]}]}"#),
        ]));

        let failure = planner(mock).plan(&PlanInputs::default()).await.unwrap_err();

        assert_eq!(failure.stage.as_deref(), Some("resource_allocation"));
        assert_eq!(failure.usage.successful_requests, 3);
        assert!(matches!(failure.kind, FailureKind::Schema(ref e) if e.path == "milestones[0].tasks[0]"));
    }

    #[tokio::test]
    async fn test_plan_until_cancelled_before_start() {
        let mock = Arc::new(MockLlmClient::new(vec![]));

        let failure = planner(mock.clone())
            .plan_until(&PlanInputs::default(), std::future::ready(()))
            .await
            .unwrap_err();

        assert!(matches!(failure.kind, FailureKind::Cancelled));
        assert_eq!(mock.call_count(), 0);
    }

    #[test]
    fn test_new_rejects_unstructured_final_stage() {
        let yaml = r#"
roles:
  writer:
    role: Writer
    goal: Write
    backstory: Writes
stages:
  - name: draft
    agent: writer
    description: Draft it
    expected-output: A draft
"#;
        let crew = Crew::from_yaml(yaml, &SchemaRegistry::builtin()).unwrap();
        let pipeline = Pipeline::new(
            Arc::new(crew),
            Arc::new(MockLlmClient::new(vec![])),
            Arc::new(PromptLoader::embedded_only().unwrap()),
            RunPolicy::default(),
        );

        let err = ProjectPlanner::new(pipeline).unwrap_err();
        assert!(matches!(err, ConfigError::FinalStageSchema { .. }));
    }
}
