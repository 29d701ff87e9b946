//! Crew definitions
//!
//! A crew is the set of roles and the ordered stages that use them. Crews are
//! declared in YAML:
//!
//! ```yaml
//! roles:
//!   estimation_agent:
//!     role: Estimation Expert
//!     goal: Provide accurate time and resource estimates for tasks
//!     backstory: Senior technical lead
//! stages:
//!   - name: time_resource_estimation
//!     agent: estimation_agent
//!     description: Estimate each task of the {project_type} project
//!     expected-output: Detailed estimates for each task
//!     output-schema: project-plan   # optional
//! ```
//!
//! Everything is checked when the crew is loaded: unknown role keys, unknown
//! schemas, duplicate stage names and blank fields never reach a run.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::schema::{OutputValidator, SchemaRegistry};
use crate::template;

/// The default planning crew, embedded at build time
pub const BUILTIN_CREW: &str = include_str!("../../crews/project-planning.yml");

/// Crew configuration errors, all raised at load time
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read crew file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse crew definition: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Stage '{stage}' is assigned to unknown role '{role}'")]
    StageUnknownRole { stage: String, role: String },

    #[error("Stage '{stage}' names unknown output schema '{schema}'")]
    UnknownSchema { stage: String, schema: String },

    #[error("Crew defines no stages")]
    NoStages,

    #[error("Duplicate stage name: {0}")]
    DuplicateStage(String),

    #[error("{owner}: '{field}' must not be empty")]
    EmptyField { owner: String, field: &'static str },

    #[error("Final stage '{stage}' must produce '{expected}' output")]
    FinalStageSchema { stage: String, expected: String },
}

/// Who an agent is: persona, objective and background
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleDescriptor {
    pub role: String,
    pub goal: String,
    pub backstory: String,
}

/// Role key to descriptor, fixed after load
#[derive(Debug, Clone, Default)]
pub struct RoleBook {
    roles: BTreeMap<String, Arc<RoleDescriptor>>,
}

impl RoleBook {
    pub fn get(&self, key: &str) -> Result<Arc<RoleDescriptor>, ConfigError> {
        self.roles
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownRole(key.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RoleDescriptor)> {
        self.roles.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

/// One stage as declared in YAML
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageDefinition {
    pub name: String,

    /// Role key of the agent that performs this stage
    pub agent: String,

    /// Instruction with `{variable}` placeholders
    #[serde(rename = "description")]
    pub description_template: String,

    #[serde(rename = "expected-output")]
    pub expected_output: String,

    /// Registry name of the schema the answer must satisfy
    #[serde(rename = "output-schema", default)]
    pub output_schema: Option<String>,
}

/// A stage with its role and validator resolved
#[derive(Clone)]
pub struct Stage {
    pub definition: StageDefinition,
    pub role: Arc<RoleDescriptor>,
    pub validator: Option<Arc<dyn OutputValidator>>,
}

impl Stage {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Variables this stage's instruction needs
    pub fn placeholders(&self) -> Vec<String> {
        template::placeholders(&self.definition.description_template)
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("definition", &self.definition)
            .field("role", &self.role.role)
            .field("validator", &self.validator.as_ref().map(|v| v.name().to_string()))
            .finish()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CrewFile {
    roles: BTreeMap<String, RoleDescriptor>,
    stages: Vec<StageDefinition>,
}

/// Validated roles and ordered stages
#[derive(Debug, Clone)]
pub struct Crew {
    roles: RoleBook,
    stages: Vec<Stage>,
}

impl Crew {
    /// Parse and validate a crew document
    pub fn from_yaml(content: &str, schemas: &SchemaRegistry) -> Result<Self, ConfigError> {
        debug!(content_len = content.len(), "Crew::from_yaml: called");
        let file: CrewFile = serde_yaml::from_str(content)?;

        for (key, role) in &file.roles {
            let owner = format!("role '{}'", key);
            require(&owner, "role", &role.role)?;
            require(&owner, "goal", &role.goal)?;
            require(&owner, "backstory", &role.backstory)?;
        }

        let roles = RoleBook {
            roles: file.roles.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
        };

        if file.stages.is_empty() {
            return Err(ConfigError::NoStages);
        }

        let mut seen = HashSet::new();
        let mut stages = Vec::with_capacity(file.stages.len());
        for definition in file.stages {
            require("stage", "name", &definition.name)?;
            let owner = format!("stage '{}'", definition.name);
            require(&owner, "agent", &definition.agent)?;
            require(&owner, "description", &definition.description_template)?;
            require(&owner, "expected-output", &definition.expected_output)?;

            if !seen.insert(definition.name.clone()) {
                return Err(ConfigError::DuplicateStage(definition.name));
            }

            let role = roles.get(&definition.agent).map_err(|_| ConfigError::StageUnknownRole {
                stage: definition.name.clone(),
                role: definition.agent.clone(),
            })?;

            let validator = match &definition.output_schema {
                Some(name) => Some(schemas.get(name).ok_or_else(|| ConfigError::UnknownSchema {
                    stage: definition.name.clone(),
                    schema: name.clone(),
                })?),
                None => None,
            };

            debug!(stage = %definition.name, agent = %definition.agent, "Crew::from_yaml: resolved stage");
            stages.push(Stage {
                definition,
                role,
                validator,
            });
        }

        Ok(Self { roles, stages })
    }

    /// Load a crew from a YAML file
    pub fn load(path: &Path, schemas: &SchemaRegistry) -> Result<Self, ConfigError> {
        debug!(?path, "Crew::load: called");
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let crew = Self::from_yaml(&content, schemas)?;
        info!("Loaded crew from: {}", path.display());
        Ok(crew)
    }

    /// The embedded default planning crew
    pub fn builtin(schemas: &SchemaRegistry) -> Result<Self, ConfigError> {
        debug!("Crew::builtin: called");
        Self::from_yaml(BUILTIN_CREW, schemas)
    }

    /// Load from `path` when given, the builtin crew otherwise
    pub fn load_or_builtin(path: Option<&Path>, schemas: &SchemaRegistry) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path, schemas),
            None => Self::builtin(schemas),
        }
    }

    pub fn roles(&self) -> &RoleBook {
        &self.roles
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Last stage; a validated crew always has one
    pub fn final_stage(&self) -> Option<&Stage> {
        self.stages.last()
    }

    /// Every variable any stage references, in first-use order
    pub fn required_variables(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in self.stages.iter().flat_map(Stage::placeholders) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Check that the final stage produces the named schema
    pub fn require_final_schema(&self, schema: &str) -> Result<(), ConfigError> {
        let stage = self.final_stage().ok_or(ConfigError::NoStages)?;
        match stage.definition.output_schema.as_deref() {
            Some(name) if name == schema => Ok(()),
            _ => Err(ConfigError::FinalStageSchema {
                stage: stage.name().to_string(),
                expected: schema.to_string(),
            }),
        }
    }

    /// Number of stages each role key is assigned to
    pub fn stage_counts(&self) -> HashMap<&str, usize> {
        let mut counts = HashMap::new();
        for stage in &self.stages {
            *counts.entry(stage.definition.agent.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

fn require(owner: &str, field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyField {
            owner: owner.to_string(),
            field,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PROJECT_PLAN_SCHEMA;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
roles:
  writer:
    role: Writer
    goal: Write things
    backstory: Has written before
stages:
  - name: draft
    agent: writer
    description: Draft a note about {topic}
    expected-output: A note
"#;

    #[test]
    fn test_builtin_crew() {
        let crew = Crew::builtin(&SchemaRegistry::builtin()).unwrap();

        assert_eq!(crew.roles().len(), 3);
        let names: Vec<&str> = crew.stages().iter().map(Stage::name).collect();
        assert_eq!(
            names,
            vec!["task_breakdown", "time_resource_estimation", "resource_allocation"]
        );

        let planner = crew.roles().get("project_planning_agent").unwrap();
        assert_eq!(planner.role, "Project Planning Specialist");

        let last = crew.final_stage().unwrap();
        assert_eq!(last.definition.output_schema.as_deref(), Some(PROJECT_PLAN_SCHEMA));
        assert!(last.validator.is_some());
        assert!(crew.stages()[0].validator.is_none());
        assert!(crew.require_final_schema(PROJECT_PLAN_SCHEMA).is_ok());
    }

    #[test]
    fn test_builtin_required_variables() {
        let crew = Crew::builtin(&SchemaRegistry::builtin()).unwrap();
        let vars = crew.required_variables();

        for name in [
            "project_type",
            "industry",
            "project_objectives",
            "team_members",
            "project_requirements",
        ] {
            assert!(vars.contains(&name.to_string()), "missing {name}");
        }
        assert_eq!(vars[0], "project_type");
    }

    #[test]
    fn test_minimal_crew() {
        let crew = Crew::from_yaml(MINIMAL, &SchemaRegistry::new()).unwrap();
        assert_eq!(crew.stages().len(), 1);
        assert_eq!(crew.required_variables(), vec!["topic".to_string()]);
        assert_eq!(crew.stage_counts()["writer"], 1);
    }

    #[test]
    fn test_role_book_unknown_role() {
        let crew = Crew::from_yaml(MINIMAL, &SchemaRegistry::new()).unwrap();
        let err = crew.roles().get("editor").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownRole(ref k) if k == "editor"));
    }

    #[test]
    fn test_stage_with_unknown_role() {
        let yaml = MINIMAL.replace("agent: writer", "agent: editor");
        let err = Crew::from_yaml(&yaml, &SchemaRegistry::new()).unwrap_err();
        assert!(matches!(err, ConfigError::StageUnknownRole { ref stage, ref role } if stage == "draft" && role == "editor"));
    }

    #[test]
    fn test_unknown_schema() {
        let yaml = format!("{MINIMAL}    output-schema: invoice\n");
        let err = Crew::from_yaml(&yaml, &SchemaRegistry::builtin()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSchema { ref schema, .. } if schema == "invoice"));
    }

    #[test]
    fn test_no_stages() {
        let yaml = "roles: {}\nstages: []\n";
        let err = Crew::from_yaml(yaml, &SchemaRegistry::new()).unwrap_err();
        assert!(matches!(err, ConfigError::NoStages));
    }

    #[test]
    fn test_duplicate_stage() {
        let yaml = format!(
            "{MINIMAL}  - name: draft\n    agent: writer\n    description: Again\n    expected-output: Another note\n"
        );
        let err = Crew::from_yaml(&yaml, &SchemaRegistry::new()).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateStage(ref n) if n == "draft"));
    }

    #[test]
    fn test_blank_field() {
        let yaml = MINIMAL.replace("goal: Write things", "goal: \"  \"");
        let err = Crew::from_yaml(&yaml, &SchemaRegistry::new()).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyField { field: "goal", .. }));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = format!("{MINIMAL}extra: true\n");
        assert!(matches!(
            Crew::from_yaml(&yaml, &SchemaRegistry::new()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_misspelled_stage_key_rejected() {
        let yaml = format!("{MINIMAL}    output_schema: project-plan\n");
        let err = Crew::from_yaml(&yaml, &SchemaRegistry::builtin()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("output_schema"), "{err}");
    }

    #[test]
    fn test_misspelled_role_key_rejected() {
        let yaml = MINIMAL.replace("backstory: Has written before", "back-story: Has written before");
        assert!(matches!(
            Crew::from_yaml(&yaml, &SchemaRegistry::new()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_final_stage_schema_required() {
        let crew = Crew::from_yaml(MINIMAL, &SchemaRegistry::new()).unwrap();
        let err = crew.require_final_schema(PROJECT_PLAN_SCHEMA).unwrap_err();
        assert!(matches!(err, ConfigError::FinalStageSchema { ref stage, .. } if stage == "draft"));
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("crew.yml");
        std::fs::write(&path, MINIMAL).unwrap();

        let crew = Crew::load_or_builtin(Some(&path), &SchemaRegistry::new()).unwrap();
        assert_eq!(crew.stages()[0].name(), "draft");
    }

    #[test]
    fn test_load_missing_file() {
        let err = Crew::load(Path::new("/nonexistent/crew.yml"), &SchemaRegistry::new()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
