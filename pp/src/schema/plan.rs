//! Project plan contract: tasks with estimates and milestones referencing them.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use super::{OutputValidator, ROOT_PATH, SchemaValidationError, Violation, type_name};

/// Registry name of the project plan schema
pub const PROJECT_PLAN_SCHEMA: &str = "project-plan";

/// One unit of work with its estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEstimate {
    pub task_name: String,
    pub estimated_time_hours: f64,
    pub required_resources: Vec<String>,
}

/// A checkpoint grouping tasks by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub milestone_name: String,
    pub tasks: Vec<String>,
}

/// Validated result of a planning run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectPlan {
    pub tasks: Vec<TaskEstimate>,
    pub milestones: Vec<Milestone>,
}

impl ProjectPlan {
    /// Decode and validate a plan from a JSON value
    ///
    /// Shape errors are reported before rule errors, each with the path of
    /// the first offending field.
    pub fn from_value(value: &Value) -> Result<Self, SchemaValidationError> {
        check_shape(value)?;
        let plan: ProjectPlan = serde_json::from_value(value.clone())
            .map_err(|e| SchemaValidationError::new(ROOT_PATH, Violation::NotJson(e.to_string())))?;
        plan.check_rules()?;
        Ok(plan)
    }

    /// Hours across every task
    pub fn total_hours(&self) -> f64 {
        self.tasks.iter().map(|t| t.estimated_time_hours).sum()
    }

    pub fn task(&self, name: &str) -> Option<&TaskEstimate> {
        self.tasks.iter().find(|t| t.task_name == name)
    }

    /// Positive estimates, unique task names, and milestone references that resolve
    fn check_rules(&self) -> Result<(), SchemaValidationError> {
        let mut names = HashSet::new();
        for (i, task) in self.tasks.iter().enumerate() {
            if task.estimated_time_hours.is_nan() || task.estimated_time_hours <= 0.0 {
                return Err(SchemaValidationError::new(
                    format!("tasks[{i}].estimated_time_hours"),
                    Violation::NotPositive(task.estimated_time_hours),
                ));
            }
            if !names.insert(task.task_name.as_str()) {
                return Err(SchemaValidationError::new(
                    format!("tasks[{i}].task_name"),
                    Violation::DuplicateTaskName(task.task_name.clone()),
                ));
            }
        }

        for (m, milestone) in self.milestones.iter().enumerate() {
            for (t, task_ref) in milestone.tasks.iter().enumerate() {
                if !names.contains(task_ref.as_str()) {
                    debug!(milestone = %milestone.milestone_name, %task_ref, "check_rules: dangling reference");
                    return Err(SchemaValidationError::new(
                        format!("milestones[{m}].tasks[{t}]"),
                        Violation::DanglingReference(task_ref.clone()),
                    ));
                }
            }
        }

        Ok(())
    }
}

impl TryFrom<&Value> for ProjectPlan {
    type Error = SchemaValidationError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

/// Validator for [`ProjectPlan`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectPlanSchema;

impl OutputValidator for ProjectPlanSchema {
    fn name(&self) -> &str {
        PROJECT_PLAN_SCHEMA
    }

    fn description(&self) -> &str {
        "Project plan with estimated tasks and milestones that reference tasks by name"
    }

    fn json_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "tasks": {
                    "type": "array",
                    "description": "List of tasks with their estimates",
                    "items": {
                        "type": "object",
                        "properties": {
                            "task_name": {
                                "type": "string",
                                "description": "Name of the task"
                            },
                            "estimated_time_hours": {
                                "type": "number",
                                "exclusiveMinimum": 0,
                                "description": "Estimated time to complete the task in hours"
                            },
                            "required_resources": {
                                "type": "array",
                                "items": { "type": "string" },
                                "description": "List of resources required to complete the task"
                            }
                        },
                        "required": ["task_name", "estimated_time_hours", "required_resources"],
                        "additionalProperties": false
                    }
                },
                "milestones": {
                    "type": "array",
                    "description": "List of project milestones",
                    "items": {
                        "type": "object",
                        "properties": {
                            "milestone_name": {
                                "type": "string",
                                "description": "Name of the milestone"
                            },
                            "tasks": {
                                "type": "array",
                                "items": { "type": "string" },
                                "description": "Names of the tasks associated with this milestone"
                            }
                        },
                        "required": ["milestone_name", "tasks"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["tasks", "milestones"],
            "additionalProperties": false
        })
    }

    fn validate(&self, value: &Value) -> Result<(), SchemaValidationError> {
        ProjectPlan::from_value(value).map(|_| ())
    }
}

// Shape checks. serde's own errors carry no field path, so the structure is
// walked by hand first.

fn check_shape(value: &Value) -> Result<(), SchemaValidationError> {
    let root = as_object(value, ROOT_PATH)?;

    let tasks = as_array(field(root, "tasks", "tasks")?, "tasks")?;
    for (i, task) in tasks.iter().enumerate() {
        let path = format!("tasks[{i}]");
        let obj = as_object(task, &path)?;
        as_string(field(obj, "task_name", &format!("{path}.task_name"))?, &format!("{path}.task_name"))?;
        as_number(
            field(obj, "estimated_time_hours", &format!("{path}.estimated_time_hours"))?,
            &format!("{path}.estimated_time_hours"),
        )?;
        string_array(obj, "required_resources", &path)?;
    }

    let milestones = as_array(field(root, "milestones", "milestones")?, "milestones")?;
    for (i, milestone) in milestones.iter().enumerate() {
        let path = format!("milestones[{i}]");
        let obj = as_object(milestone, &path)?;
        as_string(
            field(obj, "milestone_name", &format!("{path}.milestone_name"))?,
            &format!("{path}.milestone_name"),
        )?;
        string_array(obj, "tasks", &path)?;
    }

    Ok(())
}

fn field<'a>(obj: &'a Map<String, Value>, key: &str, path: &str) -> Result<&'a Value, SchemaValidationError> {
    match obj.get(key) {
        Some(Value::Null) | None => Err(SchemaValidationError::new(path, Violation::Missing)),
        Some(v) => Ok(v),
    }
}

fn string_array(obj: &Map<String, Value>, key: &str, parent: &str) -> Result<(), SchemaValidationError> {
    let path = format!("{parent}.{key}");
    let items = as_array(field(obj, key, &path)?, &path)?;
    for (j, item) in items.iter().enumerate() {
        as_string(item, &format!("{path}[{j}]"))?;
    }
    Ok(())
}

fn wrong_type(path: &str, expected: &'static str, found: &Value) -> SchemaValidationError {
    SchemaValidationError::new(
        path,
        Violation::WrongType {
            expected,
            found: type_name(found),
        },
    )
}

fn as_object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>, SchemaValidationError> {
    value.as_object().ok_or_else(|| wrong_type(path, "object", value))
}

fn as_array<'a>(value: &'a Value, path: &str) -> Result<&'a Vec<Value>, SchemaValidationError> {
    value.as_array().ok_or_else(|| wrong_type(path, "array", value))
}

fn as_string<'a>(value: &'a Value, path: &str) -> Result<&'a str, SchemaValidationError> {
    value.as_str().ok_or_else(|| wrong_type(path, "string", value))
}

fn as_number(value: &Value, path: &str) -> Result<f64, SchemaValidationError> {
    value.as_f64().ok_or_else(|| wrong_type(path, "number", value))
}
