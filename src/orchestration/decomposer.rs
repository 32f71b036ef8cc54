//! Objective decomposition into validated task graphs.
//!
//! Decomposition is pure and deterministic: the same objective and
//! strategy always expand to the same task names, capability tags, and
//! dependency edges. Built-in strategies cover research, development, and
//! analysis shapes; user-supplied templates describe arbitrary DAGs by
//! task name. Validation rejects empty objectives and cyclic templates.

use crate::core::graph::TaskGraph;
use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A task entry in a user-supplied decomposition template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateTask {
    /// Task name, unique within the template.
    pub name: String,
    /// Task description; `{objective}` is replaced with the objective.
    pub description: String,
    /// Required capability tags.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Names of template tasks this one depends on.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Scheduling priority.
    #[serde(default)]
    pub priority: i32,
    /// Whether dispatch is gated on consensus.
    #[serde(default)]
    pub requires_consensus: bool,
    /// Whether failure is tolerated without cascading.
    #[serde(default)]
    pub optional: bool,
}

/// A named set of template tasks forming a DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    /// Template name, for logs and persistence.
    pub name: String,
    /// The tasks, in declaration order.
    pub tasks: Vec<TemplateTask>,
}

/// Decomposition strategy for an objective.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    /// Scope, gather evidence along two tracks, synthesize, report.
    Research,
    /// Design, implement (optionally fanned out per component), test,
    /// document.
    Development {
        /// Component names to fan the implement stage out over. Empty
        /// keeps the single linear chain.
        #[serde(default)]
        components: Vec<String>,
    },
    /// Collect, evaluate, summarize.
    Analysis,
    /// A user-supplied template.
    Custom {
        /// The template describing the task DAG.
        template: Template,
    },
}

impl Strategy {
    /// Convenience constructor for the linear development chain.
    pub fn development() -> Self {
        Strategy::Development {
            components: Vec::new(),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Research => write!(f, "research"),
            Strategy::Development { .. } => write!(f, "development"),
            Strategy::Analysis => write!(f, "analysis"),
            Strategy::Custom { template } => write!(f, "custom:{}", template.name),
        }
    }
}

fn development_template(components: &[String]) -> Template {
    let mut tasks = vec![TemplateTask {
        name: "design".to_string(),
        description: "Design the solution for: {objective}".to_string(),
        capabilities: vec!["design".to_string()],
        depends_on: Vec::new(),
        priority: 3,
        requires_consensus: false,
        optional: false,
    }];

    let implement_names: Vec<String> = if components.is_empty() {
        vec!["implement".to_string()]
    } else {
        components
            .iter()
            .map(|c| format!("implement-{}", c))
            .collect()
    };
    for name in &implement_names {
        tasks.push(TemplateTask {
            name: name.clone(),
            description: "Implement {objective}".to_string(),
            capabilities: vec!["code".to_string()],
            depends_on: vec!["design".to_string()],
            priority: 2,
            requires_consensus: false,
            optional: false,
        });
    }

    tasks.push(TemplateTask {
        name: "test".to_string(),
        description: "Test the implementation of: {objective}".to_string(),
        capabilities: vec!["test".to_string()],
        depends_on: implement_names,
        priority: 1,
        requires_consensus: false,
        optional: false,
    });
    tasks.push(TemplateTask {
        name: "document".to_string(),
        description: "Document: {objective}".to_string(),
        capabilities: vec!["docs".to_string()],
        depends_on: vec!["test".to_string()],
        priority: 0,
        requires_consensus: false,
        optional: false,
    });

    Template {
        name: "development".to_string(),
        tasks,
    }
}

fn research_template() -> Template {
    let t = |name: &str, description: &str, caps: &[&str], deps: &[&str], priority: i32| {
        TemplateTask {
            name: name.to_string(),
            description: description.to_string(),
            capabilities: caps.iter().map(|c| c.to_string()).collect(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            priority,
            requires_consensus: false,
            optional: false,
        }
    };
    Template {
        name: "research".to_string(),
        tasks: vec![
            t("scope", "Scope the question: {objective}", &["research"], &[], 3),
            t("gather", "Gather primary sources for: {objective}", &["research"], &["scope"], 2),
            t("survey", "Survey prior work on: {objective}", &["research"], &["scope"], 2),
            t(
                "synthesize",
                "Synthesize findings for: {objective}",
                &["analysis"],
                &["gather", "survey"],
                1,
            ),
            t("report", "Write up: {objective}", &["docs"], &["synthesize"], 0),
        ],
    }
}

fn analysis_template() -> Template {
    let t = |name: &str, description: &str, caps: &[&str], deps: &[&str], priority: i32| {
        TemplateTask {
            name: name.to_string(),
            description: description.to_string(),
            capabilities: caps.iter().map(|c| c.to_string()).collect(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            priority,
            requires_consensus: false,
            optional: false,
        }
    };
    Template {
        name: "analysis".to_string(),
        tasks: vec![
            t("collect", "Collect inputs for: {objective}", &["analysis"], &[], 2),
            t("evaluate", "Evaluate: {objective}", &["analysis"], &["collect"], 1),
            t("summarize", "Summarize findings for: {objective}", &["docs"], &["evaluate"], 0),
        ],
    }
}

/// Expand an objective with a strategy into a validated task graph.
///
/// Fails with `EmptyObjective` when the objective is blank, with
/// `UnknownTemplateTask` when a template dependency names a missing task,
/// and with `GraphCycle` when template edges form a cycle. No side
/// effects: the returned graph is the only output.
pub fn decompose(objective: &str, strategy: &Strategy) -> Result<TaskGraph> {
    let objective = objective.trim();
    if objective.is_empty() {
        return Err(Error::EmptyObjective);
    }

    let template = match strategy {
        Strategy::Research => research_template(),
        Strategy::Development { components } => development_template(components),
        Strategy::Analysis => analysis_template(),
        Strategy::Custom { template } => template.clone(),
    };
    if template.tasks.is_empty() {
        return Err(Error::EmptyObjective);
    }

    let mut graph = TaskGraph::new();
    let mut ids_by_name: HashMap<String, TaskId> = HashMap::new();

    for entry in &template.tasks {
        let description = entry.description.replace("{objective}", objective);
        let mut task = Task::new(&entry.name, &description).with_priority(entry.priority);
        for cap in &entry.capabilities {
            task = task.with_capability(cap.as_str());
        }
        if entry.requires_consensus {
            task = task.with_consensus();
        }
        if entry.optional {
            task = task.with_optional();
        }
        ids_by_name.insert(entry.name.clone(), task.id);
        graph.add_task(task);
    }

    for entry in &template.tasks {
        let to = ids_by_name[&entry.name];
        for dep_name in &entry.depends_on {
            let from = *ids_by_name
                .get(dep_name)
                .ok_or_else(|| Error::UnknownTemplateTask {
                    name: dep_name.clone(),
                })?;
            graph.add_dependency(&from, &to)?;
        }
    }

    Ok(graph)
}
