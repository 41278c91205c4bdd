// Workflow template domain types and the template provider
//
// A template is a named, versioned step graph for one plan tier. Built-in
// definitions are embedded YAML, validated at load, synced to the store at
// startup and then served read-only through an injected TemplateProvider.
// Decision: Runs reference a template by id; templates are never consulted to rewrite jobs

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

const BUILTIN_TEMPLATES: &str = include_str!("../templates/campaign_workflows.yaml");

/// Errors in template definitions or payload template rendering
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template {0} has no steps")]
    Empty(String),

    #[error("template {slug}: duplicate step id {step}")]
    DuplicateStep { slug: String, step: String },

    #[error("template {slug}: step {step} must name a queue and a job")]
    InvalidStep { slug: String, step: String },

    #[error("template {slug}: step {step} depends on unknown step {dependency}")]
    UnknownDependency {
        slug: String,
        step: String,
        dependency: String,
    },

    #[error("template {slug}: dependency cycle through step {step}")]
    Cycle { slug: String, step: String },

    #[error("duplicate template slug: {0}")]
    DuplicateSlug(String),

    #[error("failed to parse template definitions: {0}")]
    Parse(String),

    #[error("failed to render payload template: {0}")]
    Render(String),
}

/// One node of a template's step graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Step {
    /// Unique within the template.
    pub id: String,
    /// Queue the step's job is delivered on.
    pub queue: String,
    /// Job name routed to a handler on that queue.
    pub job: String,
    /// Step ids that must complete before this step is dispatched.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Payload template rendered against the run context.
    #[serde(default = "empty_object")]
    pub payload: serde_json::Value,
    /// Whether a failure of this step is tolerated by the run.
    #[serde(default)]
    pub continue_on_fail: bool,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

fn default_true() -> bool {
    true
}

fn default_version() -> i32 {
    1
}

/// Named, versioned step-graph definition for a plan tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct WorkflowTemplate {
    /// Store-assigned id (nil until synced).
    #[serde(default)]
    pub id: Uuid,
    /// Unique slug.
    pub slug: String,
    /// Display name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Plan tier this template applies to.
    pub plan: String,
    /// Campaign types this template is specific to. Empty means any.
    #[serde(default)]
    pub campaign_types: Vec<String>,
    /// Bumped by the store whenever the definition changes.
    #[serde(default = "default_version")]
    pub version: i32,
    /// Ordered step list.
    pub steps: Vec<Step>,
    #[serde(default = "empty_object")]
    pub metadata: serde_json::Value,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl WorkflowTemplate {
    /// Check the step graph: non-empty, unique ids, known dependencies, acyclic.
    pub fn validate(&self) -> Result<(), TemplateError> {
        if self.steps.is_empty() {
            return Err(TemplateError::Empty(self.slug.clone()));
        }

        let mut ids = HashSet::new();
        for step in &self.steps {
            if step.queue.trim().is_empty() || step.job.trim().is_empty() {
                return Err(TemplateError::InvalidStep {
                    slug: self.slug.clone(),
                    step: step.id.clone(),
                });
            }
            if !ids.insert(step.id.as_str()) {
                return Err(TemplateError::DuplicateStep {
                    slug: self.slug.clone(),
                    step: step.id.clone(),
                });
            }
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if dep == &step.id {
                    return Err(TemplateError::Cycle {
                        slug: self.slug.clone(),
                        step: step.id.clone(),
                    });
                }
                if !ids.contains(dep.as_str()) {
                    return Err(TemplateError::UnknownDependency {
                        slug: self.slug.clone(),
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let graph: HashMap<&str, &[String]> = self
            .steps
            .iter()
            .map(|s| (s.id.as_str(), s.depends_on.as_slice()))
            .collect();
        let mut visited = HashSet::new();
        let mut stack = HashSet::new();
        for step in &self.steps {
            if has_cycle(step.id.as_str(), &graph, &mut visited, &mut stack) {
                return Err(TemplateError::Cycle {
                    slug: self.slug.clone(),
                    step: step.id.clone(),
                });
            }
        }

        Ok(())
    }

    /// Whether two definitions describe the same graph, ignoring id and version.
    pub fn same_definition(&self, other: &WorkflowTemplate) -> bool {
        self.slug == other.slug
            && self.name == other.name
            && self.description == other.description
            && self.plan == other.plan
            && self.campaign_types == other.campaign_types
            && self.steps == other.steps
            && self.metadata == other.metadata
            && self.is_active == other.is_active
    }

    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    fn matches_campaign_type(&self, campaign_type: Option<&str>) -> bool {
        match campaign_type {
            Some(ct) => self
                .campaign_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(ct)),
            None => false,
        }
    }
}

fn has_cycle<'a>(
    node: &'a str,
    graph: &HashMap<&'a str, &'a [String]>,
    visited: &mut HashSet<&'a str>,
    stack: &mut HashSet<&'a str>,
) -> bool {
    if stack.contains(node) {
        return true;
    }
    if !visited.insert(node) {
        return false;
    }
    stack.insert(node);
    if let Some(deps) = graph.get(node) {
        for dep in deps.iter() {
            if has_cycle(dep.as_str(), graph, visited, stack) {
                return true;
            }
        }
    }
    stack.remove(node);
    false
}

/// Parse and validate a YAML list of template definitions.
pub fn parse_templates(yaml: &str) -> Result<Vec<WorkflowTemplate>, TemplateError> {
    let templates: Vec<WorkflowTemplate> =
        serde_yaml::from_str(yaml).map_err(|e| TemplateError::Parse(e.to_string()))?;

    let mut slugs = HashSet::new();
    for template in &templates {
        if !slugs.insert(template.slug.clone()) {
            return Err(TemplateError::DuplicateSlug(template.slug.clone()));
        }
        template.validate()?;
    }
    Ok(templates)
}

/// The static definition set shipped with the binary.
pub fn builtin_templates() -> Result<Vec<WorkflowTemplate>, TemplateError> {
    parse_templates(BUILTIN_TEMPLATES)
}

// ============================================================================
// TemplateProvider
// ============================================================================

/// Read-only access to the active template set.
///
/// Implementations must be safe to share across workers. `generation` increases
/// every time the served set is replaced.
pub trait TemplateProvider: Send + Sync {
    /// Best template for a plan tier and campaign type.
    fn resolve(&self, plan: &str, campaign_type: Option<&str>) -> Option<Arc<WorkflowTemplate>>;

    fn get(&self, template_id: Uuid) -> Option<Arc<WorkflowTemplate>>;

    fn get_by_slug(&self, slug: &str) -> Option<Arc<WorkflowTemplate>>;

    /// All templates, ordered by slug.
    fn list(&self) -> Vec<Arc<WorkflowTemplate>>;

    fn generation(&self) -> u64;
}

#[derive(Default)]
struct TemplateSet {
    generation: u64,
    by_slug: HashMap<String, Arc<WorkflowTemplate>>,
    by_id: HashMap<Uuid, Arc<WorkflowTemplate>>,
}

impl TemplateSet {
    fn build(generation: u64, templates: Vec<WorkflowTemplate>) -> Result<Self, TemplateError> {
        let mut set = TemplateSet {
            generation,
            ..Default::default()
        };
        for template in templates {
            template.validate()?;
            let template = Arc::new(template);
            if set
                .by_slug
                .insert(template.slug.clone(), Arc::clone(&template))
                .is_some()
            {
                return Err(TemplateError::DuplicateSlug(template.slug.clone()));
            }
            set.by_id.insert(template.id, template);
        }
        Ok(set)
    }
}

/// In-process template provider with an atomic reload.
pub struct TemplateRegistry {
    current: RwLock<Arc<TemplateSet>>,
}

impl TemplateRegistry {
    pub fn new(templates: Vec<WorkflowTemplate>) -> Result<Self, TemplateError> {
        Ok(Self {
            current: RwLock::new(Arc::new(TemplateSet::build(1, templates)?)),
        })
    }

    /// Replace the served set. The new set is fully validated before the swap;
    /// on error the previous set stays in place.
    pub fn reload(&self, templates: Vec<WorkflowTemplate>) -> Result<u64, TemplateError> {
        let mut current = self.current.write();
        let next = TemplateSet::build(current.generation + 1, templates)?;
        let generation = next.generation;
        *current = Arc::new(next);
        tracing::info!(generation, "workflow templates reloaded");
        Ok(generation)
    }

    fn snapshot(&self) -> Arc<TemplateSet> {
        Arc::clone(&self.current.read())
    }
}

impl TemplateProvider for TemplateRegistry {
    fn resolve(&self, plan: &str, campaign_type: Option<&str>) -> Option<Arc<WorkflowTemplate>> {
        let set = self.snapshot();
        let mut candidates: Vec<&Arc<WorkflowTemplate>> = set
            .by_slug
            .values()
            .filter(|t| t.is_active && t.plan.eq_ignore_ascii_case(plan))
            .filter(|t| t.campaign_types.is_empty() || t.matches_campaign_type(campaign_type))
            .collect();

        candidates.sort_by(|a, b| {
            b.matches_campaign_type(campaign_type)
                .cmp(&a.matches_campaign_type(campaign_type))
                .then(b.version.cmp(&a.version))
                .then(a.slug.cmp(&b.slug))
        });
        candidates.first().map(|t| Arc::clone(t))
    }

    fn get(&self, template_id: Uuid) -> Option<Arc<WorkflowTemplate>> {
        self.snapshot().by_id.get(&template_id).cloned()
    }

    fn get_by_slug(&self, slug: &str) -> Option<Arc<WorkflowTemplate>> {
        self.snapshot().by_slug.get(slug).cloned()
    }

    fn list(&self) -> Vec<Arc<WorkflowTemplate>> {
        let set = self.snapshot();
        let mut templates: Vec<_> = set.by_slug.values().cloned().collect();
        templates.sort_by(|a, b| a.slug.cmp(&b.slug));
        templates
    }

    fn generation(&self) -> u64 {
        self.snapshot().generation
    }
}
