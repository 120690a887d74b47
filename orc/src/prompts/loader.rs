//! Prompt loader
//!
//! Renders phase prompts from Handlebars templates. Templates come from the
//! project's prompt directory when present, otherwise from the embedded
//! defaults.

use std::path::PathBuf;

use eyre::{Context, Result, eyre};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use super::embedded;
use crate::domain::{GateMode, PhaseSpec, Task};

/// Variables available to every phase template
#[derive(Debug, Clone, Serialize, Default)]
pub struct PromptContext {
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub weight: Option<String>,
    pub target_branch: String,
    pub phase: String,
    pub phase_name: String,
    pub iteration: u32,
    /// Retry context: prior failure diagnostics or a resolved decision answer
    pub retry_context: Option<String>,
}

impl PromptContext {
    /// Build the context for one phase of one task
    pub fn for_phase(task: &Task, phase: &PhaseSpec, iteration: u32, retry_context: Option<String>) -> Self {
        Self {
            task_id: task.id.to_string(),
            title: task.title.clone(),
            description: task.description.clone(),
            weight: task.weight.map(|w| w.to_string()),
            target_branch: task.target_branch.clone(),
            phase: phase.id.clone(),
            phase_name: phase.name.clone(),
            iteration,
            retry_context,
        }
    }

    /// Context for task-level templates (classification)
    pub fn for_task(task: &Task) -> Self {
        Self {
            task_id: task.id.to_string(),
            title: task.title.clone(),
            description: task.description.clone(),
            weight: task.weight.map(|w| w.to_string()),
            target_branch: task.target_branch.clone(),
            ..Default::default()
        }
    }
}

/// Loads and renders prompt templates
pub struct PromptLoader {
    handlebars: Handlebars<'static>,
    override_dir: Option<PathBuf>,
}

impl PromptLoader {
    /// Build a loader with the embedded templates registered
    pub fn new(override_dir: Option<PathBuf>) -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);

        for (name, source) in embedded::TEMPLATES {
            handlebars
                .register_template_string(name, source)
                .context(format!("Failed to register embedded template '{}'", name))?;
        }

        Ok(Self {
            handlebars,
            override_dir,
        })
    }

    /// Render a template by name
    pub fn render(&self, name: &str, context: &PromptContext) -> Result<String> {
        if let Some(dir) = &self.override_dir {
            let path = dir.join(format!("{}.hbs", name));
            if path.exists() {
                debug!(template = name, path = %path.display(), "Rendering override template");
                let source = std::fs::read_to_string(&path)
                    .context(format!("Failed to read template override {}", path.display()))?;
                let mut hb = Handlebars::new();
                hb.register_escape_fn(handlebars::no_escape);
                return hb
                    .render_template(&source, context)
                    .context(format!("Failed to render template override '{}'", name));
            }
        }

        if !self.handlebars.has_template(name) {
            return Err(eyre!("Unknown prompt template '{}'", name));
        }
        self.handlebars
            .render(name, context)
            .context(format!("Failed to render template '{}'", name))
    }

    /// Render the full prompt for a phase: the phase template, plus the
    /// marker footer for phases judged on text markers.
    pub fn render_phase(&self, phase: &PhaseSpec, context: &PromptContext) -> Result<String> {
        let mut prompt = self.render(&phase.template, context)?;
        if phase.gate == GateMode::Auto {
            prompt.push_str(embedded::completion_footer());
        }
        Ok(prompt)
    }

    /// Render the continuation prompt sent when a response ends without a
    /// terminal marker.
    pub fn render_continuation(&self, context: &PromptContext) -> Result<String> {
        self.render("continuation", context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Plan, TaskId, Weight};

    fn context() -> PromptContext {
        let task = Task::new(TaskId::from_seq(1), "Fix login", "the login page 500s", "main");
        let plan = Plan::for_weight(Weight::Trivial);
        PromptContext::for_phase(&task, &plan.phases[0], 1, None)
    }

    #[test]
    fn test_render_implement() {
        let loader = PromptLoader::new(None).unwrap();
        let prompt = loader.render("implement", &context()).unwrap();
        assert!(prompt.contains("TASK-0001"));
        assert!(prompt.contains("Fix login"));
        assert!(prompt.contains("the login page 500s"));
    }

    #[test]
    fn test_render_phase_appends_marker_footer_for_auto() {
        let loader = PromptLoader::new(None).unwrap();
        let task = Task::new(TaskId::from_seq(1), "t", "d", "main");
        let plan = Plan::for_weight(Weight::Trivial);
        let ctx = PromptContext::for_phase(&task, &plan.phases[0], 1, None);

        let prompt = loader.render_phase(&plan.phases[0], &ctx).unwrap();
        assert!(prompt.contains("<phase_complete>true</phase_complete>"));
    }

    #[test]
    fn test_decision_gate_phase_has_no_marker_footer() {
        let loader = PromptLoader::new(None).unwrap();
        let task = Task::new(TaskId::from_seq(1), "t", "d", "main");
        let plan = Plan::for_weight(Weight::Medium);
        let spec_phase = plan.phase("spec").unwrap();
        let ctx = PromptContext::for_phase(&task, spec_phase, 1, None);

        let prompt = loader.render_phase(spec_phase, &ctx).unwrap();
        assert!(!prompt.contains("<phase_complete>"));
    }

    #[test]
    fn test_retry_context_is_injected() {
        let loader = PromptLoader::new(None).unwrap();
        let mut ctx = context();
        ctx.retry_context = Some("Use X".to_string());

        let prompt = loader.render("implement", &ctx).unwrap();
        assert!(prompt.contains("Use X"));
    }

    #[test]
    fn test_override_directory_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("implement.hbs"), "custom for {{task_id}}").unwrap();

        let loader = PromptLoader::new(Some(dir.path().to_path_buf())).unwrap();
        let prompt = loader.render("implement", &context()).unwrap();
        assert_eq!(prompt, "custom for TASK-0001");
    }

    #[test]
    fn test_unknown_template_errors() {
        let loader = PromptLoader::new(None).unwrap();
        assert!(loader.render("does-not-exist", &context()).is_err());
    }

    #[test]
    fn test_continuation_prompt() {
        let loader = PromptLoader::new(None).unwrap();
        let prompt = loader.render_continuation(&context()).unwrap();
        assert!(prompt.contains("phase_complete"));
        assert!(prompt.contains("implement"));
    }
}
