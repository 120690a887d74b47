//! Plan catalog
//!
//! A plan is the ordered list of phase descriptors derived from a task's
//! weight. Plans are immutable; the catalog mapping is fixed at compile time.

use serde::{Deserialize, Serialize};

use super::task::Weight;

/// Default iteration bound per phase
pub const DEFAULT_MAX_ITERATIONS: u32 = 20;

/// How a phase's completion is judged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    /// Completion marker in free text is sufficient
    #[default]
    Auto,
    /// Schema-constrained output: complete | blocked | decision_required
    Decision,
    /// Always blocks pending an explicit human resolve
    Human,
}

/// Descriptor for one phase within a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseSpec {
    /// Stable phase identifier (`implement`, `review`, ...)
    pub id: String,

    /// Display name
    pub name: String,

    /// Prompt template rendered for this phase
    pub template: String,

    /// Gate policy
    pub gate: GateMode,

    /// Iteration bound; exceeding it fails the phase
    pub max_iterations: u32,
}

impl PhaseSpec {
    fn new(id: &str, name: &str, gate: GateMode) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            template: id.to_string(),
            gate,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// Ordered phase list for one weight class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub weight: Weight,
    pub phases: Vec<PhaseSpec>,
}

impl Plan {
    /// Derive the plan for a weight. The mapping is fixed:
    /// trivial runs a bare implement phase, small adds a test phase,
    /// medium runs the full spec-to-docs sequence, and large/greenfield
    /// bracket it with design/validate/finalize.
    pub fn for_weight(weight: Weight) -> Self {
        let phases = match weight {
            Weight::Trivial => vec![PhaseSpec::new("implement", "Implement", GateMode::Auto)],
            Weight::Small => vec![
                PhaseSpec::new("implement", "Implement", GateMode::Auto),
                PhaseSpec::new("test", "Test", GateMode::Auto),
            ],
            Weight::Medium => Self::medium_phases(),
            Weight::Large | Weight::Greenfield => {
                let mut phases = vec![PhaseSpec::new("design", "Design", GateMode::Decision)];
                phases.extend(Self::medium_phases());
                let docs_pos = phases.iter().position(|p| p.id == "docs").unwrap_or(phases.len());
                phases.insert(docs_pos, PhaseSpec::new("validate", "Validate", GateMode::Auto));
                phases.push(PhaseSpec::new("finalize", "Finalize", GateMode::Human));
                phases
            }
        };
        Self { weight, phases }
    }

    fn medium_phases() -> Vec<PhaseSpec> {
        vec![
            PhaseSpec::new("spec", "Specify", GateMode::Decision),
            PhaseSpec::new("tdd_write", "Write Tests", GateMode::Auto),
            PhaseSpec::new("implement", "Implement", GateMode::Auto),
            PhaseSpec::new("review", "Review", GateMode::Auto),
            PhaseSpec::new("docs", "Document", GateMode::Auto),
        ]
    }

    /// Find a phase descriptor by id
    pub fn phase(&self, id: &str) -> Option<&PhaseSpec> {
        self.phases.iter().find(|p| p.id == id)
    }

    /// Position of a phase within the plan
    pub fn position(&self, id: &str) -> Option<usize> {
        self.phases.iter().position(|p| p.id == id)
    }
}
