//! Embedded default prompt templates
//!
//! Compiled-in fallbacks for every phase template. A project can override
//! any of them by dropping `<name>.hbs` into its prompt directory.

/// Template names paired with their embedded sources
pub const TEMPLATES: &[(&str, &str)] = &[
    ("classify", CLASSIFY),
    ("design", DESIGN),
    ("spec", SPEC),
    ("tdd_write", TDD_WRITE),
    ("implement", IMPLEMENT),
    ("test", TEST),
    ("review", REVIEW),
    ("validate", VALIDATE),
    ("docs", DOCS),
    ("finalize", FINALIZE),
    ("continuation", CONTINUATION),
];

/// Look up an embedded template by name
pub fn get(name: &str) -> Option<&'static str> {
    TEMPLATES.iter().find(|(n, _)| *n == name).map(|(_, t)| *t)
}

const COMPLETION_FOOTER: &str = r#"
When the phase is fully done, emit exactly:
<phase_complete>true</phase_complete>

If you cannot proceed, emit exactly:
<phase_blocked>reason: <one line explaining why></phase_blocked>
"#;

const CLASSIFY: &str = r#"Classify the weight of this development task.

Task: {{title}}
Description: {{description}}

Weights: trivial (one small edit), small (a focused change plus tests),
medium (a feature needing spec, tests, implementation, review and docs),
large (multi-module feature), greenfield (new project or subsystem).
"#;

const DESIGN: &str = r#"You are working on task {{task_id}}: {{title}}.

{{description}}

Produce a design for this work: affected modules, data flow, and the
riskiest decision. Write it to DESIGN notes in the repository.
{{#if retry_context}}
Context from a prior attempt or resolved decision: {{retry_context}}
{{/if}}
"#;

const SPEC: &str = r#"You are working on task {{task_id}}: {{title}}.

{{description}}

Write a concise specification of the change: behavior, edge cases, and
acceptance criteria. Ask for a decision if requirements are ambiguous.
{{#if retry_context}}
Context from a prior attempt or resolved decision: {{retry_context}}
{{/if}}
"#;

const TDD_WRITE: &str = r#"You are working on task {{task_id}}: {{title}}.

Write failing tests that capture the specified behavior before any
implementation. Do not modify non-test code in this phase.
{{#if retry_context}}
Context: {{retry_context}}
{{/if}}
"#;

const IMPLEMENT: &str = r#"You are working on task {{task_id}}: {{title}}.

{{description}}

Implement the change in the current working directory. Keep commits
focused; the engine commits for you at the end of the phase.
{{#if retry_context}}
Context from a prior attempt or resolved decision: {{retry_context}}
{{/if}}
"#;

const TEST: &str = r#"You are working on task {{task_id}}: {{title}}.

Add or extend tests covering the change you just made, and make the full
suite pass.
{{#if retry_context}}
Context: {{retry_context}}
{{/if}}
"#;

const REVIEW: &str = r#"You are reviewing the changes made for task {{task_id}}: {{title}}.

Inspect the diff for correctness bugs, missed edge cases, and style
drift. Fix what you find.
{{#if retry_context}}
Context: {{retry_context}}
{{/if}}
"#;

const VALIDATE: &str = r#"You are validating task {{task_id}}: {{title}}.

Run the project's build and test commands and fix any failures.
{{#if retry_context}}
Context: {{retry_context}}
{{/if}}
"#;

const DOCS: &str = r#"You are documenting task {{task_id}}: {{title}}.

Update user-facing and inline documentation affected by this change.
{{#if retry_context}}
Context: {{retry_context}}
{{/if}}
"#;

const FINALIZE: &str = r#"You are finalizing task {{task_id}}: {{title}}.

Summarize the change, confirm the branch is clean, and flag anything a
human must check before merge.
{{#if retry_context}}
Context: {{retry_context}}
{{/if}}
"#;

const CONTINUATION: &str = r#"Your previous response ended without a terminal marker.
Continue the {{phase}} phase for task {{task_id}}. If the work is already
done, emit <phase_complete>true</phase_complete>; if you are stuck, emit
<phase_blocked>reason: ...</phase_blocked>.
"#;

/// Footer appended to phase prompts whose gate relies on text markers
pub fn completion_footer() -> &'static str {
    COMPLETION_FOOTER
}
