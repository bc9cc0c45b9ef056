//! Role system prompts and stage instructions
//!
//! Paths in the instructions are relative to the worker's sandbox, which is
//! the stage's subdirectory of the workflow working directory.

use super::deps::Role;
use minijinja::{Environment, UndefinedBehavior, context};

const RESEARCHER_SYSTEM: &str = "\
You are a professional researcher. Your job is to study the requested topic \
and turn it into a structured outline for a writer.

Workflow:
1. Understand the topic and the requirements.
2. Look through the working directory for relevant material, if any exists.
3. Design a sensible structure: a title, the sections, the key points of each \
section and an approximate word budget per section.
4. Save the outline with your file-writing tool.

You must perform every file operation with your tools. Describing a tool call \
in text does not execute it, and the task is incomplete until the file exists.";

const WRITER_SYSTEM: &str = "\
You are a professional writer. Your job is to turn an outline into a complete, \
well-structured article.

Workflow:
1. Read the outline first.
2. Write each section in turn: keep the argument coherent, the content \
substantial and the language fluent, and respect the word budget.
3. Save the draft with your file-writing tool.

When you need to read or save a file, call the tool directly. Do not reply \
with JSON or a description of how the tool would be used.";

const EDITOR_SYSTEM: &str = "\
You are a professional editor. Your job is to proofread and polish a draft \
into a publishable final document.

Workflow:
1. Read the draft first.
2. Review grammar and spelling, logical flow, phrasing, transitions between \
paragraphs and punctuation.
3. Make the necessary corrections and improvements.
4. Save the final document with your file-writing tool.

When you need to read or save a file, call the tool directly. Do not reply \
with JSON or a description of how the tool would be used.";

const RESEARCH_INSTRUCTION: &str = "\
Produce a detailed writing outline for the following topic.

Topic: {{ topic }}
{% if requirements %}Requirements: {{ requirements }}
{% endif %}
Save the outline as {{ output }} using your file-writing tool.";

const WRITING_INSTRUCTION: &str = "\
Write the complete article based on the outline.

First read {{ input }} to get the outline, then write the content section by \
section following it, and finally save the draft as {{ output }} using your \
file-writing tool.";

const EDITING_INSTRUCTION: &str = "\
Review the draft and produce the final document.

Steps:
1. Read {{ input }} to get the draft.
2. Review it thoroughly (grammar, logic, phrasing, transitions, punctuation).
3. Make the necessary corrections and improvements.
4. Save the final document as {{ output }}.

You must save the file with your file-writing tool, otherwise the task cannot \
be completed.";

/// System prompt given to a role's worker on every call
pub fn system_prompt(role: Role) -> &'static str {
    match role {
        Role::Researcher => RESEARCHER_SYSTEM,
        Role::Writer => WRITER_SYSTEM,
        Role::Editor => EDITOR_SYSTEM,
    }
}

/// Renders stage instructions with strict undefined handling
pub struct PromptRenderer {
    env: Environment<'static>,
}

impl Default for PromptRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);

        for role in Role::ALL {
            // Built-in templates; a syntax error here shows up on first render
            if let Err(e) = env.add_template(role.as_str(), instruction_source(role)) {
                tracing::error!(role = %role, error = %e, "invalid instruction template");
            }
        }

        Self { env }
    }

    /// Instruction for one stage
    ///
    /// `input` is the file the worker reads (empty for research) and `output`
    /// the file it must write, both relative to the worker's sandbox.
    pub fn instruction(
        &self,
        role: Role,
        topic: &str,
        requirements: &str,
        input: &str,
        output: &str,
    ) -> Result<String, minijinja::Error> {
        let tmpl = self.env.get_template(role.as_str())?;
        tmpl.render(context! {
            topic => topic,
            requirements => requirements,
            input => input,
            output => output,
        })
    }
}

fn instruction_source(role: Role) -> &'static str {
    match role {
        Role::Researcher => RESEARCH_INSTRUCTION,
        Role::Writer => WRITING_INSTRUCTION,
        Role::Editor => EDITING_INSTRUCTION,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_research_instruction() {
        let renderer = PromptRenderer::new();
        let text = renderer
            .instruction(
                Role::Researcher,
                "AI in healthcare",
                "1000 words",
                "",
                "outline.md",
            )
            .unwrap();

        assert!(text.contains("Topic: AI in healthcare"));
        assert!(text.contains("Requirements: 1000 words"));
        assert!(text.contains("outline.md"));
    }

    #[test]
    fn test_research_instruction_without_requirements() {
        let renderer = PromptRenderer::new();
        let text = renderer
            .instruction(Role::Researcher, "Rust", "", "", "outline.md")
            .unwrap();

        assert!(!text.contains("Requirements"));
    }

    #[test]
    fn test_stage_instructions_name_their_files() {
        let renderer = PromptRenderer::new();

        let writing = renderer
            .instruction(Role::Writer, "t", "", "../research/outline.md", "draft.md")
            .unwrap();
        assert!(writing.contains("../research/outline.md"));
        assert!(writing.contains("draft.md"));

        let editing = renderer
            .instruction(Role::Editor, "t", "", "../writing/draft.md", "final.md")
            .unwrap();
        assert!(editing.contains("../writing/draft.md"));
        assert!(editing.contains("final.md"));
    }

    #[test]
    fn test_system_prompts_are_distinct() {
        assert!(system_prompt(Role::Researcher).contains("outline"));
        assert!(system_prompt(Role::Writer).contains("draft"));
        assert!(system_prompt(Role::Editor).contains("final document"));
    }
}
