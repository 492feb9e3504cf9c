//! Llama 3.1 Instruct prompt rendering for SFT records.
//!
//! Every record becomes one self-contained training string: system preamble,
//! the user turn (instruction plus optional input) and the assistant answer,
//! each closed with `<|eot_id|>`. User content is inserted verbatim.

use crate::dataset::TrainingRecord;
use serde::{Deserialize, Serialize};

pub const BEGIN_OF_TEXT: &str = "<|begin_of_text|>";
pub const START_HEADER: &str = "<|start_header_id|>";
pub const END_HEADER: &str = "<|end_header_id|>";
pub const END_OF_TURN: &str = "<|eot_id|>";

/// Label that introduces the optional input block inside the user turn.
pub const INPUT_LABEL: &str = "입력:";

pub const DEFAULT_SYSTEM_PROMPT: &str = "당신은 JBSW 통합 정보 플랫폼의 챗봇 어시스턴트입니다. 사용자의 질문에 친절하고 정확하게 답변해주세요.";

/// Control tokens of the Llama 3 family that carry meaning to the tokenizer.
pub const RESERVED_MARKERS: &[&str] = &[
    BEGIN_OF_TEXT,
    "<|end_of_text|>",
    START_HEADER,
    END_HEADER,
    END_OF_TURN,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    #[serde(default = "default_system")]
    pub system: String,
}

fn default_system() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self { system: default_system() }
    }
}

impl PromptTemplate {
    #[must_use]
    pub fn with_system(system: impl Into<String>) -> Self {
        Self { system: system.into() }
    }

    #[must_use]
    pub fn render(&self, record: &TrainingRecord) -> String {
        self.render_parts(&record.instruction, record.input_text(), &record.output)
    }

    /// Render from loose parts. An empty `input` is treated as absent.
    #[must_use]
    pub fn render_parts(&self, instruction: &str, input: Option<&str>, output: &str) -> String {
        let mut s = String::with_capacity(
            self.system.len() + instruction.len() + output.len() + input.map_or(0, str::len) + 160,
        );
        s.push_str(BEGIN_OF_TEXT);
        push_header(&mut s, "system");
        s.push_str(&self.system);
        s.push_str(END_OF_TURN);

        push_header(&mut s, "user");
        s.push_str(instruction);
        if let Some(input) = input.filter(|i| !i.is_empty()) {
            s.push_str("\n\n");
            s.push_str(INPUT_LABEL);
            s.push(' ');
            s.push_str(input);
        }
        s.push_str(END_OF_TURN);

        push_header(&mut s, "assistant");
        s.push_str(output);
        s.push_str(END_OF_TURN);
        s
    }
}

fn push_header(s: &mut String, role: &str) {
    s.push_str(START_HEADER);
    s.push_str(role);
    s.push_str(END_HEADER);
    s.push_str("\n\n");
}

/// Render with the default JBSW system preamble.
#[must_use]
pub fn format_prompt(instruction: &str, input: Option<&str>, output: &str) -> String {
    PromptTemplate::default().render_parts(instruction, input, output)
}

/// Reserved markers that occur inside a piece of user content.
///
/// Rendering never escapes these; this only lets callers report them.
#[must_use]
pub fn find_reserved_markers(text: &str) -> Vec<&'static str> {
    RESERVED_MARKERS.iter().copied().filter(|m| text.contains(m)).collect()
}
