//! Prompt templates for answer synthesis
//!
//! Templates use `format!()` interpolation so missing variables fail at
//! compile time. Retrieved chunks are wrapped in numbered, delimited context
//! blocks so the model can cite which source it drew from.

use crate::models::SearchResult;

/// Default persona used when the caller supplies no system instructions.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a knowledgeable workplace assistant. Answer questions using only the provided context. If the context does not contain the answer, say you don't know rather than guessing. Keep answers concise and direct.";

/// Build the grounded-answer prompt from a question and its retrieved
/// context.
///
/// Each chunk becomes a numbered block labelled with its source document
/// title. The instruction to answer only from context is repeated after the
/// blocks because models weigh the end of the prompt more heavily.
pub fn answer_prompt(question: &str, results: &[SearchResult]) -> String {
    let context = results
        .iter()
        .enumerate()
        .map(|(i, result)| {
            format!(
                "[Context {} | Source: {}]\n{}",
                i + 1,
                result.source_title,
                result.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    format!(
        r#"Answer the question using only the context below.

{context}

---

Question: {question}

Rules:
- Use only information from the context blocks above.
- If the context does not answer the question, say so plainly.
- Do not mention the context blocks or their numbering in your answer."#
    )
}

/// Build the acknowledgement for a captured user correction. Deliberately a
/// template rather than an LLM call: the acknowledgement must never invent
/// content beyond what was stored.
pub fn correction_acknowledgement(answer: &str) -> String {
    format!("Got it, I've noted that: {answer}")
}
