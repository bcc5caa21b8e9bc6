//! Fix generation: build the prompt for one issue, call the model, parse
//! the structured reply.

use thiserror::Error;
use tracing::debug;

use crate::gemini::{GeminiError, TextModel};
use crate::sentry::StackContext;

/// Section markers the model is instructed to emit and the parser splits on.
pub const EXPLANATION_MARKER: &str = "EXPLANATION:";
pub const FIXED_CODE_MARKER: &str = "FIXED_CODE:";

#[derive(Debug, Error)]
pub enum FixError {
    #[error("model call failed: {0}")]
    Model(#[from] GeminiError),

    /// The model answered but ignored the response format.
    #[error("model reply is missing the {0} marker")]
    MissingMarker(&'static str),
}

/// Explanation and full replacement file produced by the model for one
/// issue.
#[derive(Debug, Clone)]
pub struct FixResult {
    pub explanation: String,
    /// The entire corrected file body, never a partial patch.
    pub fixed_code: String,
}

/// Deterministic prompt for one issue: the error, the localized context,
/// and the whole current file, plus the exact response format to follow.
pub fn build_prompt(issue_title: &str, file_content: &str, context: &StackContext) -> String {
    let mut prompt = String::new();

    prompt.push_str("You are an expert developer tasked with fixing a bug in a codebase.\n\n");
    prompt.push_str(&format!("ERROR MESSAGE:\n{issue_title}\n\n"));
    prompt.push_str(&format!("FILE: {}\n", context.file_path));
    prompt.push_str(&format!("FUNCTION: {}\n", context.function_name));
    prompt.push_str(&format!("LINE NUMBER: {}\n\n", context.line_number));

    prompt.push_str("Here is the context around the error:\n\n");
    prompt.push_str(&format!(
        "Lines before the error:\n```\n{}\n```\n\n",
        context.pre_context.join("\n")
    ));
    prompt.push_str(&format!(
        "Line with the error:\n```\n{}\n```\n\n",
        context.context_line
    ));
    prompt.push_str(&format!(
        "Lines after the error:\n```\n{}\n```\n\n",
        context.post_context.join("\n")
    ));

    prompt.push_str(&format!(
        "Here is the full content of the file:\n```\n{file_content}\n```\n\n"
    ));

    prompt.push_str("Explain what is causing the error and provide the corrected code. ");
    prompt.push_str("Respond in exactly this format:\n\n");
    prompt.push_str(&format!(
        "{EXPLANATION_MARKER}\n[explanation of the issue and your fix]\n\n"
    ));
    prompt.push_str(&format!(
        "{FIXED_CODE_MARKER}\n[the entire fixed file with your changes applied]\n"
    ));

    prompt
}

/// Ask the model for a fix and parse its reply.
pub async fn generate(model: &impl TextModel, prompt: &str) -> Result<FixResult, FixError> {
    let reply = model.complete(prompt).await?;
    match parse_reply(&reply) {
        Ok(fix) => Ok(fix),
        Err(err) => {
            debug!(%reply, "unparsable model reply");
            Err(err)
        }
    }
}

/// Split a reply into explanation and code along the two markers. The
/// explanation is everything between them; the code is everything after the
/// second, with one surrounding ``` fence removed if present.
pub fn parse_reply(reply: &str) -> Result<FixResult, FixError> {
    let after_explanation = reply
        .split_once(EXPLANATION_MARKER)
        .ok_or(FixError::MissingMarker(EXPLANATION_MARKER))?
        .1;
    let (explanation, raw_code) = after_explanation
        .split_once(FIXED_CODE_MARKER)
        .ok_or(FixError::MissingMarker(FIXED_CODE_MARKER))?;

    Ok(FixResult {
        explanation: explanation.trim().to_string(),
        fixed_code: strip_code_fence(raw_code).to_string(),
    })
}

/// Remove one leading ``` fence line (with or without a language tag) and
/// one trailing ``` fence. Anything else is kept verbatim.
fn strip_code_fence(code: &str) -> &str {
    let mut code = code.trim();
    if let Some(rest) = code.strip_prefix("```") {
        // The remainder of the fence line is a language tag or empty.
        code = match rest.split_once('\n') {
            Some((_tag, body)) => body,
            None => "",
        };
    }
    if let Some(rest) = code.trim_end().strip_suffix("```") {
        code = rest;
    }
    code.trim()
}
