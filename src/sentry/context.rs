//! Fault localization: pick the crashing frame out of an event payload.

use super::types::{Event, Frame, StackContext};

/// Select the frame treated as the fault site: the *last* frame of the first
/// exception entry's first value, i.e. the deepest call at the moment the
/// error was raised. Multi-trace events and smarter frame ranking are out of
/// scope; changing the policy only touches this function.
fn crash_frame(event: &Event) -> Option<&Frame> {
    event
        .entries
        .first()?
        .data
        .values
        .first()?
        .stacktrace
        .as_ref()?
        .frames
        .last()
}

/// Derive the stack context the prompt needs from `event`.
///
/// Returns `None` when the event carries no usable frame, or when the
/// selected frame lacks the file path or line number needed to localize the
/// error. Callers treat `None` as "cannot localize, skip this issue", never
/// as a fatal error. Context lines and the function name are optional and
/// default to empty.
pub fn extract_stack_context(event: &Event) -> Option<StackContext> {
    let frame = crash_frame(event)?;
    let file_path = frame.filename.clone()?;
    let line_number = frame.lineno?;

    Some(StackContext {
        file_path,
        line_number,
        context_line: frame.context_line.clone().unwrap_or_default(),
        pre_context: frame.pre_context.clone().unwrap_or_default(),
        post_context: frame.post_context.clone().unwrap_or_default(),
        function_name: frame.function.clone().unwrap_or_default(),
    })
}
