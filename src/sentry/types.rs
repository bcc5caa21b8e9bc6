//! Wire types for the slice of the Sentry API this tool reads.
//!
//! Event payloads are large and mostly irrelevant here; only the path down
//! to the exception stack trace is modeled, and every step of that path is
//! optional so a sparse payload deserializes instead of erroring.

use serde::Deserialize;

/// One unresolved error group from the project issue list.
#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    /// Issue id. Sentry serializes these as decimal strings; they are kept
    /// opaque here.
    pub id: String,

    /// Error title, e.g. `KeyError: 'user_id'`.
    pub title: String,

    /// Web link to the issue in the Sentry UI.
    pub permalink: String,
}

/// Latest-event payload for one issue.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub entries: Vec<Entry>,
}

/// One logical section of an event (exception, breadcrumbs, request, ...).
/// Non-exception entries deserialize to empty data and are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub data: EntryData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntryData {
    #[serde(default)]
    pub values: Vec<ExceptionValue>,
}

/// One exception in the chain; carries the stack trace when Sentry has one.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExceptionValue {
    pub stacktrace: Option<Stacktrace>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Stacktrace {
    #[serde(default)]
    pub frames: Vec<Frame>,
}

/// One call-site record. Sentry orders frames outermost call first, so the
/// deepest frame (where the error was raised) is the last element.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Frame {
    /// Source path as reported by the SDK, relative to the repository root.
    pub filename: Option<String>,

    /// 1-based line number of the faulting line.
    pub lineno: Option<u32>,

    /// The faulting line itself.
    pub context_line: Option<String>,

    /// Source lines immediately before the faulting line.
    pub pre_context: Option<Vec<String>>,

    /// Source lines immediately after the faulting line.
    pub post_context: Option<Vec<String>>,

    /// Name of the enclosing function.
    pub function: Option<String>,
}

/// Fault localization derived from the deepest frame of an event. This is
/// what the prompt builder works from.
#[derive(Debug, Clone)]
pub struct StackContext {
    pub file_path: String,
    pub line_number: u32,
    pub context_line: String,
    pub pre_context: Vec<String>,
    pub post_context: Vec<String>,
    /// Empty when the SDK did not report a function name.
    pub function_name: String,
}
