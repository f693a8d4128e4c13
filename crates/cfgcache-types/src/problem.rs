use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Which half of a cache session produced a problem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProblemPhase {
    Store,
    Load,
}

impl fmt::Display for ProblemPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store => write!(f, "store"),
            Self::Load => write!(f, "load"),
        }
    }
}

/// A non-fatal failure to store or load one value.
///
/// The slot the value occupied still exists in the stream (a null
/// placeholder), so the rest of the session is unaffected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub phase: ProblemPhase,
    /// Rendered [`PropertyTrace`] of the offending value.
    pub location: String,
    pub message: String,
    pub cause: Option<String>,
}

impl Problem {
    pub fn new(phase: ProblemPhase, location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            phase,
            location: location.into(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.phase, self.location, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " (caused by: {cause})")?;
        }
        Ok(())
    }
}

/// One step on the path from the root value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TraceSegment {
    /// Named field of a structured object.
    Field(String),
    /// Position in a list.
    Index(usize),
    /// Key in a map.
    Key(String),
    /// Contents of a shared cell.
    Cell,
}

/// Path from the root value to the value currently being processed.
///
/// Rendered as `<root>.inputs[2]["main"]`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PropertyTrace {
    segments: Vec<TraceSegment>,
}

impl PropertyTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, segment: TraceSegment) {
        self.segments.push(segment);
    }

    pub fn pop(&mut self) -> Option<TraceSegment> {
        self.segments.pop()
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn segments(&self) -> &[TraceSegment] {
        &self.segments
    }
}

impl fmt::Display for PropertyTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<root>")?;
        for segment in &self.segments {
            match segment {
                TraceSegment::Field(name) => write!(f, ".{name}")?,
                TraceSegment::Index(i) => write!(f, "[{i}]")?,
                TraceSegment::Key(key) => write!(f, "[{key:?}]")?,
                TraceSegment::Cell => write!(f, ".*")?,
            }
        }
        Ok(())
    }
}

/// Ordered sink for the problems of one session.
///
/// `report` never fails. When a limit is configured the reporter only
/// records that it was exceeded; the session decides whether to stop.
#[derive(Debug, Default)]
pub struct ProblemReporter {
    problems: Vec<Problem>,
    limit: Option<usize>,
}

impl ProblemReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            problems: Vec::new(),
            limit,
        }
    }

    pub fn report(&mut self, problem: Problem) {
        warn!(
            phase = %problem.phase,
            location = %problem.location,
            cause = problem.cause.as_deref().unwrap_or(""),
            "{}",
            problem.message
        );
        self.problems.push(problem);
    }

    /// Returns `true` once more problems than the configured limit were reported.
    pub fn limit_exceeded(&self) -> bool {
        self.limit.is_some_and(|limit| self.problems.len() > limit)
    }

    pub fn problems(&self) -> &[Problem] {
        &self.problems
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    /// Forget every problem after the first `len`.
    pub fn truncate(&mut self, len: usize) {
        self.problems.truncate(len);
    }

    pub fn into_problems(self) -> Vec<Problem> {
        self.problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_rendering() {
        let mut trace = PropertyTrace::new();
        assert_eq!(trace.to_string(), "<root>");
        trace.push(TraceSegment::Field("tasks".into()));
        trace.push(TraceSegment::Key("compile".into()));
        trace.push(TraceSegment::Field("inputs".into()));
        trace.push(TraceSegment::Index(2));
        assert_eq!(trace.to_string(), r#"<root>.tasks["compile"].inputs[2]"#);
        trace.pop();
        trace.push(TraceSegment::Cell);
        assert_eq!(trace.to_string(), r#"<root>.tasks["compile"].inputs.*"#);
        assert_eq!(trace.depth(), 4);
    }

    #[test]
    fn reporter_keeps_order() {
        let mut reporter = ProblemReporter::new();
        reporter.report(Problem::new(ProblemPhase::Store, "<root>.a", "first"));
        reporter.report(Problem::new(ProblemPhase::Store, "<root>.b", "second"));
        let messages: Vec<_> = reporter.problems().iter().map(|p| p.message.as_str()).collect();
        assert_eq!(messages, ["first", "second"]);
        assert!(!reporter.limit_exceeded());
    }

    #[test]
    fn reporter_limit() {
        let mut reporter = ProblemReporter::with_limit(Some(1));
        reporter.report(Problem::new(ProblemPhase::Load, "<root>", "one"));
        assert!(!reporter.limit_exceeded());
        reporter.report(Problem::new(ProblemPhase::Load, "<root>", "two"));
        assert!(reporter.limit_exceeded());
        assert_eq!(reporter.into_problems().len(), 2);
    }

    #[test]
    fn display_with_cause() {
        let p = Problem::new(ProblemPhase::Store, "<root>.f", "cannot serialize")
            .with_cause("socket handle");
        assert_eq!(
            p.to_string(),
            "store <root>.f: cannot serialize (caused by: socket handle)"
        );
    }

    #[test]
    fn serde_roundtrip() {
        let p = Problem::new(ProblemPhase::Load, "<root>[0]", "unknown shape `Gone`");
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"load\""));
        let parsed: Problem = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, p);
    }
}
