//! Execution tracing
//!
//! When enabled on the context, every evaluated node appends an entry
//! recording what it was and what it produced. The trace is a flat arena
//! ordered by completion; nesting is recoverable from the depth column.

use std::fmt::Write as _;

/// One evaluated node.
#[derive(Debug, Clone)]
pub struct TraceEntry {
    /// ELM node name
    pub kind: &'static str,
    /// Source locator carried by the document, if any
    pub locator: Option<String>,
    /// Rendered result, or the error text
    pub outcome: String,
    /// Expression nesting depth when the node finished
    pub depth: usize,
}

/// Trace arena for one evaluation run.
#[derive(Debug, Clone, Default)]
pub struct EvalTrace {
    entries: Vec<TraceEntry>,
}

impl EvalTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        kind: &'static str,
        locator: Option<&str>,
        outcome: String,
        depth: usize,
    ) {
        self.entries.push(TraceEntry {
            kind,
            locator: locator.map(str::to_string),
            outcome,
            depth,
        });
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Indented dump, one node per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            for _ in 0..entry.depth {
                out.push_str("  ");
            }
            let _ = write!(out, "{}", entry.kind);
            if let Some(locator) = &entry.locator {
                let _ = write!(out, " @{locator}");
            }
            let _ = writeln!(out, " => {}", entry.outcome);
        }
        out
    }
}
