// Output classification
//
// A table of regex pattern sets, each bound to a callback, applied to every
// line the worker writes to stdout or stderr.

use regex::{Captures, Regex};

type LineHandler = Box<dyn Fn(&Captures<'_>) + Send + Sync>;

/// An ordered list of patterns bound to a single callback.
///
/// Patterns within a callback are first-match-wins; the handler receives the
/// captures of whichever pattern matched.
pub struct RegexCallback {
    patterns: Vec<Regex>,
    handler: LineHandler,
}

impl RegexCallback {
    pub fn new(
        patterns: Vec<Regex>,
        handler: impl Fn(&Captures<'_>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            patterns,
            handler: Box::new(handler),
        }
    }

    pub fn patterns(&self) -> &[Regex] {
        &self.patterns
    }

    /// Try this callback's patterns against a line. Invokes the handler for
    /// the first pattern that matches and reports whether one did.
    fn try_line(&self, line: &str) -> bool {
        for pattern in &self.patterns {
            if let Some(captures) = pattern.captures(line) {
                (self.handler)(&captures);
                return true;
            }
        }
        false
    }
}

impl std::fmt::Debug for RegexCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegexCallback")
            .field("patterns", &self.patterns)
            .finish_non_exhaustive()
    }
}

/// Applies every registered callback to every line.
///
/// Each callback is tried independently, so a single line may fire more than
/// one callback (e.g. record a progress update and a fault). Classification
/// stops within a callback at its first matching pattern, never across
/// callbacks.
#[derive(Debug, Default)]
pub struct RegexHandler {
    callbacks: Vec<RegexCallback>,
}

impl RegexHandler {
    pub fn new(callbacks: Vec<RegexCallback>) -> Self {
        Self { callbacks }
    }

    /// Classify one output line.
    ///
    /// Returns the number of callbacks that fired, which is occasionally
    /// useful to callers and free to compute.
    pub fn handle_line(&self, line: &str) -> usize {
        self.callbacks
            .iter()
            .filter(|callback| callback.try_line(line))
            .count()
    }

    pub fn callbacks(&self) -> &[RegexCallback] {
        &self.callbacks
    }
}
