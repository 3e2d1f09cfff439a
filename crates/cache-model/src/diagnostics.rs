use thiserror::Error;

/// The only two failure kinds fatal enough to abort the pipeline (SS7).
/// Everything else is a recoverable per-class/per-selector drop recorded in
/// [`Diagnostics`] instead.
#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(
        "selector address space overflow: {total_bytes} bytes exceeds the 16MiB limit; no caches built"
    )]
    SelectorSpaceOverflow { total_bytes: u64 },
}

/// A single recoverable warning, tagged with the `tracing` target of the
/// phase that raised it so the accumulated diagnostics and the log stream
/// never disagree about provenance.
#[derive(Debug, Clone)]
pub struct Warning {
    pub target: &'static str,
    pub message: String,
}

/// Warning/error sink threaded by mutable reference through every phase.
///
/// The solver, packer, graph builder and emitter never return `Err` for a
/// per-item failure; they push a [`Warning`] here and keep going. Only a
/// top-level configuration error or selector-space overflow short-circuits
/// the pipeline via `Result`.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning and mirror it into the active `tracing` subscriber.
    pub fn warn(&mut self, target: &'static str, message: impl Into<String>) {
        let message = message.into();
        // `tracing`'s macros require the `target:` argument to be a
        // compile-time constant (it's baked into a static callsite), so a
        // runtime `&'static str` can't be spliced in directly. Dispatch over
        // the fixed set of targets used across this workspace instead.
        match target {
            "graph" => tracing::warn!(target: "graph", "{message}"),
            "solver" => tracing::warn!(target: "solver", "{message}"),
            "emit" => tracing::warn!(target: "emit", "{message}"),
            _ => tracing::warn!(target: "cache", "{message}"),
        }
        self.warnings.push(Warning { target, message });
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    pub fn warnings_from(&self, target: &str) -> impl Iterator<Item = &Warning> {
        self.warnings.iter().filter(move |w| w.target == target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warn_accumulates_and_does_not_abort() {
        let mut diags = Diagnostics::new();
        diags.warn("graph", "class Foo dropped: weak superclass missing");
        diags.warn("solver", "class Bar dropped: placement exhausted");
        assert_eq!(diags.warning_count(), 2);
        assert_eq!(diags.warnings_from("solver").count(), 1);
    }
}
