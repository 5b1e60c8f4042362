use colored::Colorize;

/// For re-throwing after we've collected every problem with a graph.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("{label} failed due to {} errors: {}", .errors.len(), .errors.join("; "))]
pub struct AggregatedErrors {
    pub label: String,
    pub errors: Vec<String>,
}

impl AggregatedErrors {
    /// Print the full list of errors to stderr.
    pub fn print_recap(&self) {
        eprintln!("\n{} {}:\n", "Encountered errors while".red(), self.label.red());
        for e in &self.errors {
            eprintln!("{}: {e}", "ERROR".red());
        }
        eprintln!();
    }
}

// in future we can add a `warnings` field, too.
pub struct Errors {
    errors: Vec<anyhow::Error>,
}

impl Default for Errors {
    fn default() -> Self {
        Self {
            // ideally we won't have any,
            // and we don't mind reallocating if we're already in an error state:
            errors: Vec::with_capacity(0),
        }
    }
}

impl Errors {
    pub fn add(&mut self, e: impl Into<anyhow::Error>) {
        let e = e.into();
        log::trace!("error: {e:?}");
        self.errors.push(e);
    }

    /// Fail w/ an aggregated error if there were one or more errors.
    pub fn finish(self, label: &str) -> Result<(), AggregatedErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(AggregatedErrors {
                label: label.to_owned(),
                errors: self.errors.iter().map(|e| format!("{e:#}")).collect(),
            })
        }
    }
}
