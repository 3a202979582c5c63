use std::{collections::HashMap, fmt};

/// Outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStatus {
    /// Sent and acknowledged
    pub sent: usize,
    /// Failed at any stage, including sent-but-unacknowledged
    pub failed: usize,
    /// Distinct errors with how often each occurred, in first-seen order
    pub errors: Vec<(String, usize)>,
}

impl DispatchStatus {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.sent + self.failed
    }

    pub(crate) fn from_errors(sent: usize, errors: impl IntoIterator<Item = String>) -> Self {
        let mut counted: Vec<(String, usize)> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut failed = 0;

        for error in errors {
            failed += 1;
            if let Some(&position) = positions.get(&error) {
                counted[position].1 += 1;
            } else {
                positions.insert(error.clone(), counted.len());
                counted.push((error, 1));
            }
        }

        Self {
            sent,
            failed,
            errors: counted,
        }
    }
}

impl fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sent, {} failed", self.sent, self.failed)?;
        for (error, count) in &self.errors {
            write!(f, "; {error} (x{count})")?;
        }
        Ok(())
    }
}
