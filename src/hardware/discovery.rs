//! Ordered candidate discovery
//!
//! Peripherals that may sit at one of several bus addresses are located by
//! trying each candidate configuration in order. The first one that opens
//! wins; if none do, every attempt is reported together.

use std::fmt;

/// One failed candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryAttempt {
    pub candidate: String,
    pub error: String,
}

/// Every candidate failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryError {
    pub attempts: Vec<DiscoveryAttempt>,
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attempts.is_empty() {
            return f.write_str("no candidates configured");
        }
        let tried: Vec<String> = self
            .attempts
            .iter()
            .map(|a| format!("{} ({})", a.candidate, a.error))
            .collect();
        write!(f, "tried {}", tried.join(", "))
    }
}

impl std::error::Error for DiscoveryError {}

/// The candidate that opened, with what it opened to
#[derive(Debug)]
pub struct Discovered<C, T> {
    pub candidate: C,
    pub value: T,
    /// Candidates that failed before this one
    pub skipped: Vec<DiscoveryAttempt>,
}

/// Try `open` on each candidate in order and return the first success
pub fn discover<C, T, E, F>(candidates: &[C], mut open: F) -> Result<Discovered<C, T>, DiscoveryError>
where
    C: Clone + fmt::Debug,
    E: fmt::Display,
    F: FnMut(&C) -> Result<T, E>,
{
    let mut attempts = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        match open(candidate) {
            Ok(value) => {
                tracing::debug!(candidate = ?candidate, skipped = attempts.len(), "Discovery matched");
                return Ok(Discovered {
                    candidate: candidate.clone(),
                    value,
                    skipped: attempts,
                });
            }
            Err(e) => {
                tracing::debug!(candidate = ?candidate, error = %e, "Discovery candidate failed");
                attempts.push(DiscoveryAttempt {
                    candidate: format!("{:?}", candidate),
                    error: e.to_string(),
                });
            }
        }
    }

    Err(DiscoveryError { attempts })
}
