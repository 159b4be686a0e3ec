//! The warnings channel described in spec.md §7: each distinct format
//! string fires at most once per [`crate::song::Song`], unless strict mode
//! is enabled, in which case warnings become errors.

use std::cell::RefCell;
use std::collections::BTreeSet;

use crate::error::RuntimeError;

/// Default cap on distinct warning strings remembered per run.
pub const DEFAULT_MAX_WARNINGS: usize = 64;

#[derive(Debug)]
pub struct Warnings {
    seen: RefCell<BTreeSet<String>>,
    strict: bool,
    max: usize,
}

impl Default for Warnings {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Warnings {
    pub fn new(strict: bool) -> Self {
        Self {
            seen: RefCell::new(BTreeSet::new()),
            strict,
            max: DEFAULT_MAX_WARNINGS,
        }
    }

    pub fn with_max(mut self, max: usize) -> Self {
        self.max = max;
        self
    }

    /// Fires `message` at most once (by its literal text). In strict mode,
    /// returns it as a [`RuntimeError`] instead of logging it.
    pub fn warn_once(&self, message: impl Into<String>) -> Result<(), RuntimeError> {
        let message = message.into();
        if self.strict {
            return Err(RuntimeError::Message(message));
        }
        let mut seen = self.seen.borrow_mut();
        if seen.contains(&message) {
            return Ok(());
        }
        if seen.len() < self.max {
            seen.insert(message.clone());
        }
        log::warn!("{message}");
        Ok(())
    }

    /// Number of distinct messages recorded so far. Exposed for tests; not
    /// meaningful to engine authors beyond that.
    pub fn seen_count(&self) -> usize {
        self.seen.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_per_distinct_message() {
        let w = Warnings::new(false);
        w.warn_once("a").unwrap();
        w.warn_once("a").unwrap();
        w.warn_once("b").unwrap();
        assert_eq!(w.seen.borrow().len(), 2);
    }

    #[test]
    fn strict_mode_converts_to_error() {
        let w = Warnings::new(true);
        let err = w.warn_once("boom").unwrap_err();
        assert_eq!(err, RuntimeError::Message("boom".into()));
    }
}
