//! Per-batch response correlation.
//!
//! A pool lives for exactly one inbound batch. It is created with the batch's
//! ordered key set, filled in whatever order results complete, and drained
//! once. Only the session's own receive task ever touches it.

use crate::core::envelope::ResultMessage;
use crate::error::{RelayError, Result};
use std::collections::BTreeMap;
use tracing::error;

/// Collects one batch's results keyed by correlation key.
#[derive(Debug)]
pub(crate) struct ResponsePool {
    expected: Vec<String>,
    results: BTreeMap<String, ResultMessage>,
    filled: usize,
}

impl ResponsePool {
    /// Start a pool for a batch whose key set has already been validated as
    /// duplicate-free.
    pub fn new(keys: &[String]) -> Self {
        Self {
            expected: keys.to_vec(),
            results: BTreeMap::new(),
            filled: 0,
        }
    }

    /// Store one completed call's result.
    ///
    /// More completions than the batch expects, a key the batch never asked
    /// for, or a second result under one key are all programming errors;
    /// they get logged loudly and surfaced as `PoolOverflow`, never silently
    /// dropped.
    pub fn store(&mut self, key: &str, message: ResultMessage) -> Result<()> {
        if self.filled == self.expected.len() {
            return Err(self.overflow(format!(
                "result for `{key}` arrived after batch of {} completed",
                self.expected.len()
            )));
        }
        if !self.expected.iter().any(|k| k == key) {
            return Err(self.overflow(format!("result for unexpected key `{key}`")));
        }
        if self.results.contains_key(key) {
            return Err(self.overflow(format!("second result for key `{key}`")));
        }

        self.results.insert(key.to_string(), message);
        self.filled += 1;
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.filled == self.expected.len()
    }

    /// Hand the full result set over for encoding.
    ///
    /// A partial batch must never reach the ordinary send path; that is what
    /// the forced-send channel is for.
    pub fn finish(self) -> Result<BTreeMap<String, ResultMessage>> {
        if !self.is_complete() {
            let missing: Vec<&str> = self
                .expected
                .iter()
                .filter(|k| !self.results.contains_key(*k))
                .map(String::as_str)
                .collect();
            error!(?missing, "batch send attempted before all results arrived");
            return Err(RelayError::PoolOverflow(format!(
                "send attempted with {} of {} results",
                self.filled,
                self.expected.len()
            )));
        }
        Ok(self.results)
    }

    fn overflow(&self, detail: String) -> RelayError {
        error!(
            expected = self.expected.len(),
            filled = self.filled,
            %detail,
            "response pool overflow"
        );
        RelayError::PoolOverflow(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fills_in_any_order() {
        let mut pool = ResponsePool::new(&keys(&["echo", "whoami"]));
        assert!(!pool.is_complete());

        pool.store("whoami", ResultMessage::function(json!("nils")))
            .expect("store whoami");
        pool.store("echo", ResultMessage::function(json!("hi")))
            .expect("store echo");
        assert!(pool.is_complete());

        let results = pool.finish().expect("finish");
        assert_eq!(results.len(), 2);
        assert_eq!(results["whoami"].content, json!("nils"));
    }

    #[test]
    fn unexpected_key_overflows() {
        let mut pool = ResponsePool::new(&keys(&["echo"]));
        let err = pool
            .store("intruder", ResultMessage::function(json!(1)))
            .unwrap_err();
        assert!(matches!(err, RelayError::PoolOverflow(_)));
    }

    #[test]
    fn second_result_for_key_overflows() {
        let mut pool = ResponsePool::new(&keys(&["echo", "whoami"]));
        pool.store("echo", ResultMessage::function(json!(1)))
            .expect("first");
        let err = pool
            .store("echo", ResultMessage::function(json!(2)))
            .unwrap_err();
        assert!(matches!(err, RelayError::PoolOverflow(_)));
    }

    #[test]
    fn result_after_completion_overflows() {
        let mut pool = ResponsePool::new(&keys(&["echo"]));
        pool.store("echo", ResultMessage::function(json!(1)))
            .expect("fill");
        let err = pool
            .store("echo", ResultMessage::function(json!(2)))
            .unwrap_err();
        assert!(matches!(err, RelayError::PoolOverflow(_)));
    }

    #[test]
    fn finish_on_partial_batch_overflows() {
        let mut pool = ResponsePool::new(&keys(&["echo", "whoami"]));
        pool.store("echo", ResultMessage::function(json!(1)))
            .expect("fill");
        let err = pool.finish().unwrap_err();
        assert!(matches!(err, RelayError::PoolOverflow(_)));
    }
}
