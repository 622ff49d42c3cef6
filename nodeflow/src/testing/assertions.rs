//! Test assertions for pipeline results.

use crate::core::{NodeResult, CANCELLED_ERROR_CODE};
use crate::pipeline::NodeId;
use std::collections::HashMap;

/// Asserts that the result indicates success.
pub fn assert_node_succeeded(result: &NodeResult) {
    assert!(result.is_ok(), "Expected success, got: {result:?}");
}

/// Asserts that the result is a failure with the expected code.
pub fn assert_node_failed_with(result: &NodeResult, code: i32) {
    match result {
        Err(e) => assert_eq!(e.code, code, "Expected code {code}, got error: {e}"),
        Ok(()) => panic!("Expected failure with code {code}, got success"),
    }
}

/// Asserts that the result is the synthetic cancellation error.
pub fn assert_node_cancelled(result: &NodeResult) {
    assert_node_failed_with(result, CANCELLED_ERROR_CODE);
}

/// Asserts that the map holds exactly one result for each id in `ids`.
pub fn assert_results_cover(results: &HashMap<NodeId, NodeResult>, ids: &[NodeId]) {
    assert_eq!(
        results.len(),
        ids.len(),
        "Expected {} results, got {}",
        ids.len(),
        results.len()
    );
    for id in ids {
        assert!(results.contains_key(id), "Missing result for node {id}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NodeError;

    #[test]
    fn test_assert_node_succeeded() {
        assert_node_succeeded(&Ok(()));
    }

    #[test]
    fn test_assert_node_failed_with() {
        assert_node_failed_with(&Err(NodeError::new("x", 4)), 4);
        assert_node_cancelled(&Err(NodeError::cancelled()));
    }

    #[test]
    #[should_panic(expected = "got success")]
    fn test_assert_node_failed_with_on_success() {
        assert_node_failed_with(&Ok(()), 1);
    }
}
