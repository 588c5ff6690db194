use pipecore::{NodeConfig, NodeData, NodeEvaluator, NodeKind, StatePatch};

/// Check `input` against `condition`. Every predicate except `equals`
/// ignores case; unknown predicates never pass.
pub fn passes(filter_type: &str, input: &str, condition: &str) -> bool {
    let input_lower = input.to_lowercase();
    let condition_lower = condition.to_lowercase();
    match filter_type {
        "contains" => input_lower.contains(&condition_lower),
        "equals" => input == condition,
        "startsWith" => input_lower.starts_with(&condition_lower),
        "endsWith" => input_lower.ends_with(&condition_lower),
        _ => false,
    }
}

/// Filter node: emits the input when the predicate holds, otherwise an
/// explicit empty string so downstream nodes still receive a value.
pub struct FilterNode;

impl NodeEvaluator for FilterNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Filter
    }

    fn evaluate(&self, data: &NodeData, incoming: &str, _target_handle: Option<&str>) -> StatePatch {
        let filter_type = data.config.get_str_or("filterType", "contains");
        let condition = data.config.get_str_or("condition", "");
        if passes(filter_type, incoming, condition) {
            StatePatch::value(incoming)
        } else {
            StatePatch::value("")
        }
    }

    fn default_config(&self) -> NodeConfig {
        NodeConfig::new()
            .with("filterType", "contains")
            .with("condition", "")
    }

    fn description(&self) -> &str {
        "Filter by condition"
    }

    fn category(&self) -> &str {
        "processing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipecore::Node;

    fn filter(filter_type: &str, condition: &str) -> Node {
        Node::new(
            "f",
            NodeKind::Filter,
            NodeConfig::new()
                .with("filterType", filter_type)
                .with("condition", condition),
        )
    }

    #[test]
    fn test_predicates() {
        assert!(passes("contains", "Hello World", "WORLD"));
        assert!(passes("startsWith", "Hello", "he"));
        assert!(passes("endsWith", "Hello", "LO"));
        assert!(passes("equals", "Hello", "Hello"));
        assert!(!passes("equals", "Hello", "hello"));
        assert!(!passes("regex", "Hello", "H.*"));
    }

    #[test]
    fn test_failing_filter_emits_empty_string() {
        let node = filter("contains", "rust");
        let patch = FilterNode.evaluate(&node.data, "python", None);
        assert_eq!(patch.value.as_deref(), Some(""));

        let patch = FilterNode.evaluate(&node.data, "Rustacean", None);
        assert_eq!(patch.value.as_deref(), Some("Rustacean"));
    }

    #[test]
    fn test_empty_condition_contains_everything() {
        let node = Node::new("f", NodeKind::Filter, FilterNode.default_config());
        let patch = FilterNode.evaluate(&node.data, "anything", None);
        assert_eq!(patch.value.as_deref(), Some("anything"));
    }
}
