use pipecore::{NodeConfig, NodeData, NodeEvaluator, NodeKind, StatePatch};

/// Apply a named string transformation. Unknown names uppercase.
pub fn apply_transform(transform_type: &str, input: &str) -> String {
    match transform_type {
        "lowercase" => input.to_lowercase(),
        "reverse" => input.chars().rev().collect(),
        "trim" => input.trim().to_string(),
        _ => input.to_uppercase(),
    }
}

/// String transform node (uppercase, lowercase, reverse, trim)
pub struct TransformNode;

impl NodeEvaluator for TransformNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Transform
    }

    fn evaluate(&self, data: &NodeData, incoming: &str, _target_handle: Option<&str>) -> StatePatch {
        let transform_type = data.config.get_str_or("transformType", "uppercase");
        StatePatch::value(apply_transform(transform_type, incoming))
    }

    fn default_config(&self) -> NodeConfig {
        NodeConfig::new().with("transformType", "uppercase")
    }

    fn description(&self) -> &str {
        "Transform text"
    }

    fn category(&self) -> &str {
        "processing"
    }
}

/// Whitespace and structure processing node
pub struct DataProcessingNode;

/// Apply a data-processing mode. Unknown modes pass the input through.
pub fn process(mode: &str, input: &str) -> String {
    match mode {
        "normalize" => input.split_whitespace().collect::<Vec<_>>().join(" "),
        "aggregate" => format!("[Aggregated: {}]", input),
        "sort" => {
            let mut chars: Vec<char> = input.chars().collect();
            chars.sort_unstable();
            chars.into_iter().collect()
        }
        "group" => format!("[Grouped: {}]", input),
        _ => input.to_string(),
    }
}

impl NodeEvaluator for DataProcessingNode {
    fn kind(&self) -> NodeKind {
        NodeKind::DataProcessing
    }

    fn evaluate(&self, data: &NodeData, incoming: &str, _target_handle: Option<&str>) -> StatePatch {
        let mode = data.config.get_str_or("mode", "normalize");
        StatePatch::value(process(mode, incoming))
    }

    fn default_config(&self) -> NodeConfig {
        NodeConfig::new().with("mode", "normalize").with("batchSize", 100)
    }

    fn description(&self) -> &str {
        "Process data"
    }

    fn category(&self) -> &str {
        "processing"
    }
}
