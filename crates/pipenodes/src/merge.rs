use pipecore::{NodeConfig, NodeData, NodeEvaluator, NodeKind, NodePorts, PortId, StatePatch};
use std::collections::{BTreeMap, BTreeSet};

const FIRST: &str = "input1";
const SECOND: &str = "input2";

/// Port values in merge order: `input1`, `input2`, then the remaining
/// ports by ascending id. Empty values are skipped.
pub fn ordered_values(inputs: &BTreeMap<PortId, String>) -> Vec<&str> {
    let fixed = [FIRST, SECOND].into_iter().filter_map(|port| inputs.get(port));
    let rest = inputs
        .iter()
        .filter(|(port, _)| port.as_str() != FIRST && port.as_str() != SECOND)
        .map(|(_, value)| value);

    fixed
        .chain(rest)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
        .collect()
}

/// Join ordered values according to a merge strategy.
pub fn join(strategy: &str, values: &[&str]) -> String {
    match strategy {
        "union" => values.join(", "),
        "intersection" => values.first().map(|v| v.to_string()).unwrap_or_default(),
        "zip" => values.join(" | "),
        _ => values.join(" "),
    }
}

fn merged(data: &NodeData, inputs: &BTreeMap<PortId, String>) -> String {
    join(data.config.get_str_or("strategy", "concat"), &ordered_values(inputs))
}

/// Merge node combining any number of named inputs
pub struct MergeNode;

impl NodeEvaluator for MergeNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Merge
    }

    fn evaluate(&self, data: &NodeData, incoming: &str, target_handle: Option<&str>) -> StatePatch {
        let port = target_handle.unwrap_or(FIRST);
        let mut inputs = data.state.input_values.clone();

        if !incoming.is_empty() && inputs.get(port).map(String::as_str) == Some(incoming) {
            return StatePatch::default();
        }
        if incoming.is_empty() {
            inputs.remove(port);
        } else {
            inputs.insert(port.to_string(), incoming.to_string());
        }

        StatePatch::value(merged(data, &inputs)).with_inputs(inputs)
    }

    /// `input1` and `input2`, then every other connected port by id.
    fn ports(&self, _data: &NodeData, connected: &[Option<&str>]) -> NodePorts {
        let extra: BTreeSet<&str> = connected
            .iter()
            .flatten()
            .copied()
            .filter(|port| *port != FIRST && *port != SECOND)
            .collect();
        let inputs = [FIRST, SECOND].into_iter().chain(extra);
        NodePorts::new(inputs, ["output"])
    }

    fn default_config(&self) -> NodeConfig {
        NodeConfig::new().with("strategy", "concat")
    }

    fn refresh(&self, data: &NodeData) -> Option<StatePatch> {
        Some(StatePatch::value(merged(data, &data.state.input_values)))
    }

    fn prune(&self, data: &NodeData, connected: &[Option<&str>]) -> Option<StatePatch> {
        let inputs: BTreeMap<PortId, String> = data
            .state
            .input_values
            .iter()
            .filter(|(port, _)| {
                connected
                    .iter()
                    .any(|handle| handle.unwrap_or(FIRST) == port.as_str())
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if inputs.len() == data.state.input_values.len() {
            return None;
        }
        Some(StatePatch::value(merged(data, &inputs)).with_inputs(inputs))
    }

    fn description(&self) -> &str {
        "Merge multiple inputs"
    }

    fn category(&self) -> &str {
        "processing"
    }
}
