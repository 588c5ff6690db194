use once_cell::sync::Lazy;
use pipecore::{NodeConfig, NodeData, NodeEvaluator, NodeKind, NodePorts, StatePatch};
use regex::{Captures, Regex};
use std::collections::BTreeMap;

static VARIABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([a-zA-Z_$][a-zA-Z0-9_$]*)\s*\}\}").expect("valid variable pattern")
});

const DEFAULT_PORT: &str = "input";
const PORT_PREFIX: &str = "input-";

/// Distinct `{{ name }}` variables of a template, in order of first use.
pub fn template_variables(template: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for caps in VARIABLE.captures_iter(template) {
        let name = &caps[1];
        if !seen.iter().any(|s: &String| s == name) {
            seen.push(name.to_string());
        }
    }
    seen
}

/// Substitute bound variables; unbound placeholders stay verbatim.
pub fn render(template: &str, bindings: &BTreeMap<String, String>) -> String {
    VARIABLE
        .replace_all(template, |caps: &Captures| match bindings.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Variable bound through a target handle. The default port carries `input`.
fn variable_for_handle(handle: Option<&str>) -> Option<&str> {
    match handle {
        None | Some(DEFAULT_PORT) => Some(DEFAULT_PORT),
        Some(h) => h.strip_prefix(PORT_PREFIX).filter(|name| !name.is_empty()),
    }
}

fn handle_for_variable(name: &str) -> String {
    if name == DEFAULT_PORT {
        DEFAULT_PORT.to_string()
    } else {
        format!("{}{}", PORT_PREFIX, name)
    }
}

fn template(data: &NodeData) -> &str {
    data.config.get_str_or("text", "")
}

/// Text template with `{{ variable }}` substitution
pub struct TextNode;

impl NodeEvaluator for TextNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Text
    }

    fn evaluate(&self, data: &NodeData, incoming: &str, target_handle: Option<&str>) -> StatePatch {
        let mut bindings = data.state.variable_values.clone();
        if let Some(name) = variable_for_handle(target_handle) {
            bindings.insert(name.to_string(), incoming.to_string());
        }
        StatePatch::value(render(template(data), &bindings)).with_variables(bindings)
    }

    fn ports(&self, data: &NodeData, _connected: &[Option<&str>]) -> NodePorts {
        let inputs = std::iter::once(DEFAULT_PORT.to_string()).chain(
            template_variables(template(data))
                .into_iter()
                .filter(|name| name != DEFAULT_PORT)
                .map(|name| handle_for_variable(&name)),
        );
        NodePorts::new(inputs, ["output"])
    }

    fn default_config(&self) -> NodeConfig {
        NodeConfig::new().with("text", "")
    }

    fn refresh(&self, data: &NodeData) -> Option<StatePatch> {
        Some(StatePatch::value(render(template(data), &data.state.variable_values)))
    }

    fn prune(&self, data: &NodeData, connected: &[Option<&str>]) -> Option<StatePatch> {
        let bindings: BTreeMap<String, String> = data
            .state
            .variable_values
            .iter()
            .filter(|(name, _)| {
                connected
                    .iter()
                    .any(|handle| variable_for_handle(*handle) == Some(name.as_str()))
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if bindings.len() == data.state.variable_values.len() {
            return None;
        }
        Some(StatePatch::value(render(template(data), &bindings)).with_variables(bindings))
    }

    fn description(&self) -> &str {
        "Text template with {{ variable }} inputs"
    }

    fn category(&self) -> &str {
        "core"
    }
}
