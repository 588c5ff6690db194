use once_cell::sync::Lazy;
use pipecore::{NodeConfig, NodeData, NodeEvaluator, NodeKind, NodePorts, StatePatch};
use regex::Regex;

static EQUALITY: Lazy<Regex> = Lazy::new(|| Regex::new("===|==").expect("valid equality pattern"));

static CONTAINS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i).*contains\s+['"]?([^'"]+)['"]?.*"#).expect("valid contains pattern")
});

static NUMBER_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:Infinity|\d+\.?\d*(?:[eE][+-]?\d+)?|\.\d+(?:[eE][+-]?\d+)?)")
        .expect("valid number pattern")
});

/// Parse the longest numeric prefix, ignoring leading whitespace and any
/// trailing text ("12px" is 12).
pub fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let matched = NUMBER_PREFIX.find(s)?.as_str();
    matched.parse::<f64>().ok()
}

enum Operand {
    Value,
    Length,
}

fn operand(left: &str) -> Option<Operand> {
    match left.trim() {
        "value" | "input" => Some(Operand::Value),
        "length" => Some(Operand::Length),
        _ => None,
    }
}

fn first_two<'a>(mut parts: impl Iterator<Item = &'a str>) -> Option<(&'a str, &'a str)> {
    Some((parts.next()?, parts.next()?))
}

fn compare(expression: &str, op: char, input: &str, test: fn(f64, f64) -> bool) -> bool {
    let Some((left, right)) = first_two(expression.split(op)) else {
        return false;
    };
    let lhs = match operand(left) {
        Some(Operand::Value) => parse_number(input),
        Some(Operand::Length) => Some(input.chars().count() as f64),
        None => None,
    };
    match (lhs, parse_number(right.trim())) {
        (Some(a), Some(b)) => test(a, b),
        _ => false,
    }
}

fn equals(expression: &str, input: &str) -> bool {
    let Some((left, right)) = first_two(EQUALITY.split(expression)) else {
        return false;
    };
    let right = right.trim();
    match operand(left) {
        Some(Operand::Value) => input == right.replace(['\'', '"'], ""),
        Some(Operand::Length) => {
            parse_number(right).map_or(false, |n| input.chars().count() as f64 == n)
        }
        None => false,
    }
}

/// Evaluate a condition expression against an input string.
///
/// Supported shapes: `value > n`, `value < n`, `length > n`, `length < n`,
/// `value == 'text'`, `length == n` and `contains 'term'`. Anything else is
/// false.
pub fn evaluate_expression(expression: &str, input: &str) -> bool {
    if expression.contains('>') {
        compare(expression, '>', input, |a, b| a > b)
    } else if expression.contains('<') {
        compare(expression, '<', input, |a, b| a < b)
    } else if expression.contains("==") {
        equals(expression, input)
    } else if expression.contains("contains") {
        // an expression the pattern cannot split is searched for as a whole
        let term = CONTAINS
            .captures(expression)
            .and_then(|caps| caps.get(1))
            .map_or(expression, |m| m.as_str());
        input.to_lowercase().contains(&term.to_lowercase())
    } else {
        false
    }
}

/// Gate node routing its input to the `true` or `false` port
pub struct ConditionNode;

impl NodeEvaluator for ConditionNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Condition
    }

    fn evaluate(&self, data: &NodeData, incoming: &str, _target_handle: Option<&str>) -> StatePatch {
        let expression = data.config.get_str_or("expression", "");
        let result = evaluate_expression(expression, incoming);
        StatePatch::value(incoming).with_condition(result)
    }

    fn ports(&self, _data: &NodeData, _connected: &[Option<&str>]) -> NodePorts {
        NodePorts::new(["input"], ["true", "false"])
    }

    fn default_config(&self) -> NodeConfig {
        NodeConfig::new().with("expression", "")
    }

    fn description(&self) -> &str {
        "Branch by condition"
    }

    fn category(&self) -> &str {
        "processing"
    }
}
