use pipecore::{NodeConfig, NodeData, NodeEvaluator, NodeKind, StatePatch};

pub const GOOGLE_RESPONSE: &str = "Google is a multinational technology company founded in 1998. It specializes in internet-related services and products.";
pub const MICROSOFT_RESPONSE: &str = "Microsoft is a multinational technology corporation founded in 1975. It develops software, consumer electronics, and personal computers.";
pub const GREETING_RESPONSE: &str = "Hello! How can I assist you today? I'm here to help answer questions and provide information.";

const QUESTION_PREFIXES: [&str; 2] = ["what is ", "what's "];

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn question_topic(input: &str) -> Option<&str> {
    QUESTION_PREFIXES.iter().find_map(|prefix| {
        input
            .get(..prefix.len())
            .filter(|head| head.eq_ignore_ascii_case(prefix))
            .map(|_| input[prefix.len()..].trim())
    })
}

/// Deterministic offline stand-in for a language model call.
pub fn simulate(model: &str, input: &str) -> String {
    let trimmed = input.trim();
    let lower = trimmed.to_lowercase();

    if lower.contains("google") || lower.contains(".com") {
        GOOGLE_RESPONSE.to_string()
    } else if lower.contains("microsoft") {
        MICROSOFT_RESPONSE.to_string()
    } else if lower.contains("hello") || lower.contains("hi ") || lower == "hi" {
        GREETING_RESPONSE.to_string()
    } else if let Some(topic) = question_topic(trimmed) {
        format!(
            "{} is a subject that involves multiple aspects and applications.",
            capitalize(topic)
        )
    } else {
        match model {
            "gpt-3.5" => format!(
                "Regarding \"{}\": This topic involves multiple aspects and applications.",
                input
            ),
            "claude" => format!("\"{}\" is a topic that can be approached from several angles.", input),
            "llama" => format!("Your query about \"{}\" touches on several interesting points.", input),
            _ => format!(
                "I understand you're asking about \"{}\". This is an important topic worth exploring. Could you provide more specific details?",
                input
            ),
        }
    }
}

/// Simulated LLM node
pub struct LlmNode;

impl NodeEvaluator for LlmNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Llm
    }

    fn evaluate(&self, data: &NodeData, incoming: &str, _target_handle: Option<&str>) -> StatePatch {
        let model = data.config.get_str_or("model", "gpt-4");
        StatePatch::value(simulate(model, incoming))
    }

    fn default_config(&self) -> NodeConfig {
        NodeConfig::new().with("model", "gpt-4").with("temperature", 0.7)
    }

    fn description(&self) -> &str {
        "Simulated language model response"
    }

    fn category(&self) -> &str {
        "core"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_responses() {
        assert_eq!(simulate("gpt-4", "Tell me about googles history"), GOOGLE_RESPONSE);
        assert_eq!(simulate("gpt-4", "visit example.com"), GOOGLE_RESPONSE);
        assert_eq!(simulate("claude", "MICROSOFT"), MICROSOFT_RESPONSE);
        assert_eq!(simulate("gpt-4", "  hi  "), GREETING_RESPONSE);
        assert_eq!(simulate("gpt-4", "hi there"), GREETING_RESPONSE);
        assert_eq!(simulate("gpt-4", "Hello"), GREETING_RESPONSE);
    }

    #[test]
    fn test_what_is_topic() {
        assert_eq!(
            simulate("gpt-4", "What is rust"),
            "Rust is a subject that involves multiple aspects and applications."
        );
        assert_eq!(
            simulate("gpt-4", "what's ownership"),
            "Ownership is a subject that involves multiple aspects and applications."
        );
    }

    #[test]
    fn test_model_echo() {
        assert_eq!(
            simulate("llama", "borrowing"),
            "Your query about \"borrowing\" touches on several interesting points."
        );
        assert!(simulate("unknown-model", "borrowing").starts_with("I understand you're asking about \"borrowing\""));
    }

    #[test]
    fn test_blank_input_falls_back_to_echo() {
        assert_eq!(
            simulate("gpt-4", ""),
            "I understand you're asking about \"\". This is an important topic worth exploring. Could you provide more specific details?"
        );
        assert_eq!(
            simulate("gpt-3.5", "  "),
            "Regarding \"  \": This topic involves multiple aspects and applications."
        );
    }
}
