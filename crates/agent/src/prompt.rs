//! System-prompt composition.
//!
//! Templates use `{{key}}` placeholders where `key` is one or more ASCII
//! word characters. Substitution is a single pass over the template, so
//! values that themselves contain `{{...}}` are never expanded again.

use convoy_core::TemplateValue;
use std::collections::HashMap;

/// Template used when the agent is not given one.
pub const DEFAULT_SYSTEM_TEMPLATE: &str = "You are a {{name}}.
{{description}}
Provide helpful and accurate information based on your expertise.
You will engage in an open-ended conversation, providing helpful and accurate information based on your expertise.
The conversation will proceed as follows:
- The human may ask an initial question or provide a prompt on any topic.
- You will provide a relevant and informative response.
- The human may then follow up with additional questions or prompts related to your previous response, allowing for a multi-turn dialogue on that topic.
- Or, the human may switch to a completely new and unrelated topic at any point.
- You will seamlessly shift your focus to the new topic, providing thoughtful and coherent responses based on your broad knowledge base.
Throughout the conversation, you should aim to:
- Understand the context and intent behind each new question or prompt.
- Provide substantive and well-reasoned responses that directly address the query.
- Draw insights and connections from your extensive knowledge when appropriate.
- Ask for clarification if any part of the question or prompt is ambiguous.
- Maintain a consistent, respectful, and engaging tone tailored to the human's communication style.
- Seamlessly transition between topics as the human introduces new subjects.";

/// Separator placed between the prompt and retrieved context.
pub const CONTEXT_PREAMBLE: &str = "\nHere is the context to use to answer the user's question:\n";

/// Replace every `{{key}}` whose key is present in `variables`.
///
/// List values are joined with newlines. Unknown keys and anything that is
/// not a well-formed placeholder are left exactly as written.
pub fn compose(template: &str, variables: &HashMap<String, TemplateValue>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let key_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        let key = &after[..key_len];

        if key_len > 0
            && after[key_len..].starts_with("}}")
            && let Some(value) = variables.get(key)
        {
            out.push_str(&value.render());
            rest = &after[key_len + 2..];
        } else {
            // Advance one brace so "{{{key}}}" still matches at the inner pair.
            out.push('{');
            rest = &rest[start + 1..];
        }
    }

    out.push_str(rest);
    out
}

/// Append retrieved context to a composed prompt.
pub fn with_context(prompt: String, retrieved: Option<&str>) -> String {
    match retrieved {
        Some(context) => format!("{prompt}{CONTEXT_PREAMBLE}{context}"),
        None => prompt,
    }
}

/// Variables for a prompt: the agent's name and description, overridden by
/// anything the caller supplied.
pub fn agent_variables(
    name: &str,
    description: &str,
    overrides: &HashMap<String, TemplateValue>,
) -> HashMap<String, TemplateValue> {
    let mut variables = HashMap::from([
        ("name".to_string(), TemplateValue::from(name)),
        ("description".to_string(), TemplateValue::from(description)),
    ]);
    variables.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    variables
}
