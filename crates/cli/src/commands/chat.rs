//! `convoy chat`: Single-message or interactive chat.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use convoy_agent::{AgentOutput, ChatAgent, ChatAgentOptions, DEFAULT_MAX_TOKENS};
use convoy_config::AgentSettings;
use convoy_core::{InferenceConfig, Message};
use convoy_providers::OpenAiCompatProvider;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use super::config_cmd;

pub struct ChatArgs {
    pub message: Option<String>,
    pub stream: bool,
    pub model: Option<String>,
    pub user: String,
    pub session: Option<String>,
}

/// Map loaded settings to agent options.
pub fn agent_options(settings: &AgentSettings) -> ChatAgentOptions {
    ChatAgentOptions {
        name: settings.name.clone(),
        description: settings.description.clone(),
        model: settings.model.clone(),
        streaming: settings.streaming,
        inference: InferenceConfig {
            max_tokens: settings.inference.max_tokens.or(Some(DEFAULT_MAX_TOKENS)),
            ..settings.inference.clone()
        },
        system_prompt: settings.system_prompt.clone(),
        format_response_as_json: settings.format_response_as_json,
        tools: Vec::new(),
        tool_max_recursions: settings.tool_max_recursions,
    }
}

pub async fn run(config_path: Option<&Path>, args: ChatArgs) -> anyhow::Result<()> {
    let mut settings = config_cmd::load(config_path)?;
    if let Some(model) = args.model {
        settings.model = model;
    }
    if args.stream {
        settings.streaming = true;
    }

    let provider = OpenAiCompatProvider::try_new(
        "openai",
        settings.base_url.clone(),
        settings.api_key.clone().unwrap_or_default(),
    )
    .context("set CONVOY_API_KEY or OPENAI_API_KEY, or add api_key to config.toml")?;
    let provider = Arc::new(provider);
    let agent = ChatAgent::builder(agent_options(&settings), provider).build()?;

    let session = args
        .session
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    debug!(agent = %agent.id(), session = %session, "Starting chat");

    if let Some(message) = args.message {
        // Single message mode
        ask(&agent, &message, &args.user, &session, &[]).await?;
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  Convoy Interactive Mode");
    println!();
    println!("  Agent:     {}", agent.name());
    println!("  Model:     {}", settings.model);
    println!("  Session:   {session}");
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut history: Vec<Message> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        match ask(&agent, input, &args.user, &session, &history).await {
            Ok(answer) => {
                history.push(Message::user(input));
                history.push(Message::assistant(answer));
            }
            Err(e) => eprintln!("  [Error] {e}"),
        }
        println!();
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}

/// Send one input and print the answer. Returns the full answer text.
async fn ask(
    agent: &ChatAgent,
    input: &str,
    user: &str,
    session: &str,
    history: &[Message],
) -> anyhow::Result<String> {
    let response = agent
        .process_request(input, user, session, history, HashMap::new())
        .await?;

    match response.output {
        AgentOutput::Message(message) => {
            let text = message.first_text().unwrap_or_default().to_string();
            println!("{text}");
            Ok(text)
        }
        AgentOutput::Stream(mut stream) => {
            let mut text = String::new();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                print!("{chunk}");
                std::io::stdout().flush()?;
                text.push_str(&chunk);
            }
            println!();
            Ok(text)
        }
    }
}
