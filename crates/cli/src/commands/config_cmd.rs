//! `convoy config`: Configuration management commands.

use convoy_config::AgentSettings;
use convoy_providers::OpenAiCompatProvider;
use std::path::{Path, PathBuf};

/// Load settings from `path`, or from the default location.
pub fn load(path: Option<&Path>) -> anyhow::Result<AgentSettings> {
    let settings = match path {
        Some(path) => AgentSettings::load_with_overrides(path)?,
        None => AgentSettings::load()?,
    };
    Ok(settings)
}

fn resolve_path(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| AgentSettings::config_dir().join("config.toml"))
}

pub fn show(path: Option<&Path>) -> anyhow::Result<()> {
    let settings = load(path)?;
    println!("{}", settings.to_redacted_toml());
    Ok(())
}

pub fn path(path: Option<&Path>) {
    println!("{}", resolve_path(path).display());
}

pub fn validate(path: Option<&Path>) -> anyhow::Result<()> {
    println!("Validating {}...", resolve_path(path).display());

    let settings = match load(path) {
        Ok(settings) => settings,
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e);
        }
    };
    println!("   Config parsed successfully");

    if let Err(e) = OpenAiCompatProvider::try_new(
        "openai",
        settings.base_url.clone(),
        settings.api_key.clone().unwrap_or_default(),
    ) {
        println!("   Warning: {e} (set CONVOY_API_KEY or OPENAI_API_KEY)");
    }

    println!();
    println!("   Agent:      {}", settings.name);
    println!("   Model:      {}", settings.model);
    println!("   Endpoint:   {}", settings.base_url);
    println!("   Streaming:  {}", settings.streaming);
    println!("   Tool rounds: {}", settings.tool_max_recursions);
    Ok(())
}
