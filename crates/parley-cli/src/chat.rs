//! `parley chat`: the voice chatbot

use anyhow::Context;
use parley_agent::{
    Agent, AgentConfig, Cast, DialogLog, Persona, ProviderTransport, TurnController,
};
use parley_ai::{ChatModel, DEFAULT_CHAT_MODEL, providers::OpenAIProvider};
use parley_speech::{
    CommandPlayer, RecognitionBuffer, Speaker, SpeechService, StdinRecognizer, SynthesisClient,
    SynthesisEngine,
};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

pub const DEFAULT_PERSONA: &str = "duo";

#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub persona: Option<String>,
    pub model: Option<String>,
    pub text_only: bool,
}

/// A built-in persona by name, otherwise a persona TOML file
pub fn resolve_persona(name: &str) -> anyhow::Result<Persona> {
    if let Some(persona) = Persona::preset(name) {
        return Ok(persona);
    }
    Persona::load(Path::new(name)).with_context(|| format!("Failed to load persona {}", name))
}

/// Start the synthesis engine client and the shared speech queue
pub fn speech_service(cfg: &Config) -> anyhow::Result<(SpeechService, SynthesisEngine)> {
    let engine = cfg.engine()?;
    let host = cfg.speech.host.as_deref().unwrap_or("127.0.0.1");
    let port = cfg.speech.port.unwrap_or_else(|| engine.default_port());
    let client =
        SynthesisClient::new(host, port).with_speed_scale(cfg.speech.speed_scale.unwrap_or(1.0));
    tracing::debug!("speech engine {} at {}", engine, client.base_url());

    let player = match cfg.speech.player.as_deref() {
        Some(command) => CommandPlayer::from_command_line(command)
            .with_context(|| format!("Invalid player command: {:?}", command))?,
        None => CommandPlayer::platform_default(),
    };

    Ok((
        SpeechService::spawn(Arc::new(client), Arc::new(player)),
        engine,
    ))
}

pub async fn run(cfg: &Config, options: ChatOptions) -> anyhow::Result<()> {
    let persona_name = options
        .persona
        .or_else(|| cfg.chat.persona.clone())
        .unwrap_or_else(|| DEFAULT_PERSONA.to_string());
    let persona = resolve_persona(&persona_name)?;

    let provider = OpenAIProvider::from_key_or_env(cfg.api_key("openai"))
        .context("No OpenAI API key: set OPENAI_API_KEY or add it to the config file")?;
    let model_id = options
        .model
        .or_else(|| cfg.model.clone())
        .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string());

    let speakers: Vec<Arc<dyn Speaker>> = if options.text_only {
        Vec::new()
    } else {
        let (service, engine) = speech_service(cfg)?;
        (0..persona.characters.len())
            .map(|i| {
                let id = cfg
                    .speech
                    .speaker_ids
                    .get(i)
                    .copied()
                    .unwrap_or_else(|| engine.default_speaker_id());
                Arc::new(service.voice(id)) as Arc<dyn Speaker>
            })
            .collect()
    };
    let cast = Cast::from_persona(&persona, speakers);

    let transport = Arc::new(ProviderTransport::new(Arc::new(provider)));
    let agent = Agent::new(
        persona,
        cast,
        transport,
        AgentConfig {
            model: ChatModel::new(model_id),
        },
    )
    .with_dialog_log(DialogLog::autosave(cfg.log_directory()));
    if let Some(log) = agent.dialog_log() {
        tracing::info!("Dialog log: {}", log.path().display());
    }

    let recognition = RecognitionBuffer::new();
    let cancel = CancellationToken::new();

    let recognizer = tokio::spawn(StdinRecognizer::new().run(recognition.clone(), cancel.clone()));
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    println!(
        "parley chat ({}) - type what you would say, pause to let them answer. Ctrl-C to quit.",
        agent.persona().name
    );
    let mut controller =
        TurnController::new(agent, recognition).with_config(cfg.controller_config());
    let result = controller.run(cancel.clone()).await;

    cancel.cancel();
    match recognizer.await {
        Ok(Err(e)) => tracing::warn!("recognition input failed: {}", e),
        Err(e) => tracing::warn!("recognition task failed: {}", e),
        Ok(Ok(())) => {}
    }
    result.context("Conversation loop failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_builtin_persona() {
        let persona = resolve_persona("companion").unwrap();
        assert_eq!(persona.characters.len(), 1);
    }

    #[test]
    fn test_resolve_persona_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guide.toml");
        std::fs::write(
            &path,
            r#"
name = "guide"
instructions = "Be brief."
profile = ""
io_format = 'Answer as {"guide": "..."}'

[[characters]]
key = "guide"
name = "Guide"
"#,
        )
        .unwrap();

        let persona = resolve_persona(path.to_str().unwrap()).unwrap();
        assert_eq!(persona.name, "guide");
    }

    #[test]
    fn test_unknown_persona_is_an_error() {
        assert!(resolve_persona("/nonexistent/persona.toml").is_err());
    }

    #[tokio::test]
    async fn test_speech_service_rejects_unknown_engine() {
        let cfg: Config = toml::from_str("[speech]\nengine = \"festival\"").unwrap();
        assert!(speech_service(&cfg).is_err());
    }
}
