//! `parley say`: speak lines read from stdin

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::{chat::speech_service, config::Config};

pub async fn run(cfg: &Config, speaker_id: Option<u32>) -> anyhow::Result<()> {
    let (service, engine) = speech_service(cfg)?;
    let speaker_id = speaker_id
        .or_else(|| cfg.speech.speaker_ids.first().copied())
        .unwrap_or_else(|| engine.default_speaker_id());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                service.interrupt();
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let spoken = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                service.interrupt();
                break;
            }
            spoken = service.speak(&line, speaker_id) => spoken,
        };
        if let Err(e) = spoken {
            tracing::error!("Failed to speak {:?}: {}", line, e);
        }
    }
    Ok(())
}
