//! Colloquy CLI — a voice conversation in the terminal.
//!
//! Connects to the realtime endpoint, wires the microphone and speaker to
//! the turn coordinator, and prints the assistant's transcript as it speaks.
//! Ctrl-C tears the session down cleanly.

use anyhow::Context;
use colloquy_voice::{
    CaptureConfig, CoordinatorConfig, CpalCapture, PlaybackConfig, PlaybackStrategy,
    RodioPlayback, TurnCoordinator, VoiceError, WsTransport,
};
use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_REALTIME_URL: &str =
    "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview-2024-10-01";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[colloquy] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let api_key = std::env::var("OPENAI_API_KEY")
        .context("OPENAI_API_KEY is missing (set it in .env or the environment)")?;
    let url =
        std::env::var("COLLOQUY_REALTIME_URL").unwrap_or_else(|_| DEFAULT_REALTIME_URL.into());

    let mut request = url
        .as_str()
        .into_client_request()
        .context("invalid realtime URL")?;
    request.headers_mut().insert(
        "Authorization",
        HeaderValue::from_str(&format!("Bearer {}", api_key))
            .context("API key contains invalid header characters")?,
    );
    request
        .headers_mut()
        .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

    let (ws, _response) = connect_async(request)
        .await
        .context("connect to realtime endpoint")?;
    tracing::info!(url = %url, "connected to realtime endpoint");

    let (transport, transport_rx) = WsTransport::spawn(ws);

    let capture = CpalCapture::new(CaptureConfig::default());
    let (playback, playback_rx) = RodioPlayback::new(PlaybackConfig::default())?;

    let config = coordinator_config_from_env();
    tracing::info!(
        restart_delay_ms = config.restart_delay.as_millis() as u64,
        strategy = ?config.playback_strategy,
        voice = %config.session.voice,
        "starting conversation"
    );

    let (coordinator, shutdown) = TurnCoordinator::new(
        config,
        Box::new(capture),
        Box::new(playback),
        playback_rx,
        transport,
        transport_rx,
    );
    let coordinator = coordinator
        .with_transcript_observer(Arc::new(|delta: &str| {
            print!("{}", delta);
            let _ = std::io::stdout().flush();
        }))
        .with_assistant_observer(Arc::new(|content: &str| {
            println!(
                "\n[{}] assistant: {}",
                chrono::Local::now().format("%H:%M:%S"),
                content
            );
        }));

    let mut run = std::pin::pin!(coordinator.run());
    let result = tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("CTRL-C received; shutting down");
            shutdown.shutdown();
            run.await
        }
    };

    match result {
        Ok(()) => tracing::info!("conversation ended"),
        Err(VoiceError::TransportClosed) => {
            tracing::warn!("connection closed by the endpoint");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

/// Apply `COLLOQUY_*` environment overrides on top of the defaults.
fn coordinator_config_from_env() -> CoordinatorConfig {
    let mut config = CoordinatorConfig::default();

    if let Some(ms) = std::env::var("COLLOQUY_RESTART_DELAY_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
    {
        config.restart_delay = Duration::from_millis(ms);
    }

    if let Ok(strategy) = std::env::var("COLLOQUY_PLAYBACK") {
        match strategy.to_ascii_lowercase().as_str() {
            "buffered" => config.playback_strategy = PlaybackStrategy::Buffered,
            "streaming" => config.playback_strategy = PlaybackStrategy::Streaming,
            other => tracing::warn!(
                "unknown COLLOQUY_PLAYBACK '{}'; keeping {:?}",
                other,
                config.playback_strategy
            ),
        }
    }

    if let Ok(voice) = std::env::var("COLLOQUY_VOICE") {
        config.session.voice = voice;
    }
    if let Ok(instructions) = std::env::var("COLLOQUY_INSTRUCTIONS") {
        config.session.instructions = instructions;
    }
    if let Ok(greeting) = std::env::var("COLLOQUY_GREETING") {
        config.session.greeting = Some(greeting);
    }

    config
}
