use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use companion_shell::avatar::{AvatarSink, TracingAvatar};
use companion_shell::chat::{DispatchMode, TokenCounter, TurnConfig, TurnOrchestrator};
use companion_shell::db;
use companion_shell::llm::OpenAiChatClient;
use companion_shell::notify::{BusyState, NoticeLevel, Notifier};
use companion_shell::voice::capture::{rms, AudioCapture};
use companion_shell::voice::playback::{AudioOutput, CpalOutput, PlaybackManager};
use companion_shell::voice::synthesis::Synthesizer;
use companion_shell::voice::{
    RecognitionGateway, SpeechService, SynthesisGateway, VoiceInteraction,
};
use companion_shell::{Config, SessionStore};

/// Companion - voice and text chat shell for an avatar companion
#[derive(Parser)]
#[command(name = "companion", version, about)]
struct Cli {
    /// Path to config file (defaults to the platform config directory)
    #[arg(short, long, env = "COMPANION_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive text chat (default)
    Chat,
    /// Fullscreen voice loop: press Enter to talk, Enter to stop, q to quit
    Voice,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test speech synthesis end to end
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,companion_shell=info",
        1 => "info,companion_shell=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Chat => chat_repl(load_config(cli.config.as_deref())?).await,
            Command::Voice => voice_loop(load_config(cli.config.as_deref())?).await,
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(load_config(cli.config.as_deref())?, &text).await,
        };
    }

    chat_repl(load_config(cli.config.as_deref())?).await
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => {
            let fallback = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            Config::load_from(path, fallback)?
        }
        None => Config::load()?,
    };
    Ok(config)
}

/// Everything a front door needs, wired together
struct App {
    store: Arc<SessionStore>,
    orchestrator: Arc<TurnOrchestrator>,
    interaction: Arc<VoiceInteraction>,
}

async fn build_app(config: &Config, mode: DispatchMode) -> anyhow::Result<App> {
    std::fs::create_dir_all(&config.data_dir)?;
    let pool = db::init(config.db_path())?;

    let notifier = Arc::new(ConsoleNotifier);
    let store = Arc::new(SessionStore::new(pool, notifier.clone()));
    store.initialize().await;

    let playback = Arc::new(PlaybackManager::new(Arc::new(CpalOutput)));
    let speech = Arc::new(SpeechService::new(
        Arc::new(SynthesisGateway::new(config.speech.clone())),
        playback,
        store.audio_cache(),
        notifier.clone(),
    ));

    let transport = Arc::new(OpenAiChatClient::new(
        config.llm.api_url.clone(),
        config.llm.api_key.clone(),
    ));
    let avatar: Arc<dyn AvatarSink> = Arc::new(TracingAvatar);

    let speech_for_turns = if config.speech.is_enabled() && config.auto_speak {
        Some(Arc::clone(&speech))
    } else {
        None
    };
    let orchestrator = Arc::new(TurnOrchestrator::new(
        store.clone(),
        transport,
        notifier.clone(),
        avatar,
        Arc::new(TokenCounter::new()),
        speech_for_turns,
        TurnConfig {
            model: config.llm.model.clone(),
            mode,
            auto_speak: config.auto_speak && mode == DispatchMode::Inline,
        },
    ));

    let interaction = Arc::new(VoiceInteraction::new(
        store.clone(),
        orchestrator.clone(),
        RecognitionGateway::new(config.recognizer.clone()),
        speech,
        notifier.clone(),
    ));

    Ok(App { store, orchestrator, interaction })
}

async fn chat_repl(config: Config) -> anyhow::Result<()> {
    let app = build_app(&config, DispatchMode::Inline).await?;

    println!("Companion chat. Type a message, or /clear, /archive, /quit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print_prompt();
        let Some(line) = lines.next_line().await? else { break };
        match line.trim() {
            "" => {}
            "/quit" | "/q" => break,
            "/clear" => app.orchestrator.clear_chat(),
            "/archive" => {
                if let Err(e) = app.orchestrator.archive_conversation().await {
                    tracing::warn!(error = %e, "archive failed");
                }
            }
            text => {
                if app.orchestrator.send_turn(text).await.is_ok() {
                    if let Some(reply) = app.store.last_message() {
                        println!("companion> {}", reply.content);
                    }
                }
            }
        }
    }

    Ok(())
}

async fn voice_loop(config: Config) -> anyhow::Result<()> {
    let app = build_app(&config, DispatchMode::Fullscreen).await?;

    println!("Voice mode. Enter starts recording, Enter again stops, q quits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        println!("[press Enter to talk]");
        let Some(line) = lines.next_line().await? else { break };
        if line.trim() == "q" {
            app.interaction.force_exit();
            break;
        }

        app.interaction.start_recording()?;
        println!("[recording; press Enter to stop]");
        let _ = lines.next_line().await?;
        app.interaction.stop_recording().await;

        if let Some(reply) = app.store.last_message() {
            println!("companion> {}", reply.content);
        }
    }

    Ok(())
}

async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n---");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_buffer();
        let energy = rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);
    }

    capture.stop();
    println!("---\nIf you saw movement in the meter, your mic is working.");
    Ok(())
}

async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sample_rate = 24000_f32;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let num_samples = (sample_rate * 2.0) as usize;
    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate;
            (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.3
        })
        .collect();

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    tokio::task::spawn_blocking(move || CpalOutput.render(samples, cancel_rx)).await??;

    println!("If you heard the tone, your speakers are working.");
    Ok(())
}

async fn test_tts(config: Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let gateway = SynthesisGateway::new(config.speech);
    let audio = gateway.synthesize(text).await?;
    println!("Synthesized {} bytes of audio", audio.len());

    let playback = PlaybackManager::new(Arc::new(CpalOutput));
    let outcome = playback.play(&audio).await?;
    println!("Playback {outcome:?}");
    Ok(())
}

fn print_prompt() {
    print!("you> ");
    use std::io::Write;
    let _ = std::io::stdout().flush();
}

/// Notifier printing to the terminal
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        match level {
            NoticeLevel::Info => println!("[info] {message}"),
            NoticeLevel::Success => println!("[ok] {message}"),
            NoticeLevel::Warning => println!("[warn] {message}"),
            NoticeLevel::Error => eprintln!("[error] {message}"),
        }
    }

    fn set_busy(&self, busy: Option<BusyState>) {
        if let Some(state) = busy {
            tracing::debug!(?state, "input busy");
        }
    }
}
