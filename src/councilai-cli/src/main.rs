//! CouncilAI CLI - Council of Five
//!
//! A console front-end for the five-persona debate: type your name and
//! questions, watch the council argue, and keep a transcript of every debate.

mod capture;

use clap::Parser;
use colored::Colorize;
use councilai_core::chat_voice::{ChatVoiceChannel, ChatVoiceConfig};
use councilai_core::config::VoicesConfig;
use councilai_core::tts::{CouncilTts, generate_output_filename, save_wav};
use councilai_core::{
    AppState, CompletedDebate, Config, Control, CouncilCallback, CouncilError, CouncilEvent,
    CouncilOrchestrator, SeededRandom, TurnKind, transcript,
};
use std::env;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use capture::{COMMANDS, StdinCapture, spawn_stdin_reader};

#[derive(Parser)]
#[command(
    name = "councilai",
    version,
    about = "Council of Five - a live debate between five AI personas",
    long_about = "Ask a question and five AI personas debate it: a main answer, a callout, \
                  peer interventions and a closing verdict from the host."
)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Chat model used for every persona (overrides the config file)
    #[arg(short, long, value_name = "MODEL")]
    model: Option<String>,

    /// Spoken language of the debate (overrides the config file)
    #[arg(short, long, value_name = "LANGUAGE")]
    language: Option<String>,

    /// Your name; skips the onboarding introduction
    #[arg(short, long, value_name = "NAME")]
    name: Option<String>,

    /// Seed for reproducible persona selection and planning
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,

    /// Directory where transcripts are written
    #[arg(long, default_value = "transcripts", value_name = "DIR")]
    transcript_dir: PathBuf,

    /// Also render each completed debate to a WAV file
    #[arg(long)]
    audio: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(model) = &cli.model {
        config.debate.model = model.clone();
    }
    if let Some(language) = &cli.language {
        config.debate.language = language.clone();
    }

    let api_base = env::var("OPENAI_API_BASE")
        .or_else(|_| env::var("OPENAI_BASE_URL"))
        .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

    let api_key = env::var("OPENAI_API_KEY").unwrap_or_else(|_| {
        eprintln!(
            "{}",
            "Warning: OPENAI_API_KEY not set. API calls may fail.".yellow()
        );
        String::new()
    });

    let voice = ChatVoiceChannel::new(ChatVoiceConfig::new(api_base, api_key, &config.debate))?;

    let (controls_tx, controls_rx) = mpsc::unbounded_channel();
    let (utterances_tx, utterances_rx) = mpsc::unbounded_channel();
    let capture = StdinCapture::new(utterances_rx);

    let (debates_tx, debates_rx) = mpsc::unbounded_channel();
    let saver = tokio::spawn(save_transcripts(debates_rx, cli.transcript_dir.clone()));
    let voices = config.voices.clone();

    print_header(&config);

    let mut orchestrator = CouncilOrchestrator::new(config, voice, capture)?
        .with_callback(create_console_callback(debates_tx));
    if let Some(seed) = cli.seed {
        orchestrator = orchestrator.with_random(Box::new(SeededRandom::from_seed(seed)));
    }
    if let Some(name) = &cli.name {
        orchestrator = orchestrator.with_user_name(name.trim());
    }

    spawn_stdin_reader(controls_tx.clone(), utterances_tx);
    controls_tx.send(Control::Start)?;

    let completed = orchestrator.run(controls_rx).await;
    drop(orchestrator);
    if let Err(e) = saver.await {
        tracing::warn!("transcript writer stopped: {}", e);
    }

    if cli.audio && !completed.is_empty() {
        println!("{}", "Rendering audio...".dimmed());
        match render_audio(&completed, voices, &cli.transcript_dir).await {
            Ok(paths) => {
                for path in paths {
                    println!("{} {}", "Audio saved:".dimmed(), path.display());
                }
            }
            Err(e) => eprintln!("{} {}", "Error:".red().bold(), e),
        }
    }

    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!(
        "{}",
        format!("  Session closed after {} debate(s).", completed.len())
            .bright_green()
            .bold()
    );
    println!("{}", "═".repeat(70).bright_blue());
    println!();

    Ok(())
}

fn print_header(config: &Config) {
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!("{}", format!("  {}", "Council of Five".bold()).bright_blue().bold());
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    println!(
        "{} {}   {} {}",
        "Language:".bold(),
        config.debate.language.bright_white(),
        "Model:".bold(),
        config.debate.model.dimmed()
    );
    println!(
        "{}",
        format!("Type your answers and questions. Commands: {}", COMMANDS).dimmed()
    );
    println!("{}", "─".repeat(70).dimmed());
}

/// Write each completed debate's transcript as soon as it arrives.
async fn save_transcripts(mut debates: mpsc::UnboundedReceiver<CompletedDebate>, dir: PathBuf) {
    while let Some(debate) = debates.recv().await {
        match transcript::save(&debate, &dir) {
            Ok(path) => println!("{} {}", "Transcript saved:".dimmed(), path.display()),
            Err(e) => eprintln!("{} {}", "Error:".red().bold(), e),
        }
    }
}

/// Render every debate of the session to its own WAV file.
async fn render_audio(
    debates: &[CompletedDebate],
    voices: VoicesConfig,
    dir: &Path,
) -> Result<Vec<PathBuf>, CouncilError> {
    let mut tts = CouncilTts::new(voices).await?;
    tts.validate_all_voices()?;
    std::fs::create_dir_all(dir)?;

    let mut paths = Vec::with_capacity(debates.len());
    for debate in debates {
        let samples = tts.synthesize_debate(debate)?;
        let path = dir.join(generate_output_filename(debate));
        save_wav(&path, &samples)?;
        paths.push(path);
    }
    Ok(paths)
}

/// Create a callback that prints council events to the console and hands
/// completed debates to the writer.
fn create_console_callback(debates: mpsc::UnboundedSender<CompletedDebate>) -> CouncilCallback {
    Box::new(move |event| match event {
        CouncilEvent::StateChanged(state) => match state {
            AppState::ListeningName => {
                println!("{}", "▶ Your name:".bright_green().bold());
            }
            AppState::ListeningQuestion => {
                println!("{}", "▶ Your question:".bright_green().bold());
            }
            _ => tracing::debug!(?state, "state changed"),
        },
        CouncilEvent::TurnStarted {
            persona,
            kind,
            index,
            total,
        } => {
            let label = match kind {
                Some(kind) => format!("({} {}/{})", kind.label(), index + 1, total),
                None => "(Host)".to_string(),
            };
            println!();
            if kind == Some(TurnKind::Closing) {
                println!("{}", "─".repeat(70).bright_magenta());
            }
            println!(
                "{} {} {}",
                persona.emoji(),
                persona.name().bright_cyan().bold(),
                label.yellow()
            );
        }
        CouncilEvent::TurnFinished { text, .. } => {
            let wrapped = textwrap(&text, 66);
            for line in wrapped.lines() {
                println!("  {}", line);
            }
            println!();
        }
        CouncilEvent::DebateCompleted(debate) => {
            println!("{}", "═".repeat(70).bright_magenta());
            println!("{}", "  Debate concluded.".bright_green().bold());
            println!("{}", "═".repeat(70).bright_magenta());
            if debates.send(debate).is_err() {
                tracing::warn!("transcript writer is gone");
            }
        }
        CouncilEvent::Error(message) => {
            eprintln!("{} {}", "Error:".red().bold(), message);
            eprintln!("{}", "  Type /retry to try again or /reset to start over.".dimmed());
        }
    })
}

/// Simple text wrapping function.
fn textwrap(text: &str, width: usize) -> String {
    let mut result = String::new();
    let mut current_line_len = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if current_line_len + word_len + 1 > width && current_line_len > 0 {
            result.push('\n');
            current_line_len = 0;
        }
        if current_line_len > 0 {
            result.push(' ');
            current_line_len += 1;
        }
        result.push_str(word);
        current_line_len += word_len;
    }

    result
}
