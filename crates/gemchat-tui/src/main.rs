use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gemchat_core::{
    Config, ConversationState, ConversationStore, GeminiClient, JsonFileStore, LiveModelSource,
    MemoryStore, MockSource, Persona, ResponseSource, TurnController, TurnOutcome,
};
use tracing_subscriber::EnvFilter;

mod app;
mod handler;
mod tui;
mod ui;

use app::{next_fragment, App, Controller};
use tui::{AppEvent, EventHandler};

const LOG_ENV: &str = "GEMCHAT_LOG";

#[derive(Parser)]
#[command(name = "gemchat")]
#[command(version, about = "Chat with Gemini from the terminal, with personas and an offline mock mode")]
struct Cli {
    /// Use canned replies instead of the Gemini API
    #[arg(long, global = true)]
    mock: bool,
    /// Gemini model, e.g. models/gemini-flash-latest
    #[arg(long, global = true)]
    model: Option<String>,
    /// History file (defaults to the data directory)
    #[arg(long, global = true)]
    history: Option<PathBuf>,
    /// Keep the conversation in memory only
    #[arg(long, global = true)]
    no_persist: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat (default)
    Chat,
    /// Send one message and stream the reply to stdout
    Ask {
        /// Your message
        #[arg(required = true)]
        prompt: Vec<String>,
        /// Persona label, e.g. "Code Reviewer"
        #[arg(short, long)]
        persona: Option<String>,
        /// Sampling temperature (0.0 - 2.0)
        #[arg(short, long)]
        temperature: Option<f32>,
    },
    /// List Gemini models available to your API key
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // GOOGLE_API_KEY may come from a .env file in the working directory
    dotenvy::dotenv().ok();
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Ignoring unreadable config: {}", e);
        Config::new()
    });

    match cli.command {
        None | Some(Commands::Chat) => {
            init_logging(true)?;
            run_chat(&cli, &config).await
        }
        Some(Commands::Ask { ref prompt, ref persona, temperature }) => {
            init_logging(false)?;
            let prompt = prompt.join(" ");
            ask(&cli, &config, &prompt, persona.as_deref(), temperature).await
        }
        Some(Commands::Models) => {
            init_logging(false)?;
            list_models(&config).await
        }
    }
}

/// The TUI owns the terminal, so its logs go to a file. One-shot commands log to stderr.
fn init_logging(to_file: bool) -> Result<()> {
    let default_level = if to_file { "info" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));

    if to_file {
        let dir = dirs::data_dir()
            .context("Could not find data directory")?
            .join("gemchat");
        std::fs::create_dir_all(&dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("gemchat.log"))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

fn client_for(config: &Config, api_key: &str) -> GeminiClient {
    match config.base_url.as_deref() {
        Some(base_url) => GeminiClient::with_base_url(api_key, base_url),
        None => GeminiClient::new(api_key),
    }
}

fn model_name(cli: &Cli, config: &Config) -> Option<String> {
    cli.model.clone().or_else(|| config.model.clone())
}

/// Build a controller over `store`. Live mode without an API key is an error;
/// mock mode never needs one.
fn build_controller(
    cli: &Cli,
    config: &Config,
    store: Box<dyn ConversationStore>,
) -> Result<(Controller, String)> {
    let mock_mode = config.mock_mode(cli.mock);
    let api_key = config.startup_key(mock_mode, Config::env_api_key())?;

    let model = model_name(cli, config);
    let live = api_key.map(|key| LiveModelSource::new(client_for(config, &key), model.as_deref()));
    let model = live
        .as_ref()
        .map(|source| source.model().to_string())
        .unwrap_or_else(|| "none".to_string());
    let live = live.map(|source| Box::new(source) as Box<dyn ResponseSource>);

    let mock = MockSource::with_delay(Duration::from_millis(config.mock_delay_ms()));
    let mut controller = TurnController::new(store, Box::new(mock), live);
    if mock_mode {
        controller.set_mock(true)?;
    }

    tracing::info!(
        source = controller.source_label(),
        model = %model,
        turns = controller.turns().len(),
        "controller ready"
    );
    Ok((controller, model))
}

fn open_store(cli: &Cli, config: &Config) -> Result<Box<dyn ConversationStore>> {
    if cli.no_persist {
        return Ok(Box::new(MemoryStore::new()));
    }
    let path = match cli.history.clone().or_else(|| config.history_path.clone()) {
        Some(path) => path,
        None => JsonFileStore::default_path()?,
    };
    let fallback = ConversationState::new(config.persona(), config.temperature());
    Ok(Box::new(JsonFileStore::new(path).with_fallback(fallback)))
}

async fn run_chat(cli: &Cli, config: &Config) -> Result<()> {
    let store = open_store(cli, config)?;
    let (controller, model) = build_controller(cli, config, store)?;
    let mut app = App::new(controller, model, config.key_source());

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let result = run_app(&mut terminal, &mut app).await;
    tui::restore()?;

    if let Some(warning) = app.controller.persistence_warning() {
        eprintln!("Warning: chat history was not saved: {}", warning);
    }
    result
}

enum Step {
    Event(Option<AppEvent>),
    Fragment(Option<Result<String, gemchat_core::UpstreamError>>),
}

async fn run_app(terminal: &mut tui::Tui, app: &mut App) -> Result<()> {
    let mut events = EventHandler::new();

    loop {
        terminal.draw(|frame| ui::render(app, frame))?;

        // A reply streams in between key presses, so input stays responsive
        let step = tokio::select! {
            event = events.next() => Step::Event(event),
            fragment = next_fragment(&mut app.active) => Step::Fragment(fragment),
        };

        match step {
            Step::Event(Some(event)) => handler::handle_event(app, event)?,
            Step::Event(None) => break,
            Step::Fragment(fragment) => app.on_fragment(fragment),
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

async fn ask(
    cli: &Cli,
    config: &Config,
    prompt: &str,
    persona: Option<&str>,
    temperature: Option<f32>,
) -> Result<()> {
    // One-shot questions never touch the saved history
    let persona = persona.map(Persona::lookup).unwrap_or_else(|| config.persona());
    let temperature = temperature.unwrap_or_else(|| config.temperature());
    let store = MemoryStore::new();
    store.save(&ConversationState::new(persona, temperature))?;

    let (mut controller, _) = build_controller(cli, config, Box::new(store))?;
    controller.submit(prompt)?;

    let mut stdout = std::io::stdout();
    let mut write_error = None;
    let outcome = controller
        .generate(|fragment| write_fragment(&mut stdout, fragment, &mut write_error))
        .await;

    if let Some(e) = write_error {
        return Err(anyhow::Error::new(e).context("Failed to write reply to stdout"));
    }
    writeln!(stdout)?;

    match outcome {
        Some(TurnOutcome::Failed(e)) => Err(e.into()),
        _ => Ok(()),
    }
}

/// Write one fragment and flush. After the first failure (e.g. a closed pipe)
/// the error is kept and later fragments are dropped.
fn write_fragment(out: &mut impl Write, fragment: &str, error: &mut Option<std::io::Error>) {
    if error.is_some() {
        return;
    }
    if let Err(e) = out.write_all(fragment.as_bytes()).and_then(|_| out.flush()) {
        *error = Some(e);
    }
}

async fn list_models(config: &Config) -> Result<()> {
    let api_key = config.require_api_key()?;
    let models = client_for(config, &api_key).list_models().await?;

    for model in models {
        let marker = if model.supports_generation { "*" } else { " " };
        if model.display_name.is_empty() {
            println!("{} {}", marker, model.name);
        } else {
            println!("{} {} ({})", marker, model.name, model.display_name);
        }
    }
    println!("\n* supports generateContent");
    Ok(())
}
