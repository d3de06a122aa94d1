use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    rc::Rc,
    time::Duration,
};

use clap::{Args, Parser, Subcommand};
use math_renderer::{
    config::{self, LogFormat, LoggingSettings},
    Document, EngineKind, EngineSelector, Error, JsonFileStore, MathSession, MemoryStore,
    PreferenceStore, Result, Settings,
};
use tokio::task::LocalSet;
use tracing::{debug, error, level_filters::LevelFilter, warn};
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

/// Render TeX formulas embedded in text with KaTeX or MathJax.
#[derive(Debug, Parser)]
#[command(name = "math-render", version, about)]
struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "MATH_RENDERER_CONFIG_FILE", value_name = "PATH")]
    config_file: Option<PathBuf>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    log_level: Option<LevelFilter>,

    /// Override the directory local asset fallbacks resolve against.
    #[arg(long = "static-root", value_name = "PATH")]
    static_root: Option<PathBuf>,

    /// Override the preference file.
    #[arg(long = "preferences", value_name = "PATH")]
    preferences: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Render every file as one element and print the result.
    Render(RenderArgs),
    /// Show or change the persisted engine.
    #[command(subcommand)]
    Engine(EngineCommand),
    /// Load the active engine and print the library status as JSON.
    Status(WaitArgs),
}

#[derive(Debug, Args)]
struct RenderArgs {
    /// Engine for this run only; the stored preference is left alone.
    #[arg(long, value_name = "NAME")]
    engine: Option<String>,

    #[command(flatten)]
    wait: WaitArgs,

    #[arg(required = true, value_name = "FILE")]
    files: Vec<PathBuf>,
}

#[derive(Debug, Args)]
struct WaitArgs {
    /// How long to wait for the engine to load.
    #[arg(long = "wait-secs", default_value_t = 15, value_name = "SECONDS")]
    wait_secs: u64,
}

#[derive(Debug, Subcommand)]
enum EngineCommand {
    /// Print the engine the next session will use.
    Show,
    /// Persist a new engine (`KaTeX` or `MathJax`).
    Set { name: String },
}

fn main() -> ExitCode {
    let cli = CliArgs::parse();
    let settings = match config::load(cli.config_file.as_deref()) {
        Ok(settings) => apply_overrides(settings, &cli),
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = init_tracing(&settings.logging) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };
    let local = LocalSet::new();
    match runtime.block_on(local.run_until(run(cli.command, settings))) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "math-render failed");
            ExitCode::FAILURE
        }
    }
}

fn apply_overrides(mut settings: Settings, cli: &CliArgs) -> Settings {
    if let Some(level) = cli.log_level {
        settings.logging.level = level;
    }
    if let Some(root) = &cli.static_root {
        settings.loader.static_root = root.clone();
    }
    if let Some(path) = &cli.preferences {
        settings.preferences.path = Some(path.clone());
    }
    settings
}

fn init_tracing(logging: &LoggingSettings) -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|err| Error::Config(format!("failed to install tracing subscriber: {err}")))
}

fn preference_store(settings: &Settings) -> Rc<dyn PreferenceStore> {
    match &settings.preferences.path {
        Some(path) => {
            let store = JsonFileStore::new(path);
            debug!(path = %store.path().display(), "engine preference file");
            Rc::new(store)
        }
        None => Rc::new(MemoryStore::new()),
    }
}

async fn run(command: Command, settings: Settings) -> Result<()> {
    match command {
        Command::Render(args) => render(args, settings).await,
        Command::Engine(command) => engine(command, &settings),
        Command::Status(args) => status(args, settings).await,
    }
}

async fn render(args: RenderArgs, settings: Settings) -> Result<()> {
    let store = match &args.engine {
        Some(name) => {
            let engine: EngineKind = name.parse()?;
            let store = MemoryStore::new();
            store.set(&settings.preferences.key, engine.as_str())?;
            Rc::new(store) as Rc<dyn PreferenceStore>
        }
        None => preference_store(&settings),
    };

    let mut document = Document::new();
    let mut ids = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let text = read_input(path).await?;
        ids.push(document.append_element([settings.render.element_marker.as_str()], text));
    }
    let document = document.shared();

    let session = MathSession::start(settings, store, document.clone())?;
    if !session
        .wait_until_ready(Duration::from_secs(args.wait.wait_secs))
        .await
    {
        return Err(Error::EngineNotReady(session.current_math_engine().to_string()));
    }
    session.process_all_math_elements().await;

    let document = document.borrow();
    for id in ids {
        if let Some(element) = document.element(id) {
            println!("{}", element.content());
        }
    }
    Ok(())
}

async fn read_input(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|err| Error::io(path, err))
}

fn engine(command: EngineCommand, settings: &Settings) -> Result<()> {
    if settings.preferences.path.is_none() {
        warn!("no preferences.path configured, the engine preference is not persisted");
    }
    let selector = EngineSelector::new(
        preference_store(settings),
        settings.preferences.key.clone(),
        settings.render.default_engine,
    );
    let engine = match command {
        EngineCommand::Show => selector.active_engine(),
        EngineCommand::Set { name } => selector.set_active_engine(&name)?,
    };
    println!("{engine}");
    Ok(())
}

async fn status(args: WaitArgs, settings: Settings) -> Result<()> {
    let store = preference_store(&settings);
    let session = MathSession::start(settings, store, Document::new().shared())?;
    session
        .wait_until_ready(Duration::from_secs(args.wait_secs))
        .await;
    let status = serde_json::to_string_pretty(&session.math_libraries_status())
        .map_err(|err| Error::Serialize(err.to_string()))?;
    println!("{status}");
    Ok(())
}
