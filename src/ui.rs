// UI layer: the `luma` command line. Each subcommand maps onto one
// `LumaClient` call; this module only parses arguments, prompts for the API
// key when needed, shows progress and renders results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use crossterm::style::Stylize;
use dialoguer::Password;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use std::time::Duration;

use crate::api::{
    ClientConfig, CredentialResolver, LumaClient, SearchQuery, SortOrder, Submission, DASHBOARD_URL,
};
use crate::error::LumaError;
use crate::logging;
use crate::models::{CameraType, CaptureInfo, CreditInfo, PrivacyLevel};

#[derive(Parser, Debug)]
#[command(
    name = "luma",
    version = env!("CARGO_PKG_VERSION"),
    about = "Submit captures to Luma AI and track their processing",
    arg_required_else_help = true
)]
pub struct Cli {
    /// API key for this invocation only (not saved).
    #[arg(long, global = true, env = "LUMA_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Custom API base URL.
    #[arg(long, global = true, env = "LUMA_API_URL")]
    pub base_url: Option<String>,

    /// Do not read or write the saved API key.
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// Output format for command results.
    #[arg(long, value_enum, global = true, default_value_t = OutputFormat::Human)]
    pub output: OutputFormat,

    /// Hide progress bars and spinners.
    #[arg(long, short, global = true)]
    pub quiet: bool,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Submit a video, zip or directory of images; prints the slug.
    Submit(SubmitArgs),
    /// Show the status of a submitted capture.
    Status { slug: String },
    /// Search your captures by title.
    Get(GetArgs),
    /// Save and verify an API key (prompts when omitted).
    Auth {
        #[arg(value_name = "API_KEY")]
        key: Option<String>,
    },
    /// Remove the saved API key.
    ClearAuth,
    /// Show remaining credits.
    Credits,
}

#[derive(Args, Debug, Clone)]
pub struct SubmitArgs {
    /// Video file, zip archive or directory of images.
    pub path: PathBuf,
    /// Descriptive title for the capture.
    pub title: String,
    /// Camera model used for the footage.
    #[arg(long, value_enum, default_value_t = CameraType::Normal)]
    pub camera: CameraType,
    /// Privacy level (private, unlisted, public, open).
    #[arg(long, value_parser = parse_privacy)]
    pub privacy: Option<PrivacyLevel>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct GetArgs {
    /// Title to search for; lists every capture when omitted.
    #[arg(default_value = "")]
    pub title: String,
    /// Index of the first capture to return.
    #[arg(long, default_value_t = 0)]
    pub skip: u32,
    /// Captures requested per page.
    #[arg(long, default_value_t = 50)]
    pub take: u32,
    /// Stop after this many captures.
    #[arg(long)]
    pub limit: Option<usize>,
    /// Oldest first.
    #[arg(long)]
    pub asc: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}

fn parse_privacy(raw: &str) -> Result<PrivacyLevel, String> {
    match PrivacyLevel::parse(raw) {
        PrivacyLevel::Unknown(_) => Err(format!(
            "unknown privacy level '{raw}' (expected private, unlisted, public or open)"
        )),
        level => Ok(level),
    }
}

/// Asks for the API key on the terminal, or reads one line from stdin when
/// input is piped.
pub struct TerminalPrompt;

impl CredentialResolver for TerminalPrompt {
    fn resolve(&self) -> crate::error::Result<Option<String>> {
        let stdin = std::io::stdin();
        let key = if stdin.is_terminal() {
            Password::new()
                .with_prompt(format!("Enter your Luma API key (get one from {DASHBOARD_URL})"))
                .allow_empty_password(true)
                .interact()
                .map_err(|err| LumaError::io("<terminal>", err))?
        } else {
            let mut line = String::new();
            stdin
                .lock()
                .read_line(&mut line)
                .map_err(|err| LumaError::io("<stdin>", err))?;
            line
        };
        let key = key.trim();
        Ok((!key.is_empty()).then(|| key.to_string()))
    }
}

/// Parse arguments and run the selected command.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    execute(cli)
}

pub fn execute(cli: Cli) -> Result<()> {
    let mut client = build_client(&cli)?;
    let show_progress = !cli.quiet && cli.output == OutputFormat::Human;

    match &cli.command {
        Commands::Submit(args) => {
            let mut submission = Submission::new(&args.title).camera(args.camera);
            if let Some(privacy) = &args.privacy {
                submission = submission.privacy(privacy.clone());
            }
            let slug = client
                .submit(&args.path, &submission)
                .with_context(|| format!("failed to submit {}", args.path.display()))?;
            match cli.output {
                OutputFormat::Human => println!("{slug}"),
                OutputFormat::Json => print_json(&serde_json::json!({ "slug": slug }))?,
            }
        }
        Commands::Status { slug } => {
            client.ensure_authenticated()?;
            let spinner = spinner(show_progress, "Fetching status...");
            let capture = client.status(slug);
            spinner.finish_and_clear();
            render_capture(&capture?, cli.output)?;
        }
        Commands::Get(args) => {
            let query = SearchQuery {
                skip: args.skip,
                page_size: args.take,
                order: if args.asc { SortOrder::Asc } else { SortOrder::Desc },
                limit: args.limit,
                ..SearchQuery::new(args.title.clone())
            };
            client.ensure_authenticated()?;
            let spinner = spinner(show_progress, "Searching captures...");
            let captures = client
                .search(query)
                .and_then(|search| search.collect::<Result<Vec<_>, _>>());
            spinner.finish_and_clear();
            render_captures(&captures?, cli.output)?;
        }
        Commands::Auth { key } => {
            let key = key.as_deref().or(cli.api_key.as_deref());
            handle_auth(&mut client, key, cli.output)?
        }
        Commands::ClearAuth => {
            let removed = client.clear_auth()?;
            if cli.output == OutputFormat::Json {
                print_json(&serde_json::json!({ "removed": removed }))?;
            } else if removed {
                println!("Removed saved API key.");
            } else {
                println!("No saved API key.");
            }
        }
        Commands::Credits => {
            client.ensure_authenticated()?;
            let spinner = spinner(show_progress, "Fetching credits...");
            let credits = client.credits();
            spinner.finish_and_clear();
            render_credits(&credits?, cli.output)?;
        }
    }
    Ok(())
}

fn build_client(cli: &Cli) -> Result<LumaClient> {
    let mut config = ClientConfig::default();
    if let Some(base_url) = &cli.base_url {
        config = config.with_base_url(base_url)?;
    }
    config.use_cache = !cli.no_cache;

    let mut client = LumaClient::new(config)?
        .with_resolver(TerminalPrompt)
        .show_progress(!cli.quiet);
    if let Some(api_key) = cli.api_key.as_deref().filter(|key| !key.trim().is_empty()) {
        client = client.with_api_key(api_key);
    }
    Ok(client)
}

/// `auth` with a key verifies and saves it; without one it reuses the saved
/// key or prompts for a new one.
fn handle_auth(client: &mut LumaClient, api_key: Option<&str>, output: OutputFormat) -> Result<()> {
    match api_key {
        Some(key) => client.authenticate(key)?,
        None => client.ensure_authenticated()?,
    }
    let saved_to = client.store().map(|store| store.path().display().to_string());
    match output {
        OutputFormat::Json => print_json(&serde_json::json!({
            "authenticated": true,
            "path": saved_to,
        }))?,
        OutputFormat::Human => match saved_to {
            Some(path) => println!("Authenticated. API key stored in {path}"),
            None => println!("Authenticated."),
        },
    }
    Ok(())
}

fn spinner(visible: bool, message: &'static str) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_credits(credits: &CreditInfo, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Json => print_json(credits),
        OutputFormat::Human => {
            println!("Remaining: {}", credits.remaining);
            println!("Used:      {}", credits.used);
            println!("Total:     {}", credits.total);
            Ok(())
        }
    }
}

fn render_capture(capture: &CaptureInfo, output: OutputFormat) -> Result<()> {
    if output == OutputFormat::Json {
        return print_json(capture);
    }
    println!("Slug:     {}", capture.slug);
    println!("Title:    {}", capture.title);
    println!("Status:   {}", capture.status);
    println!("Type:     {}", capture.capture_type);
    println!("Privacy:  {}", capture.privacy);
    if let Some(date) = capture.date {
        println!("Created:  {}", date.to_rfc3339());
    }
    if !capture.username.is_empty() {
        println!("User:     {}", capture.username);
    }
    if let Some(location) = &capture.location {
        println!(
            "Location: {:.5}, {:.5} {}",
            location.latitude, location.longitude, location.name
        );
    }
    match &capture.latest_run {
        Some(run) => {
            println!(
                "Run:      {} ({}%) {}",
                run.status, run.progress, run.current_stage
            );
            for artifact in &run.artifacts {
                println!("  {}: {}", artifact.kind, artifact.url);
            }
        }
        None => println!("Run:      none"),
    }
    Ok(())
}

fn render_captures(captures: &[CaptureInfo], output: OutputFormat) -> Result<()> {
    if output == OutputFormat::Json {
        return print_json(captures);
    }
    if captures.is_empty() {
        println!("No captures found.");
        return Ok(());
    }
    for capture in captures {
        let run = capture
            .latest_run
            .as_ref()
            .map(|run| format!("{} {}%", run.status, run.progress))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} {:<12} {:<16} {}",
            capture.slug, capture.status, run, capture.title
        );
    }
    Ok(())
}

/// Print an error chain to stderr, in red when stderr is a terminal.
pub fn report_error(err: &anyhow::Error) {
    let label = if std::io::stderr().is_terminal() {
        "error:".red().bold().to_string()
    } else {
        "error:".to_string()
    };
    eprintln!("{label} {err:#}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_submit_with_options() {
        let cli = Cli::try_parse_from([
            "luma",
            "submit",
            "scene.mp4",
            "Test Scene",
            "--camera",
            "equirectangular",
            "--privacy",
            "Public",
        ])
        .expect("parse");
        match cli.command {
            Commands::Submit(args) => {
                assert_eq!(args.path, PathBuf::from("scene.mp4"));
                assert_eq!(args.title, "Test Scene");
                assert_eq!(args.camera, CameraType::Equirectangular);
                assert_eq!(args.privacy, Some(PrivacyLevel::Public));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_privacy_level() {
        let err = Cli::try_parse_from(["luma", "submit", "a.mp4", "t", "--privacy", "secret"])
            .expect_err("invalid privacy");
        assert!(err.to_string().contains("unknown privacy level"));
    }

    #[test]
    fn get_title_is_optional() {
        let cli = Cli::try_parse_from(["luma", "get", "--limit", "5", "--asc"]).expect("parse");
        match cli.command {
            Commands::Get(args) => {
                assert_eq!(args.title, "");
                assert_eq!(args.take, 50);
                assert_eq!(args.limit, Some(5));
                assert!(args.asc);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn auth_key_is_positional_and_optional() {
        let cli = Cli::try_parse_from(["luma", "auth"]).expect("parse");
        assert!(matches!(cli.command, Commands::Auth { key: None }));
        let cli = Cli::try_parse_from(["luma", "auth", "abc"]).expect("parse");
        assert!(matches!(cli.command, Commands::Auth { key: Some(key) } if key == "abc"));
    }
}
