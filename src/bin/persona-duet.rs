use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use persona_duet::{
    config::{DEFAULT_INITIAL_MESSAGE, DEFAULT_SCENARIO},
    BackendPair, ConversationLog, ConversationRunResult, ConversationSession, ConversationStats,
    ErrorCategory, GroupChatEvent, PersonaBundle, ProviderConfig, RunContext, RunSettings,
    SetupError, TerminationReason,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "persona-duet")]
#[command(about = "Roleplay a customer persona against a staff persona and grade the result")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one conversation and its evaluation (default)
    Run(RunArgs),
    /// Recompute statistics from a saved chat log
    Stats {
        /// Path to a chat_<timestamp>.json file
        path: PathBuf,
    },
}

#[derive(Args, Default)]
struct RunArgs {
    /// YAML file with scenario, initial_message, max_turns, prompts_dir, log_dir
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory containing the persona and evaluator prompt files
    #[arg(long)]
    prompts_dir: Option<PathBuf>,

    /// Directory for chat and diagnostic logs
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[arg(long)]
    scenario: Option<String>,

    /// The customer's opening line
    #[arg(long)]
    initial_message: Option<String>,

    /// Turn budget for the conversation [default: 100]
    #[arg(long)]
    max_turns: Option<usize>,

    /// Use defaults instead of prompting for missing values
    #[arg(long)]
    non_interactive: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let code = match cli.command.unwrap_or_else(|| Command::Run(RunArgs::default())) {
        Command::Stats { path } => show_saved_stats(&path),
        Command::Run(args) => run(args).await,
    };

    println!("\n{}", "Shutting down.".dimmed());
    code
}

fn init_tracing(log_file: Option<&Path>) {
    let file_layer = log_file
        .and_then(|path| match File::create(path) {
            Ok(file) => Some(file),
            Err(err) => {
                eprintln!("could not open log file {}: {err}", path.display());
                None
            }
        })
        .map(|file| fmt::layer().with_ansi(false).with_writer(Arc::new(file)));

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
}

async fn run(args: RunArgs) -> ExitCode {
    let settings = match &args.config {
        Some(path) => match RunSettings::load(path) {
            Ok(settings) => settings,
            Err(err) => return report_setup_error(&SetupError::from(err)),
        },
        None => RunSettings::default(),
    };

    let log_dir = args.log_dir.clone().unwrap_or_else(|| settings.log_dir());
    let context = match RunContext::create(&log_dir) {
        Ok(context) => context,
        Err(err) => return report_setup_error(&SetupError::from(err)),
    };
    init_tracing(context.system_log_file().as_deref());

    let prompts_dir = args.prompts_dir.clone().unwrap_or_else(|| settings.prompts_dir());
    let (personas, backends) = match prepare(&prompts_dir) {
        Ok(prepared) => prepared,
        Err(err) => return report_setup_error(&err),
    };

    let scenario = match args.scenario.clone().or_else(|| settings.scenario.clone()) {
        Some(scenario) => scenario,
        None => ask("Scenario", DEFAULT_SCENARIO, args.non_interactive).await,
    };
    let initial_message = match args.initial_message.clone().or_else(|| settings.initial_message.clone()) {
        Some(message) => message,
        None => ask("Customer's opening line", DEFAULT_INITIAL_MESSAGE, args.non_interactive).await,
    };
    let max_turns = args.max_turns.unwrap_or_else(|| settings.max_turns());

    print_banner(&scenario, max_turns, &context);

    let mut session = ConversationSession::new(context, personas, backends).with_observer(echo_event);
    let outcome = session
        .run_with_opening(&scenario, Some(&initial_message), max_turns)
        .await;

    let code = match outcome {
        Ok(result) => {
            print_result(&result, session.stats());
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("\n{} {err}", "Conversation failed (unexpected error):".red().bold());
            eprintln!("  Check the diagnostic log for the failing request.");
            ExitCode::FAILURE
        }
    };

    session.release().await;
    code
}

fn prepare(prompts_dir: &Path) -> Result<(PersonaBundle, BackendPair), SetupError> {
    let config = ProviderConfig::from_env()?;
    let personas = PersonaBundle::load(prompts_dir)?;
    let backends = BackendPair::connect(&config)?;
    Ok((personas, backends))
}

async fn ask(label: &str, default: &str, non_interactive: bool) -> String {
    if non_interactive {
        return default.to_string();
    }

    print!("{} [{}]: ", label.bold(), default.dimmed());
    std::io::stdout().flush().ok();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    match lines.next_line().await {
        Ok(Some(line)) if !line.trim().is_empty() => line.trim().to_string(),
        _ => default.to_string(),
    }
}

fn print_banner(scenario: &str, max_turns: usize, context: &RunContext) {
    println!("{}", "=== persona-duet ===".bold());
    println!("Scenario:  {scenario}");
    println!("Max turns: {max_turns}");
    if let Some(path) = context.conversation_log_file() {
        println!("Chat log:  {}", path.display());
    }
    if let Some(path) = context.system_log_file() {
        println!("System log: {}", path.display());
    }
    println!();
}

fn echo_event(event: &GroupChatEvent) {
    match event {
        GroupChatEvent::Turn { message, .. } => {
            let speaker = format!("[{}]:", message.speaker);
            let speaker = match message.speaker.as_str() {
                "Customer" => speaker.as_str().cyan().bold(),
                "Staff" => speaker.as_str().green().bold(),
                _ => speaker.as_str().yellow().bold(),
            };
            println!("{speaker} {}\n", message.content);
        }
        GroupChatEvent::Terminated { reason } => match reason {
            TerminationReason::TokenMentioned { speaker } => {
                println!("{}", format!("Conversation ended by {speaker}.").as_str().dimmed())
            }
            TerminationReason::TurnBudgetExhausted { budget } => {
                println!("{}", format!("Turn budget of {budget} reached.").as_str().yellow())
            }
        },
    }
}

fn print_result(result: &ConversationRunResult, stats: Option<ConversationStats>) {
    println!("\n{}", "=== Evaluation ===".bold());
    println!("{}", result.evaluation);

    println!("\n{}", "=== Summary ===".bold());
    println!("Turns: {}", result.total_turns);
    println!("Ended naturally: {}", if result.ended_naturally { "yes" } else { "no" });
    if let Some(stats) = stats {
        print_stats(&stats);
    }
    if let Some(path) = &result.log_file_json {
        println!("Chat log: {}", path.display());
    }
    if let Some(path) = &result.log_file_system {
        println!("System log: {}", path.display());
    }
}

fn print_stats(stats: &ConversationStats) {
    println!("Logged entries: {}", stats.total_logged_entries);
    println!(
        "Customer / staff messages: {} / {}",
        stats.customer_messages, stats.staff_messages
    );
    println!("Conversation turns: {}", stats.actual_conversation_turns);
    println!("Duration: {}", stats.duration_formatted);
}

fn show_saved_stats(path: &Path) -> ExitCode {
    let log = match ConversationLog::load(path) {
        Ok(log) => log,
        Err(err) => {
            eprintln!("{} {err}", "Error:".red().bold());
            return ExitCode::FAILURE;
        }
    };

    match log.stats() {
        Some(stats) => {
            print_stats(&stats);
            ExitCode::SUCCESS
        }
        None => {
            println!("{}", "The log has no entries.".yellow());
            ExitCode::SUCCESS
        }
    }
}

fn report_setup_error(err: &SetupError) -> ExitCode {
    let category = err.category();
    eprintln!("{} {err}", format!("Error ({category}):").as_str().red().bold());

    let hint = match category {
        ErrorCategory::MissingResource => {
            "Make sure customer_persona.md, staff_persona.md and evaluator_prompt.md exist in the prompts directory."
        }
        ErrorCategory::MissingConfiguration => {
            "Check API_PROVIDER and the matching API key in your environment or .env file."
        }
        ErrorCategory::MissingDependency => {
            "Rebuild with the provider's cargo feature enabled, e.g. `--features gemini`."
        }
        ErrorCategory::Unexpected => "Re-run with RUST_LOG=debug for more detail.",
    };
    eprintln!("  {hint}");
    ExitCode::FAILURE
}
