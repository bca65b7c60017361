use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "doseminder-cli", version, about = "Doseminder CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Time remaining until the next dose
    Countdown(commands::countdown::CountdownArgs),
    /// Track a medication live: countdown, auto-resolution, manual toggle
    Track(commands::track::TrackArgs),
    /// Dose history and adherence statistics
    History {
        #[command(subcommand)]
        action: commands::history::HistoryAction,
    },
    /// Call the remote adherence gateway directly
    Gateway {
        #[command(subcommand)]
        action: commands::gateway::GatewayAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Print shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Countdown(args) => commands::countdown::run(args),
        Commands::Track(args) => commands::track::run(args),
        Commands::History { action } => commands::history::run(action),
        Commands::Gateway { action } => commands::gateway::run(action),
        Commands::Config { action } => commands::config::run(action),
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "doseminder-cli",
                &mut std::io::stdout(),
            );
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
