use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use scout_core::{
    parse_announcement, select_by_name, AttachTarget, Discovery, DiscoveryConfig, DiscoveryError, Selection,
};
use scout_utils::{info, init_logging_with, LogFormat, LogLevel, LoggingOptions};

/// Find the editors, network players and devices a debugger can attach to.
#[derive(Parser, Debug)]
#[command(name = "scout")]
#[command(version)]
#[command(about = "Find the editors, network players and devices a debugger can attach to", long_about = None)]
struct Cli
{
    /// Configuration file (default: ~/.config/scout/config.toml, if it exists)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log level: error, warn, info, debug or trace (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,
    /// Log format: pretty or json (overrides SCOUT_LOG_FORMAT)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// List attach targets
    List
    {
        /// Only editor processes on this machine
        #[arg(long, conflicts_with = "players")]
        editors: bool,
        /// Only network players and devices
        #[arg(long)]
        players: bool,
        /// Wait a few seconds for player announcements to arrive
        #[arg(long, default_value_t = false)]
        wait: bool,
    },
    /// Resolve a target into the endpoint a debugger connects to
    Resolve
    {
        /// Target id (process id, player guid or device id)
        #[arg(required_unless_present = "name")]
        id: Option<u32>,
        /// Pick the target whose name contains this text instead
        #[arg(long, conflicts_with = "id")]
        name: Option<String>,
    },
    /// Print the target list repeatedly until Ctrl-C
    Watch
    {
        /// Milliseconds between listings (default: the poll interval)
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// Parse one player announcement and print the record
    Parse
    {
        /// Announcement text, e.g. "[IP]127.0.0.1[PORT]56000[FLAGS]0[GUID]42..."
        announcement: String,
    },
}

fn main() -> ExitCode
{
    let cli = Cli::parse();

    let options = match LoggingOptions::from_env() {
        Ok(options) => options.with_level(cli.log_level).with_format(cli.log_format),
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };
    let _guard = match init_logging_with(&options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Parse { announcement } => parse(&announcement),
        command => match tokio::runtime::Runtime::new() {
            Ok(runtime) => runtime.block_on(run_command(command, cli.config)),
            Err(e) => Err(e.into()),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_command(command: Commands, config: Option<PathBuf>) -> Result<(), Box<dyn Error>>
{
    let config = DiscoveryConfig::load(config.as_deref())?;
    let mut discovery = Discovery::builder().config(config).start()?;

    // Process and device scans run in the background; let the first ones land
    discovery.refresh();
    discovery.wait_for_refresh().await;

    let result = match command {
        Commands::List { editors, players, wait } => {
            let selection = match (editors, players) {
                (true, _) => Selection::EditorsOnly,
                (_, true) => Selection::PlayersOnly,
                _ => Selection::All,
            };
            let targets = if wait {
                discovery.targets_wait(selection).await
            } else {
                discovery.targets(selection)
            };
            print_targets(&targets);
            Ok(())
        }
        Commands::Resolve { id, name } => resolve(&discovery, id, name.as_deref()).await,
        Commands::Watch { interval_ms } => {
            let interval = interval_ms.map_or_else(|| discovery.config().poll_interval(), Duration::from_millis);
            watch(&discovery, interval).await
        }
        Commands::Parse { announcement } => parse(&announcement),
    };

    discovery.stop().await;
    discovery.wait_for_refresh().await;
    result
}

async fn resolve(discovery: &Discovery, id: Option<u32>, name: Option<&str>) -> Result<(), Box<dyn Error>>
{
    // Players can only be resolved once a query has seen them
    let targets = discovery.targets_wait(Selection::All).await;

    let id = match (id, name) {
        (Some(id), _) => id.into(),
        (None, Some(name)) => match select_by_name(targets, name) {
            Ok(target) => target.id,
            Err(DiscoveryError::AmbiguousTarget { name, candidates }) => {
                print_targets(&candidates);
                return Err(DiscoveryError::AmbiguousTarget { name, candidates }.into());
            }
            Err(e) => return Err(e.into()),
        },
        (None, None) => return Err("either an id or --name is required".into()),
    };

    let attach = discovery.resolve_attach_info(id)?;
    info!(%id, endpoint = %attach.socket_addr(), "resolved attach target");
    println!("{attach}");
    Ok(())
}

async fn watch(discovery: &Discovery, interval: Duration) -> Result<(), Box<dyn Error>>
{
    let mut ticker = tokio::time::interval(interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                info!("interrupted, stopping discovery");
                return Ok(());
            }
            _ = ticker.tick() => {
                println!("--");
                print_targets(&discovery.targets(Selection::All));
            }
        }
    }
}

fn parse(announcement: &str) -> Result<(), Box<dyn Error>>
{
    let record = parse_announcement(announcement)?;
    println!("{record}");
    println!("  endpoint:       {}", record.endpoint);
    println!("  debugging:      {}", if record.allow_debugging { "allowed" } else { "disallowed" });
    match record.explicit_debugger_port() {
        Some(port) => println!("  debugger port:  {port}"),
        None => println!("  debugger port:  (fallback)"),
    }
    if let Some(project) = &record.project_name {
        println!("  project:        {project}");
    }
    println!("  wire form:      {}", record.to_announcement());
    Ok(())
}

fn print_targets(targets: &[AttachTarget])
{
    if targets.is_empty() {
        println!("No attach targets found");
        return;
    }

    println!("{:>10}  {:<7}  NAME", "ID", "KIND");
    for target in targets {
        match &target.project_name {
            Some(project) => println!("{:>10}  {:<7}  {} [{project}]", target.id, target.kind, target.name),
            None => println!("{:>10}  {:<7}  {}", target.id, target.kind, target.name),
        }
    }
}
