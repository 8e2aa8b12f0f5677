//! runlog CLI
//!
//! Entry point for the `runlog` command-line tool.

use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser, Subcommand};
use runlog::{logging, CancelToken, ClientConfig, ConfigSources, LogFetchClient, LogPrinter, LogsArgs, SignalHandler};
use serde_json::{json, Map, Value};
use tracing::warn;

/// Exit code for configuration and usage errors
const EXIT_USAGE: i32 = 2;
/// Exit code when stdout fails for reasons other than a closed pipe
const EXIT_OUTPUT: i32 = 1;

#[derive(Parser)]
#[command(name = "runlog")]
#[command(about = "Fetch and follow run logs from a remote coordinator", version)]
struct Cli {
    /// Path to a client config file (TOML)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Coordinator address (host:port)
    #[arg(long, global = true)]
    address: Option<String>,

    /// Reach the coordinator over SSH
    #[arg(long, global = true, value_name = "USER@HOST")]
    ssh: Option<String>,

    /// Increase diagnostic verbosity (-v debug, -vv trace)
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the logs of a run
    Logs {
        /// Run identifier
        #[arg(long, allow_hyphen_values = true)]
        run_id: i64,

        /// Keep streaming new lines until interrupted
        #[arg(long, short = 'f')]
        follow: bool,
    },

    /// Check the coordinator is reachable and show what it offers
    Probe {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(EXIT_USAGE);
        }
    };

    let code = match cli.command {
        Commands::Logs { run_id, follow } => match LogsArgs::new(run_id, follow) {
            Ok(args) => run_logs(config, args),
            Err(e) => {
                eprintln!("Invalid arguments: {}", e);
                EXIT_USAGE
            }
        },
        Commands::Probe { json } => run_probe(config, json),
    };
    process::exit(code);
}

fn load_config(cli: &Cli) -> Result<ClientConfig, String> {
    let sources = ConfigSources {
        explicit_file: cli.config.clone(),
        cli_overrides: cli_overrides(cli.address.as_deref(), cli.ssh.as_deref())?,
        ..ConfigSources::with_default_user_file()
    };
    ClientConfig::load(&sources).map_err(|e| e.to_string())
}

/// Layer built from command-line flags
fn cli_overrides(address: Option<&str>, ssh: Option<&str>) -> Result<Option<Value>, String> {
    let mut layer = Map::new();

    if let Some(address) = address {
        layer.insert("address".to_string(), json!(address));
    }

    if let Some(target) = ssh {
        let mut ssh_layer = Map::new();
        let host = match target.split_once('@') {
            Some((user, host)) => {
                if user.is_empty() {
                    return Err(format!("invalid --ssh target '{}': empty user", target));
                }
                ssh_layer.insert("user".to_string(), json!(user));
                host
            }
            None => target,
        };
        if host.is_empty() {
            return Err(format!("invalid --ssh target '{}': empty host", target));
        }
        ssh_layer.insert("host".to_string(), json!(host));
        layer.insert("transport".to_string(), json!("ssh"));
        layer.insert("ssh".to_string(), Value::Object(ssh_layer));
    }

    Ok((!layer.is_empty()).then_some(Value::Object(layer)))
}

fn install_signal_handler() -> CancelToken {
    let cancel = CancelToken::new();
    let handler = SignalHandler::new(cancel.clone());
    if let Err(e) = handler.install() {
        warn!(error = %e, "failed to install signal handler");
    }
    cancel
}

fn run_logs(config: ClientConfig, args: LogsArgs) -> i32 {
    let cancel = install_signal_handler();
    let client = LogFetchClient::new(config);
    let mut stream = client.fetch(args.run_id, args.follow, cancel);

    let stdout = io::stdout();
    let mut printer = LogPrinter::new(stdout.lock());

    while let Some(item) = stream.next() {
        match item {
            Ok(response) => {
                if let Err(e) = printer.print(&response, stream.resume_mode()) {
                    stream.close();
                    if e.kind() == ErrorKind::BrokenPipe {
                        return 0;
                    }
                    eprintln!("Output error: {}", e);
                    return EXIT_OUTPUT;
                }
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                return e.exit_code();
            }
        }
    }
    0
}

fn run_probe(config: ClientConfig, as_json: bool) -> i32 {
    let cancel = install_signal_handler();
    let client = LogFetchClient::new(config);
    let target = client.config().address.clone();

    match client.probe(&cancel) {
        Ok(session) => {
            if as_json {
                let report = json!({
                    "target": target,
                    "protocol_version": session.protocol_version,
                    "max_message_bytes": session.max_message_bytes,
                    "features": session.features,
                });
                match serde_json::to_string_pretty(&report) {
                    Ok(text) => println!("{}", text),
                    Err(e) => {
                        eprintln!("Output error: {}", e);
                        return EXIT_OUTPUT;
                    }
                }
            } else {
                println!("Coordinator: {}", target);
                println!("  Protocol version: {}", session.protocol_version);
                println!("  Max message size: {} bytes", session.max_message_bytes);
                println!("  Features: {}", session.features.join(", "));
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}
