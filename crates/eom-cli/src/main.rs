//! eom CLI
//!
//! Inspect and control external outputs through the output manager service.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use eom_client::{
    callback, ClientConfig, EomClient, NotifyCallback, NotifyCategory, OutputAttribute, OutputId,
    OutputMode, RawWindow,
};
use eom_config::{Config, ConnectionMode, LoggingConfig, TransportKind};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "eom")]
#[command(about = "External output manager client")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/eom/config.kdl")]
    config: String,

    /// Transport backend (overrides config setting)
    #[arg(short, long)]
    transport: Option<TransportKind>,

    /// Service socket for the socket backend (overrides config setting)
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Use a private bus connection
    #[arg(long)]
    private: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration file
    Validate,

    /// List external outputs
    List,

    /// Show everything known about one output
    Info {
        /// Output id
        id: u32,
    },

    /// Request a presentation mode (none, mirror, presentation)
    SetMode { id: u32, mode: OutputMode },

    /// Request an attribute (normal, exclusive-share, exclusive)
    SetAttribute { id: u32, attribute: OutputAttribute },

    /// Show a native window on an output
    BindWindow {
        id: u32,
        /// Native window handle, decimal or 0x-prefixed hex
        #[arg(value_parser = parse_handle)]
        handle: i32,
    },

    /// Print output notifications until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Expand tilde in config path
    let config_path: PathBuf = shellexpand::tilde(&cli.config).into_owned().into();

    if let Commands::Validate = cli.command {
        return cmd_validate(&config_path);
    }

    let mut config = load_config(&config_path)?;
    apply_overrides(&mut config, &cli);
    init_tracing(&config.logging);

    tracing::debug!(transport = %config.client.transport, "Connecting to output service");

    let client = EomClient::new(ClientConfig::from_config(&config));

    match cli.command {
        Commands::Watch => cmd_watch(&client).await,
        command => {
            client.init().await.into_diagnostic()?;
            let result = run_command(&client, command).await;
            client.deinit().await;
            result
        }
    }
}

async fn run_command(client: &EomClient, command: Commands) -> miette::Result<()> {
    match command {
        Commands::List => {
            let ids = client.list_output_ids().await.into_diagnostic()?;
            print_outputs(client, &ids);
        }
        Commands::Info { id } => {
            client.list_output_ids().await.into_diagnostic()?;
            let record = client.output(OutputId(id)).into_diagnostic()?;
            println!("Output {}", record.id);
            println!("  Type:          {}", record.connector_type);
            println!("  Mode:          {}", record.mode);
            println!(
                "  Resolution:    {}x{}",
                record.resolution.width, record.resolution.height
            );
            println!(
                "  Physical size: {}x{} mm",
                record.physical_size.width_mm, record.physical_size.height_mm
            );
            println!("  Attribute:     {}", record.attribute);
            println!("  State:         {}", record.attribute_state);
        }
        Commands::SetMode { id, mode } => {
            client
                .set_mode(OutputId(id), mode)
                .await
                .into_diagnostic()?;
            println!("Requested mode {} on output {}", mode, id);
        }
        Commands::SetAttribute { id, attribute } => {
            client.list_output_ids().await.into_diagnostic()?;
            client
                .set_attribute(OutputId(id), attribute)
                .await
                .into_diagnostic()?;
            println!("Attribute {} granted on output {}", attribute, id);
        }
        Commands::BindWindow { id, handle } => {
            client.list_output_ids().await.into_diagnostic()?;
            client
                .bind_window(OutputId(id), &RawWindow(handle))
                .await
                .into_diagnostic()?;
            println!("Window {:#x} bound to output {}", handle, id);
        }
        Commands::Validate | Commands::Watch => {}
    }
    Ok(())
}

fn cmd_validate(config_path: &Path) -> miette::Result<()> {
    println!("Validating configuration: {}", config_path.display());

    let config = eom_config::parse_config(config_path)?;

    println!("Configuration is valid!");
    println!("  Transport:     {}", config.client.transport);
    println!("  Connection:    {:?}", config.client.connection);
    if let Some(path) = &config.client.socket_path {
        println!("  Socket:        {}", path.display());
    }
    println!("  Reply timeout: {} ms", config.client.reply_timeout_ms);
    println!("  Log level:     {}", config.logging.level.as_filter());
    Ok(())
}

async fn cmd_watch(client: &EomClient) -> miette::Result<()> {
    let mut registered: Vec<(NotifyCategory, NotifyCallback)> = Vec::new();

    for category in NotifyCategory::ALL {
        let reader = client.clone();
        let cb = callback(move |id, _| print_notification(&reader, category, id));
        client
            .add_callback(category, cb.clone(), None)
            .await
            .into_diagnostic()?;
        registered.push((category, cb));
    }

    let ids = client.list_output_ids().await.into_diagnostic()?;
    print_outputs(client, &ids);
    println!("Watching for output changes, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await.into_diagnostic()?;

    for (category, cb) in &registered {
        client.remove_callback(*category, cb).into_diagnostic()?;
    }
    client.deinit().await;
    Ok(())
}

fn print_outputs(client: &EomClient, ids: &[OutputId]) {
    if ids.is_empty() {
        println!("No external outputs");
        return;
    }

    println!("{} external output(s):", ids.len());
    for &id in ids {
        match client.output(id) {
            Ok(record) => println!(
                "  {:>3}  {:<11}  {}x{} ({}x{} mm)  mode {}  attribute {} ({})",
                record.id.get(),
                record.connector_type.to_string(),
                record.resolution.width,
                record.resolution.height,
                record.physical_size.width_mm,
                record.physical_size.height_mm,
                record.mode,
                record.attribute,
                record.attribute_state
            ),
            Err(e) => println!("  {:>3}  <{}>", id.get(), e),
        }
    }
}

fn print_notification(client: &EomClient, category: NotifyCategory, id: OutputId) {
    match category {
        NotifyCategory::Added => match client.output(id) {
            Ok(record) => println!(
                "[added]     output {}: {} {}x{}",
                id, record.connector_type, record.resolution.width, record.resolution.height
            ),
            Err(_) => println!("[added]     output {}", id),
        },
        NotifyCategory::Removed => println!("[removed]   output {}", id),
        NotifyCategory::ModeChanged => match client.get_mode(id) {
            Ok(mode) => println!("[mode]      output {}: {}", id, mode),
            Err(_) => println!("[mode]      output {}", id),
        },
        NotifyCategory::AttributeChanged => {
            match (client.get_attribute(id), client.get_attribute_state(id)) {
                (Ok(attribute), Ok(state)) => {
                    println!("[attribute] output {}: {} ({})", id, attribute, state)
                }
                _ => println!("[attribute] output {}", id),
            }
        }
    }
}

/// Read the configuration file if there is one, then apply `EOM_*` overrides
fn load_config(config_path: &Path) -> miette::Result<Config> {
    let mut config = if config_path.exists() {
        eom_config::parse_config(config_path)?
    } else {
        Config::default()
    };
    eom_config::apply_env(&mut config);
    Ok(config)
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(transport) = cli.transport {
        config.client.transport = transport;
    }
    if let Some(socket) = &cli.socket {
        config.client.socket_path = Some(socket.clone());
    }
    if cli.private {
        config.client.connection = ConnectionMode::Private;
    }
}

fn init_tracing(logging: &LoggingConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(logging))),
        )
        .init();
}

/// Filter used when `RUST_LOG` is not set
fn default_filter(logging: &LoggingConfig) -> String {
    if logging.debug {
        format!("{},eom_client=debug", logging.level.as_filter())
    } else {
        logging.level.as_filter().to_string()
    }
}

fn parse_handle(s: &str) -> Result<i32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => i32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("Invalid window handle {}: {}", s, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use eom_config::LogLevel;

    #[test]
    fn test_parse_set_mode() {
        let cli = Cli::try_parse_from(["eom", "set-mode", "5", "presentation"]).unwrap();
        match cli.command {
            Commands::SetMode { id, mode } => {
                assert_eq!(id, 5);
                assert_eq!(mode, OutputMode::Presentation);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_attribute() {
        assert!(Cli::try_parse_from(["eom", "set-attribute", "5", "shared"]).is_err());
    }

    #[test]
    fn test_parse_handle() {
        assert_eq!(parse_handle("0x3a00004"), Ok(0x3a00004));
        assert_eq!(parse_handle("42"), Ok(42));
        assert!(parse_handle("window").is_err());
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::try_parse_from([
            "eom",
            "--transport",
            "socket",
            "--socket",
            "/run/eom.sock",
            "--private",
            "list",
        ])
        .unwrap();
        let mut config = Config::default();

        apply_overrides(&mut config, &cli);

        assert_eq!(config.client.transport, TransportKind::Socket);
        assert_eq!(config.client.socket_path, Some(PathBuf::from("/run/eom.sock")));
        assert_eq!(config.client.connection, ConnectionMode::Private);
    }

    #[test]
    fn test_default_filter() {
        let mut logging = LoggingConfig {
            level: LogLevel::Info,
            debug: false,
        };
        assert_eq!(default_filter(&logging), "info");

        logging.debug = true;
        assert_eq!(default_filter(&logging), "info,eom_client=debug");
    }
}
