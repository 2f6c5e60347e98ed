//! fp2-proxy - Aqara FP2 presence sensor proxy over HomeKit.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use fp2_client::{
    AccessoryClient, ClientBuilder, ClientConfig, DeviceRecord, DomainEvent,
    EventReceiver, Fp2Discovery, JsonFilePairingStore, PairingStore, WarningReceiver,
    DEFAULT_TIMEOUT_SECS,
};
use hap_discovery::ServiceBrowser;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments
struct Args {
    /// Discovery timeout in seconds
    timeout: u64,
    debug: bool,
    /// No timestamps in log output
    service: bool,
    log_file: Option<PathBuf>,
    /// Pairing file
    file: PathBuf,
    command: Command,
}

enum Command {
    Proxy,
    Discover,
    Pair { fp2: String, code: String },
    Unpair { fp2: String },
    Identify { fp2: String },
    Id { fp2: String },
    Accessories { fp2: String },
}

fn default_file() -> PathBuf {
    if let Some(path) = std::env::var_os("FP2_PROXY_FILE") {
        return PathBuf::from(path);
    }
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".fp2-proxy")
}

fn parse_args() -> Args {
    let mut args = Args {
        timeout: DEFAULT_TIMEOUT_SECS,
        debug: false,
        service: false,
        log_file: None,
        file: default_file(),
        command: Command::Proxy,
    };
    let mut iter = std::env::args().skip(1);
    let mut rest = Vec::new();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--timeout" | "-t" => {
                let value = iter.next().unwrap_or_default();
                match value.parse::<u64>() {
                    Ok(secs) if (1..=60).contains(&secs) => args.timeout = secs,
                    _ => usage_error(&format!("timeout must be 1-60 seconds, got '{}'", value)),
                }
            }
            "--debug" | "-D" => args.debug = true,
            "--service" | "-s" => args.service = true,
            "--log-file" | "-l" => match iter.next() {
                Some(path) => args.log_file = Some(PathBuf::from(path)),
                None => usage_error("--log-file needs a path"),
            },
            "--file" | "-f" => match iter.next() {
                Some(path) => args.file = PathBuf::from(path),
                None => usage_error("--file needs a path"),
            },
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other if other.starts_with('-') => usage_error(&format!("unknown option: {}", other)),
            _ => {
                rest.push(arg);
                rest.extend(iter.by_ref());
            }
        }
    }

    args.command = match rest.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        [] => Command::Proxy,
        ["discover"] => Command::Discover,
        ["pair", fp2, code] => Command::Pair {
            fp2: fp2.to_string(),
            code: code.to_string(),
        },
        ["unpair", fp2] => Command::Unpair { fp2: fp2.to_string() },
        ["identify", fp2] => Command::Identify { fp2: fp2.to_string() },
        ["id", fp2] => Command::Id { fp2: fp2.to_string() },
        ["accessories", fp2] => Command::Accessories { fp2: fp2.to_string() },
        other => usage_error(&format!("bad command: {}", other.join(" "))),
    };
    args
}

fn usage_error(message: &str) -> ! {
    eprintln!("fp2-proxy: {}", message);
    print_help();
    std::process::exit(1);
}

fn print_help() {
    println!("fp2-proxy - Proxy for Aqara Presence Sensor FP2");
    println!();
    println!("Usage: fp2-proxy [OPTIONS] [COMMAND]");
    println!();
    println!("Options:");
    println!("  -t, --timeout SECS   Discovery timeout, 1-60 (default: {})", DEFAULT_TIMEOUT_SECS);
    println!("  -D, --debug          Enable debug logging");
    println!("  -s, --service        Omit timestamps (when running as a service)");
    println!("  -l, --log-file PATH  Write logs to PATH instead of stderr");
    println!("  -f, --file PATH      Pairing file (default: $FP2_PROXY_FILE or ~/.fp2-proxy)");
    println!("  -h, --help           Show this help message");
    println!();
    println!("Commands:");
    println!("  (none)               Stream events of all paired FP2s as JSON lines");
    println!("  discover             List FP2s on the network");
    println!("  pair FP2 CODE        Pair with FP2 (device id or name) using its setup code");
    println!("  unpair FP2           Remove the pairing with FP2");
    println!("  identify FP2         Ask FP2 to identify itself");
    println!("  id FP2               Print the serial number of FP2");
    println!("  accessories FP2      Dump the accessory database of FP2");
}

fn setup_logging(args: &Args) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(args.debug);

    if let Some(path) = &args.log_file {
        let file = std::fs::File::create(path)
            .with_context(|| format!("cannot create log file {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        builder.with_writer(non_blocking).with_ansi(false).init();
        return Ok(Some(guard));
    }

    if args.service {
        builder.with_writer(std::io::stderr).without_time().init();
    } else {
        builder.with_writer(std::io::stderr).init();
    }
    Ok(None)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();
    let _guard = setup_logging(&args)?;

    let config = ClientConfig::default().with_timeout_secs(args.timeout);
    let store: Arc<dyn PairingStore> = Arc::new(JsonFilePairingStore::new(&args.file));
    debug!(file = %args.file.display(), timeout = ?config.discovery_timeout, "starting");

    match &args.command {
        Command::Proxy => proxy(store, config).await,
        Command::Discover => discover(&config).await,
        Command::Pair { fp2, code } => {
            let mut client = open(fp2, &store, &config).await?;
            if let Err(e) = client.pair(code).await {
                if client.is_paired() {
                    warn!(error = %e, "pairing not saved, removing it from the accessory");
                    client.connect().await?;
                    client.unpair().await?;
                }
                return Err(e.into());
            }
            println!("paired {} ({})", client.record().name, client.record().id);
            Ok(())
        }
        Command::Unpair { fp2 } => {
            let mut client = open(fp2, &store, &config).await?;
            client.connect().await?;
            client.unpair().await?;
            println!("unpaired {} ({})", client.record().name, client.record().id);
            Ok(())
        }
        Command::Identify { fp2 } => {
            let mut client = open(fp2, &store, &config).await?;
            client.identify().await?;
            client.disconnect().await?;
            Ok(())
        }
        Command::Id { fp2 } => {
            let mut client = open(fp2, &store, &config).await?;
            println!("{}", client.get_id().await?);
            client.disconnect().await?;
            Ok(())
        }
        Command::Accessories { fp2 } => {
            let mut client = open(fp2, &store, &config).await?;
            let db = client.accessories().await?;
            println!("{}", serde_json::to_string_pretty(&db)?);
            client.disconnect().await?;
            Ok(())
        }
    }
}

fn discovery() -> Result<Fp2Discovery<ServiceBrowser>> {
    Fp2Discovery::browser().context("cannot start mDNS browser")
}

/// Find `fp2` and build a client with its stored pairing, if any.
async fn open(
    fp2: &str,
    store: &Arc<dyn PairingStore>,
    config: &ClientConfig,
) -> Result<AccessoryClient> {
    let record = discovery()?.find(fp2, config.discovery_timeout).await?;
    build(record, store, config)
}

fn build(
    record: DeviceRecord,
    store: &Arc<dyn PairingStore>,
    config: &ClientConfig,
) -> Result<AccessoryClient> {
    Ok(ClientBuilder::new(record)
        .config(config.clone())
        .store(store.clone())
        .build()?)
}

async fn discover(config: &ClientConfig) -> Result<()> {
    let found = discovery()?.search(config.discovery_timeout).await?;

    let devices: BTreeMap<String, Value> = found
        .into_values()
        .map(|record| {
            let host = record
                .socket_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_default();
            let entry = json!({
                "id": record.id.to_string(),
                "host": host,
                "modelid": record.model,
                "pairable": record.pairable(),
            });
            (record.name, entry)
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&devices)?);
    Ok(())
}

/// Subscribe to every paired FP2 and print its events until interrupted.
async fn proxy(store: Arc<dyn PairingStore>, config: ClientConfig) -> Result<()> {
    let paired = store.load_all()?;
    if paired.is_empty() {
        bail!("no paired FP2 devices, run 'fp2-proxy pair' first");
    }

    let discovery = discovery()?;
    let mut clients = Vec::new();
    for id in paired.keys() {
        let record = match discovery.find(&id.to_string(), config.discovery_timeout).await {
            Ok(record) => record,
            Err(e) => {
                warn!(device = %id, error = %e, "skipping");
                continue;
            }
        };
        let mut client = build(record, &store, &config)?;
        tokio::spawn(print_events(id.to_string(), client.events()));
        tokio::spawn(log_warnings(id.to_string(), client.warnings()));

        match client.subscribe().await {
            Ok(()) => clients.push(client),
            Err(e) => warn!(device = %id, error = %e, "cannot subscribe"),
        }
    }
    if clients.is_empty() {
        bail!("none of the paired FP2 devices could be reached");
    }
    info!(devices = clients.len(), "proxy running");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    for client in &mut clients {
        if let Err(e) = client.disconnect().await {
            debug!(device = %client.record().id, error = %e, "disconnect failed");
        }
    }
    Ok(())
}

async fn print_events(device: String, mut events: EventReceiver) {
    loop {
        match events.recv().await {
            Ok(event) => println!("{}", event_line(&device, &event)),
            Err(RecvError::Lagged(missed)) => warn!(%device, missed, "event output lagging"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn event_line(device: &str, event: &DomainEvent) -> Value {
    let mut line = serde_json::to_value(event).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut line {
        map.insert("device".to_string(), Value::String(device.to_string()));
    }
    line
}

async fn log_warnings(device: String, mut warnings: WarningReceiver) {
    loop {
        match warnings.recv().await {
            Ok(warning) => warn!(%device, "{}", warning),
            Err(RecvError::Lagged(missed)) => warn!(%device, missed, "warnings dropped"),
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fp2_client::clamp_timeout;

    #[test]
    fn event_lines_carry_device() {
        let line = event_line("58:55:CA:1A:E2:88", &DomainEvent::ZoneOccupancy { zone: 3, present: true });
        assert_eq!(
            line,
            json!({"type": "zoneOccupancy", "zone": 3, "present": true, "device": "58:55:CA:1A:E2:88"})
        );
    }

    #[test]
    fn timeout_clamp_matches_cli_range() {
        assert_eq!(clamp_timeout(0).as_secs(), 1);
        assert_eq!(clamp_timeout(61).as_secs(), 60);
    }
}
