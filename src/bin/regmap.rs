//! regmap - header to JSON conversion and register access from the shell
//!
//! Usage:
//!   regmap parse <header.h> [output.json] [--sorted] [--by-suffix]
//!   regmap read  <map.json> tcp <host> <port> <unit>
//!   regmap read  <map.json> rtu <device> <baud> <unit>
//!   regmap write <map.json> <tcp|rtu> <target> <port|baud> <unit> NAME=VALUE...
//!
//! Log verbosity follows `RUST_LOG` (default `modbus_regmap=info`).

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use modbus_regmap::{
    json, ClientConfig, Connection, GenericModbusClient, HeaderParser, ModbusError,
    ModbusResult, ParserOptions, RegisterClass, RegisterClient, RegisterValue,
    SerializeOptions, TransportConfig, DEFAULT_TIMEOUT_MS,
};
use tracing::{error, info, warn};

/// Header-driven Modbus register maps.
#[derive(Parser, Debug)]
#[command(name = "regmap")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a register header to a JSON register map.
    Parse {
        /// Header file with the register defines.
        header: PathBuf,
        /// Output file; stdout when omitted.
        output: Option<PathBuf>,
        /// Order registers by address within each class.
        #[arg(long)]
        sorted: bool,
        /// Classify defines outside sections by their name suffix.
        #[arg(long)]
        by_suffix: bool,
    },
    /// Read every register of the map and print the report.
    Read {
        /// Register map JSON file.
        map: PathBuf,
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Write registers by name.
    Write {
        /// Register map JSON file.
        map: PathBuf,
        #[command(flatten)]
        target: TargetArgs,
        /// Values to write.
        #[arg(required = true, value_name = "NAME=VALUE", value_parser = parse_assignment)]
        assignments: Vec<(String, RegisterValue)>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Tcp,
    Rtu,
}

/// Where the device is.
#[derive(Args, Debug)]
struct TargetArgs {
    /// Transport to use.
    #[arg(value_enum)]
    mode: Mode,
    /// Host name (tcp) or serial device (rtu).
    target: String,
    /// TCP port or serial baud rate.
    #[arg(value_name = "PORT|BAUD")]
    number: u32,
    /// Modbus unit id.
    unit: u8,
    /// Response timeout in milliseconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,
}

impl TargetArgs {
    fn to_config(&self) -> ModbusResult<TransportConfig> {
        let config = match self.mode {
            Mode::Tcp => {
                let port = u16::try_from(self.number).map_err(|_| {
                    ModbusError::configuration(format!("invalid port {}", self.number))
                })?;
                TransportConfig::tcp(self.target.as_str(), port, self.unit)
            }
            Mode::Rtu => TransportConfig::rtu(self.target.as_str(), self.number, self.unit),
        };
        Ok(config.with_timeout(Duration::from_millis(self.timeout_ms)))
    }
}

fn parse_assignment(text: &str) -> Result<(String, RegisterValue), String> {
    let (name, value) = text
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", text))?;
    let value = RegisterValue::parse(value)
        .ok_or_else(|| format!("cannot parse value '{}' for {}", value, name))?;
    Ok((name.to_string(), value))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("modbus_regmap=info,regmap=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let result = match cli.command {
        Command::Parse {
            header,
            output,
            sorted,
            by_suffix,
        } => parse(&header, output.as_deref(), sorted, by_suffix),
        Command::Read { map, target } => read(&map, &target).await,
        Command::Write {
            map,
            target,
            assignments,
        } => write(&map, &target, assignments).await,
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            error!("{}", err);
            ExitCode::from(1)
        }
    }
}

/// Returns whether the header parsed without warnings.
fn parse(
    header: &Path,
    output: Option<&Path>,
    sorted: bool,
    by_suffix: bool,
) -> ModbusResult<bool> {
    let parser = HeaderParser::new(ParserOptions::new().with_classify_by_suffix(by_suffix));
    let parsed = parser.parse_file(header)?;
    let options = SerializeOptions::new().sorted(sorted).pretty(true);

    match output {
        Some(output) => json::save_file(output, &parsed.map, &options)?,
        None => println!("{}", json::to_json_string(&parsed.map, &options)?),
    }
    Ok(parsed.warnings.is_empty())
}

async fn connect(
    map_path: &Path,
    target: &TargetArgs,
) -> ModbusResult<RegisterClient<GenericModbusClient<Connection>>> {
    let map = json::load_file(map_path)?;
    let transport = target.to_config()?;
    let io = GenericModbusClient::new(Connection::open(&transport).await?);
    RegisterClient::new(map, io, ClientConfig::new(transport.unit()))
}

/// Returns whether every register was read.
async fn read(map_path: &Path, target: &TargetArgs) -> ModbusResult<bool> {
    let mut client = connect(map_path, target).await?;
    let report = client.read_all(&RegisterClass::ALL).await;
    let closed = client.close().await;
    let report = report?;

    println!("{}", serde_json::to_string_pretty(&report.to_json())?);
    if let Err(err) = closed {
        warn!("Close failed: {}", err);
    }
    Ok(report.is_complete())
}

/// Returns whether every register was written.
async fn write(
    map_path: &Path,
    target: &TargetArgs,
    values: Vec<(String, RegisterValue)>,
) -> ModbusResult<bool> {
    let mut client = connect(map_path, target).await?;
    let report = client.write_all(values).await;
    let closed = client.close().await;
    let report = report?;

    for (name, err) in report.failures() {
        warn!("{}: {}", name, err);
    }
    info!("Wrote {}", report.written().join(", "));
    if let Err(err) = closed {
        warn!("Close failed: {}", err);
    }
    Ok(report.is_complete())
}
