mod logging;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use tumbler_link::bridge::{Relay, TcpRemoteListener};
use tumbler_link::protocol::ascii::encode_telemetry_as;
use tumbler_link::protocol::AsciiCodec;
use tumbler_link::transport::open_serial;
use tumbler_link::util::duration_to_millis;
use tumbler_link::{CommandFrame, Config, Error, MotionCommand, Result, TelemetryFrame};

use crate::logging::{init_logging, LogFormat, LogLevel};

#[derive(Parser, Debug)]
#[command(name = "tumbler-link", version, about = "Robot command and telemetry link")]
struct Cli {
    /// JSON configuration file.
    #[arg(long, value_name = "PATH", global = true, env = "TUMBLER_LINK_CONFIG")]
    config: Option<PathBuf>,

    /// Serial device, overriding the configuration.
    #[arg(long, value_name = "PATH", global = true)]
    device: Option<String>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Relay the serial link to a TCP line-protocol client
    Bridge(BridgeArgs),
    /// Send one command frame to the robot
    Send(SendArgs),
    /// Print telemetry frames as they arrive
    Monitor(MonitorArgs),
}

#[derive(Args, Debug)]
struct BridgeArgs {
    /// Listen address, overriding the configuration.
    #[arg(long, value_name = "ADDR")]
    bind: Option<SocketAddr>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Verb {
    Move,
    Turn,
    Stop,
}

impl Verb {
    fn command(self) -> MotionCommand {
        match self {
            Verb::Move => MotionCommand::Move,
            Verb::Turn => MotionCommand::Rotate,
            Verb::Stop => MotionCommand::Stop,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum TransportKind {
    Serial,
    Bus,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Encoding {
    Binary,
    Ascii,
}

#[derive(Args, Debug)]
struct SendArgs {
    verb: Verb,

    /// Distance or angle.
    #[arg(allow_negative_numbers = true, default_value_t = 0)]
    value: i16,

    #[arg(long, default_value_t = 0)]
    speed: u8,

    #[arg(long, value_enum, default_value = "serial")]
    transport: TransportKind,

    #[arg(long, value_enum, default_value = "ascii")]
    encoding: Encoding,
}

#[derive(Args, Debug)]
struct MonitorArgs {
    /// Stop after this many frames.
    #[arg(long)]
    count: Option<u64>,

    #[arg(long, value_enum, default_value = "serial")]
    transport: TransportKind,

    #[arg(long, value_enum, default_value = "ascii")]
    encoding: Encoding,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            match err {
                Error::Config(_) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(device) = &cli.device {
        config.serial.device = device.clone();
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(&cli)?;
    match cli.command {
        Command::Bridge(args) => {
            if let Some(bind) = args.bind {
                config.bridge.bind_addr = bind;
            }
            run_bridge(&config)
        }
        Command::Send(args) => run_send(&config, &args),
        Command::Monitor(args) => run_monitor(&config, &args),
    }
}

fn run_bridge(config: &Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(drive_bridge(config))
}

async fn drive_bridge(config: &Config) -> Result<()> {
    let max_line = config.bridge.max_line_length;
    let stream = open_serial(&config.serial, max_line)?;
    let listener = TcpRemoteListener::bind(config.bridge.bind_addr, max_line)?;
    let mut relay = Relay::new(listener, stream, &config.bridge);

    info!(
        tick_ms = duration_to_millis(config.bridge.tick_interval),
        telemetry_ms = duration_to_millis(config.bridge.telemetry_interval),
        "bridge running"
    );

    let mut ticker = tokio::time::interval(config.bridge.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut state = relay.state();
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                let report = relay.tick()?;
                if report.state != state {
                    info!(%state, new_state = %report.state, "bridge state changed");
                    state = report.state;
                }
            }
        }
    }

    let stats = relay.stats();
    info!(?stats, "bridge stopped");
    Ok(())
}

fn run_send(config: &Config, args: &SendArgs) -> Result<()> {
    let frame = CommandFrame::new(args.verb.command(), args.value, args.speed);
    match args.transport {
        TransportKind::Serial => {
            let mut stream = open_serial(&config.serial, config.bridge.max_line_length)?;
            match args.encoding {
                Encoding::Binary => stream.write_command(&frame)?,
                Encoding::Ascii => stream.write_command_line(&frame)?,
            }
        }
        TransportKind::Bus => send_over_bus(config, args.encoding, &frame)?,
    }
    info!(%frame, "command sent");
    Ok(())
}

fn run_monitor(config: &Config, args: &MonitorArgs) -> Result<()> {
    let schema = config.serial.telemetry_schema;
    let mut seen = 0u64;
    let mut print = |frame: &TelemetryFrame| {
        println!("{}", encode_telemetry_as(frame, schema));
        seen += 1;
        args.count.map_or(true, |count| seen < count)
    };

    match args.transport {
        TransportKind::Serial => {
            let mut stream = open_serial(&config.serial, config.bridge.max_line_length)?;
            loop {
                let result = match args.encoding {
                    Encoding::Binary => stream.read_telemetry(),
                    Encoding::Ascii => stream.read_telemetry_line().map(|f| f.map(|(frame, _)| frame)),
                };
                match result {
                    Ok(Some(frame)) => {
                        if !print(&frame) {
                            return Ok(());
                        }
                    }
                    Ok(None) => {}
                    Err(err) if matches!(err, Error::Format(_) | Error::Range(_) | Error::Transport { .. }) => {
                        warn!(%err, "skipping telemetry");
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        TransportKind::Bus => monitor_bus(config, args.encoding, &mut print),
    }
}

#[cfg(target_os = "linux")]
fn open_bus(
    config: &Config,
) -> Result<tumbler_link::transport::BusAdapter<tumbler_link::transport::LinuxI2cBus>> {
    let bus = tumbler_link::transport::LinuxI2cBus::open(&config.bus.device)?;
    let ascii = AsciiCodec::with_max_line_length(
        config.serial.telemetry_schema,
        config.bridge.max_line_length,
    );
    Ok(tumbler_link::transport::BusAdapter::new(bus, config.bus.address, ascii))
}

#[cfg(target_os = "linux")]
fn send_over_bus(config: &Config, encoding: Encoding, frame: &CommandFrame) -> Result<()> {
    let mut bus = open_bus(config)?;
    match encoding {
        Encoding::Binary => bus.send_command(frame),
        Encoding::Ascii => bus.send_command_ascii(frame),
    }
}

#[cfg(target_os = "linux")]
fn monitor_bus(
    config: &Config,
    encoding: Encoding,
    print: &mut dyn FnMut(&TelemetryFrame) -> bool,
) -> Result<()> {
    let mut bus = open_bus(config)?;
    loop {
        let result = match encoding {
            Encoding::Binary => bus.read_telemetry(),
            Encoding::Ascii => bus.read_telemetry_ascii(),
        };
        match result {
            Ok(frame) => {
                if !print(&frame) {
                    return Ok(());
                }
            }
            Err(err) if err.is_recoverable() && !matches!(err, Error::Io(_)) => {
                warn!(%err, "skipping telemetry");
            }
            Err(err) => return Err(err),
        }
        std::thread::sleep(config.bridge.telemetry_interval);
    }
}

#[cfg(not(target_os = "linux"))]
fn send_over_bus(_config: &Config, _encoding: Encoding, _frame: &CommandFrame) -> Result<()> {
    Err(Error::config("the bus transport needs Linux i2c-dev"))
}

#[cfg(not(target_os = "linux"))]
fn monitor_bus(
    _config: &Config,
    _encoding: Encoding,
    _print: &mut dyn FnMut(&TelemetryFrame) -> bool,
) -> Result<()> {
    Err(Error::config("the bus transport needs Linux i2c-dev"))
}
