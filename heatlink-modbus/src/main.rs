//! Command line control of PID heater modules over Modbus RTU.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use heatlink_modbus::config::{self, DeviceConfig, HeatlinkConfig, LineConfig};
use heatlink_modbus::mock::RecordingTransport;
use heatlink_modbus::reading;
use heatlink_modbus::rtu::RtuTransport;
use heatlink_modbus::{HeaterController, OutputMode, PidAction, RegisterTransport};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Control PID heater modules over Modbus RTU.
#[derive(Parser, Debug)]
#[command(name = "heatlink")]
#[command(about = "Configures, runs and monitors Modbus RTU heater modules")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "heatlink.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Device to address; repeat for several (default: all devices).
    #[arg(short, long = "device", global = true)]
    devices: Vec<String>,

    /// Print the register transactions instead of opening serial ports.
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Apply thermocouple type, action, filter and PID gains from the config
    Prepare,
    /// Start the heater
    Run,
    /// Stop the heater
    Stop,
    /// Print the current temperature
    Read,
    /// Poll temperatures until interrupted
    Monitor {
        /// Interval between samples (default: poll_interval_ms from the config)
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Stop after this many samples
        #[arg(long)]
        samples: Option<u64>,
        /// Print one JSON object per sample instead of comma-separated values
        #[arg(long)]
        json: bool,
    },
    /// Write PID gains and setpoint
    Pid {
        #[arg(long)]
        max_rate: f64,
        #[arg(long)]
        derivative_gain: f64,
        #[arg(long)]
        proportional_gain: f64,
        #[arg(long)]
        integral_gain: f64,
        #[arg(long)]
        setpoint: f64,
    },
    /// Start an autotune run
    Autotune {
        #[arg(long)]
        max_rate: f64,
        /// Autotune timeout in seconds
        #[arg(long)]
        timeout_secs: u32,
        #[arg(long)]
        setpoint: f64,
        /// Enable adaptive PID control before starting
        #[arg(long)]
        adaptive: bool,
    },
    /// Enable or disable adaptive PID control
    Adaptive {
        /// Disable instead of enable (see `adaptive_disable` in the config)
        #[arg(long)]
        disable: bool,
    },
    /// Set the input filter level (fractions are truncated)
    Filter { level: f64 },
    /// Set the thermocouple type code
    Thermocouple {
        #[arg(default_value_t = heatlink_modbus::controller::DEFAULT_THERMOCOUPLE_TYPE)]
        code: u16,
    },
    /// Set the PID action (direct or reverse)
    Action { action: PidAction },
    /// Set the output 1 mode (off or pid)
    Output { mode: OutputMode },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Prepare => "prepare",
            Command::Run => "run",
            Command::Stop => "stop",
            Command::Read => "read",
            Command::Monitor { .. } => "monitor",
            Command::Pid { .. } => "pid",
            Command::Autotune { .. } => "autotune",
            Command::Adaptive { .. } => "adaptive",
            Command::Filter { .. } => "filter",
            Command::Thermocouple { .. } => "thermocouple",
            Command::Action { .. } => "action",
            Command::Output { .. } => "output",
        }
    }
}

/// One serial line with an open transport.
struct Line<'a, T> {
    config: LineConfig<'a>,
    transport: T,
}

#[derive(Debug, Serialize)]
struct DeviceReading<'a> {
    device: &'a str,
    temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
struct MonitorSample<'a> {
    timestamp: String,
    readings: Vec<DeviceReading<'a>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = HeatlinkConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    // Initialize logging
    let log_config = config
        .logging
        .with_level_override(args.log_level.as_deref());
    heatlink_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Loaded configuration from {:?}", args.config);

    // Serial transactions block; run them off the async runtime so Ctrl+C
    // can still be observed.
    let stop = Arc::new(AtomicBool::new(false));
    let mut worker = {
        let stop = Arc::clone(&stop);
        tokio::task::spawn_blocking(move || run_command(&args, &config, &stop))
    };

    let joined = tokio::select! {
        joined = &mut worker => joined,
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => {
                    info!("Received shutdown signal");
                    stop.store(true, Ordering::SeqCst);
                }
                Err(e) => warn!("Cannot listen for shutdown signal: {}", e),
            }
            worker.await
        }
    };

    joined.context("Command worker failed")?
}

fn run_command(args: &Args, config: &HeatlinkConfig, stop: &AtomicBool) -> Result<()> {
    let devices = config.heater.select(&args.devices)?;
    let line_configs = config::lines(&devices);

    info!(
        "Running '{}' on {} device(s)",
        args.command.name(),
        devices.len()
    );

    if args.dry_run {
        let mut lines = dry_run_lines(line_configs);
        let result = execute(&args.command, &mut lines, config, stop);
        for line in &lines {
            for transaction in line.transport.transactions() {
                println!("{} {}", line.config.serial.port, transaction);
            }
        }
        return result;
    }

    let mut lines = Vec::with_capacity(line_configs.len());
    for line_config in line_configs {
        let transport = RtuTransport::open(line_config.serial, line_config.timeout)
            .with_context(|| format!("Failed to open serial port {}", line_config.serial.port))?;
        lines.push(Line {
            config: line_config,
            transport,
        });
    }

    execute(&args.command, &mut lines, config, stop)
}

/// Lines backed by recording transports; reads answer 0.0.
fn dry_run_lines(line_configs: Vec<LineConfig<'_>>) -> Vec<Line<'_, RecordingTransport>> {
    line_configs
        .into_iter()
        .map(|line_config| Line {
            config: line_config,
            transport: RecordingTransport::answering(0.0),
        })
        .collect()
}

fn execute<T: RegisterTransport>(
    command: &Command,
    lines: &mut [Line<'_, T>],
    config: &HeatlinkConfig,
    stop: &AtomicBool,
) -> Result<()> {
    if let Command::Monitor {
        interval_ms,
        samples,
        json,
    } = command
    {
        let interval =
            Duration::from_millis(interval_ms.unwrap_or(config.heater.poll_interval_ms));
        return monitor(lines, interval, *samples, *json, stop);
    }

    for line in lines.iter_mut() {
        for &device in &line.config.devices {
            if stop.load(Ordering::SeqCst) {
                return Ok(());
            }

            let mut controller = HeaterController::for_device(device, &mut line.transport);
            apply(command, &mut controller, device)
                .with_context(|| format!("Device '{}': {} failed", device.name, command.name()))?;
        }
    }

    Ok(())
}

fn apply<T: RegisterTransport>(
    command: &Command,
    controller: &mut HeaterController<T>,
    device: &DeviceConfig,
) -> Result<()> {
    match command {
        Command::Prepare => {
            controller.prepare(device)?;
            if device.pid.is_none() {
                warn!("Device '{}': no PID block configured", device.name);
            }
        }
        Command::Run => controller.run()?,
        Command::Stop => controller.stop()?,
        Command::Read => {
            let temperature = controller.read_temperature()?;
            println!("{},{}", device.name, reading::display(temperature));
        }
        Command::Pid {
            max_rate,
            derivative_gain,
            proportional_gain,
            integral_gain,
            setpoint,
        } => controller.configure_pid(
            *max_rate,
            *derivative_gain,
            *proportional_gain,
            *integral_gain,
            *setpoint,
        )?,
        Command::Autotune {
            max_rate,
            timeout_secs,
            setpoint,
            adaptive,
        } => {
            if *adaptive {
                controller.set_adaptive_autotune(true)?;
            }
            controller.start_autotune(*max_rate, *timeout_secs, *setpoint)?;
        }
        Command::Adaptive { disable } => controller.set_adaptive_autotune(!*disable)?,
        Command::Filter { level } => controller.set_filter(*level)?,
        Command::Thermocouple { code } => controller.set_thermocouple(*code)?,
        Command::Action { action } => controller.set_action(*action)?,
        Command::Output { mode } => controller.set_output_mode(*mode)?,
        Command::Monitor { .. } => anyhow::bail!("monitor is not a per-device command"),
    }

    Ok(())
}

/// Poll every device in turn, one output line per sample.
///
/// A failed read is logged and reported as an empty value; polling goes on.
fn monitor<T: RegisterTransport>(
    lines: &mut [Line<'_, T>],
    interval: Duration,
    samples: Option<u64>,
    json: bool,
    stop: &AtomicBool,
) -> Result<()> {
    let mut taken = 0u64;

    while !stop.load(Ordering::SeqCst) {
        let started = Instant::now();
        let mut readings = Vec::new();

        for line in lines.iter_mut() {
            for &device in &line.config.devices {
                let mut controller = HeaterController::for_device(device, &mut line.transport);
                let temperature = match controller.read_temperature() {
                    Ok(value) => Some(value),
                    Err(e) => {
                        warn!("Device '{}': read failed: {}", device.name, e);
                        None
                    }
                };
                readings.push(DeviceReading {
                    device: &device.name,
                    temperature,
                });
            }
        }

        if json {
            let sample = MonitorSample {
                timestamp: chrono::Utc::now().to_rfc3339(),
                readings,
            };
            println!("{}", heatlink_common::encode_line(&sample)?);
        } else {
            let fields: Vec<String> = readings
                .iter()
                .map(|r| r.temperature.map(reading::display).unwrap_or_default())
                .collect();
            println!("{}", fields.join(","));
        }

        taken += 1;
        if samples.is_some_and(|n| taken >= n) {
            break;
        }

        sleep_until(started + interval, stop);
    }

    info!("Monitor stopped after {} sample(s)", taken);
    Ok(())
}

/// Sleep until `deadline`, waking early when `stop` is set.
fn sleep_until(deadline: Instant, stop: &AtomicBool) {
    const STEP: Duration = Duration::from_millis(100);

    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(STEP.min(deadline - now));
    }
}
