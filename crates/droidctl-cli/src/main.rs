//! CLI for Android device and emulator automation over adb.
//!
//! Every subcommand maps onto one droidctl-core operation against a single
//! device (picked with `--serial`, or the only attached device).
//!
//! # Usage
//!
//! ```bash
//! # Center of a bounds token (offline)
//! droidctl bounds "[0,0][1080,200]"
//!
//! # Wait for boot, then for the login screen, then tap it
//! droidctl wait-boot
//! droidctl wait-text "Sign in" "Create account"
//! droidctl tap-text "Sign in"
//!
//! # Type into the focused field
//! droidctl input "hello world"
//!
//! # Launch an app with extra `am start` options
//! droidctl start-app org.mozilla.firefox .App -- -W
//!
//! # Target a specific device, JSON output
//! droidctl -s emulator-5554 -f json screen-size
//!
//! # Emulators
//! droidctl emulator list
//! droidctl emulator up Pixel_6_API_33 --wait-boot
//! droidctl emulator stop Pixel_6_API_33
//! ```

use std::fmt::Display;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use droidctl_core::channel::{CommandChannel, ShellChannel};
use droidctl_core::config::{DroidConfig, SessionConfig};
use droidctl_core::coords::{node_tokens, screen_nodes, tap_point, Point};
use droidctl_core::emulator::{EmulatorManager, ProbeState};
use droidctl_core::poll::{Poller, RetryBudget};
use droidctl_core::sampler::MatchStrategy;
use droidctl_core::session::{discover, find_emulator_serial, parse_device_list, DeviceSession};
use droidctl_core::DroidError;
use tracing_subscriber::EnvFilter;

/// CLI for Android device and emulator automation over adb.
#[derive(Parser)]
#[command(name = "droidctl")]
#[command(about = "Drive Android devices and emulators over adb")]
#[command(version)]
struct Cli {
    /// Device serial to target (defaults to the only attached device)
    #[arg(short, long, env = "DROIDCTL_SERIAL")]
    serial: Option<String>,

    /// Output format: text or json
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Log every adb command
    #[arg(short, long)]
    verbose: bool,

    /// Attempt budget for wait commands
    #[arg(short, long, default_value = "30", env = "DROIDCTL_ATTEMPTS")]
    attempts: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// List attached devices and their adb state
    Devices,

    /// Print the tap point at the center of a [x1,y1][x2,y2] token
    Bounds {
        /// Bounds token, e.g. "[0,0][1080,200]"
        token: String,
    },

    #[command(flatten)]
    Device(DeviceCommand),

    /// Manage AVD emulators
    Emulator {
        #[command(subcommand)]
        action: EmulatorCommand,
    },
}

/// Subcommands that drive a single device.
#[derive(Subcommand)]
enum DeviceCommand {
    /// List UI nodes that carry bounds
    Nodes {
        /// Re-read the last dump instead of capturing a new one
        #[arg(long)]
        cached: bool,
    },

    /// Print the focused window (foreground app)
    Foreground,

    /// Print the UI hierarchy XML
    Dump {
        /// Re-read the last dump instead of capturing a new one
        #[arg(long)]
        cached: bool,
    },

    /// Print the physical screen size
    ScreenSize,

    /// Check whether the device finished booting (exit 1 if not)
    Ready,

    /// Check whether the screen is on (exit 1 if not)
    ScreenOn,

    /// Tap at screen coordinates
    Tap {
        /// X coordinate
        x: u32,
        /// Y coordinate
        y: u32,
        /// Delay units to sleep after tapping
        #[arg(short, long, default_value = "0")]
        delay: u32,
    },

    /// Tap the center of a bounds token
    TapBounds {
        /// Bounds token, e.g. "[0,0][1080,200]"
        token: String,
        /// Delay units to sleep after tapping
        #[arg(short, long, default_value = "0")]
        delay: u32,
    },

    /// Tap the first node whose text, description or id contains TEXT
    TapText {
        /// Text to look for (case-insensitive)
        text: String,
        /// Delay units to sleep after tapping
        #[arg(short, long, default_value = "0")]
        delay: u32,
    },

    /// Swipe between two points
    Swipe {
        /// Start X
        x1: u32,
        /// Start Y
        y1: u32,
        /// End X
        x2: u32,
        /// End Y
        y2: u32,
    },

    /// Type text into the focused field
    Input {
        /// Text to type
        text: String,
        /// Send one character per command
        #[arg(long)]
        per_char: bool,
    },

    /// Send a key event (numeric code or KEYCODE_* name)
    Key {
        /// Key code
        code: String,
    },

    /// Launch an activity of an installed package
    StartApp {
        /// Package name (e.g., org.mozilla.firefox)
        package: String,
        /// Activity, absolute or relative to the package (e.g., .App)
        activity: String,
        /// Extra `am start` options, after `--`
        #[arg(last = true)]
        options: Vec<String>,
    },

    /// Force-stop a package
    CloseApp {
        /// Package name
        package: String,
    },

    /// Clear all data of a package
    ClearApp {
        /// Package name
        package: String,
    },

    /// Wait until any of the given texts is on screen
    WaitText {
        /// Texts to look for (case-insensitive)
        #[arg(required = true)]
        targets: Vec<String>,
        /// Check one random target per round instead of all
        #[arg(long)]
        sampled: bool,
    },

    /// Wait until a package is in the foreground
    WaitApp {
        /// Package name
        package: String,
        /// Delay units per attempt
        #[arg(short, long, default_value = "10")]
        delay: u32,
    },

    /// Wait until the device finishes booting
    WaitBoot {
        /// Wait for every attached device concurrently
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand)]
enum EmulatorCommand {
    /// List configured AVDs
    List,

    /// Show whether an emulator is running
    Status {
        /// AVD name
        name: String,
    },

    /// Launch an emulator and leave it running
    Start {
        /// AVD name
        name: String,
    },

    /// Launch (or attach to) an emulator and stop it on Ctrl-C
    Up {
        /// AVD name
        name: String,
        /// Wait for the device to finish booting before reporting ready.
        /// Without --serial the emulator's serial is looked up through adb.
        #[arg(long)]
        wait_boot: bool,
    },

    /// Stop every running emulator with this name
    Stop {
        /// AVD name
        name: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

#[derive(Debug)]
enum CliError {
    Connection(String),
    ActionFailed(String),
    Parse(String),
}

impl CliError {
    fn code(&self) -> u8 {
        match self {
            CliError::Connection(_) => 2,
            CliError::ActionFailed(_) => 1,
            CliError::Parse(_) => 3,
        }
    }

    fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Connection(msg) => write!(f, "Connection error: {}", msg),
            CliError::ActionFailed(msg) => write!(f, "Action failed: {}", msg),
            CliError::Parse(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl From<DroidError> for CliError {
    fn from(e: DroidError) -> Self {
        match e {
            DroidError::Channel(_)
            | DroidError::Environment(_)
            | DroidError::NoDevices
            | DroidError::Io(_) => CliError::Connection(e.to_string()),
            DroidError::Parse { .. } | DroidError::Size { .. } | DroidError::Dump { .. } => {
                CliError::Parse(e.to_string())
            }
            DroidError::RetryExhausted { .. }
            | DroidError::Command { .. }
            | DroidError::InvalidInput(_) => CliError::ActionFailed(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
struct Output {
    format: OutputFormat,
    quiet: bool,
}

impl Output {
    /// Print a query result: `text` in text mode, `json` in json mode.
    fn value(&self, text: impl Display, json: serde_json::Value) {
        if self.format == OutputFormat::Json {
            println!("{}", json);
        } else {
            println!("{}", text);
        }
    }

    /// Report a completed action with its duration.
    fn done(&self, action: &str, target: &str, started: Instant) {
        let elapsed = started.elapsed().as_millis();
        if self.format == OutputFormat::Json {
            let output = serde_json::json!({
                "success": true,
                "action": action,
                "target": target,
                "elapsed_ms": elapsed,
            });
            println!("{}", output);
        } else if !self.quiet {
            let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3fZ");
            eprintln!("|{}|{}|{}|{}ms|", now, action, target, elapsed);
        }
    }

    fn note(&self, message: impl Display) {
        if !self.quiet && self.format == OutputFormat::Text {
            eprintln!("{}", message);
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

struct Context {
    serial: Option<String>,
    attempts: u32,
    out: Output,
    config: SessionConfig,
    droid: DroidConfig,
}

impl Context {
    /// The single device this invocation targets.
    fn device(&self) -> Result<DeviceSession<ShellChannel>, CliError> {
        let channel = ShellChannel::new();
        if let Some(serial) = &self.serial {
            return Ok(DeviceSession::new(serial.clone(), channel, self.config.clone()));
        }
        let mut sessions = discover(channel, &self.config)?;
        if sessions.len() > 1 {
            let serials: Vec<&str> = sessions.iter().map(|s| s.serial()).collect();
            return Err(CliError::Connection(format!(
                "multiple devices attached ({}); pass --serial",
                serials.join(", ")
            )));
        }
        Ok(sessions.remove(0))
    }
}

async fn blocking<T, F>(f: F) -> Result<T, CliError>
where
    F: FnOnce() -> Result<T, CliError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CliError::ActionFailed(format!("task failed: {}", e)))?
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let out = Output {
        format: cli.format,
        quiet: cli.quiet,
    };

    let droid = DroidConfig::load();
    let mut config = droid.session_config();
    if cli.verbose {
        config = config.with_verbose(true);
    }
    let ctx = Context {
        serial: cli.serial,
        attempts: cli.attempts,
        out,
        config,
        droid,
    };

    match cli.command {
        Command::Bounds { token } => {
            let point = tap_point(&token)?;
            ctx.out.value(format!("{} {}", point.x, point.y), to_json(&point));
            Ok(())
        }
        Command::Devices => blocking(move || list_devices(&ctx)).await,
        Command::Emulator { action } => emulator_command(ctx, action).await,
        Command::Device(DeviceCommand::WaitBoot { all: true }) => wait_boot_all(ctx).await,
        Command::Device(command) => blocking(move || device_command(&ctx, command)).await,
    }
}

fn list_devices(ctx: &Context) -> Result<(), CliError> {
    let out = ctx.out;
    let output = ShellChannel::new()
        .execute(&format!("{} devices", ctx.config.adb))
        .map_err(DroidError::from)?;
    let entries = parse_device_list(&output);
    if out.format == OutputFormat::Json {
        println!("{}", to_json(&entries));
    } else if entries.is_empty() {
        out.note("No devices found");
    } else {
        for entry in &entries {
            println!("{}\t{}", entry.serial, entry.state);
        }
    }
    Ok(())
}

fn device_command(ctx: &Context, command: DeviceCommand) -> Result<(), CliError> {
    let out = ctx.out;
    let started = Instant::now();
    let mut device = ctx.device()?;
    match command {
        DeviceCommand::Nodes { cached } => {
            let screen = device.ui_dump(!cached)?;
            if out.format == OutputFormat::Json {
                let nodes: Vec<serde_json::Value> = screen_nodes(&screen)
                    .map(|node| {
                        serde_json::json!({
                            "text": node.attr("text"),
                            "resource_id": node.attr("resource-id"),
                            "content_desc": node.attr("content-desc"),
                            "class": node.attr("class"),
                            "bounds": to_json(&node.bounds),
                            "center": to_json(&node.center()),
                        })
                    })
                    .collect();
                println!("{}", serde_json::Value::Array(nodes));
            } else {
                for token in node_tokens(&screen) {
                    println!("{}", token);
                }
            }
        }
        DeviceCommand::Foreground => {
            let focus = device.foreground()?;
            out.value(focus.trim(), serde_json::json!({ "focus": focus.trim() }));
        }
        DeviceCommand::Dump { cached } => {
            let screen = device.ui_dump(!cached)?;
            out.value(screen.trim(), serde_json::json!({ "xml": screen.trim() }));
        }
        DeviceCommand::ScreenSize => {
            let size = device.screen_size()?;
            out.value(format!("{}x{}", size.width, size.height), to_json(&size));
        }
        DeviceCommand::Ready => {
            let ready = device.is_boot_completed()?;
            out.value(ready, serde_json::json!({ "ready": ready }));
            if !ready {
                return Err(CliError::ActionFailed("device has not finished booting".to_string()));
            }
        }
        DeviceCommand::ScreenOn => {
            let on = device.is_screen_on()?;
            out.value(on, serde_json::json!({ "screen_on": on }));
            if !on {
                return Err(CliError::ActionFailed("screen is off".to_string()));
            }
        }
        DeviceCommand::Tap { x, y, delay } => {
            device.tap(Point::new(x, y), delay)?;
            out.done("tap", &format!("{} {}", x, y), started);
        }
        DeviceCommand::TapBounds { token, delay } => {
            let point = device.tap_bounds(&token, delay)?;
            out.done("tap", &format!("{} {}", point.x, point.y), started);
        }
        DeviceCommand::TapText { text, delay } => {
            device.tap_text(&text, delay)?;
            out.done("tap-text", &text, started);
        }
        DeviceCommand::Swipe { x1, y1, x2, y2 } => {
            device.swipe(Point::new(x1, y1), Point::new(x2, y2))?;
            out.done("swipe", &format!("{} {} {} {}", x1, y1, x2, y2), started);
        }
        DeviceCommand::Input { text, per_char } => {
            device.input_text(&text, per_char)?;
            out.done("input", &text, started);
        }
        DeviceCommand::Key { code } => {
            device.key_event(&code)?;
            out.done("key", &code, started);
        }
        DeviceCommand::StartApp {
            package,
            activity,
            options,
        } => {
            device.start_app(&package, &activity, &options.join(" "))?;
            out.done("start-app", &package, started);
        }
        DeviceCommand::CloseApp { package } => {
            device.close_app(&package)?;
            out.done("close-app", &package, started);
        }
        DeviceCommand::ClearApp { package } => {
            device.clear_app(&package)?;
            out.done("clear-app", &package, started);
        }
        DeviceCommand::WaitText { targets, sampled } => {
            if sampled {
                device = DeviceSession::new(
                    device.serial().to_string(),
                    ShellChannel::new(),
                    ctx.config.clone().with_match_strategy(MatchStrategy::Sampled),
                );
            }
            let targets: Vec<&str> = targets.iter().map(String::as_str).collect();
            device.wait_for_text(&targets, ctx.attempts)?;
            out.done("wait-text", &targets.join(" | "), started);
        }
        DeviceCommand::WaitApp { package, delay } => {
            device.wait_for_app(&package, ctx.attempts, delay)?;
            out.done("wait-app", &package, started);
        }
        DeviceCommand::WaitBoot { .. } => {
            device.wait_for_boot(ctx.attempts)?;
            out.done("wait-boot", device.serial(), started);
        }
    }
    Ok(())
}

async fn wait_boot_all(ctx: Context) -> Result<(), CliError> {
    let started = Instant::now();
    let config = ctx.config.clone();
    let sessions = blocking(move || Ok(discover(ShellChannel::new(), &config)?)).await?;

    let attempts = ctx.attempts;
    let tasks: Vec<_> = sessions
        .into_iter()
        .map(|device| {
            tokio::task::spawn_blocking(move || {
                let result = device.wait_for_boot(attempts);
                (device.serial().to_string(), result)
            })
        })
        .collect();

    let mut first_error = None;
    for task in tasks {
        let (serial, result) = task
            .await
            .map_err(|e| CliError::ActionFailed(format!("task failed: {}", e)))?;
        match result {
            Ok(_) => ctx.out.done("wait-boot", &serial, started),
            Err(e) => {
                eprintln!("{}: {}", serial, e);
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Waits for the emulator running `avd` to show up in `adb devices`.
fn emulator_serial(avd: &str, config: &SessionConfig, attempts: u32) -> Result<String, CliError> {
    let channel = ShellChannel::new();
    let mut found = None;
    Poller::new(config.poll_tick()).poll(RetryBudget::new(attempts, config.delay_unit() * 10), || {
        found = find_emulator_serial(&channel, config, avd)?;
        Ok(found.is_some())
    })?;
    found.ok_or_else(|| CliError::Connection(format!("emulator {} is not attached to adb", avd)))
}

async fn emulator_command(ctx: Context, action: EmulatorCommand) -> Result<(), CliError> {
    let out = ctx.out;
    let manager = EmulatorManager::system(&ctx.droid);

    match action {
        EmulatorCommand::List => {
            let avds = manager.list_avds()?;
            if out.format == OutputFormat::Json {
                println!("{}", serde_json::json!({ "avds": avds }));
            } else if avds.is_empty() {
                out.note("No AVDs configured");
            } else {
                for avd in avds {
                    println!("{}", avd);
                }
            }
        }
        EmulatorCommand::Status { name } => {
            let state = manager.probe(&name)?;
            let text = match state {
                ProbeState::Running { pid } => format!("{} running (pid {})", name, pid),
                ProbeState::NotRunning => format!("{} not running", name),
            };
            out.value(text, to_json(&state));
        }
        EmulatorCommand::Start { name } => {
            let started = Instant::now();
            let handle = manager.start(&name)?;
            if !handle.is_owned() {
                out.note(format!("{} was already running", name));
            }
            out.done("emulator-start", &name, started);
        }
        EmulatorCommand::Up { name, wait_boot } => {
            let started = Instant::now();
            let handle = manager.start(&name)?;

            if wait_boot {
                let serial = ctx.serial.clone();
                let config = ctx.config.clone();
                let attempts = ctx.attempts;
                let avd = name.clone();
                let booted = blocking(move || {
                    let serial = match serial {
                        Some(serial) => serial,
                        None => emulator_serial(&avd, &config, attempts)?,
                    };
                    let device = DeviceSession::new(serial, ShellChannel::new(), config);
                    Ok(device.wait_for_boot(attempts)?)
                })
                .await;
                if let Err(e) = booted {
                    handle.release();
                    return Err(e);
                }
            }
            out.done("emulator-up", &name, started);
            out.note("Press Ctrl-C to stop");

            let signal = tokio::signal::ctrl_c().await;
            tracing::info!(name = %name, "stopping emulator");
            handle.release();
            signal.map_err(|e| CliError::ActionFailed(format!("signal handler failed: {}", e)))?;
        }
        EmulatorCommand::Stop { name } => {
            let stopped = manager.stop_by_name(&name)?;
            if stopped.is_empty() {
                return Err(CliError::ActionFailed(format!("no running emulator named {}", name)));
            }
            if out.format == OutputFormat::Json {
                println!("{}", serde_json::json!({ "stopped": stopped }));
            } else {
                for pid in stopped {
                    println!("{}", pid);
                }
            }
        }
    }
    Ok(())
}
