//! device-run CLI
//!
//! Entry point for the `device-run` command-line tool.

use clap::{Args, Parser, Subcommand};
use device_run_lane::config::{EnvOverrides, RunnerConfig};
use device_run_lane::console::stdout_live_results;
use device_run_lane::logging::init_logging;
use device_run_lane::logs::{timestamped_name, AggregatedLog, CallbackLog, Logs, SharedLog};
use device_run_lane::{
    AppBundleInformation, AppRunner, AppRunnerDeps, CancellationToken, Extension, TestTarget,
};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "device-run")]
#[command(about = "Run packaged test apps on Apple devices and simulators", version)]
struct Cli {
    /// Increase diagnostic output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install (devices only), run the tests and report a verdict per target
    Test {
        #[command(flatten)]
        common: CommonArgs,

        /// Targets to run on, comma separated
        #[arg(long, short = 't', value_delimiter = ',', required = true)]
        targets: Vec<TestTarget>,

        /// Run timeout in minutes
        #[arg(long)]
        timeout: Option<f64>,

        /// Minutes to wait for the app to connect
        #[arg(long)]
        launch_timeout: Option<f64>,

        /// Reset simulators before and after the run
        #[arg(long)]
        clean_simulator: bool,

        /// Receive results through a shared file (simulators only)
        #[arg(long)]
        file_transport: bool,
    },

    /// Install the app on a device
    Install {
        #[command(flatten)]
        common: CommonArgs,

        #[arg(long, short = 't')]
        target: TestTarget,
    },

    /// Remove the app from a device
    Uninstall {
        #[command(flatten)]
        common: CommonArgs,

        #[arg(long, short = 't')]
        target: TestTarget,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Path to the .app bundle
    #[arg(long, short = 'a')]
    app: PathBuf,

    /// Bundle identifier (defaults to the bundle's file name)
    #[arg(long)]
    bundle_id: Option<String>,

    /// The bundle is an app extension of this kind (today, watchkit2)
    #[arg(long)]
    extension: Option<Extension>,

    /// App that hosts the extension, launched in its place
    #[arg(long)]
    launch_app: Option<PathBuf>,

    /// Where logs and verdicts are written
    #[arg(long, short = 'o')]
    output_directory: Option<PathBuf>,

    /// Path to mlaunch
    #[arg(long)]
    mlaunch_path: Option<PathBuf>,

    /// Xcode to use instead of the selected one
    #[arg(long)]
    xcode_root: Option<PathBuf>,

    /// Device to use, skipping discovery
    #[arg(long)]
    device_name: Option<String>,

    /// Path to a TOML config file
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Test {
            common,
            targets,
            timeout,
            launch_timeout,
            clean_simulator,
            file_transport,
        } => {
            let mut overrides = common_overrides(&common);
            if let Some(minutes) = timeout {
                set(&mut overrides, &["timeouts", "run_minutes"], json!(minutes));
            }
            if let Some(minutes) = launch_timeout {
                set(&mut overrides, &["timeouts", "launch_minutes"], json!(minutes));
            }
            if clean_simulator {
                set(&mut overrides, &["simulator", "ensure_clean_state"], json!(true));
            }
            if file_transport {
                set(&mut overrides, &["listener", "use_file_transport"], json!(true));
            }
            let config = load_config(&common, overrides);
            run_tests(&common, &config, &targets);
        }
        Commands::Install { common, target } => {
            let config = load_config(&common, common_overrides(&common));
            run_install(&common, &config, target);
        }
        Commands::Uninstall { common, target } => {
            let config = load_config(&common, common_overrides(&common));
            run_uninstall(&common, &config, target);
        }
    }
}

fn run_tests(common: &CommonArgs, config: &RunnerConfig, targets: &[TestTarget]) {
    let cancel = cancel_on_ctrlc();
    let app = app_info(common);

    let mut exit_code = 0;
    for &target in targets {
        let code = run_target(config, target, &app, &cancel);
        if code != 0 && exit_code == 0 {
            exit_code = code;
        }
        if cancel.is_cancelled() {
            break;
        }
    }
    process::exit(exit_code);
}

/// Install (for devices) and run one target. Returns its exit code.
fn run_target(
    config: &RunnerConfig,
    target: TestTarget,
    app: &AppBundleInformation,
    cancel: &CancellationToken,
) -> i32 {
    let mut runner = match runner_for(config, target, app, cancel) {
        Ok(runner) => runner.with_live_output(stdout_live_results()),
        Err(e) => {
            eprintln!("Error creating logs for {}: {}", target, e);
            return 1;
        }
    };

    if !target.is_simulator() {
        match runner.install(cancel) {
            Ok(result) if result.succeeded() => {}
            Ok(result) => {
                eprintln!("Failed to install {} on {}: {}", app.app_name, target, result);
                return if result.exit_code != 0 {
                    result.exit_code
                } else {
                    1
                };
            }
            Err(e) => {
                eprintln!("Error installing on {}: {}", target, e);
                return 1;
            }
        }
    }

    match runner.run() {
        Ok(verdict) => {
            println!();
            println!("{}: {}", target, verdict.human_summary());
            verdict.status_code()
        }
        Err(e) => {
            eprintln!("Error running on {}: {}", target, e);
            1
        }
    }
}

fn run_install(common: &CommonArgs, config: &RunnerConfig, target: TestTarget) {
    let cancel = cancel_on_ctrlc();
    let app = app_info(common);
    let mut runner = match runner_for(config, target, &app, &cancel) {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("Error creating logs: {}", e);
            process::exit(1);
        }
    };

    match runner.install(&cancel) {
        Ok(result) if result.succeeded() => {
            println!("Installed {} on {}", app.app_name, target);
            process::exit(0);
        }
        Ok(result) => {
            eprintln!("Install failed: {}", result);
            process::exit(if result.exit_code != 0 { result.exit_code } else { 1 });
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn run_uninstall(common: &CommonArgs, config: &RunnerConfig, target: TestTarget) {
    let cancel = cancel_on_ctrlc();
    let app = app_info(common);
    let mut runner = match runner_for(config, target, &app, &cancel) {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("Error creating logs: {}", e);
            process::exit(1);
        }
    };

    match runner.uninstall() {
        Ok(result) if result.succeeded() => {
            println!("Uninstalled {} from {}", app.bundle_identifier, target);
            process::exit(0);
        }
        Ok(result) => {
            eprintln!("Uninstall failed: {}", result);
            process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn runner_for(
    config: &RunnerConfig,
    target: TestTarget,
    app: &AppBundleInformation,
    cancel: &CancellationToken,
) -> std::io::Result<AppRunner> {
    let logs = Arc::new(Logs::new(config.output_directory.join(target.as_str())));
    let file_log: SharedLog = logs.create(&timestamped_name("main", "log"), "Main log", true)?;
    let trace_log: SharedLog = Arc::new(CallbackLog::new("trace", |text| {
        for line in text.lines() {
            tracing::debug!(target: "main_log", "{}", line);
        }
    }));
    let main_log: SharedLog = AggregatedLog::of(vec![file_log, trace_log]);

    Ok(AppRunner::new(
        AppRunnerDeps::system(config),
        config.clone(),
        target,
        app.clone(),
        logs,
        main_log,
    )
    .with_cancellation(cancel.clone()))
}

fn app_info(common: &CommonArgs) -> AppBundleInformation {
    let mut app = AppBundleInformation::from_path(&common.app, None);
    if let Some(ref id) = common.bundle_id {
        app = app.with_bundle_identifier(id.clone());
    }
    if let Some(extension) = common.extension {
        app = app.with_extension(extension);
    }
    if let Some(ref host) = common.launch_app {
        app = app.with_launch_app_path(host.clone());
    }
    app
}

fn cancel_on_ctrlc() -> CancellationToken {
    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nCancelling...");
        handler_token.cancel();
    }) {
        tracing::warn!(error = %e, "failed to install Ctrl-C handler");
    }
    cancel
}

fn load_config(common: &CommonArgs, overrides: Value) -> RunnerConfig {
    match RunnerConfig::load(common.config.as_deref(), &EnvOverrides::from_env(), Some(overrides)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    }
}

fn common_overrides(common: &CommonArgs) -> Value {
    let mut overrides = Value::Object(Map::new());
    if let Some(ref dir) = common.output_directory {
        set(&mut overrides, &["output_directory"], json!(dir));
    }
    if let Some(ref path) = common.mlaunch_path {
        set(&mut overrides, &["mlaunch", "path"], json!(path));
    }
    if let Some(ref root) = common.xcode_root {
        set(&mut overrides, &["mlaunch", "xcode_root"], json!(root));
    }
    if let Some(ref name) = common.device_name {
        set(&mut overrides, &["device", "name"], json!(name));
    }
    overrides
}

/// Set a nested key, creating intermediate objects.
fn set(root: &mut Value, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut node = root;
    for key in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = match node.as_object_mut() {
            Some(map) => map
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            None => return,
        };
    }
    if let Some(map) = node.as_object_mut() {
        map.insert(last.to_string(), value);
    }
}
