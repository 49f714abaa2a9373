//! keyglowd: RGB keyboard lighting daemon.
//!
//! Exposes each attached keyboard as `<devpath><N>/cmd` and drives it at a
//! fixed frame rate until SIGINT, SIGTERM, SIGHUP or SIGQUIT.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use keyglow_lib::config::{
    CliOverrides, DaemonConfig, Layout, ValidationError, layout_from_locale, system_locale,
};
use keyglow_lib::daemon::Daemon;
use keyglow_lib::device::PlatformBackend;
use keyglow_lib::devnode::DevNodes;
use keyglow_lib::instance;
use keyglow_lib::protocol::MAX_LAYOUT_LEN;
use keyglow_lib::signal::SignalDispatcher;

#[derive(Parser)]
#[command(name = "keyglowd", version, about = "RGB keyboard lighting daemon")]
struct Args {
    /// Frames per second
    #[arg(long, value_name = "N")]
    fps: Option<u32>,

    /// Default keyboard layout (de, es, fr, se, us, gb)
    #[arg(long, value_name = "CODE")]
    layout: Option<String>,

    /// Group owning the device nodes
    #[arg(long, value_name = "GID")]
    gid: Option<u32>,

    /// Disable key binding and key notifications
    #[arg(long)]
    nobind: bool,

    /// Disable key notifications
    #[arg(long)]
    nonotify: bool,

    /// Allow running without root privileges
    #[arg(long)]
    nonroot: bool,

    /// Config file (default: platform config dir)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Base path of the device nodes
    #[arg(long, value_name = "PATH")]
    devpath: Option<String>,

    /// Print the merged configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            fps: self.fps,
            layout: self.layout.clone(),
            gid: self.gid,
            nobind: self.nobind,
            nonotify: self.nonotify,
            nonroot: self.nonroot,
            devpath: self.devpath.clone(),
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn load_config(args: &Args) -> DaemonConfig {
    let (mut config, warnings) = match &args.config {
        Some(path) => DaemonConfig::load_from(path),
        None => DaemonConfig::load_with_warnings(),
    };
    for w in warnings {
        log::warn!("{w}");
    }
    config.apply_overrides(&args.overrides());
    config
}

/// Flag notices, printed in the order the flags are documented.
fn announce(args: &Args, config: &DaemonConfig) {
    if args.fps.is_some() {
        println!("Setting FPS to {}", config.fps);
    }
    if let Some(gid) = config.gid {
        println!("Setting /dev node gid: {gid}");
    }
    if !config.bind {
        println!("Key binding and key notifications are disabled");
    } else if !config.notify {
        println!("Key notifications are disabled");
    }
    if let Err(errors) = config.validate() {
        for e in errors {
            match e {
                ValidationError::UnknownLayout(code) if code.len() > MAX_LAYOUT_LEN => {
                    log::warn!("Unknown layout (too long), using system locale")
                }
                ValidationError::UnknownLayout(code) => {
                    log::warn!("Unknown layout \"{code}\", using system locale")
                }
                other => log::warn!("{other}"),
            }
        }
    }
}

fn default_layout(config: &DaemonConfig) -> Layout {
    let layout = config
        .layout()
        .unwrap_or_else(|| layout_from_locale(&system_locale()));
    println!("Setting default layout: {layout}");
    layout
}

/// Route SIGQUIT to `dispatcher` from a background thread.
///
/// `ctrlc` covers SIGINT, SIGTERM and SIGHUP but not SIGQUIT.
#[cfg(unix)]
fn watch_quit(dispatcher: SignalDispatcher) -> std::io::Result<()> {
    use signal_hook::consts::SIGQUIT;
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGQUIT])?;
    std::thread::Builder::new()
        .name("sigquit".into())
        .spawn(move || {
            for _ in signals.forever() {
                dispatcher.on_signal();
            }
        })?;
    Ok(())
}

fn install_signal_handlers(dispatcher: &SignalDispatcher) {
    let handler = dispatcher.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        handler.on_signal();
    }) {
        log::warn!("could not install signal handler: {e}");
    }
    #[cfg(unix)]
    if let Err(e) = watch_quit(dispatcher.clone()) {
        log::warn!("could not watch SIGQUIT: {e}");
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = load_config(&args);
    if args.print_config {
        return match config.to_toml() {
            Ok(text) => {
                print!("{text}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {e}");
                ExitCode::FAILURE
            }
        };
    }

    println!("keyglowd {}", env!("CARGO_PKG_VERSION"));

    let nodes = DevNodes::new(config.devpath.clone(), config.gid);
    let pid_path = nodes.pid_path();
    if let Some(pid) = instance::check_running(&pid_path) {
        println!(
            "keyglowd is already running (PID {pid}). Try `killall keyglowd`.\n\
             (If this is an error, delete {} and try again)",
            pid_path.display()
        );
        return ExitCode::SUCCESS;
    }

    announce(&args, &config);

    if !instance::is_elevated() {
        if !config.allow_nonroot {
            let argv0 = std::env::args().next().unwrap_or_else(|| "keyglowd".into());
            println!("Fatal: keyglowd must be run as root. Try `sudo {argv0}`");
            return ExitCode::SUCCESS;
        }
        println!("Warning: not running as root, allowing anyway per command-line parameter...");
    }

    let layout = default_layout(&config);

    let backend = match PlatformBackend::init() {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Fatal: USB initialisation failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let dispatcher = SignalDispatcher::new();
    install_signal_handlers(&dispatcher);

    let mut daemon = Daemon::new(backend, &config, dispatcher.request())
        .with_devnodes(nodes)
        .with_layout(layout);

    match daemon.run() {
        Ok(report) => {
            if !report.is_clean() {
                log::warn!(
                    "shutdown incomplete: {} failed, {} busy",
                    report.failed.len(),
                    report.contended.len()
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            daemon.shutdown();
            ExitCode::FAILURE
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn sigquit_requests_shutdown() {
        let dispatcher = SignalDispatcher::new();
        let request = dispatcher.request();
        watch_quit(dispatcher).unwrap();

        signal_hook::low_level::raise(signal_hook::consts::SIGQUIT).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !request.is_requested() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(request.is_requested());
    }
}
