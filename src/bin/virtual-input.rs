use clap::{ArgAction, Parser};
use log::{Level, LevelFilter, Metadata, Record};
use std::path::PathBuf;
use virtual_input::config::Config;

mod commands;

#[derive(Parser)]
#[command(
    name = "virtual-input",
    version = env!("CARGO_PKG_VERSION"),
    about = "Infrared remote as a virtual keyboard"
)]
struct App {
    /// Increase message verbosity
    #[arg(long, short, action = ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Silence all warnings
    #[arg(long, short, conflicts_with = "verbose")]
    quiet: bool,

    /// List the button names which can be used, and exit
    #[arg(long)]
    list: bool,

    /// Name of the virtual keyboard (e.g. IR-Keyboard)
    #[arg(long, value_name = "NAME")]
    name: Option<String>,

    /// Input device of the infrared receiver (e.g. /dev/input/event6)
    #[arg(long, value_name = "DEVICE")]
    input: Option<PathBuf>,

    /// Configuration file
    #[arg(long, short, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Create or extend the configuration by pressing buttons on the remote
    #[arg(long)]
    create: bool,
}

fn main() {
    let args = App::parse();

    log::set_logger(&CLI_LOGGER).unwrap();

    let level = if args.quiet {
        LevelFilter::Error
    } else {
        match args.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    log::set_max_level(level);

    if args.list {
        commands::list::list();
        return;
    }

    let mut config = Config::new(args.name.clone(), args.input.clone());

    if let Some(path) = &args.config {
        commands::load_config(&mut config, path, args.create);
    }

    if args.create {
        commands::create::create(&mut config, args.config.clone());
    } else {
        commands::translate::translate(&mut config, args.config.as_deref());
    }
}

static CLI_LOGGER: CliLogger = CliLogger;

struct CliLogger;

impl log::Log for CliLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!(
                "{}: {}",
                match record.level() {
                    Level::Trace => "trace",
                    Level::Debug => "debug",
                    Level::Info => "info",
                    Level::Warn => "warn",
                    Level::Error => "error",
                },
                record.args()
            );
        }
    }

    fn flush(&self) {}
}
