use std::path::Path;
use virtual_input::{config::Config, inputdev::InputDevice, translate::StopFlag};

pub fn translate(config: &mut Config, config_path: Option<&Path>) {
    if config_path.is_none() {
        log::error!("no configuration file given; use --config FILE, or --create to make one");
        std::process::exit(2);
    }

    let Some(path) = config.input.clone() else {
        log::error!("no input device given; use --input DEVICE or set input in the configuration");
        std::process::exit(1);
    };

    let Some(input) = super::open_input(&path) else {
        std::process::exit(1);
    };

    run(config, input);
}

/// Translate until a termination signal arrives
pub fn run(config: &mut Config, input: InputDevice) {
    let stop = StopFlag::new();

    if let Err(e) = stop.register_signals() {
        log::error!("failed to install signal handlers: {e}");
        std::process::exit(1);
    }

    log::info!(
        "translating scancodes from {input} to {}",
        config.device_name()
    );

    if let Err(e) = virtual_input::translate::run(config, input, &stop) {
        log::error!("{e}");
        std::process::exit(1);
    }
}
