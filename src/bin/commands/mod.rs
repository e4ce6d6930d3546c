use std::path::Path;
use virtual_input::{config::Config, inputdev::InputDevice};

pub mod create;
pub mod list;
pub mod translate;

/// Load the configuration file. When creating a configuration, a missing file
/// is fine; it will be written later.
pub fn load_config(config: &mut Config, path: &Path, create: bool) {
    if create && !path.exists() {
        log::info!("{}: creating new configuration", path.display());
        return;
    }

    if let Err(e) = config.load(path) {
        log::error!("{e}");
        std::process::exit(1);
    }

    log::debug!(
        "{}: loaded {} buttons",
        path.display(),
        config.mapping.len()
    );
}

/// Open and grab the input device
pub fn open_input(path: &Path) -> Option<InputDevice> {
    match virtual_input::translate::open_input(path) {
        Ok(input) => Some(input),
        Err(e) => {
            log::error!("{}", virtual_input::translate::open_error(path, &e));
            None
        }
    }
}
