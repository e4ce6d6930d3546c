//! Read and write the configuration file
//!
//! ```text
//! # comment
//! name IR-Keyboard
//! input /dev/input/event6
//! begin codes
//!   KEY_VOLUMEUP         0x00000010
//!   KEY_VOLUMEDOWN       0x00000011
//! end codes
//! ```

use crate::{
    keys,
    mapping::{Insert, Mapping},
};
use std::{
    fmt::{self, Write as _},
    fs,
    io,
    path::{Path, PathBuf},
};

/// Name of the virtual device if none is configured
pub const DEFAULT_NAME: &str = "IR-Keyboard";

/// Configuration of one virtual device
#[derive(Debug, Default)]
pub struct Config {
    /// Name of the virtual device
    pub name: Option<String>,
    /// Path to the input device which receives the scancodes
    pub input: Option<PathBuf>,
    pub mapping: Mapping,
}

impl Config {
    pub fn new(name: Option<String>, input: Option<PathBuf>) -> Self {
        Config {
            name,
            input,
            mapping: Mapping::new(),
        }
    }

    pub fn device_name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_NAME)
    }

    /// Read a configuration file. Values which are already set are not
    /// overwritten, so values given on the command line take precedence.
    pub fn load(&mut self, path: &Path) -> Result<(), String> {
        let contents = fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;

        self.read(&contents, path)
    }

    /// Parse the contents of a configuration file. Unknown key names and duplicate
    /// scancodes are reported and skipped; a line with a missing value or an invalid
    /// scancode aborts parsing.
    pub fn read(&mut self, contents: &str, path: &Path) -> Result<(), String> {
        let mut in_codes = false;

        for (line_no, line) in contents.lines().enumerate() {
            let line_no = line_no + 1;

            if line.trim_start().starts_with('#') {
                continue;
            }

            let mut words = line.split([' ', '\t', '\r']).filter(|w| !w.is_empty());

            let Some(key) = words.next() else {
                continue;
            };

            let Some(value) = words.next() else {
                return Err(format!(
                    "{}:{line_no}: missing value for ‘{key}’",
                    path.display()
                ));
            };

            if key.eq_ignore_ascii_case("name") {
                if self.name.is_none() {
                    self.name = Some(value.to_owned());
                }
            } else if key.eq_ignore_ascii_case("input") {
                if self.input.is_none() {
                    self.input = Some(PathBuf::from(value));
                }
            } else if key.eq_ignore_ascii_case("begin") && value.eq_ignore_ascii_case("codes") {
                in_codes = true;
            } else if key.eq_ignore_ascii_case("end") && value.eq_ignore_ascii_case("codes") {
                in_codes = false;
            } else if in_codes {
                let scancode = parse_scancode(value).ok_or_else(|| {
                    format!(
                        "{}:{line_no}: ‘{value}’ is not a valid scancode",
                        path.display()
                    )
                })?;

                if keys::find_key(key).is_none() {
                    log::error!(
                        "{}:{line_no}: button ‘{key}’ does not exist, see --list",
                        path.display()
                    );
                    continue;
                }

                if self.mapping.add_binding(key, scancode) == Insert::AlreadyExists {
                    log::warn!(
                        "{}:{line_no}: scancode 0x{scancode:08x} for ‘{key}’ already exists",
                        path.display()
                    );
                }
            }
        }

        Ok(())
    }

    /// Write the configuration to a file
    pub fn save(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.to_string())
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(name) = &self.name {
            writeln!(f, "name {name}")?;
        }

        if let Some(input) = &self.input {
            writeln!(f, "input {}", input.display())?;
        }

        let mut codes = String::from("begin codes\n");

        for binding in self.mapping.bindings() {
            writeln!(codes, "  {:<20} 0x{:08X}", binding.name, binding.scancode)?;
        }

        codes.push_str("end codes\n");

        f.write_str(&codes)
    }
}

/// Parse a number the way strtol() does with base 0: 0x prefix for hex, a leading
/// 0 for octal, otherwise decimal
pub fn parse_scancode(s: &str) -> Option<u32> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else if s.len() > 1 && s.starts_with('0') {
        u32::from_str_radix(&s[1..], 8).ok()
    } else {
        s.parse().ok()
    }
}
