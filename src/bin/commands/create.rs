use std::{
    fmt,
    io::{self, BufRead, Write},
    path::PathBuf,
    time::{Duration, Instant},
};
use virtual_input::{
    config::Config,
    inputdev::{scancode, InputDevice, TimedEventSource},
    keys,
    mapping::{Insert, Mapping},
};

/// How long to wait for a button press
const CAPTURE_TIMEOUT: Duration = Duration::from_secs(30);

/// Ask for anything missing from the configuration, then record buttons from the
/// remote until an empty line is entered. The configuration is saved and used.
pub fn create(config: &mut Config, mut config_path: Option<PathBuf>) {
    let mut prompt = Prompt::new(io::stdin().lock(), io::stdout());

    prompt.say("Creating new config.");

    let mut input: Option<InputDevice> = None;

    loop {
        if config_path.is_none() {
            let Some(path) = prompt.ask_word(
                "Please enter the config file path (example: /etc/virtual_input.conf)",
                "path",
            ) else {
                return;
            };

            let path = PathBuf::from(path);

            super::load_config(config, &path, true);

            config_path = Some(path);
            continue;
        }

        if config.name.is_none() {
            let Some(name) =
                prompt.ask_word("Please enter the device name (example: IR-Keyboard)", "name")
            else {
                return;
            };

            config.name = Some(name);
            continue;
        }

        if input.is_none() {
            if let Some(path) = &config.input {
                input = super::open_input(path);

                if input.is_none() {
                    prompt.say("Could not open input device.");
                    prompt.say("Please try again.");
                    config.input = None;
                }
                continue;
            }

            let Some(path) = prompt.ask_word(
                "Please enter the input device path (example: /dev/input/event6)",
                "path",
            ) else {
                return;
            };

            config.input = Some(PathBuf::from(path));
            continue;
        }

        break;
    }

    let (Some(path), Some(mut input)) = (config_path, input) else {
        return;
    };

    prompt.record_buttons(&mut config.mapping, &mut input);

    if let Err(e) = config.save(&path) {
        log::error!("{}: {e}", path.display());
        std::process::exit(1);
    }

    prompt.say(format_args!("New config file saved to: {}", path.display()));

    super::translate::run(config, input);
}

/// Questions and answers with the person setting up the remote
struct Prompt<R, W> {
    answers: R,
    output: W,
}

impl<R: BufRead, W: Write> Prompt<R, W> {
    fn new(answers: R, output: W) -> Self {
        Prompt { answers, output }
    }

    fn say(&mut self, msg: impl fmt::Display) {
        if let Err(e) = writeln!(self.output, "{msg}").and_then(|_| self.output.flush()) {
            log::error!("failed to write to terminal: {e}");
        }
    }

    /// Ask a question and read the answer. An empty answer or end of input gives None.
    fn ask(&mut self, question: &str) -> Option<String> {
        self.say(format_args!("\n{question}"));

        let mut line = String::new();

        match self.answers.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => {
                let answer = line.trim_end_matches(['\n', '\r']);

                if answer.is_empty() {
                    None
                } else {
                    Some(answer.to_owned())
                }
            }
            Err(e) => {
                log::error!("failed to read answer: {e}");
                None
            }
        }
    }

    /// Ask for a value which may not contain whitespace, asking again until it does not
    fn ask_word(&mut self, question: &str, what: &str) -> Option<String> {
        loop {
            let answer = self.ask(question)?;

            if answer.contains([' ', '\t']) {
                self.say(format_args!("The {what} must not contain any whitespace."));
                self.say("Please try again.");
                continue;
            }

            return Some(answer);
        }
    }

    /// Ask for button names and capture a scancode for each, until an empty
    /// answer, end of input, or no button is pressed in time
    fn record_buttons<S>(&mut self, mapping: &mut Mapping, source: &mut S)
    where
        S: TimedEventSource + fmt::Display,
    {
        while let Some(button) = self
            .ask("Please enter the name for the button (or press <ENTER> to complete the setting)")
        {
            if keys::find_key(&button).is_none() {
                self.say(format_args!(
                    "The button name must be one from the list, see {} --list.",
                    env!("CARGO_BIN_NAME")
                ));
                self.say("Please try again.");
                continue;
            }

            self.say(format_args!(
                "\nNow press the button for \"{button}\", you have {} seconds for this.",
                CAPTURE_TIMEOUT.as_secs()
            ));

            match capture(source, CAPTURE_TIMEOUT) {
                Ok(Some(scancode)) => match mapping.add_binding(&button, scancode) {
                    Insert::Inserted => self.say(format_args!(
                        "New button {button:<20} 0x{scancode:08X} added."
                    )),
                    Insert::AlreadyExists => self.say(format_args!(
                        "Button {button:<20} 0x{scancode:08X} already exist."
                    )),
                },
                Ok(None) => {
                    self.say("Timeout...");
                    break;
                }
                Err(e) => {
                    log::error!("{source}: {e}");
                    break;
                }
            }
        }
    }
}

/// Wait for a scancode event, ignoring anything else. Other events do not
/// extend the time allowed.
fn capture<S: TimedEventSource>(source: &mut S, timeout: Duration) -> io::Result<Option<u32>> {
    let deadline = Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());

        if remaining.is_zero() {
            return Ok(None);
        }

        match source.next_event_timeout(remaining)? {
            Some(ev) => {
                if let Some(scancode) = scancode(&ev) {
                    return Ok(Some(scancode));
                }
            }
            None => return Ok(None),
        }
    }
}
