//! Translate scancodes from the input device into key presses on the virtual device
//!
//! The loop is single threaded. The only thing shared with signal handlers is the
//! [`StopFlag`]; the devices and the lookup table are only touched from the loop.

use crate::{
    config::Config,
    inputdev::{scancode, EventSource, InputDevice},
    keys,
    mapping::Mapping,
    uinput::{EventSink, VirtualDevice},
};
use nix::unistd::Uid;
use signal_hook::consts::{SIGABRT, SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use std::{
    fmt, io,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Request to stop translating. This is the only state which may be set from
/// a signal handler; it is checked by the loop after each event. A new flag is
/// clear, and it never goes back from stopped to clear.
#[derive(Clone, Default, Debug)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag when SIGINT, SIGTERM, SIGQUIT, SIGHUP or SIGABRT is received
    pub fn register_signals(&self) -> io::Result<()> {
        for signal in [SIGINT, SIGTERM, SIGQUIT, SIGHUP, SIGABRT] {
            signal_hook::flag::register(signal, Arc::clone(&self.0))?;
        }

        Ok(())
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Lifecycle of a translation session. Before the input device is opened there
/// is no session; [`open_input`] does that step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Input device open, and grabbed if possible
    Grabbed,
    /// Virtual device created, translating events
    Running,
    /// Stop requested or reading failed
    Stopping,
    /// Virtual device destroyed and input device released
    Terminated,
}

/// Reads events from a source and presses the mapped keys on a sink
pub struct Translator<'a, S, D> {
    mapping: &'a Mapping,
    source: S,
    output: D,
    state: State,
}

impl<'a, S: EventSource + fmt::Display, D: EventSink> Translator<'a, S, D> {
    /// The mapping must have been built with [`Mapping::rebuild_index`]
    pub fn new(mapping: &'a Mapping, source: S, output: D) -> Self {
        Translator {
            mapping,
            source,
            output,
            state: State::Grabbed,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    fn enter(&mut self, state: State) {
        log::debug!("{}: {:?} -> {:?}", self.source, self.state, state);

        self.state = state;
    }

    /// Translate events until the stop flag is set or reading fails. The flag is
    /// checked after each event, so an event which has been read is always
    /// handled. A read error is returned. If the flag is already set, nothing
    /// is read.
    pub fn run(&mut self, stop: &StopFlag) -> io::Result<()> {
        if self.state != State::Grabbed {
            return Ok(());
        }

        self.enter(State::Running);

        let res = loop {
            if stop.is_stopped() {
                log::debug!("stop requested");
                break Ok(());
            }

            match self.source.next_event() {
                Ok(ev) => {
                    if let Some(scancode) = scancode(&ev) {
                        self.translate(scancode);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => (),
                Err(e) => break Err(e),
            }
        };

        self.enter(State::Stopping);

        res
    }

    fn translate(&mut self, scancode: u32) {
        match self.mapping.lookup(scancode) {
            Some(key) => {
                log::trace!(
                    "scancode 0x{scancode:08x} => {}",
                    keys::key_name(key).unwrap_or("unknown")
                );

                self.output.press_and_release(key);
            }
            None => log::trace!("scancode 0x{scancode:08x} not mapped"),
        }
    }

    /// Destroy the virtual device and release the input device
    pub fn shutdown(&mut self) {
        if self.state == State::Terminated {
            return;
        }

        self.output.close();
        self.source.release();

        self.enter(State::Terminated);
    }
}

/// Open the input device and grab it. If another process has grabbed it already,
/// carry on without the grab; we still receive its events, but so does the other
/// process.
pub fn open_input(path: &Path) -> io::Result<InputDevice> {
    let mut input = InputDevice::open(path)?;

    match input.grab() {
        Ok(()) => log::debug!("{input}: grabbed"),
        Err(e) if e.raw_os_error() == Some(libc::EBUSY) => {
            log::warn!("{input}: device is grabbed by another process");
            log::warn!("events from {input} are also delivered to the other process");
            log::warn!("in most cases this is caused by an X driver; try VT-switching and run again");
            log::warn!("run \"fuser -v {input}\" to see processes with the device open");
        }
        Err(e) => log::warn!("{input}: failed to grab device: {e}"),
    }

    Ok(input)
}

/// Describe a failure to open a device, with a hint if we lack permission
pub fn open_error(path: &Path, e: &io::Error) -> String {
    if e.kind() == io::ErrorKind::PermissionDenied && !Uid::effective().is_root() {
        format!("{}: {e}; try running as root", path.display())
    } else {
        format!("{}: {e}", path.display())
    }
}

/// Build the lookup table, create the virtual device, and translate events from
/// the input device until stopped. The virtual device is always destroyed and the
/// input device released, whichever way this ends.
pub fn run(config: &mut Config, input: InputDevice, stop: &StopFlag) -> Result<(), String> {
    if config.mapping.is_empty() {
        input.close();
        return Err(String::from("no buttons configured"));
    }

    if let Err(e) = config.mapping.rebuild_index() {
        if config.mapping.range().is_none() {
            input.close();
            return Err(e.to_string());
        }

        log::error!("{e}; using previous table");
    }

    if stop.is_stopped() {
        log::debug!("stop requested before starting");
        input.close();
        return Ok(());
    }

    let output = match VirtualDevice::create(config.device_name(), config.mapping.keys()) {
        Ok(output) => output,
        Err(e) => {
            input.close();
            return Err(open_error(Path::new("/dev/uinput"), &e));
        }
    };

    let path = input.path().to_owned();

    let mut translator = Translator::new(&config.mapping, input, output);

    let res = translator.run(stop);

    translator.shutdown();

    res.map_err(|e| format!("{}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inputdev::{MSC_RAW, MSC_SCAN};
    use evdev::{EventType, InputEvent, Key};
    use std::collections::VecDeque;

    const SYN_REPORT: u16 = 0;

    /// Events to deliver; once exhausted, reading fails
    struct Replay {
        events: VecDeque<InputEvent>,
        /// Set the stop flag when this event is handed out
        stop_after: Option<(usize, StopFlag)>,
        reads: usize,
        released: bool,
    }

    impl Replay {
        fn new(events: impl IntoIterator<Item = InputEvent>) -> Self {
            Replay {
                events: events.into_iter().collect(),
                stop_after: None,
                reads: 0,
                released: false,
            }
        }
    }

    impl EventSource for Replay {
        fn next_event(&mut self) -> io::Result<InputEvent> {
            self.reads += 1;

            if let Some((n, stop)) = &self.stop_after {
                if self.reads == *n {
                    stop.stop();
                }
            }

            self.events
                .pop_front()
                .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "device gone"))
        }

        fn release(&mut self) {
            self.released = true;
        }
    }

    impl fmt::Display for Replay {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "replay")
        }
    }

    #[derive(Default)]
    struct Recorder {
        batches: Vec<Vec<(EventType, u16, i32)>>,
        closed: bool,
    }

    impl EventSink for Recorder {
        fn write_batch(&mut self, events: &[InputEvent]) -> io::Result<()> {
            self.batches.push(
                events
                    .iter()
                    .map(|ev| (ev.event_type(), ev.code(), ev.value()))
                    .collect(),
            );
            Ok(())
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    fn volume_mapping() -> Mapping {
        let mut config = Config::default();

        config
            .read(
                "begin codes\nKEY_VOLUMEUP 0x00000010\nKEY_VOLUMEDOWN 0x00000011\nend codes\n",
                std::path::Path::new("test.conf"),
            )
            .unwrap();

        config.mapping.rebuild_index().unwrap();

        config.mapping
    }

    /// Key down and key up, each in its own batch
    fn press(key: Key) -> Vec<Vec<(EventType, u16, i32)>> {
        vec![
            vec![(EventType::KEY, key.code(), 1)],
            vec![(EventType::KEY, key.code(), 0)],
        ]
    }

    #[test]
    fn translate_scancode() {
        let mapping = volume_mapping();
        let source = Replay::new([
            InputEvent::new(EventType::MISC, MSC_RAW, 0x10),
            InputEvent::new(EventType::KEY, Key::KEY_A.code(), 1),
        ]);

        let mut t = Translator::new(&mapping, source, Recorder::default());

        assert_eq!(t.state(), State::Grabbed);

        let e = t.run(&StopFlag::new()).unwrap_err();

        assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(t.state(), State::Stopping);
        assert_eq!(t.source.reads, 3);
        assert_eq!(t.output.batches, press(Key::KEY_VOLUMEUP));
    }

    #[test]
    fn unmapped_scancode() {
        let mapping = volume_mapping();
        let source = Replay::new([
            InputEvent::new(EventType::MISC, MSC_SCAN, 0x99),
            InputEvent::new(EventType::MISC, MSC_RAW, 0x0f),
            InputEvent::new(EventType::MISC, MSC_RAW, -1),
        ]);

        let mut t = Translator::new(&mapping, source, Recorder::default());

        assert!(t.run(&StopFlag::new()).is_err());
        assert!(t.output.batches.is_empty());
    }

    #[test]
    fn arrival_order() {
        let mapping = volume_mapping();
        let source = Replay::new([
            InputEvent::new(EventType::MISC, MSC_SCAN, 0x11),
            InputEvent::new(EventType::SYNCHRONIZATION, SYN_REPORT, 0),
            InputEvent::new(EventType::MISC, MSC_SCAN, 0x10),
            InputEvent::new(EventType::SYNCHRONIZATION, SYN_REPORT, 0),
            InputEvent::new(EventType::MISC, MSC_SCAN, 0x11),
        ]);

        let mut t = Translator::new(&mapping, source, Recorder::default());

        assert!(t.run(&StopFlag::new()).is_err());

        let mut expected = press(Key::KEY_VOLUMEDOWN);
        expected.extend(press(Key::KEY_VOLUMEUP));
        expected.extend(press(Key::KEY_VOLUMEDOWN));

        assert_eq!(t.output.batches, expected);
    }

    #[test]
    fn stop_between_events() {
        let mapping = volume_mapping();
        let stop = StopFlag::new();

        let mut source = Replay::new([
            InputEvent::new(EventType::MISC, MSC_RAW, 0x10),
            InputEvent::new(EventType::MISC, MSC_RAW, 0x11),
        ]);

        // the flag is raised while the first event is in flight
        source.stop_after = Some((1, stop.clone()));

        let mut t = Translator::new(&mapping, source, Recorder::default());

        assert!(t.run(&stop).is_ok());
        assert_eq!(t.state(), State::Stopping);
        assert_eq!(t.source.reads, 1);
        assert_eq!(t.source.events.len(), 1);
        assert_eq!(t.output.batches, press(Key::KEY_VOLUMEUP));
    }

    #[test]
    fn stopped_before_start() {
        let mapping = volume_mapping();
        let stop = StopFlag::new();

        stop.stop();

        let mut t = Translator::new(
            &mapping,
            Replay::new([InputEvent::new(EventType::MISC, MSC_RAW, 0x10)]),
            Recorder::default(),
        );

        assert!(t.run(&stop).is_ok());
        assert_eq!(t.source.reads, 0);
        assert!(t.output.batches.is_empty());
    }

    #[test]
    fn signal_during_setup() {
        let mapping = volume_mapping();
        let stop = StopFlag::new();

        stop.register_signals().unwrap();

        // termination request while the virtual device is being set up
        assert_eq!(unsafe { libc::raise(libc::SIGTERM) }, 0);

        assert!(stop.is_stopped());

        let mut t = Translator::new(
            &mapping,
            Replay::new([InputEvent::new(EventType::MISC, MSC_RAW, 0x10)]),
            Recorder::default(),
        );

        assert!(t.run(&stop).is_ok());
        assert_eq!(t.source.reads, 0);
        assert!(t.output.batches.is_empty());

        t.shutdown();

        assert_eq!(t.state(), State::Terminated);
    }

    #[test]
    fn shutdown() {
        let mapping = volume_mapping();

        let mut t = Translator::new(
            &mapping,
            Replay::new(Vec::<InputEvent>::new()),
            Recorder::default(),
        );

        assert!(t.run(&StopFlag::new()).is_err());

        t.shutdown();

        assert_eq!(t.state(), State::Terminated);
        assert!(t.output.closed);
        assert!(t.source.released);

        // a finished session does not run again
        assert!(t.run(&StopFlag::new()).is_ok());
        assert_eq!(t.source.reads, 1);
        assert_eq!(t.state(), State::Terminated);
    }

    #[test]
    fn open_errors() {
        let e = io::Error::from(io::ErrorKind::NotFound);

        assert_eq!(
            open_error(Path::new("/dev/input/event9"), &e),
            format!("/dev/input/event9: {e}")
        );

        let e = io::Error::from_raw_os_error(libc::EACCES);

        let msg = open_error(Path::new("/dev/uinput"), &e);

        if Uid::effective().is_root() {
            assert_eq!(msg, format!("/dev/uinput: {e}"));
        } else {
            assert_eq!(msg, format!("/dev/uinput: {e}; try running as root"));
        }
    }

    #[test]
    fn stop_flag() {
        let stop = StopFlag::new();
        let other = stop.clone();

        assert!(!stop.is_stopped());

        other.stop();

        assert!(stop.is_stopped());
    }
}
