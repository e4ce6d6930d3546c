//! Source input device which delivers the scancodes from the infrared receiver

use evdev::{Device, EventType, InputEvent};
use nix::{
    errno::Errno,
    poll::{poll, PollFd, PollFlags, PollTimeout},
};
use std::{
    collections::VecDeque,
    fmt, io,
    os::{fd::BorrowedFd, unix::io::AsRawFd},
    path::{Path, PathBuf},
    time::Duration,
};

/// Misc event code carrying a raw scancode
pub const MSC_RAW: u16 = 0x03;
/// Misc event code carrying a scancode, used by rc-core
pub const MSC_SCAN: u16 = 0x04;

/// Anything which produces input events, one at a time in arrival order
pub trait EventSource {
    /// Wait for the next event, with no timeout
    fn next_event(&mut self) -> io::Result<InputEvent>;

    /// Give the device back to other readers, e.g. by releasing a grab
    fn release(&mut self) {}
}

/// Anything which can wait a limited time for the next event
pub trait TimedEventSource {
    /// Wait at most `timeout` for the next event. Returns None if nothing arrived
    /// in time.
    fn next_event_timeout(&mut self, timeout: Duration) -> io::Result<Option<InputEvent>>;
}

/// Return the scancode if this is a misc scancode event
pub fn scancode(ev: &InputEvent) -> Option<u32> {
    if ev.event_type() == EventType::MISC && (ev.code() == MSC_RAW || ev.code() == MSC_SCAN) {
        Some(ev.value() as u32)
    } else {
        None
    }
}

/// An opened linux input device, e.g. /dev/input/event6
pub struct InputDevice {
    path: PathBuf,
    device: Device,
    pending: VecDeque<InputEvent>,
    grabbed: bool,
}

impl InputDevice {
    pub fn open(path: &Path) -> io::Result<Self> {
        let device = Device::open(path)?;

        log::debug!(
            "opened {}: {}",
            path.display(),
            device.name().unwrap_or("unnamed device")
        );

        Ok(InputDevice {
            path: path.to_owned(),
            device,
            pending: VecDeque::new(),
            grabbed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Grab the device, so that no other process receives its events. Fails
    /// with EBUSY if another process has grabbed it already.
    pub fn grab(&mut self) -> io::Result<()> {
        self.device.grab()?;
        self.grabbed = true;

        Ok(())
    }

    pub fn is_grabbed(&self) -> bool {
        self.grabbed
    }

    /// Release the grab, if we hold it
    pub fn ungrab(&mut self) {
        if self.grabbed {
            if let Err(e) = self.device.ungrab() {
                log::warn!("{self}: failed to release grab: {e}");
            }
            self.grabbed = false;
        }
    }

    /// Release the grab and close the device
    pub fn close(mut self) {
        self.ungrab();

        log::debug!("closing {self}");
    }

    fn fetch(&mut self) -> io::Result<()> {
        let events = self.device.fetch_events()?;

        self.pending.extend(events);

        Ok(())
    }
}

impl EventSource for InputDevice {
    fn next_event(&mut self) -> io::Result<InputEvent> {
        loop {
            if let Some(ev) = self.pending.pop_front() {
                return Ok(ev);
            }

            self.fetch()?;
        }
    }

    fn release(&mut self) {
        self.ungrab();
    }
}

impl TimedEventSource for InputDevice {
    fn next_event_timeout(&mut self, timeout: Duration) -> io::Result<Option<InputEvent>> {
        loop {
            if let Some(ev) = self.pending.pop_front() {
                return Ok(Some(ev));
            }

            let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);

            // SAFETY: the fd is owned by self.device and outlives this borrow
            let fd = unsafe { BorrowedFd::borrow_raw(self.device.as_raw_fd()) };

            let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];

            match poll(&mut fds, PollTimeout::from(millis)) {
                Ok(0) | Err(Errno::EINTR) => return Ok(None),
                Ok(_) => (),
                Err(e) => return Err(e.into()),
            }

            self.fetch()?;
        }
    }
}

impl fmt::Display for InputDevice {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}
