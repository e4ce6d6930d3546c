//! Create a virtual keyboard using the linux uinput interface

use evdev::{uinput, AttributeSet, BusType, EventType, InputEvent, InputId, Key};
use std::{fmt, io, thread::sleep, time::Duration};

/// Longest name the kernel accepts, leaving room for the nul terminator
const MAX_NAME_LEN: usize = 78;

const DUMMY_VENDOR: u16 = 0x099a;
const DUMMY_PRODUCT: u16 = 0x7501;
const DUMMY_VERSION: u16 = 0x0100;

/// Time between key down and key up, so that the two are seen as separate events
pub const KEY_RELEASE_DELAY: Duration = Duration::from_micros(16);

/// Time consumers need to notice a new device before it can send events
const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Anything which accepts input events
pub trait EventSink {
    /// Write a batch of events, followed by a sync report
    fn write_batch(&mut self, events: &[InputEvent]) -> io::Result<()>;

    /// Write a batch of events. A failed write is logged and otherwise ignored.
    fn emit(&mut self, events: &[InputEvent]) {
        if let Err(e) = self.write_batch(events) {
            log::error!("failed to write events {events:?}: {e}");
        }
    }

    /// Press and release a key, each followed by a sync report
    fn press_and_release(&mut self, key: Key) {
        self.emit(&[InputEvent::new(EventType::KEY, key.code(), 1)]);

        sleep(KEY_RELEASE_DELAY);

        self.emit(&[InputEvent::new(EventType::KEY, key.code(), 0)]);
    }

    /// Remove the device. Nothing can be written afterwards.
    fn close(&mut self) {}
}

/// A virtual keyboard created through /dev/uinput
pub struct VirtualDevice {
    name: String,
    device: Option<uinput::VirtualDevice>,
}

impl VirtualDevice {
    /// Create a virtual keyboard which can send the given keys
    pub fn create(name: &str, keys: impl IntoIterator<Item = Key>) -> io::Result<Self> {
        let mut set = AttributeSet::<Key>::new();

        for key in keys {
            log::trace!("{name}: enabling key {}", key.code());

            set.insert(key);
        }

        let device = uinput::VirtualDeviceBuilder::new()?
            .name(truncate_name(name))
            .input_id(InputId::new(
                BusType::BUS_USB,
                DUMMY_VENDOR,
                DUMMY_PRODUCT,
                DUMMY_VERSION,
            ))
            .with_keys(&set)?
            .build()?;

        log::info!("created virtual device {name}");

        sleep(SETTLE_DELAY);

        Ok(VirtualDevice {
            name: name.to_owned(),
            device: Some(device),
        })
    }

    /// The kernel removes the device once the uinput file is closed
    fn teardown(&mut self) {
        if self.device.take().is_some() {
            log::debug!("destroyed virtual device {}", self.name);
        }
    }
}

/// Cut the name to what fits in the kernel's device record, on a character boundary
fn truncate_name(name: &str) -> &str {
    if name.len() <= MAX_NAME_LEN {
        return name;
    }

    let mut len = MAX_NAME_LEN;

    while !name.is_char_boundary(len) {
        len -= 1;
    }

    &name[..len]
}

impl Drop for VirtualDevice {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl EventSink for VirtualDevice {
    fn close(&mut self) {
        self.teardown();
    }

    fn write_batch(&mut self, events: &[InputEvent]) -> io::Result<()> {
        match &mut self.device {
            Some(device) => device.emit(events),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "virtual device destroyed",
            )),
        }
    }
}

impl fmt::Display for VirtualDevice {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
