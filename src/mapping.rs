//! Map raw infrared scancodes to key codes
//!
//! Bindings are kept as a list of button name and scancode pairs. Before
//! translating, the list is compiled into a dense table indexed by the scancode
//! minus the lowest scancode, so that each lookup is a single array access.

use crate::keys;
use evdev::Key;
use std::{
    collections::{HashSet, VecDeque},
    error, fmt,
};

/// Largest difference between the lowest and highest scancode the table can hold
pub const MAX_SPAN: u32 = 0xffff;

/// A button name bound to a raw scancode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    pub scancode: u32,
}

/// Result of adding a binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    Inserted,
    AlreadyExists,
}

/// The scancodes are too far apart for the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanTooLarge {
    pub min: u32,
    pub max: u32,
}

impl fmt::Display for SpanTooLarge {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "scancodes 0x{:08x} to 0x{:08x} are too far apart, at most {} apart is supported",
            self.min, self.max, MAX_SPAN
        )
    }
}

impl error::Error for SpanTooLarge {}

/// Dense lookup table built from a set of bindings
#[derive(Debug)]
struct Index {
    min: u32,
    max: u32,
    keys: Vec<u16>,
}

/// Set of bindings with unique scancodes, plus the lookup table compiled from them
#[derive(Debug, Default)]
pub struct Mapping {
    bindings: VecDeque<Binding>,
    scancodes: HashSet<u32>,
    index: Option<Index>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding. The most recently added binding comes first when iterating.
    /// The name is not checked against the known key names; that is up to the caller.
    pub fn add_binding(&mut self, name: &str, scancode: u32) -> Insert {
        if !self.scancodes.insert(scancode) {
            return Insert::AlreadyExists;
        }

        self.bindings.push_front(Binding {
            name: name.to_owned(),
            scancode,
        });

        Insert::Inserted
    }

    pub fn bindings(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Key codes for all bindings whose name resolves. Unknown names are
    /// reported by [`Mapping::rebuild_index`].
    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.bindings
            .iter()
            .filter_map(|binding| keys::find_key(&binding.name))
    }

    /// Compile the bindings into the lookup table, replacing the previous one.
    /// If the scancodes span more than [`MAX_SPAN`], the previous table is kept.
    /// With no bindings at all, the table is cleared and nothing is mapped.
    pub fn rebuild_index(&mut self) -> Result<(), SpanTooLarge> {
        let Some(min) = self.bindings.iter().map(|binding| binding.scancode).min() else {
            self.index = None;
            return Ok(());
        };

        let max = self
            .bindings
            .iter()
            .map(|binding| binding.scancode)
            .max()
            .unwrap_or(min);

        if max - min > MAX_SPAN {
            return Err(SpanTooLarge { min, max });
        }

        let mut keys = vec![0u16; (max - min) as usize + 1];

        for binding in &self.bindings {
            match keys::find_key(&binding.name) {
                Some(key) => keys[(binding.scancode - min) as usize] = key.code(),
                None => log::error!(
                    "unknown key name {} for scancode 0x{:08x}, ignoring",
                    binding.name,
                    binding.scancode
                ),
            }
        }

        log::debug!(
            "scancode table 0x{min:08x}-0x{max:08x} with {} entries",
            keys.len()
        );

        self.index = Some(Index { min, max, keys });

        Ok(())
    }

    /// Find the key for a scancode. Scancodes outside the table, or slots with
    /// no key, are not mapped.
    pub fn lookup(&self, scancode: u32) -> Option<Key> {
        let index = self.index.as_ref()?;

        if scancode < index.min || scancode > index.max {
            return None;
        }

        match index.keys[(scancode - index.min) as usize] {
            0 => None,
            code => Some(Key::new(code)),
        }
    }

    /// Lowest and highest scancode of the current table
    pub fn range(&self) -> Option<(u32, u32)> {
        self.index.as_ref().map(|index| (index.min, index.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Capture(Mutex<Vec<String>>);

    impl log::Log for Capture {
        fn enabled(&self, _metadata: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            self.0.lock().unwrap().push(record.args().to_string());
        }

        fn flush(&self) {}
    }

    static CAPTURE: Capture = Capture(Mutex::new(Vec::new()));

    #[test]
    fn duplicate_scancode() {
        let mut m = Mapping::new();

        assert_eq!(m.add_binding("KEY_UP", 0x10), Insert::Inserted);
        assert_eq!(m.add_binding("KEY_DOWN", 0x11), Insert::Inserted);
        assert_eq!(m.add_binding("KEY_LEFT", 0x10), Insert::AlreadyExists);
        assert_eq!(m.len(), 2);

        let names: Vec<_> = m.bindings().map(|b| b.name.as_str()).collect();

        assert_eq!(names, ["KEY_DOWN", "KEY_UP"]);
    }

    #[test]
    fn lookup() {
        let mut m = Mapping::new();

        m.add_binding("KEY_VOLUMEUP", 0x800f0410);
        m.add_binding("KEY_VOLUMEDOWN", 0x800f0411);
        m.add_binding("KEY_MUTE", 0x800f040e);
        m.add_binding("KEY_OK", 0x800f0422);

        // nothing is mapped before the table is built
        assert_eq!(m.lookup(0x800f0410), None);

        m.rebuild_index().unwrap();

        assert_eq!(m.range(), Some((0x800f040e, 0x800f0422)));
        assert_eq!(m.lookup(0x800f0410), keys::find_key("KEY_VOLUMEUP"));
        assert_eq!(m.lookup(0x800f0411), keys::find_key("KEY_VOLUMEDOWN"));
        assert_eq!(m.lookup(0x800f040e), keys::find_key("KEY_MUTE"));
        assert_eq!(m.lookup(0x800f0422), keys::find_key("KEY_OK"));

        // hole inside the range
        assert_eq!(m.lookup(0x800f0412), None);
        // outside the range
        assert_eq!(m.lookup(0x800f040d), None);
        assert_eq!(m.lookup(0x800f0423), None);
        assert_eq!(m.lookup(0), None);
        assert_eq!(m.lookup(u32::MAX), None);
    }

    #[test]
    fn min_max_in_any_order() {
        // a single binding
        let mut m = Mapping::new();

        m.add_binding("KEY_POWER", 0x42);
        m.rebuild_index().unwrap();

        assert_eq!(m.range(), Some((0x42, 0x42)));
        assert_eq!(m.lookup(0x42), keys::find_key("KEY_POWER"));

        // the smallest scancode is visited last
        let mut m = Mapping::new();

        m.add_binding("KEY_1", 1);
        m.add_binding("KEY_3", 3);
        m.add_binding("KEY_2", 2);
        m.rebuild_index().unwrap();

        assert_eq!(m.range(), Some((1, 3)));
        assert_eq!(m.lookup(3), keys::find_key("KEY_3"));
    }

    #[test]
    fn span_boundary() {
        let mut m = Mapping::new();

        m.add_binding("KEY_A", 0x1000);
        m.add_binding("KEY_B", 0x1000 + 0xffff);

        assert_eq!(m.rebuild_index(), Ok(()));
        assert_eq!(m.lookup(0x1000 + 0xffff), keys::find_key("KEY_B"));

        m.add_binding("KEY_C", 0x1000 + 0x10000);

        assert_eq!(
            m.rebuild_index(),
            Err(SpanTooLarge {
                min: 0x1000,
                max: 0x11000
            })
        );

        // previous table still in effect
        assert_eq!(m.range(), Some((0x1000, 0x1000 + 0xffff)));
        assert_eq!(m.lookup(0x1000), keys::find_key("KEY_A"));
        assert_eq!(m.lookup(0x11000), None);
    }

    #[test]
    fn span_too_large_without_table() {
        let mut m = Mapping::new();

        m.add_binding("KEY_A", 0);
        m.add_binding("KEY_B", u32::MAX);

        assert!(m.rebuild_index().is_err());
        assert_eq!(m.range(), None);
        assert_eq!(m.lookup(0), None);
    }

    #[test]
    fn unknown_name() {
        let mut m = Mapping::new();

        m.add_binding("KEY_UP", 5);
        m.add_binding("KEY_NOPE", 6);

        m.rebuild_index().unwrap();

        assert_eq!(m.lookup(5), keys::find_key("KEY_UP"));
        assert_eq!(m.lookup(6), None);
        assert_eq!(m.keys().collect::<Vec<_>>(), vec![Key::new(103)]);
    }

    #[test]
    fn unknown_name_reported_once() {
        log::set_logger(&CAPTURE).unwrap();
        log::set_max_level(log::LevelFilter::Trace);

        let mut m = Mapping::new();

        m.add_binding("KEY_NOT_A_KEY", 0x77);
        m.add_binding("KEY_UP", 0x78);

        m.rebuild_index().unwrap();

        assert_eq!(m.keys().collect::<Vec<_>>(), [Key::KEY_UP]);

        let reports = CAPTURE
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.contains("KEY_NOT_A_KEY"))
            .count();

        assert_eq!(reports, 1);
    }

    #[test]
    fn rebuild_replaces() {
        let mut m = Mapping::new();

        m.add_binding("KEY_UP", 5);
        m.rebuild_index().unwrap();

        m.add_binding("KEY_DOWN", 3);

        // not visible until rebuilt
        assert_eq!(m.lookup(3), None);

        m.rebuild_index().unwrap();

        assert_eq!(m.range(), Some((3, 5)));
        assert_eq!(m.lookup(3), keys::find_key("KEY_DOWN"));
        assert_eq!(m.lookup(5), keys::find_key("KEY_UP"));
    }

    #[test]
    fn empty() {
        let mut m = Mapping::new();

        assert!(m.is_empty());
        assert_eq!(m.rebuild_index(), Ok(()));
        assert_eq!(m.range(), None);
        assert_eq!(m.lookup(0), None);
    }

    #[test]
    fn display() {
        let e = SpanTooLarge { min: 1, max: 0x20000 };

        assert_eq!(
            e.to_string(),
            "scancodes 0x00000001 to 0x00020000 are too far apart, at most 65535 apart is supported"
        );
    }
}
