//! Turn an infrared receiver into a keyboard. Scancodes received on a linux input
//! device are looked up in a configurable table, and the matching keys are pressed
//! on a virtual keyboard created through uinput.

pub mod config;
pub mod inputdev;
pub mod keys;
pub mod mapping;
pub mod translate;
pub mod uinput;
