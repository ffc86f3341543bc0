//! Channel abstraction for message I/O.

pub mod channel;
pub mod keyboard;
pub mod telegram;

pub use channel::*;
pub use keyboard::{Key, Keyboard};
pub use telegram::TelegramChannel;
