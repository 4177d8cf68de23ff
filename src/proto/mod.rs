mod connection;
mod go_away;
mod settings;
mod streams;

pub use self::connection::{Config, Connection, Event, ResponseUnit};

pub(crate) use self::go_away::GoAway;
pub(crate) use self::settings::Settings;
pub(crate) use self::streams::Streams;

pub use crate::frame::DEFAULT_INITIAL_WINDOW_SIZE;

pub type WindowSize = u32;

pub const MAX_WINDOW_SIZE: WindowSize = (1 << 31) - 1;
