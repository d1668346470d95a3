//! Wire types exchanged between the bot and the admin bridge.

mod messages;

pub use messages::*;
