//! The trader entity: commands it accepts, events it records, replies it
//! returns and the state those events build.

mod command;
mod event;
mod reply;
mod state;

pub use command::{Candle, TraderCommand};
pub use event::TraderEvent;
pub use reply::TraderReply;
pub use state::TraderState;
