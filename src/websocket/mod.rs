pub mod handler;
pub mod protocol;

pub use handler::{serve, dispatch, ClientSession, WS_PATH};
pub use protocol::{ClientCommand, ServerReply};
