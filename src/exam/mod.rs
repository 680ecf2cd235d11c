pub mod broadcast;
mod negotiator;
mod room;
pub mod session;
mod server;
mod signaling;

pub use server::{ExamServer, SignalingContext};
pub use signaling::{ClientMessage, ServerMessage};
