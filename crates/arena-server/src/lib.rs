#![allow(clippy::too_many_arguments, clippy::type_complexity)]
// Server: clients, input, the fixed-rate frame and per-client frame encoding.

pub mod server;
pub mod error;
pub mod sv_ents;
pub mod sv_main;
pub mod sv_user;

pub use error::ServerError;
pub use server::{Client, ClientState, InputCommand, OutboundFrame, ServerConfig};
pub use sv_ents::{CodecError, FrameEncoder, PlainCodec, WireCodec};
pub use sv_main::Server;
