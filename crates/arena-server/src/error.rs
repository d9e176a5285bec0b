// error.rs - server-side errors

use thiserror::Error as ThisError;

use arena_game::{SpawnError, ViewerId};

use crate::sv_ents::CodecError;

#[derive(Debug, ThisError)]
pub enum ServerError {
    #[error("spawn failed: {0}")]
    Spawn(#[from] SpawnError),

    #[error("no client {0:?}")]
    UnknownClient(ViewerId),

    #[error("server is full ({max} clients)")]
    ServerFull { max: usize },

    #[error("encoding failed: {0}")]
    Codec(#[from] CodecError),
}
