#![allow(clippy::too_many_arguments, clippy::float_cmp, clippy::manual_range_contains,
         clippy::new_without_default)]
// Shared support code: math, console variables, logging, packet queues.

pub mod shared;
pub mod error;
pub mod cvar;
pub mod common;
pub mod net_queue;
