//! Identity keys and token models shared by the cache, guard, store, and broker.

pub mod id;
pub mod key;
pub mod token;

pub use id::*;
pub use key::*;
pub use token::{cached::*, payload::*, secret::*};
