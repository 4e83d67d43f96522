mod client;
mod error;
mod memory;
mod message;

pub use client::*;
pub use error::*;
pub use memory::*;
pub use message::*;
