mod state;
mod statistics;
mod work;
mod worker;

pub use state::*;
pub use statistics::*;
pub use work::*;
pub use worker::*;
