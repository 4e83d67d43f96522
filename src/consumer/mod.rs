pub mod control_plane;
pub mod handle;
mod jobs;

pub use control_plane::*;
pub use handle::*;
pub use jobs::*;
