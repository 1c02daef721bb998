mod k0s_control_plane;
mod replica;
mod update_plan;

pub use k0s_control_plane::*;
pub use replica::*;
pub use update_plan::*;
