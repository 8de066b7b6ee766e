mod builder;
mod manager;
mod patch;

pub use builder::*;
pub use manager::*;
pub use patch::*;
