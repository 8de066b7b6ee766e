mod hash;
mod paths;
mod region;

pub use hash::*;
pub use paths::*;
pub use region::*;
