mod diff;
mod store;

pub use diff::*;
pub use store::*;
