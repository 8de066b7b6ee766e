mod document;
mod notification;
mod patch;
mod settings;
mod subscription;
mod version;

pub use document::*;
pub use notification::*;
pub use patch::*;
pub use settings::*;
pub use subscription::*;
pub use version::*;
