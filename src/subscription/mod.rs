mod fetcher;
mod parser;
mod store;

pub use fetcher::*;
pub use parser::*;
pub use store::*;
