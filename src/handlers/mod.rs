pub mod config;
pub mod history;
pub mod index;
pub mod sessions;

pub use config::*;
pub use history::*;
pub use index::*;
pub use sessions::*;
