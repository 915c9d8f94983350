pub mod archive;
pub mod config;
pub mod db;
pub mod error;
pub mod images;
pub mod logging;
pub mod photos;

pub use config::Config;
pub use db::{Database, Snapshot};
pub use error::{Error, Result};
pub use images::ImageStore;
