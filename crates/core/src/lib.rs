pub mod config;
pub mod error;
pub mod event;
pub mod job;
pub mod product;
pub mod subscription;

pub use config::Config;
pub use error::*;
pub use event::*;
pub use job::*;
pub use product::*;
pub use subscription::*;
