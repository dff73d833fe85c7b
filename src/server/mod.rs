pub mod crypto;
pub mod handlers;
pub mod models;
pub mod policy;
pub mod time;

pub use handlers::{build_rocket, launch};
