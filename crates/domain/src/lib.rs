pub mod canonical;
pub mod config;
pub mod error;
pub mod ident;

pub use error::{Error, Result};
