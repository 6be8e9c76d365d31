pub mod api;
pub mod bootstrap;
pub mod config;
pub mod db;
pub mod error;
pub mod mail;
pub mod telemetry;
pub mod tenant;

pub use error::{MailError, MailResult};
