//! Request and response models

pub mod auth;

pub use auth::*;
