//! API route handlers

pub mod entries;
pub mod health;
pub mod sync;
