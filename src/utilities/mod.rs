//! Configuration, errors and template helpers shared across the crate.

pub mod config;
pub mod errors;
pub mod string_utils;
