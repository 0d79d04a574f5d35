//! Helpers for (de)serialising trained models.

pub mod json;

pub use json::{load_model, model_json, parse_model, save_model, FORMAT_VERSION};
