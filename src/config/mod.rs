//! Server configuration, registration payloads and their validation.
mod apply;
mod loader;
mod parse;
pub mod types;
mod validate;


pub use apply::{
    DatabaseLocation, RunSettings, ServerSettings, resolve_run_settings, resolve_serve_settings,
};
pub use loader::{load_config, load_registration_file};
pub use validate::validate_registration;

#[cfg(test)]
pub(crate) use loader::load_config_file;
pub(crate) use parse::{parse_bool_flag, parse_duration_value};
