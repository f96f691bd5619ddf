//! Environment variable helpers.
//!
//! Names may be written with a leading `$` (`"$HTTP_ADDR"`); it is ignored.

use std::env;

use thiserror::Error;

/// Error type for required environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    #[error("variable {0} is not present in the environment")]
    NotPresent(String),

    #[error("environment variable {name} must be either true or false, {value} given")]
    NotBool { name: String, value: String },
}

fn name(variable: &str) -> &str {
    variable.strip_prefix('$').unwrap_or(variable)
}

/// Value of a variable that must be set. An empty value is still a value.
pub fn must(variable: &str) -> Result<String, EnvError> {
    let name = name(variable);
    env::var_os(name)
        .map(|value| value.to_string_lossy().into_owned())
        .ok_or_else(|| EnvError::NotPresent(name.to_string()))
}

/// Boolean variable that must be set to exactly `true` or `false`.
pub fn must_bool(variable: &str) -> Result<bool, EnvError> {
    let value = must(variable)?;
    match value.as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(EnvError::NotBool {
            name: name(variable).to_string(),
            value,
        }),
    }
}

/// Value of a variable, or `default` when it is unset or empty.
pub fn get(variable: &str, default: &str) -> String {
    match env::var(name(variable)) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

/// Boolean variable, or `default` unless it is exactly `true` or `false`.
pub fn get_bool(variable: &str, default: bool) -> bool {
    match env::var(name(variable)).as_deref() {
        Ok("true") => true,
        Ok("false") => false,
        _ => default,
    }
}
