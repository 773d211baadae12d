//! Environment variable parsing utilities.
//!
//! Configuration overrides are read through these helpers rather than
//! repeating the `std::env::var(..).ok().and_then(..)` dance at every call site.
//!
//! # Example
//!
//! ```
//! use thredds_types::env_utils::{env_bool, env_string};
//!
//! let cache = env_bool("HYRAX_THREDDS_USE_MEMORY_CACHE").unwrap_or(true);
//! let content: Option<String> = env_string("HYRAX_THREDDS_CONTENT_PATH");
//! ```

/// Parse a boolean variable.
///
/// "1", "true", "yes" and "on" are true; "0", "false", "no" and "off" are
/// false (case-insensitive). Anything else, or an unset variable, is `None`.
pub fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|v| match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}

/// Non-empty string variable.
pub fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own variable names; the process environment is shared.

    #[test]
    fn test_env_bool() {
        std::env::set_var("THREDDS_TEST_ENV_ON", "Yes");
        std::env::set_var("THREDDS_TEST_ENV_OFF", "off");
        std::env::set_var("THREDDS_TEST_ENV_JUNK", "perhaps");
        assert_eq!(env_bool("THREDDS_TEST_ENV_ON"), Some(true));
        assert_eq!(env_bool("THREDDS_TEST_ENV_OFF"), Some(false));
        assert_eq!(env_bool("THREDDS_TEST_ENV_JUNK"), None);
        assert_eq!(env_bool("THREDDS_TEST_ENV_UNSET_BOOL"), None);
    }

    #[test]
    fn test_env_string() {
        std::env::set_var("THREDDS_TEST_ENV_STR", "  /srv/content ");
        std::env::set_var("THREDDS_TEST_ENV_BLANK", "   ");
        assert_eq!(env_string("THREDDS_TEST_ENV_STR").as_deref(), Some("/srv/content"));
        assert_eq!(env_string("THREDDS_TEST_ENV_BLANK"), None);
    }
}
