use std::str::FromStr;

use crate::error::ConfigError;

/// Read `key`, treating unset and blank as absent.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.trim().is_empty() => Ok(None),
        Ok(val) => Ok(Some(val.trim().to_string())),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}

/// Parse `key` as `T`, falling back to `default` when unset.
pub(crate) fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| {
            s.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("failed to parse '{s}': {e}"),
            })
        })
        .transpose()
        .map(|v| v.unwrap_or(default))
}

/// Parse `key` as `true`/`false`, falling back to `default` when unset.
pub(crate) fn parse_bool_env(key: &str, default: bool) -> Result<bool, ConfigError> {
    optional_env(key)?
        .map(|s| s.parse())
        .transpose()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must be 'true' or 'false': {e}"),
        })
        .map(|v| v.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test owns its keys; nothing else reads them.

    #[test]
    fn test_blank_is_absent() {
        unsafe { std::env::set_var("SEARCH_SANDBOX_TEST_BLANK", "  ") };
        assert_eq!(optional_env("SEARCH_SANDBOX_TEST_BLANK").unwrap(), None);
        assert_eq!(optional_env("SEARCH_SANDBOX_TEST_UNSET").unwrap(), None);
    }

    #[test]
    fn test_parse_with_default() {
        unsafe { std::env::set_var("SEARCH_SANDBOX_TEST_NUM", "19200") };
        assert_eq!(
            parse_optional_env("SEARCH_SANDBOX_TEST_NUM", 9200u16).unwrap(),
            19200
        );
        assert_eq!(
            parse_optional_env("SEARCH_SANDBOX_TEST_NUM_UNSET", 9200u16).unwrap(),
            9200
        );
    }

    #[test]
    fn test_parse_error_names_key() {
        unsafe { std::env::set_var("SEARCH_SANDBOX_TEST_BAD", "lots") };
        let err = parse_optional_env("SEARCH_SANDBOX_TEST_BAD", 1u64).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, .. } if key == "SEARCH_SANDBOX_TEST_BAD"
        ));

        unsafe { std::env::set_var("SEARCH_SANDBOX_TEST_BOOL", "maybe") };
        assert!(parse_bool_env("SEARCH_SANDBOX_TEST_BOOL", true).is_err());
    }
}
