//! Configuration parameters struct parsing helper.

/// Composes a configuration struct from its default values, then overwrites
/// given fields by parsing from given TOML string if it's not `None`. Returns
/// an `Ok(config)` on success, and `Err(WintersetError)` on parser failure.
///
/// Example:
/// ```no_run
/// # use winterset::{parsed_config, WintersetError};
/// #[derive(Debug, Default, serde::Deserialize)]
/// struct MyConfig {
///     cadence_ms: u64,
/// }
/// let config_str = Some("cadence_ms = 50");
/// let config = parsed_config!(config_str => MyConfig; cadence_ms).unwrap();
/// ```
#[macro_export]
macro_rules! parsed_config {
    ($config_str:expr => $config_type:ty; $($field:ident),+) => {{
        let config_str: Option<&str> = $config_str;

        // closure helper for easier error returning
        let compose_config = || -> Result<$config_type, WintersetError> {
            let mut config: $config_type = Default::default();
            if let None = config_str {
                return Ok(config);
            }

            let mut table = config_str.unwrap().parse::<toml::Table>()?;

            // traverse through all given field names
            $({
                // if field name found in table (and removed)
                if let Some(v) = table.remove(stringify!($field)) {
                    config.$field = v.try_into()?;
                }
            })+

            // if table is not empty at this time, some parsed keys are not
            // expected hence invalid
            if table.len() > 0 {
                return Err(WintersetError(format!(
                    "invalid field name '{}' in config",
                    table.keys().next().unwrap(),
                )));
            }

            Ok(config)
        };

        compose_config()
    }};
}

#[cfg(test)]
mod config_tests {
    use crate::utils::WintersetError;

    #[derive(Debug, PartialEq)]
    struct TestConfig {
        log_dir: String,
        cadence_ms: u64,
        paranoid: bool,
    }

    impl Default for TestConfig {
        fn default() -> Self {
            TestConfig {
                log_dir: "/tmp/winterset".into(),
                cadence_ms: 1000,
                paranoid: true,
            }
        }
    }

    #[test]
    fn parse_from_none() -> Result<(), WintersetError> {
        let config =
            parsed_config!(None => TestConfig; log_dir, cadence_ms, paranoid)?;
        let ref_config: TestConfig = Default::default();
        assert_eq!(config, ref_config);
        Ok(())
    }

    #[test]
    fn parse_from_partial() -> Result<(), WintersetError> {
        let config_str = Some("cadence_ms = 50");
        let config =
            parsed_config!(config_str => TestConfig; log_dir, cadence_ms)?;
        let ref_config = TestConfig {
            log_dir: "/tmp/winterset".into(),
            cadence_ms: 50,
            paranoid: true,
        };
        assert_eq!(config, ref_config);
        Ok(())
    }

    #[test]
    fn parse_invalid_field() {
        let config_str = Some("typo_field = 999");
        assert!(parsed_config!(config_str => TestConfig; cadence_ms).is_err());
    }
}
