//! Layered configuration loading
//!
//! Priority (highest to lowest):
//! 1. Environment variables (`ENVMON_` prefix, `__` separates nesting)
//! 2. The given config file (YAML, TOML or JSON by extension)
//! 3. The type's `Default`

use crate::error::{Error, Result};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use tracing::debug;

/// Environment prefix shared by every envmon tool
pub const ENV_PREFIX: &str = "ENVMON_";

/// Load `T` from defaults, an optional file and `ENVMON_*` variables.
///
/// `ENVMON_CACHE__FETCH_TIMEOUT_SECS=3` sets `cache.fetch_timeout_secs`.
pub fn load_config<T>(path: Option<&Path>) -> Result<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    load_config_with_prefix(path, ENV_PREFIX)
}

pub fn load_config_with_prefix<T>(path: Option<&Path>, env_prefix: &str) -> Result<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    if let Some(path) = path {
        if !path.exists() {
            return Err(Error::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        figment = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => figment.merge(Toml::file(path)),
            Some("json") => figment.merge(Json::file(path)),
            _ => figment.merge(Yaml::file(path)),
        };
        debug!("Config file merged: {}", path.display());
    }

    figment
        .merge(Env::prefixed(env_prefix).split("__"))
        .extract()
        .map_err(Error::from)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Limits {
        timeout_secs: u64,
        batch: usize,
    }

    impl Default for Limits {
        fn default() -> Self {
            Self {
                timeout_secs: 10,
                batch: 200,
            }
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Settings {
        name: String,
        limits: Limits,
    }

    fn write_file(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_file() {
        let settings: Settings = load_config_with_prefix(None, "ENVMON_TEST_NONE_").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_yaml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "envctl.yaml", "name: site\nlimits:\n  batch: 50\n");

        let settings: Settings =
            load_config_with_prefix(Some(&path), "ENVMON_TEST_YAML_").unwrap();
        assert_eq!(settings.name, "site");
        assert_eq!(settings.limits.batch, 50);
        assert_eq!(settings.limits.timeout_secs, 10);
    }

    #[test]
    fn test_toml_and_json_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let toml = write_file(&dir, "a.toml", "name = \"t\"\n[limits]\ntimeout_secs = 3\n");
        let json = write_file(&dir, "a.json", r#"{"limits": {"batch": 7}}"#);

        let from_toml: Settings = load_config_with_prefix(Some(&toml), "ENVMON_TEST_TOML_").unwrap();
        assert_eq!(from_toml.limits.timeout_secs, 3);
        let from_json: Settings = load_config_with_prefix(Some(&json), "ENVMON_TEST_JSON_").unwrap();
        assert_eq!(from_json.limits.batch, 7);
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "c.yaml", "limits:\n  timeout_secs: 4\n");
        std::env::set_var("ENVMON_TEST_ENV_LIMITS__TIMEOUT_SECS", "9");

        let settings: Settings = load_config_with_prefix(Some(&path), "ENVMON_TEST_ENV_").unwrap();
        assert_eq!(settings.limits.timeout_secs, 9);
        std::env::remove_var("ENVMON_TEST_ENV_LIMITS__TIMEOUT_SECS");
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = load_config_with_prefix::<Settings>(
            Some(Path::new("/nonexistent/envctl.yaml")),
            "ENVMON_TEST_MISSING_",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_type_mismatch_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "bad.yaml", "limits:\n  batch: lots\n");
        assert!(load_config_with_prefix::<Settings>(Some(&path), "ENVMON_TEST_BAD_").is_err());
    }
}
