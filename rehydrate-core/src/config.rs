//! Configuration for hydration behaviour and the local storage backend
//!
//! [`HydrationConfig`] is owned by a hydrator and may be changed at runtime;
//! [`StorageConfig`] selects where the local backend keeps its records.

use crate::storage::{DocumentDirectory, LocalFileStorage};
use crate::{HydrateError, Result};
use rehydrate_retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hydration and persistence settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HydrationConfig {
    /// Gzip documents before storing them
    pub use_compression: bool,
    /// Encrypt documents before storing them; requires `encryption_key`
    pub enable_encryption: bool,
    /// Passphrase the cipher key is derived from. Never serialized.
    #[serde(skip_serializing)]
    pub encryption_key: Option<String>,
    /// Document format version written with every persist
    pub current_version: u32,
    /// Stored documents older than this are ignored on hydrate
    #[serde(with = "duration_ms")]
    pub state_expiration: Option<Duration>,
    /// Period of the auto-save timer; `None` disables it
    #[serde(with = "duration_ms")]
    pub auto_save_interval: Option<Duration>,
    /// Quiet period after the last mutation before a debounced persist
    #[serde(with = "duration_ms::required")]
    pub debounce: Duration,
    pub max_retries: u32,
    /// Delay unit of the persist backoff; attempt `i` sleeps `2^i` units
    #[serde(with = "duration_ms::required")]
    pub retry_base_delay: Duration,
}

impl Default for HydrationConfig {
    fn default() -> Self {
        Self {
            use_compression: false,
            enable_encryption: false,
            encryption_key: None,
            current_version: 1,
            state_expiration: None,
            auto_save_interval: Some(Duration::from_secs(30)),
            debounce: Duration::from_millis(300),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
        }
    }
}

impl HydrationConfig {
    /// Restore every setting to its default
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Enable encryption with the given passphrase
    pub fn with_encryption(mut self, key: impl Into<String>) -> Self {
        self.enable_encryption = true;
        self.encryption_key = Some(key.into());
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.use_compression = enabled;
        self
    }

    pub fn with_expiration(mut self, expiration: Option<Duration>) -> Self {
        self.state_expiration = expiration;
        self
    }

    pub fn with_auto_save_interval(mut self, interval: Option<Duration>) -> Self {
        self.auto_save_interval = interval;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.enable_encryption
            && self.encryption_key.as_deref().map_or(true, str::is_empty)
        {
            return Err(HydrateError::configuration(
                "encryption is enabled but no encryption key is configured",
            ));
        }
        if self.current_version == 0 {
            return Err(HydrateError::validation(
                "current_version must be at least 1",
            ));
        }
        if self.auto_save_interval == Some(Duration::ZERO) {
            return Err(HydrateError::validation(
                "auto_save_interval must be non-zero; use None to disable it",
            ));
        }
        Ok(())
    }

    /// Backoff policy for persist retries
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_base_delay)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load a configuration file; the encryption key must be supplied separately
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

/// Configuration for the local filesystem backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base path for local storage; falls back to the document directory
    pub local_base_path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn with_base_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            local_base_path: Some(path.into()),
        }
    }

    /// Resolve the directory records are kept in
    pub fn resolve_base_path(&self, provider: Option<&dyn DocumentDirectory>) -> Result<PathBuf> {
        match (&self.local_base_path, provider) {
            (Some(path), _) => Ok(path.clone()),
            (None, Some(provider)) => provider.document_dir(),
            (None, None) => Err(HydrateError::configuration(
                "no local base path configured and no document directory provider given",
            )),
        }
    }

    /// Build the local storage backend this configuration describes
    pub fn open_local(&self, provider: Option<&dyn DocumentDirectory>) -> Result<LocalFileStorage> {
        Ok(LocalFileStorage::with_base_dir(
            self.resolve_base_path(provider)?,
        ))
    }
}

/// Durations as whole milliseconds on the wire
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    fn millis<E: serde::ser::Error>(d: &Duration) -> Result<u64, E> {
        u64::try_from(d.as_millis())
            .map_err(|_| E::custom(format!("duration {d:?} does not fit in u64 milliseconds")))
    }

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&millis::<S::Error>(d)?),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }

    pub mod required {
        use super::*;

        pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_u64(millis::<S::Error>(value)?)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
            Ok(Duration::from_millis(u64::deserialize(d)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FixedDirectory;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = HydrationConfig::default();
        assert!(!config.use_compression);
        assert!(!config.enable_encryption);
        assert!(config.encryption_key.is_none());
        assert_eq!(config.current_version, 1);
        assert!(config.state_expiration.is_none());
        assert_eq!(config.auto_save_interval, Some(Duration::from_secs(30)));
        assert_eq!(config.debounce, Duration::from_millis(300));
        assert_eq!(config.max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reset() {
        let mut config = HydrationConfig::default()
            .with_compression(true)
            .with_encryption("pw")
            .with_expiration(Some(Duration::from_secs(60)));
        config.current_version = 4;

        config.reset();
        assert_eq!(config, HydrationConfig::default());
    }

    #[test]
    fn test_encryption_without_key_is_invalid() {
        let mut config = HydrationConfig::default();
        config.enable_encryption = true;
        assert!(matches!(config.validate(), Err(HydrateError::Configuration(_))));

        config.encryption_key = Some(String::new());
        assert!(matches!(config.validate(), Err(HydrateError::Configuration(_))));

        config.encryption_key = Some("pw".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_version_is_invalid() {
        let config = HydrationConfig {
            current_version: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(HydrateError::Validation(_))));
    }

    #[test]
    fn test_json_never_contains_key() {
        let config = HydrationConfig::default()
            .with_encryption("hunter2")
            .with_expiration(Some(Duration::from_secs(90)));

        let text = config.to_json().unwrap();
        assert!(!text.contains("hunter2"));

        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["state_expiration"], json!(90_000));
        assert_eq!(value["debounce"], json!(300));

        let restored = HydrationConfig::from_json(&text).unwrap();
        assert!(restored.enable_encryption);
        assert!(restored.encryption_key.is_none());
        assert_eq!(restored.state_expiration, Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_oversized_duration_fails_to_serialize() {
        let config = HydrationConfig::default().with_expiration(Some(Duration::MAX));
        assert!(matches!(config.to_json(), Err(HydrateError::Json(_))));

        let largest = Duration::from_millis(u64::MAX);
        let text = HydrationConfig::default()
            .with_expiration(Some(largest))
            .to_json()
            .unwrap();
        let restored = HydrationConfig::from_json(&text).unwrap();
        assert_eq!(restored.state_expiration, Some(largest));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = HydrationConfig::from_json(r#"{"use_compression": true}"#).unwrap();
        assert!(config.use_compression);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.auto_save_interval, Some(Duration::from_secs(30)));

        let config = HydrationConfig::from_json(r#"{"auto_save_interval": null}"#).unwrap();
        assert!(config.auto_save_interval.is_none());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hydration.json");
        std::fs::write(&path, r#"{"current_version": 3}"#).unwrap();

        let config = HydrationConfig::from_json_file(&path).unwrap();
        assert_eq!(config.current_version, 3);

        assert!(matches!(
            HydrationConfig::from_json_file(dir.path().join("missing.json")),
            Err(HydrateError::Io(_))
        ));
    }

    #[test]
    fn test_retry_policy() {
        let config = HydrationConfig::default();
        let policy = config.retry_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_storage_config_resolution() {
        let explicit = StorageConfig::with_base_path("/data/state");
        assert_eq!(
            explicit.resolve_base_path(None).unwrap(),
            PathBuf::from("/data/state")
        );

        let provider = FixedDirectory(PathBuf::from("/home/user/Documents"));
        let fallback = StorageConfig::default();
        assert_eq!(
            fallback.resolve_base_path(Some(&provider)).unwrap(),
            PathBuf::from("/home/user/Documents")
        );

        assert!(matches!(
            fallback.resolve_base_path(None),
            Err(HydrateError::Configuration(_))
        ));
    }
}
