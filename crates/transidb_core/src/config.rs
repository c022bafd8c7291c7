//! Transient store configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`TransientStore`](crate::TransientStore).
#[derive(Debug, Clone)]
pub struct TransientStoreConfig {
    /// Whether new sessions check entity versions at flush.
    pub check_versions: bool,

    /// Maximum number of referrers listed per link in an incoming-link
    /// violation.
    pub max_referrers_in_error: usize,

    /// How long `resume` waits for a session held by another thread.
    pub resume_timeout: Duration,

    /// Directory for blobs streamed from readers (`None` = system temp dir).
    pub blob_spool_dir: Option<PathBuf>,

    /// Maximum number of cascade or orphan-removal rounds before giving up.
    pub max_cascade_rounds: usize,
}

impl Default for TransientStoreConfig {
    fn default() -> Self {
        Self {
            check_versions: true,
            max_referrers_in_error: 10,
            resume_timeout: Duration::from_secs(30),
            blob_spool_dir: None,
            max_cascade_rounds: 64,
        }
    }
}

impl TransientStoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether new sessions check entity versions at flush.
    #[must_use]
    pub const fn check_versions(mut self, value: bool) -> Self {
        self.check_versions = value;
        self
    }

    /// Sets the number of referrers listed per link in incoming-link errors.
    #[must_use]
    pub const fn max_referrers_in_error(mut self, count: usize) -> Self {
        self.max_referrers_in_error = count;
        self
    }

    /// Sets the default resume timeout.
    #[must_use]
    pub const fn resume_timeout(mut self, timeout: Duration) -> Self {
        self.resume_timeout = timeout;
        self
    }

    /// Sets the blob spool directory.
    #[must_use]
    pub fn blob_spool_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.blob_spool_dir = Some(dir.into());
        self
    }

    /// Sets the maximum number of cascade rounds.
    #[must_use]
    pub const fn max_cascade_rounds(mut self, rounds: usize) -> Self {
        self.max_cascade_rounds = rounds;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = TransientStoreConfig::default();
        assert!(config.check_versions);
        assert_eq!(config.max_referrers_in_error, 10);
        assert_eq!(config.resume_timeout, Duration::from_secs(30));
        assert!(config.blob_spool_dir.is_none());
        assert_eq!(config.max_cascade_rounds, 64);
    }

    #[test]
    fn builder_pattern() {
        let config = TransientStoreConfig::new()
            .check_versions(false)
            .max_referrers_in_error(3)
            .resume_timeout(Duration::from_millis(50))
            .blob_spool_dir("/tmp/spool")
            .max_cascade_rounds(8);

        assert!(!config.check_versions);
        assert_eq!(config.max_referrers_in_error, 3);
        assert_eq!(config.resume_timeout, Duration::from_millis(50));
        assert_eq!(config.blob_spool_dir, Some(PathBuf::from("/tmp/spool")));
        assert_eq!(config.max_cascade_rounds, 8);
    }
}
