use std::{collections::HashSet, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;

use crate::{domain::ChatId, errors::Error, Result};

/// Query capability over the invoice store.
#[async_trait]
pub trait ChatIdSource: Send + Sync {
    /// Distinct, non-null chat ids of every invoice recipient.
    async fn distinct_chat_ids(&self) -> Result<Vec<ChatId>>;
}

/// Operator-maintained broadcast test settings (`broadcast-test.json`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TestConfig {
    pub test_mode: bool,
    pub test_chat_ids: Vec<ChatId>,
    pub exclude_chat_ids: Vec<ChatId>,
}

impl TestConfig {
    /// Load the test config. A missing file yields defaults (production
    /// mode, no exclusions); an unreadable or malformed one is an error, since
    /// guessing would turn a test run into a production run.
    pub async fn load(path: &std::path::Path) -> Result<Self> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(Error::Config(format!(
                    "cannot read test config {}: {e}",
                    path.display()
                )))
            }
        };

        serde_json::from_str(&raw).map_err(|e| {
            Error::Config(format!("invalid test config {}: {e}", path.display()))
        })
    }

    /// True when test mode is on and there is somewhere to send to.
    pub fn is_active(&self) -> bool {
        self.test_mode && !self.test_chat_ids.is_empty()
    }

    /// Fails when test mode was asked for explicitly but there are no test
    /// chat ids, instead of falling back to every customer.
    pub fn ensure_test_targets(&self) -> Result<()> {
        if self.test_chat_ids.is_empty() {
            return Err(Error::Setup(
                "test mode requested but testChatIds is empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecipientMode {
    Test,
    Production,
}

impl RecipientMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RecipientMode::Test => "test",
            RecipientMode::Production => "production",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recipients {
    pub chat_ids: Vec<ChatId>,
    pub mode: RecipientMode,
}

/// Computes the target chat list for a broadcast.
#[derive(Clone)]
pub struct RecipientResolver {
    source: Arc<dyn ChatIdSource>,
    test_config_path: PathBuf,
}

impl RecipientResolver {
    pub fn new(source: Arc<dyn ChatIdSource>, test_config_path: impl Into<PathBuf>) -> Self {
        Self {
            source,
            test_config_path: test_config_path.into(),
        }
    }

    pub async fn test_config(&self) -> Result<TestConfig> {
        TestConfig::load(&self.test_config_path).await
    }

    pub async fn resolve(&self, test_mode: bool) -> Result<Recipients> {
        let cfg = self.test_config().await?;
        self.resolve_with(&cfg, test_mode).await
    }

    /// Resolve against an already loaded test config.
    pub async fn resolve_with(&self, cfg: &TestConfig, test_mode: bool) -> Result<Recipients> {
        if test_mode && !cfg.test_chat_ids.is_empty() {
            return Ok(Recipients {
                chat_ids: cfg.test_chat_ids.clone(),
                mode: RecipientMode::Test,
            });
        }

        let mut chat_ids = self.source.distinct_chat_ids().await?;
        if !cfg.exclude_chat_ids.is_empty() {
            let exclude: HashSet<ChatId> = cfg.exclude_chat_ids.iter().cloned().collect();
            chat_ids.retain(|id| !exclude.contains(id));
        }

        Ok(Recipients {
            chat_ids,
            mode: RecipientMode::Production,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource(Vec<ChatId>);

    #[async_trait]
    impl ChatIdSource for FixedSource {
        async fn distinct_chat_ids(&self) -> Result<Vec<ChatId>> {
            Ok(self.0.clone())
        }
    }

    struct DownSource;

    #[async_trait]
    impl ChatIdSource for DownSource {
        async fn distinct_chat_ids(&self) -> Result<Vec<ChatId>> {
            Err(Error::Store("connection refused".to_string()))
        }
    }

    fn ids(v: &[i64]) -> Vec<ChatId> {
        v.iter().copied().map(ChatId::Id).collect()
    }

    fn write_config(tag: &str, body: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("ivb-test-config-{tag}-{}.json", std::process::id()));
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn missing_config_defaults_to_production() {
        let path = std::env::temp_dir().join("ivb-definitely-missing/broadcast-test.json");
        assert_eq!(TestConfig::load(&path).await.unwrap(), TestConfig::default());

        let resolver = RecipientResolver::new(Arc::new(FixedSource(ids(&[1, 2]))), path);
        let r = resolver.resolve(true).await.unwrap();
        assert_eq!(r.mode, RecipientMode::Production);
        assert_eq!(r.chat_ids, ids(&[1, 2]));
    }

    #[tokio::test]
    async fn test_mode_uses_test_ids_verbatim() {
        let path = write_config(
            "test",
            r#"{"testMode": true, "testChatIds": [9, "9", 8], "excludeChatIds": [9]}"#,
        );
        let resolver = RecipientResolver::new(Arc::new(FixedSource(ids(&[1, 2]))), &path);

        let r = resolver.resolve(true).await.unwrap();
        assert_eq!(r.mode, RecipientMode::Test);
        assert_eq!(r.chat_ids, ids(&[9, 9, 8]));

        // Caller asked for production: store ids, exclusions applied.
        let r = resolver.resolve(false).await.unwrap();
        assert_eq!(r.mode, RecipientMode::Production);
        assert_eq!(r.chat_ids, ids(&[1, 2]));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn empty_test_list_falls_back_to_production_with_exclusions() {
        let path = write_config(
            "exclude",
            r#"{"testMode": true, "testChatIds": [], "excludeChatIds": [222]}"#,
        );
        let resolver =
            RecipientResolver::new(Arc::new(FixedSource(ids(&[111, 222, 333]))), &path);

        let r = resolver.resolve(true).await.unwrap();
        assert_eq!(r.mode, RecipientMode::Production);
        assert_eq!(r.chat_ids, ids(&[111, 333]));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn malformed_config_is_a_setup_error() {
        let path = write_config("broken", "{ not json");
        assert!(matches!(TestConfig::load(&path).await, Err(Error::Config(_))));

        let resolver = RecipientResolver::new(Arc::new(FixedSource(ids(&[1, 2, 3]))), &path);
        assert!(matches!(resolver.resolve(true).await, Err(Error::Config(_))));
        assert!(matches!(resolver.resolve(false).await, Err(Error::Config(_))));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn username_test_ids_stay_in_test_mode() {
        let path = write_config(
            "username",
            r#"{"testMode": true, "testChatIds": [111, "@my_test_channel"]}"#,
        );
        let resolver = RecipientResolver::new(Arc::new(FixedSource(ids(&[1, 2, 3]))), &path);

        let r = resolver.resolve(true).await.unwrap();
        assert_eq!(r.mode, RecipientMode::Test);
        assert_eq!(
            r.chat_ids,
            vec![
                ChatId::Id(111),
                ChatId::Username("@my_test_channel".to_string())
            ]
        );

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn explicit_test_mode_needs_test_ids() {
        let cfg = TestConfig {
            test_mode: true,
            ..Default::default()
        };
        assert!(matches!(cfg.ensure_test_targets(), Err(Error::Setup(_))));

        let cfg = TestConfig {
            test_chat_ids: vec![ChatId::Id(9)],
            ..cfg
        };
        assert!(cfg.ensure_test_targets().is_ok());
    }

    #[tokio::test]
    async fn store_failure_propagates() {
        let resolver = RecipientResolver::new(Arc::new(DownSource), "/nonexistent/cfg.json");
        assert!(matches!(
            resolver.resolve(false).await,
            Err(Error::Store(_))
        ));
    }
}
