use std::{
    env, fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Typed configuration shared by the CLI and HTTP shells.
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: Option<String>,
    pub telegram_request_timeout: Duration,

    // Invoice store
    pub invoice_db_path: PathBuf,

    // Broadcast
    pub test_config_path: PathBuf,
    pub promo_dir: PathBuf,
    pub sent_dir: PathBuf,
    pub message_delay: Duration,
    pub max_attempts: u32,

    // HTTP shell
    pub http_addr: SocketAddr,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        // The token is only required once a messenger is built, so a missing
        // token is not a load error here.
        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").and_then(non_empty);
        let telegram_request_timeout =
            Duration::from_millis(env_u64("TELEGRAM_REQUEST_TIMEOUT_MS").unwrap_or(30_000));

        let invoice_db_path = env_path("INVOICE_DB_PATH").unwrap_or("data/invoices.db".into());

        let test_config_path =
            env_path("BROADCAST_TEST_CONFIG").unwrap_or("config/broadcast-test.json".into());
        let promo_dir = env_path("PROMO_DIR").unwrap_or("promo/today".into());
        let sent_dir = env_path("PROMO_SENT_DIR").unwrap_or("promo/sent".into());
        let message_delay = Duration::from_millis(env_u64("BROADCAST_DELAY_MS").unwrap_or(200));
        let max_attempts = env_u32("BROADCAST_MAX_RETRIES").unwrap_or(3).max(1);

        let http_addr = match env_str("BROADCAST_HTTP_ADDR") {
            Some(raw) => raw.trim().parse::<SocketAddr>().map_err(|e| {
                Error::Config(format!("BROADCAST_HTTP_ADDR is not a socket address: {e}"))
            })?,
            None => SocketAddr::from(([0, 0, 0, 0], 3001)),
        };
        let upload_dir =
            env_path("BROADCAST_UPLOAD_DIR").unwrap_or_else(|| env::temp_dir().join("ivb-uploads"));
        let max_upload_bytes = env_usize("BROADCAST_MAX_UPLOAD_MB")
            .unwrap_or(50)
            .saturating_mul(1024 * 1024);

        Ok(Self {
            telegram_bot_token,
            telegram_request_timeout,
            invoice_db_path,
            test_config_path,
            promo_dir,
            sent_dir,
            message_delay,
            max_attempts,
            http_addr,
            upload_dir,
            max_upload_bytes,
        })
    }

    /// Token for the messaging adapter; fails fast when absent.
    pub fn require_bot_token(&self) -> Result<&str> {
        self.telegram_bot_token.as_deref().ok_or_else(|| {
            Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, unquote(v.trim()));
    }
}

fn unquote(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        &val[1..val.len() - 1]
    } else {
        val
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.trim().to_string())
    }
}
