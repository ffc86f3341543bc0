//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::access::AccessPolicy;
use crate::error::ConfigError;

/// Bot configuration, read from `SES_*` environment variables.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Telegram Bot API token.
    pub bot_token: SecretString,
    /// Operators allowed to export and view statistics.
    pub access: AccessPolicy,
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Where pre-export snapshots go.
    pub backup_dir: PathBuf,
    /// Where submitted photos are stored.
    pub photo_dir: PathBuf,
    /// Whether the form asks for a photo.
    pub photos_enabled: bool,
    /// One record per submitter within this window.
    pub cooldown: Duration,
    /// In-progress forms are dropped after this much inactivity.
    pub session_idle_timeout: Duration,
    /// Verbose logging.
    pub debug: bool,
}

impl BotConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`, which returns the value of a
    /// variable if set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bot_token = get("TELEGRAM_BOT_TOKEN")
            .ok_or_else(|| ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN".into()))?;

        let access = AccessPolicy::parse(&get("SES_ADMIN_IDS").unwrap_or_default())?;

        let db_path = PathBuf::from(
            get("SES_DB_PATH").unwrap_or_else(|| "./data/ses_database.db".to_string()),
        );
        let backup_dir = match get("SES_BACKUP_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => db_path
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
        };
        let photo_dir =
            PathBuf::from(get("SES_PHOTO_DIR").unwrap_or_else(|| "./data/photos".to_string()));

        let photos_enabled = parse_bool("SES_PHOTOS_ENABLED", get("SES_PHOTOS_ENABLED"), true)?;
        let debug = parse_bool("SES_DEBUG", get("SES_DEBUG"), false)?;

        let cooldown_hours = parse_number("SES_COOLDOWN_HOURS", get("SES_COOLDOWN_HOURS"), 24)?;
        let cooldown = seconds("SES_COOLDOWN_HOURS", cooldown_hours, 3600)?;
        let idle_minutes = parse_number(
            "SES_SESSION_IDLE_MINUTES",
            get("SES_SESSION_IDLE_MINUTES"),
            720,
        )?;
        if idle_minutes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SES_SESSION_IDLE_MINUTES".into(),
                message: "must be at least 1".into(),
            });
        }
        let session_idle_timeout = seconds("SES_SESSION_IDLE_MINUTES", idle_minutes, 60)?;

        Ok(Self {
            bot_token: SecretString::from(bot_token),
            access,
            db_path,
            backup_dir,
            photo_dir,
            photos_enabled,
            cooldown,
            session_idle_timeout,
            debug,
        })
    }
}

fn parse_number(key: &str, value: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) => v.parse().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{v:?}: {e}"),
        }),
    }
}

/// `value` units of `unit_secs` seconds each.
fn seconds(key: &str, value: u64, unit_secs: u64) -> Result<Duration, ConfigError> {
    value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{value} is too large"),
        })
}

fn parse_bool(key: &str, value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{other:?} is not a boolean"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<BotConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BotConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_with_only_token() {
        let cfg = config(&[("TELEGRAM_BOT_TOKEN", "123:ABC")]).unwrap();
        assert_eq!(cfg.bot_token.expose_secret(), "123:ABC");
        assert!(cfg.access.is_empty());
        assert_eq!(cfg.db_path, PathBuf::from("./data/ses_database.db"));
        assert_eq!(cfg.backup_dir, PathBuf::from("./data"));
        assert_eq!(cfg.photo_dir, PathBuf::from("./data/photos"));
        assert!(cfg.photos_enabled);
        assert_eq!(cfg.cooldown, Duration::from_secs(24 * 3600));
        assert_eq!(cfg.session_idle_timeout, Duration::from_secs(720 * 60));
        assert!(!cfg.debug);
    }

    #[test]
    fn missing_token_is_an_error() {
        assert!(matches!(
            config(&[]),
            Err(ConfigError::MissingEnvVar(ref key)) if key == "TELEGRAM_BOT_TOKEN"
        ));
        assert!(matches!(
            config(&[("TELEGRAM_BOT_TOKEN", "  ")]),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = config(&[
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("SES_ADMIN_IDS", "1, 2"),
            ("SES_DB_PATH", "/var/lib/ses/ses.db"),
            ("SES_PHOTOS_ENABLED", "false"),
            ("SES_COOLDOWN_HOURS", "48"),
            ("SES_SESSION_IDLE_MINUTES", "30"),
            ("SES_DEBUG", "true"),
        ])
        .unwrap();
        assert!(cfg.access.is_privileged(1));
        assert!(cfg.access.is_privileged(2));
        assert_eq!(cfg.backup_dir, PathBuf::from("/var/lib/ses"));
        assert!(!cfg.photos_enabled);
        assert_eq!(cfg.cooldown, Duration::from_secs(48 * 3600));
        assert_eq!(cfg.session_idle_timeout, Duration::from_secs(30 * 60));
        assert!(cfg.debug);
    }

    #[test]
    fn explicit_backup_dir_wins() {
        let cfg = config(&[
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("SES_BACKUP_DIR", "/backups"),
        ])
        .unwrap();
        assert_eq!(cfg.backup_dir, PathBuf::from("/backups"));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        for (key, value) in [
            ("SES_COOLDOWN_HOURS", "a day"),
            ("SES_COOLDOWN_HOURS", "-1"),
            ("SES_SESSION_IDLE_MINUTES", "0"),
            ("SES_PHOTOS_ENABLED", "maybe"),
            ("SES_ADMIN_IDS", "admin"),
            ("SES_COOLDOWN_HOURS", "18446744073709551615"),
            ("SES_SESSION_IDLE_MINUTES", "1000000000000000000"),
        ] {
            let result = config(&[("TELEGRAM_BOT_TOKEN", "t"), (key, value)]);
            assert!(
                matches!(result, Err(ConfigError::InvalidValue { .. })),
                "{key}={value}"
            );
        }
    }
}
