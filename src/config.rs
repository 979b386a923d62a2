use anyhow::{anyhow, Result};
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub storage_dir: PathBuf,
    pub public_base_url: String,
    pub bcrypt_cost: u32,
    /// Self-service codes a newly registered account may generate.
    pub default_referral_rights: i64,
    pub session_ttl_hours: i64,
    pub reset_ttl_minutes: i64,
    /// Allows issuing bootstrap codes and granting code rights.
    pub operator: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        let data_dir = match var("XABZEDIN_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir(),
        };

        let db_path = var("XABZEDIN_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("xabzedin.db"));
        let storage_dir = var("XABZEDIN_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("storage"));
        let public_base_url = var("XABZEDIN_PUBLIC_URL")
            .unwrap_or_else(|| format!("file://{}", storage_dir.display()));

        Ok(Self {
            bcrypt_cost: try_load("XABZEDIN_BCRYPT_COST", bcrypt::DEFAULT_COST)?,
            default_referral_rights: try_load("XABZEDIN_REFERRAL_RIGHTS", 1)?,
            session_ttl_hours: try_load("XABZEDIN_SESSION_TTL_HOURS", 24 * 30)?,
            reset_ttl_minutes: try_load("XABZEDIN_RESET_TTL_MINUTES", 60)?,
            operator: flag("XABZEDIN_OPERATOR")?,
            data_dir,
            db_path,
            storage_dir,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Call once the subscriber is installed.
    pub fn log_summary(&self) {
        info!(
            data_dir = %self.data_dir.display(),
            db = %self.db_path.display(),
            storage = %self.storage_dir.display(),
            public_url = %self.public_base_url,
            "Configuration loaded"
        );
        debug!(
            bcrypt_cost = self.bcrypt_cost,
            referral_rights = self.default_referral_rights,
            session_ttl_hours = self.session_ttl_hours,
            reset_ttl_minutes = self.reset_ttl_minutes,
            operator = self.operator,
            "Configuration limits"
        );
    }

    pub fn session_file(&self) -> PathBuf {
        self.data_dir.join("session")
    }

    pub fn outbox_dir(&self) -> PathBuf {
        self.data_dir.join("outbox")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    #[cfg(test)]
    pub fn for_tests(data_dir: &std::path::Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            db_path: data_dir.join("xabzedin.db"),
            storage_dir: data_dir.join("storage"),
            public_base_url: "https://cdn.test".to_string(),
            bcrypt_cost: 4,
            default_referral_rights: 1,
            session_ttl_hours: 1,
            reset_ttl_minutes: 60,
            operator: false,
        }
    }
}

fn default_data_dir() -> PathBuf {
    // XDG data directory or the working directory
    directories::ProjectDirs::from("", "", "xabzedin")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn flag(key: &str) -> Result<bool> {
    match var(key).map(|v| v.trim().to_lowercase()).as_deref() {
        None | Some("0" | "false" | "no") => Ok(false),
        Some("1" | "true" | "yes") => Ok(true),
        Some(other) => Err(anyhow!("Invalid {key} value '{other}': expected 1 or 0")),
    }
}

fn try_load<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match var(key) {
        Some(raw) => {
            raw.trim()
                .parse()
                .map_err(|e| anyhow!("Invalid {key} value '{raw}': {e}"))
        }
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_load_default_when_unset() {
        unsafe { env::remove_var("XABZEDIN_TEST_UNSET"); }
        let value: i64 = try_load("XABZEDIN_TEST_UNSET", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_try_load_rejects_garbage() {
        unsafe { env::set_var("XABZEDIN_TEST_GARBAGE", "seven"); }
        let result: Result<i64> = try_load("XABZEDIN_TEST_GARBAGE", 7);
        unsafe { env::remove_var("XABZEDIN_TEST_GARBAGE"); }

        let err = result.unwrap_err().to_string();
        assert!(err.contains("XABZEDIN_TEST_GARBAGE"));
    }

    #[test]
    fn test_flag_values() {
        unsafe { env::set_var("XABZEDIN_TEST_FLAG", "1"); }
        assert!(flag("XABZEDIN_TEST_FLAG").unwrap());
        unsafe { env::set_var("XABZEDIN_TEST_FLAG", "No"); }
        assert!(!flag("XABZEDIN_TEST_FLAG").unwrap());
        unsafe { env::set_var("XABZEDIN_TEST_FLAG", "maybe"); }
        assert!(flag("XABZEDIN_TEST_FLAG").is_err());
        unsafe { env::remove_var("XABZEDIN_TEST_FLAG"); }
        assert!(!flag("XABZEDIN_TEST_FLAG").unwrap());
    }

    #[test]
    fn test_try_load_parses_value() {
        unsafe { env::set_var("XABZEDIN_TEST_PARSED", " 12 "); }
        let value: u32 = try_load("XABZEDIN_TEST_PARSED", 4).unwrap();
        unsafe { env::remove_var("XABZEDIN_TEST_PARSED"); }
        assert_eq!(value, 12);
    }
}
