use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::error::{is_unique_violation, BoardError};
use crate::models::{non_blank, Account, Session};
use crate::referral::{consume_code, find_unused_code, normalize_code};

pub const MIN_PASSWORD_LENGTH: usize = 6;

/// bcrypt ignores everything past 72 bytes.
pub const MAX_PASSWORD_BYTES: usize = 72;

const TOKEN_LENGTH: usize = 48;

#[derive(Debug, Clone)]
pub struct SignUp {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
    pub referral_code: String,
}

// --- Passwords ---

pub fn validate_password(password: &str) -> Result<(), BoardError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(BoardError::WeakPassword(format!(
            "must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(BoardError::WeakPassword(format!(
            "must be at most {MAX_PASSWORD_BYTES} bytes"
        )));
    }
    Ok(())
}

pub fn hash_password(password: &str, cost: u32) -> Result<String> {
    bcrypt::hash(password, cost).context("Failed to hash password")
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    bcrypt::verify(password, hash).context("Failed to verify password")
}

pub fn normalize_email(email: &str) -> Result<String, BoardError> {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    let re = EMAIL.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
    });

    let email = email.trim().to_lowercase();
    if re.is_match(&email) {
        Ok(email)
    } else {
        Err(BoardError::InvalidEmail(email))
    }
}

fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

impl Database {
    // --- Registration ---

    /// Create an account gated by a referral code. Validation, account and
    /// profile creation and code consumption commit together or not at all.
    pub fn sign_up(&self, config: &Config, form: &SignUp) -> Result<i64> {
        let email = normalize_email(&form.email)?;
        validate_password(&form.password)?;
        let code = normalize_code(&form.referral_code);
        let password_hash = hash_password(&form.password, config.bcrypt_cost)?;

        let tx = self.conn.unchecked_transaction()?;

        let Some(referral) = find_unused_code(&tx, &code)? else {
            warn!(code = %code, "Sign up rejected: invalid referral code");
            return Err(BoardError::InvalidReferralCode.into());
        };

        let now = Utc::now();
        let inserted = tx.execute(
            "INSERT INTO accounts (email, password_hash, created_at) VALUES (?1, ?2, ?3)",
            params![email, password_hash, now],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(BoardError::EmailTaken(email).into());
            }
            Err(e) => return Err(e.into()),
        }
        let account_id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO profiles (id, email, full_name, referred_by, referral_code_rights, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                account_id,
                email,
                non_blank(form.full_name.as_deref()),
                referral.owner_id,
                config.default_referral_rights,
                now
            ],
        )?;

        consume_code(&tx, &code, account_id, now)?;
        tx.commit()?;

        info!(account_id, email = %email, code = %code, "Account registered");
        Ok(account_id)
    }

    // --- Sessions ---

    pub fn sign_in(&self, config: &Config, email: &str, password: &str) -> Result<Session> {
        let email = email.trim().to_lowercase();
        let Some(account) = self.get_account_by_email(&email)? else {
            warn!(email = %email, "Sign in failed: unknown email");
            return Err(BoardError::InvalidCredentials.into());
        };
        if !verify_password(password, &account.password_hash)? {
            warn!(account_id = account.id, "Sign in failed: wrong password");
            return Err(BoardError::InvalidCredentials.into());
        }

        let now = Utc::now();
        let session = Session {
            token: random_token(),
            account_id: account.id,
            expires_at: now + Duration::hours(config.session_ttl_hours),
        };
        self.conn.execute(
            "INSERT INTO sessions (token, account_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
            params![session.token, session.account_id, now, session.expires_at],
        )?;

        info!(account_id = account.id, "Signed in");
        Ok(session)
    }

    pub fn sign_out(&self, token: &str) -> Result<()> {
        let removed = self
            .conn
            .execute("DELETE FROM sessions WHERE token = ?1", [token])?;
        debug!(removed, "Session removed");
        Ok(())
    }

    /// Resolve a session token to its account id.
    pub fn session_account(&self, token: &str) -> Result<i64> {
        let session: Option<(i64, chrono::DateTime<Utc>)> = self
            .conn
            .query_row(
                "SELECT account_id, expires_at FROM sessions WHERE token = ?1",
                [token],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match session {
            None => Err(BoardError::NotSignedIn.into()),
            Some((_, expires_at)) if expires_at <= Utc::now() => {
                self.sign_out(token)?;
                Err(BoardError::SessionExpired.into())
            }
            Some((account_id, _)) => Ok(account_id),
        }
    }

    pub fn get_account(&self, id: i64) -> Result<Option<Account>> {
        self.conn
            .query_row(
                "SELECT id, email, password_hash, created_at FROM accounts WHERE id = ?1",
                [id],
                row_to_account,
            )
            .optional()
            .context("Failed to load account")
    }

    pub fn get_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        self.conn
            .query_row(
                "SELECT id, email, password_hash, created_at FROM accounts WHERE email = ?1",
                [email],
                row_to_account,
            )
            .optional()
            .context("Failed to load account")
    }

    // --- Password reset ---

    /// Issue a reset token and drop the message into the outbox. Unknown
    /// addresses succeed without sending anything.
    pub fn request_password_reset(&self, config: &Config, email: &str) -> Result<Option<PathBuf>> {
        let email = email.trim().to_lowercase();
        let Some(account) = self.get_account_by_email(&email)? else {
            debug!(email = %email, "Password reset requested for unknown email");
            return Ok(None);
        };

        let token = random_token();
        let expires_at = Utc::now() + Duration::minutes(config.reset_ttl_minutes);
        self.conn.execute(
            "INSERT INTO password_resets (token, account_id, expires_at) VALUES (?1, ?2, ?3)",
            params![token, account.id, expires_at],
        )?;

        let body = format!(
            "Someone asked to reset the password for {email}.\n\n\
             Run:\n\n    xabzedin auth reset --token {token} --password <new> --confirm <new>\n\n\
             The token expires at {} UTC. Ignore this message if it wasn't you.\n",
            expires_at.format("%Y-%m-%d %H:%M"),
        );
        let path = write_outbox(&config.outbox_dir(), &email, "Reset your password", &body)?;

        info!(account_id = account.id, "Password reset issued");
        Ok(Some(path))
    }

    pub fn reset_password(
        &self,
        config: &Config,
        token: &str,
        password: &str,
        confirm: &str,
    ) -> Result<()> {
        if password != confirm {
            return Err(BoardError::PasswordMismatch.into());
        }
        validate_password(password)?;

        let tx = self.conn.unchecked_transaction()?;
        let now = Utc::now();
        let account_id: Option<i64> = tx
            .query_row(
                "SELECT account_id FROM password_resets
                 WHERE token = ?1 AND used_at IS NULL AND expires_at > ?2",
                params![token.trim(), now],
                |row| row.get(0),
            )
            .optional()?;
        let Some(account_id) = account_id else {
            return Err(BoardError::InvalidResetToken.into());
        };

        let hash = hash_password(password, config.bcrypt_cost)?;
        tx.execute(
            "UPDATE accounts SET password_hash = ?1 WHERE id = ?2",
            params![hash, account_id],
        )?;
        tx.execute(
            "UPDATE password_resets SET used_at = ?1 WHERE token = ?2",
            params![now, token.trim()],
        )?;
        tx.execute("DELETE FROM sessions WHERE account_id = ?1", [account_id])?;
        tx.commit()?;

        info!(account_id, "Password reset completed");
        Ok(())
    }

    pub fn change_password(
        &self,
        config: &Config,
        account_id: i64,
        current: &str,
        password: &str,
        confirm: &str,
    ) -> Result<()> {
        let account = self
            .get_account(account_id)?
            .ok_or(BoardError::not_found("Account", account_id))?;
        if !verify_password(current, &account.password_hash)? {
            return Err(BoardError::InvalidCredentials.into());
        }
        if password != confirm {
            return Err(BoardError::PasswordMismatch.into());
        }
        validate_password(password)?;

        let hash = hash_password(password, config.bcrypt_cost)?;
        self.conn.execute(
            "UPDATE accounts SET password_hash = ?1 WHERE id = ?2",
            params![hash, account_id],
        )?;
        info!(account_id, "Password changed");
        Ok(())
    }
}

fn row_to_account(row: &rusqlite::Row) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        created_at: row.get(3)?,
    })
}

/// Local stand-in for outgoing mail: one text file per message.
fn write_outbox(dir: &Path, to: &str, subject: &str, body: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
    let safe_to: String = to
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '@' { c } else { '_' })
        .collect();
    let path = dir.join(format!("{stamp}-{safe_to}.txt"));
    let message = format!("To: {to}\nSubject: {subject}\n\n{body}");
    fs::write(&path, message).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

// --- Session persistence between invocations ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub token: String,
    pub email: String,
}

pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn load(&self) -> Result<Option<StoredSession>> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(session) => Ok(Some(session)),
                Err(e) => {
                    warn!(error = %e, "Ignoring unreadable session file");
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    pub fn save(&self, session: &StoredSession) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(session)?)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
