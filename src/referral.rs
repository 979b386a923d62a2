//! Referral-code lifecycle: operator-issued bootstrap codes, self-service
//! generation against per-account rights, and single-use consumption at
//! registration time.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use crate::db::Database;
use crate::error::{is_unique_violation, BoardError};
use crate::models::ReferralCode;

pub const CODE_LENGTH: usize = 8;

/// No 0/O or 1/I, codes get read aloud and retyped.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const MAX_GENERATE_ATTEMPTS: usize = 8;

const CODE_COLUMNS: &str = "id, code, owner_id, is_used, used_by_id, used_at, created_at";

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

pub fn random_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Validation step: the code exists and has not been used.
pub(crate) fn find_unused_code(conn: &Connection, code: &str) -> Result<Option<ReferralCode>> {
    conn.query_row(
        &format!("SELECT {CODE_COLUMNS} FROM referral_codes WHERE code = ?1 AND is_used = 0"),
        [code],
        row_to_code,
    )
    .optional()
    .context("Failed to look up referral code")
}

/// Consumption step. The conditional update is the single-use guarantee:
/// whoever flips `is_used` first wins, everyone else sees zero rows.
pub(crate) fn consume_code(
    conn: &Connection,
    code: &str,
    account_id: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE referral_codes SET is_used = 1, used_by_id = ?1, used_at = ?2
         WHERE code = ?3 AND is_used = 0",
        params![account_id, now, code],
    )?;
    if changed != 1 {
        return Err(BoardError::InvalidReferralCode.into());
    }
    Ok(())
}

/// Insert a fresh random code, retrying on the rare collision.
fn insert_new_code(conn: &Connection, owner_id: Option<i64>) -> Result<String> {
    for _ in 0..MAX_GENERATE_ATTEMPTS {
        let code = random_code();
        let result = conn.execute(
            "INSERT INTO referral_codes (code, owner_id, created_at) VALUES (?1, ?2, ?3)",
            params![code, owner_id, Utc::now()],
        );
        match result {
            Ok(_) => return Ok(code),
            Err(e) if is_unique_violation(&e) => {
                warn!(code = %code, "Referral code collision, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(anyhow!(
        "Could not generate a unique referral code after {MAX_GENERATE_ATTEMPTS} attempts"
    ))
}

fn row_to_code(row: &rusqlite::Row) -> rusqlite::Result<ReferralCode> {
    Ok(ReferralCode {
        id: row.get(0)?,
        code: row.get(1)?,
        owner_id: row.get(2)?,
        is_used: row.get(3)?,
        used_by_id: row.get(4)?,
        used_at: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Someone who registered with one of my codes.
#[derive(Debug, Clone)]
pub struct Referee {
    pub code: String,
    pub name: Option<String>,
    pub email: String,
    pub used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ReferralOverview {
    pub rights_left: i64,
    pub referred_by: Option<String>,
    pub active_code: Option<String>,
    pub referees: Vec<Referee>,
}

impl ReferralOverview {
    pub fn can_generate(&self) -> bool {
        self.rights_left > 0 && self.active_code.is_none()
    }
}

impl Database {
    pub fn get_referral_code(&self, code: &str) -> Result<Option<ReferralCode>> {
        self.conn
            .query_row(
                &format!("SELECT {CODE_COLUMNS} FROM referral_codes WHERE code = ?1"),
                [normalize_code(code)],
                row_to_code,
            )
            .optional()
            .context("Failed to load referral code")
    }

    /// Public check used before asking for the rest of the sign-up form.
    pub fn validate_referral_code(&self, code: &str) -> Result<bool> {
        Ok(find_unused_code(&self.conn, &normalize_code(code))?.is_some())
    }

    /// Self-service generation: spends one right, one live code at a time.
    pub fn generate_my_code(&self, account_id: i64) -> Result<String> {
        let tx = self.conn.unchecked_transaction()?;

        let rights: Option<i64> = tx
            .query_row(
                "SELECT referral_code_rights FROM profiles WHERE id = ?1",
                [account_id],
                |row| row.get(0),
            )
            .optional()?;
        let rights = rights.ok_or(BoardError::not_found("Profile", account_id))?;

        let active: Option<String> = tx
            .query_row(
                "SELECT code FROM referral_codes WHERE owner_id = ?1 AND is_used = 0
                 ORDER BY created_at DESC LIMIT 1",
                [account_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(code) = active {
            return Err(BoardError::ActiveCodeExists(code).into());
        }
        if rights <= 0 {
            return Err(BoardError::NoReferralRights.into());
        }

        tx.execute(
            "UPDATE profiles SET referral_code_rights = referral_code_rights - 1 WHERE id = ?1",
            [account_id],
        )?;
        let code = insert_new_code(&tx, Some(account_id))?;
        tx.commit()?;

        info!(account_id, code = %code, rights_left = rights - 1, "Referral code generated");
        Ok(code)
    }

    /// Operator-issued codes with no owner, used to bootstrap the community.
    pub fn issue_codes(&self, count: usize) -> Result<Vec<String>> {
        let tx = self.conn.unchecked_transaction()?;
        let codes = (0..count)
            .map(|_| insert_new_code(&tx, None))
            .collect::<Result<Vec<_>>>()?;
        tx.commit()?;
        info!(count, "Bootstrap referral codes issued");
        Ok(codes)
    }

    pub fn grant_referral_rights(&self, email: &str, count: i64) -> Result<i64> {
        if count <= 0 {
            return Err(BoardError::validation("Rights to grant must be positive").into());
        }
        let email = email.trim().to_lowercase();
        let rights: Option<i64> = self
            .conn
            .query_row(
                "UPDATE profiles SET referral_code_rights = referral_code_rights + ?1
                 WHERE email = ?2 RETURNING referral_code_rights",
                params![count, email],
                |row| row.get(0),
            )
            .optional()?;
        let rights = rights.ok_or_else(|| BoardError::validation(format!("No account for {email}")))?;
        info!(email = %email, count, rights, "Referral rights granted");
        Ok(rights)
    }

    pub fn list_my_codes(&self, account_id: i64) -> Result<Vec<ReferralCode>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CODE_COLUMNS} FROM referral_codes WHERE owner_id = ?1 ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map([account_id], row_to_code)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list referral codes")
    }

    pub fn referral_overview(&self, account_id: i64) -> Result<ReferralOverview> {
        let profile = self
            .get_profile(account_id)?
            .ok_or(BoardError::not_found("Profile", account_id))?;

        let referred_by = match profile.referred_by {
            Some(id) => self.get_profile(id)?.map(|p| p.display_name().to_string()),
            None => None,
        };

        let active_code = self
            .list_my_codes(account_id)?
            .into_iter()
            .find(|c| !c.is_used)
            .map(|c| c.code);

        let mut stmt = self.conn.prepare(
            "SELECT r.code, p.full_name, p.email, r.used_at
             FROM referral_codes r
             JOIN profiles p ON p.id = r.used_by_id
             WHERE r.owner_id = ?1 AND r.is_used = 1
             ORDER BY r.used_at DESC",
        )?;
        let referees = stmt
            .query_map([account_id], |row| {
                Ok(Referee {
                    code: row.get(0)?,
                    name: row.get(1)?,
                    email: row.get(2)?,
                    used_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ReferralOverview {
            rights_left: profile.referral_code_rights,
            referred_by,
            active_code,
            referees,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SignUp;
    use crate::db::testing;

    #[test]
    fn test_random_code_shape() {
        for _ in 0..50 {
            let code = random_code();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("  ab3k9xyz "), "AB3K9XYZ");
    }

    #[test]
    fn test_validate_code() {
        let db = testing::db();
        let code = db.issue_codes(1).unwrap().remove(0);
        assert!(db.validate_referral_code(&code.to_lowercase()).unwrap());
        assert!(!db.validate_referral_code("ZZZZZZZZ").unwrap());
    }

    #[test]
    fn test_consume_is_single_use() {
        let db = testing::db();
        let a = testing::account(&db, "a@example.com");
        let code = db.issue_codes(1).unwrap().remove(0);

        consume_code(&db.conn, &code, a, Utc::now()).unwrap();
        let err = consume_code(&db.conn, &code, a, Utc::now()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<BoardError>(),
            Some(&BoardError::InvalidReferralCode)
        );
    }

    #[test]
    fn test_generate_spends_rights_and_blocks_second_live_code() {
        let db = testing::db();
        let id = testing::account(&db, "a@example.com");
        db.grant_referral_rights("a@example.com", 1).unwrap();

        let first = db.generate_my_code(id).unwrap();
        assert_eq!(db.get_profile(id).unwrap().unwrap().referral_code_rights, 1);

        let err = db.generate_my_code(id).unwrap_err();
        assert_eq!(
            err.downcast_ref::<BoardError>(),
            Some(&BoardError::ActiveCodeExists(first.clone()))
        );
        assert_eq!(db.get_profile(id).unwrap().unwrap().referral_code_rights, 1);

        db.sign_up(
            &testing::config(),
            &SignUp {
                email: "friend@example.com".to_string(),
                password: "friendly".to_string(),
                full_name: None,
                referral_code: first,
            },
        )
        .unwrap();

        db.generate_my_code(id).unwrap();
        assert_eq!(db.get_profile(id).unwrap().unwrap().referral_code_rights, 0);
    }

    #[test]
    fn test_generate_without_rights() {
        let db = testing::db();
        let id = testing::account(&db, "a@example.com");
        db.conn
            .execute("UPDATE profiles SET referral_code_rights = 0 WHERE id = ?1", [id])
            .unwrap();

        let err = db.generate_my_code(id).unwrap_err();
        assert_eq!(
            err.downcast_ref::<BoardError>(),
            Some(&BoardError::NoReferralRights)
        );
        assert!(db.list_my_codes(id).unwrap().is_empty());
    }

    #[test]
    fn test_grant_rights_unknown_email() {
        let db = testing::db();
        assert!(db.grant_referral_rights("ghost@example.com", 2).is_err());
        assert!(db.grant_referral_rights("ghost@example.com", 0).is_err());
    }

    #[test]
    fn test_overview() {
        let db = testing::db();
        let owner = testing::account(&db, "owner@example.com");
        let code = db.generate_my_code(owner).unwrap();
        let friend = db
            .sign_up(
                &testing::config(),
                &SignUp {
                    email: "friend@example.com".to_string(),
                    password: "friendly".to_string(),
                    full_name: Some("Deniz".to_string()),
                    referral_code: code.clone(),
                },
            )
            .unwrap();

        let overview = db.referral_overview(owner).unwrap();
        assert_eq!(overview.rights_left, 0);
        assert!(overview.active_code.is_none());
        assert!(!overview.can_generate());
        assert_eq!(overview.referees.len(), 1);
        assert_eq!(overview.referees[0].code, code);
        assert_eq!(overview.referees[0].name.as_deref(), Some("Deniz"));

        let theirs = db.referral_overview(friend).unwrap();
        assert_eq!(theirs.referred_by.as_deref(), Some("User owner@example.com"));
        assert!(theirs.can_generate());
    }
}
