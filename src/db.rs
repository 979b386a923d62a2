use anyhow::{anyhow, Context, Result};
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::BoardError;
use crate::models::{Profile, Role};

/// How long a writer waits for another process to release the file lock.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Database {
    pub(crate) conn: Connection,
    path: PathBuf,
}

/// Case folding for search. Beyond Unicode lowercasing, dotted and dotless
/// i compare equal, so "ÇAĞRI", "çağrı" and "çağri" all fold alike.
pub fn fold_case(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| *c != '\u{307}')
        .map(|c| if c == 'ı' { 'i' } else { c })
        .collect()
}

/// Per-connection setup. SQLite's built-in `LOWER()` only folds ASCII, so
/// text search goes through `fold_case` instead.
fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.create_scalar_function(
        "fold_case",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            Ok(ctx
                .get::<Option<String>>(0)?
                .map(|text| fold_case(&text)))
        },
    )?;
    Ok(())
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        configure(&conn)?;
        debug!(path = %path.display(), "Database opened");
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        configure(&conn)?;
        let db = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS password_resets (
                token TEXT PRIMARY KEY,
                account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                expires_at TEXT NOT NULL,
                used_at TEXT
            );

            CREATE TABLE IF NOT EXISTS profiles (
                id INTEGER PRIMARY KEY REFERENCES accounts(id) ON DELETE CASCADE,
                email TEXT NOT NULL,
                full_name TEXT,
                role TEXT CHECK (role IN ('seeker', 'employer')),
                avatar_url TEXT,
                bio TEXT,
                linkedin_url TEXT,
                phone TEXT,
                community_reference TEXT,
                skills TEXT NOT NULL DEFAULT '[]',
                experience_summary TEXT,
                education_summary TEXT,
                referred_by INTEGER REFERENCES profiles(id),
                referral_code_rights INTEGER NOT NULL DEFAULT 0 CHECK (referral_code_rights >= 0),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS companies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL UNIQUE REFERENCES profiles(id),
                name TEXT NOT NULL,
                logo_url TEXT,
                sector TEXT,
                location TEXT,
                website TEXT,
                description TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_id INTEGER NOT NULL REFERENCES companies(id),
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                type TEXT NOT NULL DEFAULT 'onsite' CHECK (type IN ('remote', 'onsite', 'hybrid')),
                location TEXT,
                salary_range TEXT,
                contact_name TEXT,
                contact_phone TEXT,
                contact_email TEXT,
                expires_at TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                is_archived INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS applications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL REFERENCES jobs(id),
                seeker_id INTEGER NOT NULL REFERENCES profiles(id),
                status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'reviewed', 'accepted', 'rejected')),
                cover_letter TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (job_id, seeker_id)
            );

            CREATE TABLE IF NOT EXISTS experiences (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                profile_id INTEGER NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
                company_name TEXT NOT NULL,
                position TEXT NOT NULL,
                start_date TEXT,
                end_date TEXT,
                is_current INTEGER NOT NULL DEFAULT 0,
                description TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS education (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                profile_id INTEGER NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
                school_name TEXT NOT NULL,
                degree TEXT,
                field_of_study TEXT,
                start_date TEXT,
                end_date TEXT,
                description TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS referral_codes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                code TEXT NOT NULL UNIQUE,
                owner_id INTEGER REFERENCES profiles(id),
                is_used INTEGER NOT NULL DEFAULT 0,
                used_by_id INTEGER REFERENCES profiles(id),
                used_at TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_account ON sessions(account_id);
            CREATE INDEX IF NOT EXISTS idx_jobs_company ON jobs(company_id);
            CREATE INDEX IF NOT EXISTS idx_jobs_open ON jobs(is_active, is_archived, expires_at);
            CREATE INDEX IF NOT EXISTS idx_applications_seeker ON applications(seeker_id);
            CREATE INDEX IF NOT EXISTS idx_experiences_profile ON experiences(profile_id);
            CREATE INDEX IF NOT EXISTS idx_education_profile ON education(profile_id);
            CREATE INDEX IF NOT EXISTS idx_referral_owner ON referral_codes(owner_id);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='referral_codes'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!(
                "Database not initialized. Run 'xabzedin init' first."
            ));
        }
        Ok(())
    }

    // --- Actor checks shared by every module ---

    /// Load the acting profile and require that it has picked `role`.
    pub fn require_role(&self, account_id: i64, role: Role) -> Result<Profile> {
        let profile = self
            .get_profile(account_id)?
            .ok_or(BoardError::not_found("Profile", account_id))?;
        match profile.role {
            Some(r) if r == role => Ok(profile),
            Some(_) => Err(BoardError::WrongRole(role).into()),
            None => Err(BoardError::NoRole.into()),
        }
    }
}

/// Column lists and row mappers for the joined queries.
pub(crate) mod rows {
    use super::*;
    use crate::models::{Company, Job};

    pub const COMPANY_COLUMNS: &str =
        "c.id, c.owner_id, c.name, c.logo_url, c.sector, c.location, c.website, c.description, c.created_at";

    pub const JOB_COLUMNS: &str =
        "j.id, j.company_id, j.title, j.description, j.type, j.location, j.salary_range,
         j.contact_name, j.contact_phone, j.contact_email, j.expires_at, j.is_active,
         j.is_archived, j.created_at, j.updated_at";

    pub const JOB_COLUMN_COUNT: usize = 15;

    pub fn company(row: &Row, offset: usize) -> rusqlite::Result<Company> {
        Ok(Company {
            id: row.get(offset)?,
            owner_id: row.get(offset + 1)?,
            name: row.get(offset + 2)?,
            logo_url: row.get(offset + 3)?,
            sector: row.get(offset + 4)?,
            location: row.get(offset + 5)?,
            website: row.get(offset + 6)?,
            description: row.get(offset + 7)?,
            created_at: row.get(offset + 8)?,
        })
    }

    pub fn job(row: &Row, offset: usize) -> rusqlite::Result<Job> {
        Ok(Job {
            id: row.get(offset)?,
            company_id: row.get(offset + 1)?,
            title: row.get(offset + 2)?,
            description: row.get(offset + 3)?,
            job_type: row.get(offset + 4)?,
            location: row.get(offset + 5)?,
            salary_range: row.get(offset + 6)?,
            contact_name: row.get(offset + 7)?,
            contact_phone: row.get(offset + 8)?,
            contact_email: row.get(offset + 9)?,
            expires_at: row.get(offset + 10)?,
            is_active: row.get(offset + 11)?,
            is_archived: row.get(offset + 12)?,
            created_at: row.get(offset + 13)?,
            updated_at: row.get(offset + 14)?,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_case_treats_turkish_i_alike() {
        assert_eq!(fold_case("ÇAĞRI MERKEZİ"), "çağri merkezi");
        assert_eq!(fold_case("çağrı"), fold_case("ÇAĞRI"));
        assert_eq!(fold_case("Istanbul"), fold_case("İSTANBUL"));
    }

    #[test]
    fn test_fold_case_is_available_in_sql() {
        let db = testing::db();
        let folded: String = db
            .conn
            .query_row("SELECT fold_case('ÖĞRETMENİ')", [], |row| row.get(0))
            .unwrap();
        assert_eq!(folded, "öğretmeni");
        let null: Option<String> = db
            .conn
            .query_row("SELECT fold_case(NULL)", [], |row| row.get(0))
            .unwrap();
        assert!(null.is_none());
    }

    #[test]
    fn test_open_sets_busy_timeout() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = Database::open(&dir.path().join("board.db")).unwrap();
        let millis: i64 = db
            .conn
            .query_row("PRAGMA busy_timeout", [], |row| row.get(0))
            .unwrap();
        assert_eq!(millis, BUSY_TIMEOUT.as_millis() as i64);
    }

    #[test]
    fn test_init_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        db.ensure_initialized().unwrap();
    }

    #[test]
    fn test_ensure_initialized_fails_on_empty_db() {
        let conn = Connection::open_in_memory().unwrap();
        let db = Database {
            conn,
            path: PathBuf::from(":memory:"),
        };
        let err = db.ensure_initialized().unwrap_err().to_string();
        assert!(err.contains("xabzedin init"));
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("board.db");
        let db = Database::open(&path).unwrap();
        db.init().unwrap();
        assert!(path.exists());
        assert_eq!(db.path(), path.as_path());
    }

    #[test]
    fn test_require_role() {
        let db = testing::db();
        let id = testing::account(&db, "a@example.com");

        let err = db.require_role(id, Role::Seeker).unwrap_err();
        assert_eq!(err.downcast_ref::<BoardError>(), Some(&BoardError::NoRole));

        db.set_role(id, Role::Employer).unwrap();
        let err = db.require_role(id, Role::Seeker).unwrap_err();
        assert_eq!(
            err.downcast_ref::<BoardError>(),
            Some(&BoardError::WrongRole(Role::Seeker))
        );
        assert!(db.require_role(id, Role::Employer).is_ok());
    }
}
