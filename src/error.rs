use thiserror::Error;

use crate::models::Role;

/// Failures caused by the user rather than the machine. These are shown
/// verbatim; anything else is reported as a generic failure.
#[derive(Error, Debug, PartialEq)]
pub enum BoardError {
    #[error("Invalid referral code: it does not exist or has already been used")]
    InvalidReferralCode,

    #[error("An account with email {0} already exists")]
    EmailTaken(String),

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Please sign in first (xabzedin auth login)")]
    NotSignedIn,

    #[error("Your session has expired, please sign in again")]
    SessionExpired,

    #[error("This action requires the {0} role")]
    WrongRole(Role),

    #[error("Choose a role first (xabzedin role seeker|employer)")]
    NoRole,

    #[error("Role already chosen: {0}")]
    RoleAlreadyChosen(Role),

    #[error("{kind} #{id} not found")]
    NotFound { kind: &'static str, id: i64 },

    #[error("You do not own this {0}")]
    Forbidden(&'static str),

    #[error("Create your company page first (xabzedin company create)")]
    NoCompany,

    #[error("You already have a company page")]
    CompanyExists,

    #[error("You have already applied to this job")]
    AlreadyApplied,

    #[error("Job #{0} is not accepting applications")]
    JobClosed(i64),

    #[error("You have no referral code rights left")]
    NoReferralRights,

    #[error("You still have an unused referral code: {0}")]
    ActiveCodeExists(String),

    #[error("Operator command: set XABZEDIN_OPERATOR=1 to run it")]
    OperatorOnly,

    #[error("Weak password: {0}")]
    WeakPassword(String),

    #[error("Passwords do not match")]
    PasswordMismatch,

    #[error("Password reset link is invalid or has expired")]
    InvalidResetToken,

    #[error("Invalid file type: {0}")]
    InvalidImage(String),

    #[error("File too large: {size} bytes (max {max})")]
    ImageTooLarge { size: usize, max: usize },

    #[error("{0}")]
    Validation(String),
}

impl BoardError {
    pub fn not_found(kind: &'static str, id: i64) -> Self {
        BoardError::NotFound { kind, id }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        BoardError::Validation(message.into())
    }
}

/// True when a rusqlite error is a UNIQUE constraint violation.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
