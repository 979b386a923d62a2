use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, OptionalExtension};
use std::fmt;
use tracing::{debug, info};

use crate::db::rows::{self, COMPANY_COLUMNS, JOB_COLUMNS, JOB_COLUMN_COUNT};
use crate::db::{fold_case, Database};
use crate::error::BoardError;
use crate::models::{non_blank, Job, JobInput, JobType, JobWithCompany};

pub const DEFAULT_DURATION_DAYS: i64 = 30;
pub const MAX_DURATION_DAYS: i64 = 365;

/// Durations offered when posting or republishing.
pub const DURATION_CHOICES: [i64; 5] = [7, 14, 30, 60, 90];

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub query: Option<String>,
    pub job_type: Option<JobType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Active,
    Inactive,
    Expired,
    Archived,
}

impl JobStatus {
    /// Archived wins over expired, expired over inactive.
    pub fn of(job: &Job, now: DateTime<Utc>) -> Self {
        if job.is_archived {
            JobStatus::Archived
        } else if job.expires_at.is_some_and(|at| at < now) {
            JobStatus::Expired
        } else if !job.is_active {
            JobStatus::Inactive
        } else {
            JobStatus::Active
        }
    }

    /// Expired and archived listings are the ones worth republishing.
    pub fn can_republish(&self) -> bool {
        matches!(self, JobStatus::Expired | JobStatus::Archived)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::Active => "active",
            JobStatus::Inactive => "inactive",
            JobStatus::Expired => "expired",
            JobStatus::Archived => "archived",
        })
    }
}

pub fn validate_duration(days: i64) -> Result<i64, BoardError> {
    if (1..=MAX_DURATION_DAYS).contains(&days) {
        Ok(days)
    } else {
        Err(BoardError::validation(format!(
            "Listing duration must be between 1 and {MAX_DURATION_DAYS} days"
        )))
    }
}

fn validate_input(input: &JobInput) -> Result<(), BoardError> {
    if input.title.trim().is_empty() || input.description.trim().is_empty() {
        return Err(BoardError::validation("Title and description are required"));
    }
    if let Some(email) = non_blank(input.contact_email.as_deref()) {
        crate::auth::normalize_email(&email)?;
    }
    Ok(())
}

impl Database {
    pub fn create_job(&self, owner_id: i64, input: &JobInput, duration_days: i64) -> Result<Job> {
        let company = self.require_company(owner_id)?;
        validate_input(input)?;
        let days = validate_duration(duration_days)?;

        let now = Utc::now();
        let expires_at = now + Duration::days(days);
        self.conn.execute(
            "INSERT INTO jobs (company_id, title, description, type, location, salary_range,
                contact_name, contact_phone, contact_email, expires_at, is_active, is_archived,
                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, 0, ?11, ?11)",
            params![
                company.id,
                input.title.trim(),
                input.description.trim(),
                input.job_type,
                non_blank(input.location.as_deref()),
                non_blank(input.salary_range.as_deref()),
                non_blank(input.contact_name.as_deref()),
                non_blank(input.contact_phone.as_deref()),
                non_blank(input.contact_email.as_deref()),
                expires_at,
                now
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        info!(owner_id, job_id = id, days, "Job posted");
        self.load_job(id)
    }

    /// Edits the listing content only; the expiry is managed by republish.
    pub fn update_job(&self, owner_id: i64, job_id: i64, input: &JobInput) -> Result<Job> {
        self.require_owned_job(owner_id, job_id)?;
        validate_input(input)?;

        self.conn.execute(
            "UPDATE jobs SET title = ?1, description = ?2, type = ?3, location = ?4,
                salary_range = ?5, contact_name = ?6, contact_phone = ?7, contact_email = ?8,
                updated_at = ?9
             WHERE id = ?10",
            params![
                input.title.trim(),
                input.description.trim(),
                input.job_type,
                non_blank(input.location.as_deref()),
                non_blank(input.salary_range.as_deref()),
                non_blank(input.contact_name.as_deref()),
                non_blank(input.contact_phone.as_deref()),
                non_blank(input.contact_email.as_deref()),
                Utc::now(),
                job_id
            ],
        )?;
        info!(owner_id, job_id, "Job updated");
        self.load_job(job_id)
    }

    /// Removes the listing together with every application to it.
    pub fn delete_job(&self, owner_id: i64, job_id: i64) -> Result<usize> {
        self.require_owned_job(owner_id, job_id)?;

        let tx = self.conn.unchecked_transaction()?;
        let applications = tx.execute("DELETE FROM applications WHERE job_id = ?1", [job_id])?;
        tx.execute("DELETE FROM jobs WHERE id = ?1", [job_id])?;
        tx.commit()?;

        info!(owner_id, job_id, applications, "Job deleted");
        Ok(applications)
    }

    pub fn republish_job(&self, owner_id: i64, job_id: i64, duration_days: i64) -> Result<Job> {
        self.require_owned_job(owner_id, job_id)?;
        let days = validate_duration(duration_days)?;

        let now = Utc::now();
        self.conn.execute(
            "UPDATE jobs SET is_active = 1, is_archived = 0, expires_at = ?1, updated_at = ?2
             WHERE id = ?3",
            params![now + Duration::days(days), now, job_id],
        )?;
        info!(owner_id, job_id, days, "Job republished");
        self.load_job(job_id)
    }

    pub fn archive_job(&self, owner_id: i64, job_id: i64) -> Result<Job> {
        self.require_owned_job(owner_id, job_id)?;
        self.conn.execute(
            "UPDATE jobs SET is_active = 0, is_archived = 1, updated_at = ?1 WHERE id = ?2",
            params![Utc::now(), job_id],
        )?;
        info!(owner_id, job_id, "Job archived");
        self.load_job(job_id)
    }

    /// Listings a visitor can see and apply to, newest first.
    pub fn list_open_jobs(&self, filter: &JobFilter, now: DateTime<Utc>) -> Result<Vec<JobWithCompany>> {
        let mut sql = format!(
            "SELECT {JOB_COLUMNS}, {COMPANY_COLUMNS}
             FROM jobs j
             JOIN companies c ON c.id = j.company_id
             WHERE j.is_active = 1 AND j.is_archived = 0
               AND (j.expires_at IS NULL OR j.expires_at > ?1)"
        );
        let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(now)];

        if let Some(query) = filter.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            params.push(Box::new(format!("%{}%", escape_like(&fold_case(query)))));
            let n = params.len();
            sql.push_str(&format!(
                " AND (fold_case(j.title) LIKE ?{n} ESCAPE '\\' OR fold_case(j.description) LIKE ?{n} ESCAPE '\\')"
            ));
        }

        if let Some(job_type) = filter.job_type {
            params.push(Box::new(job_type));
            sql.push_str(&format!(" AND j.type = ?{}", params.len()));
        }

        sql.push_str(" ORDER BY j.created_at DESC, j.id DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
            row_to_job_with_company,
        )?;
        let jobs = rows
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list jobs")?;
        debug!(count = jobs.len(), "Open jobs listed");
        Ok(jobs)
    }

    pub fn get_job(&self, id: i64) -> Result<Option<JobWithCompany>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS}, {COMPANY_COLUMNS}
                     FROM jobs j JOIN companies c ON c.id = j.company_id
                     WHERE j.id = ?1"
                ),
                [id],
                row_to_job_with_company,
            )
            .optional()
            .context("Failed to load job")
    }

    /// Every listing of the employer's company regardless of status.
    pub fn list_company_jobs(&self, owner_id: i64) -> Result<Vec<Job>> {
        let company = self.require_company(owner_id)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs j WHERE j.company_id = ?1
             ORDER BY j.created_at DESC, j.id DESC"
        ))?;
        let rows = stmt.query_map([company.id], |row| rows::job(row, 0))?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list company jobs")
    }

    fn load_job(&self, id: i64) -> Result<Job> {
        self.get_job(id)?
            .map(|j| j.job)
            .ok_or_else(|| BoardError::not_found("Job", id).into())
    }

    /// The job, provided it belongs to the employer's company.
    pub(crate) fn require_owned_job(&self, owner_id: i64, job_id: i64) -> Result<JobWithCompany> {
        let company = self.require_company(owner_id)?;
        let job = self
            .get_job(job_id)?
            .ok_or(BoardError::not_found("Job", job_id))?;
        if job.job.company_id != company.id {
            return Err(BoardError::Forbidden("job").into());
        }
        Ok(job)
    }
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn row_to_job_with_company(row: &rusqlite::Row) -> rusqlite::Result<JobWithCompany> {
    Ok(JobWithCompany {
        job: rows::job(row, 0)?,
        company: rows::company(row, JOB_COLUMN_COUNT)?,
    })
}
