use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tracing::{info, warn};

use crate::db::Database;
use crate::error::{is_unique_violation, BoardError};
use crate::jobs::JobStatus;
use crate::models::{
    non_blank, Application, ApplicationStatus, ReceivedApplication, Role, SeekerApplication,
};

const APPLICATION_COLUMNS: &str = "a.id, a.job_id, a.seeker_id, a.status, a.cover_letter, a.created_at";

fn row_to_application(row: &Row) -> rusqlite::Result<Application> {
    Ok(Application {
        id: row.get(0)?,
        job_id: row.get(1)?,
        seeker_id: row.get(2)?,
        status: row.get(3)?,
        cover_letter: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn row_to_received(row: &Row) -> rusqlite::Result<ReceivedApplication> {
    Ok(ReceivedApplication {
        application: row_to_application(row)?,
        job_title: row.get(6)?,
        seeker_name: row.get(7)?,
        seeker_email: row.get(8)?,
    })
}

impl Database {
    pub fn apply(&self, seeker_id: i64, job_id: i64, cover_letter: Option<&str>) -> Result<Application> {
        self.require_role(seeker_id, Role::Seeker)?;
        let job = self
            .get_job(job_id)?
            .ok_or(BoardError::not_found("Job", job_id))?;

        let now = Utc::now();
        if JobStatus::of(&job.job, now) != JobStatus::Active {
            warn!(seeker_id, job_id, "Application to closed job rejected");
            return Err(BoardError::JobClosed(job_id).into());
        }

        let cover_letter = non_blank(cover_letter);
        let inserted = self.conn.execute(
            "INSERT INTO applications (job_id, seeker_id, status, cover_letter, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![job_id, seeker_id, ApplicationStatus::Pending, cover_letter, now],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(BoardError::AlreadyApplied.into()),
            Err(e) => return Err(e.into()),
        }

        let id = self.conn.last_insert_rowid();
        info!(seeker_id, job_id, application_id = id, "Application submitted");
        Ok(Application {
            id,
            job_id,
            seeker_id,
            status: ApplicationStatus::Pending,
            cover_letter,
            created_at: now,
        })
    }

    pub fn has_applied(&self, seeker_id: i64, job_id: i64) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM applications WHERE job_id = ?1 AND seeker_id = ?2)",
            params![job_id, seeker_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn get_application(&self, id: i64) -> Result<Option<Application>> {
        self.conn
            .query_row(
                &format!("SELECT {APPLICATION_COLUMNS} FROM applications a WHERE a.id = ?1"),
                [id],
                row_to_application,
            )
            .optional()
            .context("Failed to load application")
    }

    pub fn withdraw_application(&self, seeker_id: i64, application_id: i64) -> Result<()> {
        let application = self
            .get_application(application_id)?
            .ok_or(BoardError::not_found("Application", application_id))?;
        if application.seeker_id != seeker_id {
            return Err(BoardError::Forbidden("application").into());
        }
        self.conn
            .execute("DELETE FROM applications WHERE id = ?1", [application_id])?;
        info!(seeker_id, application_id, "Application withdrawn");
        Ok(())
    }

    pub fn list_seeker_applications(&self, seeker_id: i64) -> Result<Vec<SeekerApplication>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {APPLICATION_COLUMNS}, j.title, c.name
             FROM applications a
             JOIN jobs j ON j.id = a.job_id
             JOIN companies c ON c.id = j.company_id
             WHERE a.seeker_id = ?1
             ORDER BY a.created_at DESC, a.id DESC"
        ))?;
        let rows = stmt.query_map([seeker_id], |row| {
            Ok(SeekerApplication {
                application: row_to_application(row)?,
                job_title: row.get(6)?,
                company_name: row.get(7)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list applications")
    }

    /// Everything sent to any listing of the employer's company.
    pub fn list_company_applications(&self, owner_id: i64) -> Result<Vec<ReceivedApplication>> {
        let company = self.require_company(owner_id)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {APPLICATION_COLUMNS}, j.title, p.full_name, p.email
             FROM applications a
             JOIN jobs j ON j.id = a.job_id
             JOIN profiles p ON p.id = a.seeker_id
             WHERE j.company_id = ?1
             ORDER BY a.created_at DESC, a.id DESC"
        ))?;
        let rows = stmt.query_map([company.id], row_to_received)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list received applications")
    }

    pub fn list_job_applications(&self, owner_id: i64, job_id: i64) -> Result<Vec<ReceivedApplication>> {
        self.require_owned_job(owner_id, job_id)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {APPLICATION_COLUMNS}, j.title, p.full_name, p.email
             FROM applications a
             JOIN jobs j ON j.id = a.job_id
             JOIN profiles p ON p.id = a.seeker_id
             WHERE a.job_id = ?1
             ORDER BY a.created_at DESC, a.id DESC"
        ))?;
        let rows = stmt.query_map([job_id], row_to_received)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list job applications")
    }

    pub fn set_application_status(
        &self,
        owner_id: i64,
        application_id: i64,
        status: ApplicationStatus,
    ) -> Result<()> {
        let application = self
            .get_application(application_id)?
            .ok_or(BoardError::not_found("Application", application_id))?;
        // Ownership flows through the job.
        self.require_owned_job(owner_id, application.job_id)?;

        self.conn.execute(
            "UPDATE applications SET status = ?1 WHERE id = ?2",
            params![status, application_id],
        )?;
        info!(owner_id, application_id, status = %status, "Application status changed");
        Ok(())
    }

    pub fn count_seeker_applications(&self, seeker_id: i64) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM applications WHERE seeker_id = ?1",
            [seeker_id],
            |row| row.get(0),
        )?)
    }

    pub fn count_company_applications(&self, company_id: i64) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM applications a JOIN jobs j ON j.id = a.job_id
             WHERE j.company_id = ?1",
            [company_id],
            |row| row.get(0),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing;
    use crate::jobs::tests::set_expiry;
    use chrono::Duration;

    fn err_of(result: Result<impl std::fmt::Debug>) -> BoardError {
        let err = result.unwrap_err();
        err.downcast::<BoardError>().unwrap()
    }

    #[test]
    fn test_apply_once() {
        let db = testing::db();
        let owner = testing::employer_with_company(&db, "boss@example.com", "Kafkas Ltd");
        let seeker = testing::seeker(&db, "s@example.com");
        let job = db.create_job(owner, &testing::job_input("Dev"), 30).unwrap();

        assert!(!db.has_applied(seeker, job.id).unwrap());
        let application = db.apply(seeker, job.id, Some("   ")).unwrap();
        assert_eq!(application.status, ApplicationStatus::Pending);
        assert!(application.cover_letter.is_none());
        assert!(db.has_applied(seeker, job.id).unwrap());

        assert_eq!(err_of(db.apply(seeker, job.id, None)), BoardError::AlreadyApplied);
        assert_eq!(db.count_seeker_applications(seeker).unwrap(), 1);
    }

    #[test]
    fn test_apply_requires_seeker_and_open_job() {
        let db = testing::db();
        let owner = testing::employer_with_company(&db, "boss@example.com", "Kafkas Ltd");
        let seeker = testing::seeker(&db, "s@example.com");
        let job = db.create_job(owner, &testing::job_input("Dev"), 30).unwrap();

        assert_eq!(
            err_of(db.apply(owner, job.id, None)),
            BoardError::WrongRole(Role::Seeker)
        );
        assert_eq!(err_of(db.apply(seeker, 404, None)), BoardError::not_found("Job", 404));

        set_expiry(&db, job.id, Utc::now() - Duration::minutes(1));
        assert_eq!(err_of(db.apply(seeker, job.id, None)), BoardError::JobClosed(job.id));

        db.republish_job(owner, job.id, 7).unwrap();
        db.archive_job(owner, job.id).unwrap();
        assert_eq!(err_of(db.apply(seeker, job.id, None)), BoardError::JobClosed(job.id));
    }

    #[test]
    fn test_withdraw_only_own_application() {
        let db = testing::db();
        let owner = testing::employer_with_company(&db, "boss@example.com", "Kafkas Ltd");
        let me = testing::seeker(&db, "me@example.com");
        let other = testing::seeker(&db, "other@example.com");
        let job = db.create_job(owner, &testing::job_input("Dev"), 30).unwrap();
        let application = db.apply(me, job.id, None).unwrap();

        assert_eq!(
            err_of(db.withdraw_application(other, application.id)),
            BoardError::Forbidden("application")
        );
        db.withdraw_application(me, application.id).unwrap();
        assert!(!db.has_applied(me, job.id).unwrap());
        // Withdrawing frees the slot for a fresh application.
        db.apply(me, job.id, Some("Second try")).unwrap();
    }

    #[test]
    fn test_employer_views_and_status_changes() {
        let db = testing::db();
        let owner = testing::employer_with_company(&db, "boss@example.com", "Kafkas Ltd");
        let rival = testing::employer_with_company(&db, "rival@example.com", "Rival AS");
        let a = testing::seeker(&db, "a@example.com");
        let b = testing::seeker(&db, "b@example.com");

        let dev = db.create_job(owner, &testing::job_input("Dev"), 30).unwrap();
        let ops = db.create_job(owner, &testing::job_input("Ops"), 30).unwrap();
        let elsewhere = db.create_job(rival, &testing::job_input("Elsewhere"), 30).unwrap();

        let first = db.apply(a, dev.id, Some("Hire me")).unwrap();
        db.apply(b, ops.id, None).unwrap();
        db.apply(a, elsewhere.id, None).unwrap();

        let received = db.list_company_applications(owner).unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].job_title, "Ops");
        assert_eq!(received[0].seeker_email, "b@example.com");
        assert_eq!(received[1].seeker_name.as_deref(), Some("User a@example.com"));
        let company = db.company_for_owner(owner).unwrap().unwrap();
        assert_eq!(db.count_company_applications(company.id).unwrap(), 2);

        let for_dev = db.list_job_applications(owner, dev.id).unwrap();
        assert_eq!(for_dev.len(), 1);
        assert_eq!(for_dev[0].application.cover_letter.as_deref(), Some("Hire me"));
        assert_eq!(
            err_of(db.list_job_applications(rival, dev.id)),
            BoardError::Forbidden("job")
        );

        db.set_application_status(owner, first.id, ApplicationStatus::Accepted).unwrap();
        assert_eq!(
            err_of(db.set_application_status(rival, first.id, ApplicationStatus::Rejected)),
            BoardError::Forbidden("job")
        );
        let mine = db.list_seeker_applications(a).unwrap();
        let dev_app = mine.iter().find(|s| s.application.id == first.id).unwrap();
        assert_eq!(dev_app.application.status, ApplicationStatus::Accepted);
        assert_eq!(dev_app.company_name, "Kafkas Ltd");
        assert_eq!(mine[0].job_title, "Elsewhere");
    }
}
