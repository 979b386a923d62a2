use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::db::Database;
use crate::jobs::JobStatus;
use crate::models::{Company, Role};

#[derive(Debug, Clone, PartialEq)]
pub struct SeekerSummary {
    pub applications: i64,
    pub experiences: usize,
    pub education: usize,
}

impl SeekerSummary {
    pub fn cv_started(&self) -> bool {
        self.experiences > 0 || self.education > 0
    }
}

#[derive(Debug, Clone)]
pub struct EmployerSummary {
    pub company: Option<Company>,
    pub jobs: usize,
    pub open_jobs: usize,
    pub applications: i64,
}

impl Database {
    pub fn seeker_summary(&self, seeker_id: i64) -> Result<SeekerSummary> {
        self.require_role(seeker_id, Role::Seeker)?;
        Ok(SeekerSummary {
            applications: self.count_seeker_applications(seeker_id)?,
            experiences: self.list_experiences(seeker_id)?.len(),
            education: self.list_education(seeker_id)?.len(),
        })
    }

    /// An employer without a company page gets an empty summary.
    pub fn employer_summary(&self, owner_id: i64, now: DateTime<Utc>) -> Result<EmployerSummary> {
        self.require_role(owner_id, Role::Employer)?;
        let Some(company) = self.company_for_owner(owner_id)? else {
            return Ok(EmployerSummary {
                company: None,
                jobs: 0,
                open_jobs: 0,
                applications: 0,
            });
        };

        let jobs = self.list_company_jobs(owner_id)?;
        let open_jobs = jobs
            .iter()
            .filter(|j| JobStatus::of(j, now) == JobStatus::Active)
            .count();
        Ok(EmployerSummary {
            applications: self.count_company_applications(company.id)?,
            jobs: jobs.len(),
            open_jobs,
            company: Some(company),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing;
    use crate::models::ExperienceInput;

    #[test]
    fn test_seeker_summary() {
        let db = testing::db();
        let owner = testing::employer_with_company(&db, "boss@example.com", "Kafkas Ltd");
        let seeker = testing::seeker(&db, "s@example.com");

        let empty = db.seeker_summary(seeker).unwrap();
        assert_eq!(empty.applications, 0);
        assert!(!empty.cv_started());

        let job = db.create_job(owner, &testing::job_input("Dev"), 30).unwrap();
        db.apply(seeker, job.id, None).unwrap();
        db.add_experience(seeker, &ExperienceInput {
            company_name: "Acme".to_string(),
            position: "Dev".to_string(),
            ..Default::default()
        })
        .unwrap();

        let summary = db.seeker_summary(seeker).unwrap();
        assert_eq!(summary.applications, 1);
        assert_eq!(summary.experiences, 1);
        assert!(summary.cv_started());
    }

    #[test]
    fn test_employer_summary() {
        let db = testing::db();
        let id = testing::account(&db, "new-boss@example.com");
        db.set_role(id, Role::Employer).unwrap();
        let blank = db.employer_summary(id, Utc::now()).unwrap();
        assert!(blank.company.is_none());
        assert_eq!(blank.jobs, 0);

        let owner = testing::employer_with_company(&db, "boss@example.com", "Kafkas Ltd");
        let seeker = testing::seeker(&db, "s@example.com");
        let open = db.create_job(owner, &testing::job_input("Dev"), 30).unwrap();
        let closed = db.create_job(owner, &testing::job_input("Ops"), 30).unwrap();
        db.apply(seeker, open.id, None).unwrap();
        db.apply(seeker, closed.id, None).unwrap();
        db.archive_job(owner, closed.id).unwrap();

        let summary = db.employer_summary(owner, Utc::now()).unwrap();
        assert_eq!(summary.company.unwrap().name, "Kafkas Ltd");
        assert_eq!(summary.jobs, 2);
        assert_eq!(summary.open_jobs, 1);
        assert_eq!(summary.applications, 2);
    }
}
