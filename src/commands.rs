//! Command handlers: resolve the signed-in account, call the data layer,
//! print the result.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::auth::{SessionStore, SignUp, StoredSession};
use crate::config::Config;
use crate::db::Database;
use crate::error::BoardError;
use crate::format::{date, date_range, expires_in, expiry_label, or_dash, posted_ago, truncate};
use crate::jobs::{JobFilter, JobStatus, DURATION_CHOICES};
use crate::models::{
    ApplicationStatus, CompanyInput, EducationInput, ExperienceInput, JobInput, ProfileUpdate, Role,
};
use crate::storage::ImageStore;
use crate::tui;

pub struct App {
    config: Config,
    db: Database,
    sessions: SessionStore,
    images: ImageStore,
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn wrapped(text: &str, indent: &str) {
    for line in textwrap::fill(text, 76).lines() {
        println!("{indent}{line}");
    }
}

impl App {
    pub fn open(config: Config) -> Result<Self> {
        let db = Database::open(&config.db_path)?;
        let sessions = SessionStore::new(config.session_file());
        let images = ImageStore::new(config.storage_dir.clone(), &config.public_base_url);
        Ok(Self {
            config,
            db,
            sessions,
            images,
        })
    }

    pub fn ensure_ready(&self) -> Result<()> {
        self.db.ensure_initialized()
    }

    /// The signed-in account. A stale session file is removed.
    fn current_user(&self) -> Result<i64> {
        let Some(stored) = self.sessions.load()? else {
            return Err(BoardError::NotSignedIn.into());
        };
        match self.db.session_account(&stored.token) {
            Ok(id) => Ok(id),
            Err(e) => {
                if e.downcast_ref::<BoardError>().is_some() {
                    self.sessions.clear()?;
                }
                Err(e)
            }
        }
    }

    /// Like `current_user`, but anonymous visitors are fine.
    fn optional_user(&self) -> Result<Option<i64>> {
        match self.current_user() {
            Ok(id) => Ok(Some(id)),
            Err(e) => {
                let anonymous = matches!(
                    e.downcast_ref::<BoardError>(),
                    Some(BoardError::NotSignedIn | BoardError::SessionExpired)
                );
                if anonymous { Ok(None) } else { Err(e) }
            }
        }
    }

    fn require_operator(&self) -> Result<()> {
        if self.config.operator {
            Ok(())
        } else {
            Err(BoardError::OperatorOnly.into())
        }
    }

    pub fn init(&self, codes: usize) -> Result<()> {
        if codes > 0 {
            self.require_operator()?;
        }
        self.db.init()?;
        println!("Database initialized at {}", self.db.path().display());
        if codes > 0 {
            self.print_codes(&self.db.issue_codes(codes)?);
        }
        Ok(())
    }

    // --- Auth ---

    pub fn sign_up(
        &self,
        email: String,
        password: String,
        full_name: Option<String>,
        referral_code: String,
    ) -> Result<()> {
        let form = SignUp {
            email,
            password,
            full_name,
            referral_code,
        };
        let account_id = self.db.sign_up(&self.config, &form)?;
        let email = self
            .db
            .get_account(account_id)?
            .map(|a| a.email)
            .unwrap_or(form.email);
        println!("Welcome! Account created for {email} (ID: {account_id}).");
        println!("Sign in with 'xabzedin auth login', then pick a role with 'xabzedin role'.");
        Ok(())
    }

    pub fn login(&self, email: &str, password: &str) -> Result<()> {
        let session = self.db.sign_in(&self.config, email, password)?;
        let email = self
            .db
            .get_account(session.account_id)?
            .map(|a| a.email)
            .unwrap_or_else(|| email.to_string());
        self.sessions.save(&StoredSession {
            token: session.token,
            email: email.clone(),
        })?;
        println!("Signed in as {email}.");

        if let Some(profile) = self.db.get_profile(session.account_id)? {
            if profile.role.is_none() {
                println!("You haven't picked a role yet: run 'xabzedin role seeker' or 'xabzedin role employer'.");
            }
        }
        Ok(())
    }

    pub fn logout(&self) -> Result<()> {
        match self.sessions.load()? {
            Some(stored) => {
                self.db.sign_out(&stored.token)?;
                self.sessions.clear()?;
                println!("Signed out {}.", stored.email);
            }
            None => println!("Not signed in."),
        }
        Ok(())
    }

    pub fn whoami(&self) -> Result<()> {
        let id = self.current_user()?;
        let profile = self
            .db
            .get_profile(id)?
            .ok_or(BoardError::not_found("Profile", id))?;
        println!("{} <{}>", profile.display_name(), profile.email);
        println!(
            "Role: {}",
            profile.role.map(|r| r.as_str()).unwrap_or("not chosen")
        );
        Ok(())
    }

    pub fn forgot(&self, email: &str) -> Result<()> {
        if let Some(path) = self.db.request_password_reset(&self.config, email)? {
            debug!(path = %path.display(), "Reset message written");
        }
        // Same answer whether or not the address exists.
        println!(
            "If an account exists for {}, a reset message is waiting in {}.",
            email.trim(),
            self.config.outbox_dir().display()
        );
        Ok(())
    }

    pub fn reset(&self, token: &str, password: &str, confirm: &str) -> Result<()> {
        self.db.reset_password(&self.config, token, password, confirm)?;
        self.sessions.clear()?;
        println!("Password updated. Sign in with your new password.");
        Ok(())
    }

    pub fn change_password(&self, current: &str, password: &str, confirm: &str) -> Result<()> {
        let id = self.current_user()?;
        self.db
            .change_password(&self.config, id, current, password, confirm)?;
        println!("Password changed.");
        Ok(())
    }

    pub fn choose_role(&self, role: Role) -> Result<()> {
        let id = self.current_user()?;
        self.db.set_role(id, role)?;
        match role {
            Role::Seeker => println!("You're a job seeker. Fill in your CV with 'xabzedin profile edit' and 'xabzedin cv'."),
            Role::Employer => println!("You're an employer. Create your company page with 'xabzedin company create'."),
        }
        Ok(())
    }

    // --- Profiles ---

    pub fn show_profile(&self, id: Option<i64>) -> Result<()> {
        let id = match id {
            Some(id) => id,
            None => self.current_user()?,
        };
        let public = self.db.public_profile(id)?;
        let p = &public.profile;

        println!("Profile #{}", p.id);
        println!("Name: {}", p.display_name());
        println!("Email: {}", p.email);
        if let Some(role) = p.role {
            println!("Role: {role}");
        }
        if let Some(phone) = &p.phone {
            println!("Phone: {phone}");
        }
        if let Some(linkedin) = &p.linkedin_url {
            println!("LinkedIn: {linkedin}");
        }
        if let Some(reference) = &p.community_reference {
            println!("Reference: {reference}");
        }
        if let Some(avatar) = &p.avatar_url {
            println!("Photo: {avatar}");
        }
        if !p.skills.is_empty() {
            println!("Skills: {}", p.skills.join(", "));
        }
        if let Some(bio) = &p.bio {
            println!("\n--- About ---");
            wrapped(bio, "");
        }

        if !public.experiences.is_empty() || p.experience_summary.is_some() {
            println!("\n--- Experience ---");
            if let Some(summary) = &p.experience_summary {
                wrapped(summary, "");
            }
            for exp in &public.experiences {
                println!(
                    "  #{} {} at {} ({})",
                    exp.id,
                    exp.position,
                    exp.company_name,
                    date_range(exp.start_date, exp.end_date, exp.is_current)
                );
                if let Some(description) = &exp.description {
                    wrapped(description, "      ");
                }
            }
        }

        if !public.education.is_empty() || p.education_summary.is_some() {
            println!("\n--- Education ---");
            if let Some(summary) = &p.education_summary {
                wrapped(summary, "");
            }
            for edu in &public.education {
                let subject: Vec<&str> = [edu.degree.as_deref(), edu.field_of_study.as_deref()]
                    .into_iter()
                    .flatten()
                    .collect();
                let subject = if subject.is_empty() {
                    String::new()
                } else {
                    format!(", {}", subject.join(" in "))
                };
                println!(
                    "  #{} {}{} ({})",
                    edu.id,
                    edu.school_name,
                    subject,
                    date_range(edu.start_date, edu.end_date, false)
                );
                if let Some(description) = &edu.description {
                    wrapped(description, "      ");
                }
            }
        }
        Ok(())
    }

    pub fn edit_profile(&self, update: ProfileUpdate) -> Result<()> {
        let id = self.current_user()?;
        let profile = self.db.update_profile(id, &update)?;
        println!("Profile updated for {}.", profile.display_name());
        Ok(())
    }

    pub fn upload_avatar(&self, file: &Path) -> Result<()> {
        let id = self.current_user()?;
        let url = self.db.upload_avatar(&self.images, id, &read_image(file)?)?;
        println!("Profile photo updated: {url}");
        Ok(())
    }

    pub fn add_experience(&self, input: ExperienceInput) -> Result<()> {
        let id = self.current_user()?;
        let exp = self.db.add_experience(id, &input)?;
        println!("Added experience #{}: {} at {}", exp.id, exp.position, exp.company_name);
        Ok(())
    }

    pub fn remove_experience(&self, experience_id: i64) -> Result<()> {
        let id = self.current_user()?;
        self.db.delete_experience(id, experience_id)?;
        println!("Removed experience #{experience_id}.");
        Ok(())
    }

    pub fn add_education(&self, input: EducationInput) -> Result<()> {
        let id = self.current_user()?;
        let edu = self.db.add_education(id, &input)?;
        println!("Added education #{}: {}", edu.id, edu.school_name);
        Ok(())
    }

    pub fn remove_education(&self, education_id: i64) -> Result<()> {
        let id = self.current_user()?;
        self.db.delete_education(id, education_id)?;
        println!("Removed education #{education_id}.");
        Ok(())
    }

    // --- Companies ---

    pub fn show_company(&self, id: Option<i64>) -> Result<()> {
        let company = match id {
            Some(id) => self
                .db
                .get_company(id)?
                .ok_or(BoardError::not_found("Company", id))?,
            None => self.db.require_company(self.current_user()?)?,
        };

        println!("Company #{}", company.id);
        println!("Name: {}", company.name);
        println!("Sector: {}", or_dash(company.sector.as_deref()));
        println!("Location: {}", or_dash(company.location.as_deref()));
        println!("Website: {}", or_dash(company.website.as_deref()));
        if let Some(logo) = &company.logo_url {
            println!("Logo: {logo}");
        }
        if let Some(description) = &company.description {
            println!("\n--- About ---");
            wrapped(description, "");
        }

        let now = Utc::now();
        let open: Vec<_> = self
            .db
            .list_company_jobs(company.owner_id)?
            .into_iter()
            .filter(|j| JobStatus::of(j, now) == JobStatus::Active)
            .collect();
        if !open.is_empty() {
            println!("\nOpen jobs ({}):", open.len());
            for job in open {
                println!("  #{} - {} ({})", job.id, job.title, job.job_type);
            }
        }
        Ok(())
    }

    pub fn create_company(&self, input: CompanyInput) -> Result<()> {
        let id = self.current_user()?;
        let company = self.db.create_company(id, &input)?;
        println!("Created company '{}' (ID: {})", company.name, company.id);
        Ok(())
    }

    pub fn edit_company(&self, input: CompanyInput) -> Result<()> {
        let id = self.current_user()?;
        let company = self.db.update_company(id, &input)?;
        println!("Updated company '{}'.", company.name);
        Ok(())
    }

    pub fn upload_logo(&self, file: &Path) -> Result<()> {
        let id = self.current_user()?;
        let url = self.db.upload_logo(&self.images, id, &read_image(file)?)?;
        println!("Company logo updated: {url}");
        Ok(())
    }

    // --- Jobs ---

    pub fn list_jobs(&self, filter: &JobFilter) -> Result<()> {
        let now = Utc::now();
        let jobs = self.db.list_open_jobs(filter, now)?;
        if jobs.is_empty() {
            println!("No jobs found.");
            return Ok(());
        }

        println!(
            "{:<6} {:<8} {:<30} {:<20} {:<12} {:<14}",
            "ID", "TYPE", "TITLE", "COMPANY", "POSTED", "EXPIRES"
        );
        println!("{}", "-".repeat(94));
        for entry in jobs {
            println!(
                "{:<6} {:<8} {:<30} {:<20} {:<12} {:<14}",
                entry.job.id,
                entry.job.job_type,
                truncate(&entry.job.title, 28),
                truncate(&entry.company.name, 18),
                posted_ago(entry.job.created_at, now),
                expires_in(entry.job.expires_at, now).unwrap_or_default(),
            );
        }
        Ok(())
    }

    pub fn browse_jobs(&self, filter: &JobFilter) -> Result<()> {
        let seeker = match self.optional_user()? {
            Some(id) => self
                .db
                .get_profile(id)?
                .filter(|p| p.role == Some(Role::Seeker))
                .map(|p| p.id),
            None => None,
        };
        tui::run_browse(&self.db, filter, seeker)
    }

    pub fn show_job(&self, id: i64) -> Result<()> {
        let entry = self.db.get_job(id)?.ok_or(BoardError::not_found("Job", id))?;
        let (job, company) = (&entry.job, &entry.company);
        let now = Utc::now();
        let status = JobStatus::of(job, now);

        // Closed listings stay visible to their owner only.
        let viewer = self.optional_user()?;
        if status != JobStatus::Active && viewer != Some(company.owner_id) {
            return Err(BoardError::not_found("Job", id).into());
        }

        println!("Job #{}", job.id);
        println!("Title: {}", job.title);
        println!("Company: {} (#{})", company.name, company.id);
        println!("Type: {}", job.job_type);
        println!("Location: {}", or_dash(job.location.as_deref()));
        if let Some(salary) = &job.salary_range {
            println!("Salary: {salary}");
        }
        println!("Posted: {} ({})", date(job.created_at), posted_ago(job.created_at, now));
        if viewer == Some(company.owner_id) {
            println!("Status: {status}");
            if let Some(label) = expiry_label(job.expires_at, now) {
                println!("Expires: {label}");
            }
        } else if let Some(left) = expires_in(job.expires_at, now) {
            println!("Expires: {left}");
        }

        println!("\n--- Description ---");
        wrapped(&job.description, "");

        if job.contact_name.is_some() || job.contact_phone.is_some() || job.contact_email.is_some() {
            println!("\n--- Contact ---");
            println!("Name: {}", or_dash(job.contact_name.as_deref()));
            println!("Phone: {}", or_dash(job.contact_phone.as_deref()));
            println!("Email: {}", or_dash(job.contact_email.as_deref()));
        }

        if let Some(seeker) = viewer {
            if self.db.has_applied(seeker, job.id)? {
                println!("\nYou have applied to this job.");
            }
        }
        Ok(())
    }

    pub fn post_job(&self, input: JobInput, days: i64) -> Result<()> {
        let id = self.current_user()?;
        let job = self.db.create_job(id, &input, days)?;
        println!("Posted job #{}: {}", job.id, job.title);
        if let Some(expires) = job.expires_at {
            println!("Listed until {}.", date(expires));
        }
        Ok(())
    }

    pub fn edit_job(&self, job_id: i64, input: JobInput) -> Result<()> {
        let id = self.current_user()?;
        let job = self.db.update_job(id, job_id, &input)?;
        println!("Updated job #{}: {}", job.id, job.title);
        Ok(())
    }

    pub fn delete_job(&self, job_id: i64) -> Result<()> {
        let id = self.current_user()?;
        let removed = self.db.delete_job(id, job_id)?;
        println!("Deleted job #{job_id} and {removed} application(s).");
        Ok(())
    }

    pub fn republish_job(&self, job_id: i64, days: i64) -> Result<()> {
        let id = self.current_user()?;
        let job = self.db.republish_job(id, job_id, days)?;
        match job.expires_at {
            Some(expires) => println!("Job #{} is live again until {}.", job.id, date(expires)),
            None => println!("Job #{} is live again.", job.id),
        }
        Ok(())
    }

    pub fn archive_job(&self, job_id: i64) -> Result<()> {
        let id = self.current_user()?;
        let job = self.db.archive_job(id, job_id)?;
        println!("Archived job #{}: {}", job.id, job.title);
        Ok(())
    }

    pub fn my_jobs(&self) -> Result<()> {
        let id = self.current_user()?;
        let company = self.db.require_company(id)?;
        let jobs = self.db.list_company_jobs(id)?;
        if jobs.is_empty() {
            println!("{} has no job listings yet.", company.name);
            return Ok(());
        }

        let now = Utc::now();
        let mut closed = 0;
        println!("{:<6} {:<10} {:<30} {:<8} {:<16}", "ID", "STATUS", "TITLE", "TYPE", "EXPIRES");
        println!("{}", "-".repeat(74));
        for job in jobs {
            let status = JobStatus::of(&job, now);
            if status.can_republish() {
                closed += 1;
            }
            println!(
                "{:<6} {:<10} {:<30} {:<8} {:<16}",
                job.id,
                status,
                truncate(&job.title, 28),
                job.job_type,
                expiry_label(job.expires_at, now).unwrap_or_default(),
            );
        }

        if closed > 0 {
            let choices: Vec<String> = DURATION_CHOICES.iter().map(|d| d.to_string()).collect();
            println!(
                "\n{closed} listing(s) can be put back up: xabzedin jobs republish <ID> --days <{}>",
                choices.join("|")
            );
        }
        Ok(())
    }

    // --- Applications ---

    pub fn apply(&self, job_id: i64, cover_letter: Option<&str>) -> Result<()> {
        let id = self.current_user()?;
        let application = self.db.apply(id, job_id, cover_letter)?;
        println!(
            "Application #{} sent! The employer will review your profile.",
            application.id
        );
        Ok(())
    }

    pub fn my_applications(&self) -> Result<()> {
        let id = self.current_user()?;
        self.db.require_role(id, Role::Seeker)?;
        let applications = self.db.list_seeker_applications(id)?;
        if applications.is_empty() {
            println!("You haven't applied to any jobs yet.");
            return Ok(());
        }

        println!("{:<6} {:<10} {:<30} {:<20} {:<10}", "ID", "STATUS", "JOB", "COMPANY", "SENT");
        println!("{}", "-".repeat(80));
        for entry in applications {
            println!(
                "{:<6} {:<10} {:<30} {:<20} {:<10}",
                entry.application.id,
                entry.application.status,
                truncate(&entry.job_title, 28),
                truncate(&entry.company_name, 18),
                date(entry.application.created_at),
            );
        }
        Ok(())
    }

    pub fn withdraw(&self, application_id: i64) -> Result<()> {
        let id = self.current_user()?;
        self.db.withdraw_application(id, application_id)?;
        println!("Withdrew application #{application_id}.");
        Ok(())
    }

    pub fn received_applications(&self) -> Result<()> {
        let id = self.current_user()?;
        let received = self.db.list_company_applications(id)?;
        self.print_received(received)
    }

    pub fn job_applications(&self, job_id: i64) -> Result<()> {
        let id = self.current_user()?;
        let received = self.db.list_job_applications(id, job_id)?;
        self.print_received(received)
    }

    fn print_received(&self, received: Vec<crate::models::ReceivedApplication>) -> Result<()> {
        if received.is_empty() {
            println!("No applications yet.");
            return Ok(());
        }

        println!(
            "{:<6} {:<10} {:<26} {:<20} {:<26} {:<10}",
            "ID", "STATUS", "JOB", "APPLICANT", "EMAIL", "SENT"
        );
        println!("{}", "-".repeat(102));
        for entry in &received {
            println!(
                "{:<6} {:<10} {:<26} {:<20} {:<26} {:<10}",
                entry.application.id,
                entry.application.status,
                truncate(&entry.job_title, 24),
                truncate(or_dash(entry.seeker_name.as_deref()), 18),
                truncate(&entry.seeker_email, 24),
                date(entry.application.created_at),
            );
        }

        let letters: Vec<_> = received
            .iter()
            .filter_map(|e| e.application.cover_letter.as_deref().map(|l| (e.application.id, l)))
            .collect();
        for (id, letter) in letters {
            println!("\n--- Cover letter #{id} ---");
            wrapped(letter, "");
        }
        Ok(())
    }

    pub fn set_application_status(&self, application_id: i64, status: ApplicationStatus) -> Result<()> {
        let id = self.current_user()?;
        self.db.set_application_status(id, application_id, status)?;
        println!("Application #{application_id} marked {status}.");
        Ok(())
    }

    // --- Referrals ---

    pub fn referral_overview(&self) -> Result<()> {
        let id = self.current_user()?;
        let overview = self.db.referral_overview(id)?;

        if let Some(by) = &overview.referred_by {
            println!("Invited by: {by}");
        }
        println!("Code rights left: {}", overview.rights_left);
        match &overview.active_code {
            Some(code) => println!("Active code: {code} (share it with someone you trust)"),
            None if overview.can_generate() => {
                println!("No active code. Run 'xabzedin referral generate' to create one.")
            }
            None => println!("No active code."),
        }

        if !overview.referees.is_empty() {
            println!("\nPeople you invited ({}):", overview.referees.len());
            for referee in &overview.referees {
                println!(
                    "  {} <{}> with {} on {}",
                    or_dash(referee.name.as_deref()),
                    referee.email,
                    referee.code,
                    referee.used_at.map(date).unwrap_or_default()
                );
            }
        }
        Ok(())
    }

    pub fn generate_code(&self) -> Result<()> {
        let id = self.current_user()?;
        let code = self.db.generate_my_code(id)?;
        println!("Your referral code: {code}");
        println!("It can be used once. Whoever signs up with it is linked to you.");
        Ok(())
    }

    pub fn check_code(&self, code: &str) -> Result<()> {
        if self.db.validate_referral_code(code)? {
            println!("Code is valid.");
            return Ok(());
        }
        if let Some(used) = self.db.get_referral_code(code)? {
            if let Some(at) = used.used_at {
                println!("Code {} was used on {}.", used.code, date(at));
            }
        }
        Err(BoardError::InvalidReferralCode.into())
    }

    pub fn issue_codes(&self, count: usize) -> Result<()> {
        self.require_operator()?;
        let codes = self.db.issue_codes(count)?;
        info!(count = codes.len(), "Codes issued from the command line");
        self.print_codes(&codes);
        Ok(())
    }

    fn print_codes(&self, codes: &[String]) {
        println!("Issued {} referral code(s):", codes.len());
        for code in codes {
            println!("  {code}");
        }
    }

    pub fn grant_rights(&self, email: &str, count: i64) -> Result<()> {
        self.require_operator()?;
        let rights = self.db.grant_referral_rights(email, count)?;
        println!("{} now has {} code right(s).", email.trim(), rights);
        Ok(())
    }

    // --- Dashboard ---

    pub fn dashboard(&self) -> Result<()> {
        let id = self.current_user()?;
        let profile = self
            .db
            .get_profile(id)?
            .ok_or(BoardError::not_found("Profile", id))?;
        println!("Hello, {}!", profile.display_name());

        match profile.role {
            None => {
                println!("Pick a role to get started: 'xabzedin role seeker' or 'xabzedin role employer'.");
            }
            Some(Role::Seeker) => {
                let summary = self.db.seeker_summary(id)?;
                println!("Applications sent: {}", summary.applications);
                println!("Experience entries: {}", summary.experiences);
                println!("Education entries: {}", summary.education);
                if !summary.cv_started() {
                    println!("\nYour CV is empty. Add entries with 'xabzedin cv add-exp' and 'xabzedin cv add-edu'.");
                }
            }
            Some(Role::Employer) => {
                let summary = self.db.employer_summary(id, Utc::now())?;
                match &summary.company {
                    Some(company) => {
                        println!("Company: {}", company.name);
                        println!("Listings: {} ({} open)", summary.jobs, summary.open_jobs);
                        println!("Applications received: {}", summary.applications);
                    }
                    None => {
                        println!("Create your company page with 'xabzedin company create' to start posting jobs.");
                    }
                }
            }
        }

        let overview = self.db.referral_overview(id)?;
        if let Some(code) = overview.active_code {
            println!("\nReferral code: {code}");
        } else if overview.can_generate() {
            println!("\nYou can invite someone: 'xabzedin referral generate'.");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing;
    use chrono::Duration;
    use tempfile::TempDir;

    fn app_in(dir: &TempDir, operator: bool) -> App {
        let mut config = Config::for_tests(dir.path());
        config.operator = operator;
        let app = App::open(config).unwrap();
        app.db.init().unwrap();
        app
    }

    fn board_error(result: Result<impl std::fmt::Debug>) -> BoardError {
        result.unwrap_err().downcast::<BoardError>().unwrap()
    }

    #[test]
    fn test_unknown_session_token_is_cleared() {
        let dir = TempDir::new().unwrap();
        let app = app_in(&dir, false);
        app.sessions
            .save(&StoredSession {
                token: "revoked-elsewhere".to_string(),
                email: "a@example.com".to_string(),
            })
            .unwrap();

        assert_eq!(board_error(app.current_user()), BoardError::NotSignedIn);
        assert!(!app.config.session_file().exists());
        assert_eq!(board_error(app.current_user()), BoardError::NotSignedIn);
    }

    #[test]
    fn test_expired_session_is_cleared() {
        let dir = TempDir::new().unwrap();
        let app = app_in(&dir, false);
        let id = testing::account(&app.db, "a@example.com");
        app.login("a@example.com", "hunter22").unwrap();
        assert_eq!(app.current_user().unwrap(), id);

        app.db
            .conn
            .execute(
                "UPDATE sessions SET expires_at = ?1",
                [Utc::now() - Duration::hours(1)],
            )
            .unwrap();

        assert_eq!(board_error(app.current_user()), BoardError::SessionExpired);
        assert!(!app.config.session_file().exists());
        assert_eq!(app.optional_user().unwrap(), None);
    }

    #[test]
    fn test_anonymous_visitor_sees_open_jobs_only() {
        let dir = TempDir::new().unwrap();
        let app = app_in(&dir, false);
        let owner = testing::employer_with_company(&app.db, "boss@example.com", "Kafkas Ltd");
        testing::seeker(&app.db, "s@example.com");
        let job = app.db.create_job(owner, &testing::job_input("Dev"), 30).unwrap();

        assert_eq!(app.optional_user().unwrap(), None);
        app.show_job(job.id).unwrap();

        app.db.archive_job(owner, job.id).unwrap();
        assert_eq!(board_error(app.show_job(job.id)), BoardError::not_found("Job", job.id));

        app.login("s@example.com", "hunter22").unwrap();
        assert_eq!(board_error(app.show_job(job.id)), BoardError::not_found("Job", job.id));

        app.login("boss@example.com", "hunter22").unwrap();
        app.show_job(job.id).unwrap();
    }

    #[test]
    fn test_operator_commands_need_the_flag() {
        let dir = TempDir::new().unwrap();
        let member = app_in(&dir, false);
        let id = testing::account(&member.db, "a@example.com");

        assert_eq!(board_error(member.issue_codes(1)), BoardError::OperatorOnly);
        assert_eq!(
            board_error(member.grant_rights("a@example.com", 100)),
            BoardError::OperatorOnly
        );
        assert_eq!(board_error(member.init(2)), BoardError::OperatorOnly);
        member.init(0).unwrap();

        let operator = app_in(&dir, true);
        operator.issue_codes(2).unwrap();
        operator.grant_rights("a@example.com", 3).unwrap();
        assert_eq!(operator.db.referral_overview(id).unwrap().rights_left, 4);
    }
}
