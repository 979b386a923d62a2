mod applications;
mod auth;
mod commands;
mod companies;
mod config;
mod dashboard;
mod db;
mod error;
mod format;
mod jobs;
mod models;
mod profiles;
mod referral;
mod storage;
mod tui;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use commands::App;
use config::Config;
use error::BoardError;
use models::{ApplicationStatus, JobType, Role};

#[derive(Parser)]
#[command(name = "xabzedin")]
#[command(about = "Community job board - profiles, companies, listings and referral-only sign up")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init {
        /// Also issue this many bootstrap referral codes
        #[arg(long, default_value = "0")]
        codes: usize,
    },

    /// Sign up, sign in and manage your password
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },

    /// Choose your role (once): seeker or employer
    Role {
        role: Role,
    },

    /// View and edit your profile
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },

    /// Manage the experience and education entries of your CV
    Cv {
        #[command(subcommand)]
        command: CvCommands,
    },

    /// Manage your company page (employers)
    Company {
        #[command(subcommand)]
        command: CompanyCommands,
    },

    /// Browse and manage job listings
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },

    /// Apply to a job (seekers)
    Apply {
        /// Job ID
        job_id: i64,

        /// Optional cover letter
        #[arg(short, long)]
        cover_letter: Option<String>,
    },

    /// Sent and received applications
    Applications {
        #[command(subcommand)]
        command: ApplicationCommands,
    },

    /// Referral codes
    Referral {
        #[command(subcommand)]
        command: ReferralCommands,
    },

    /// Summary of your activity
    Dashboard,
}

#[derive(Subcommand)]
enum AuthCommands {
    /// Create an account with a referral code
    Signup {
        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        password: String,

        /// Full name
        #[arg(short, long)]
        name: Option<String>,

        /// Referral code from an existing member
        #[arg(short, long)]
        code: String,
    },

    /// Sign in
    Login {
        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        password: String,
    },

    /// Sign out
    Logout,

    /// Show who is signed in
    Whoami,

    /// Request a password reset token
    Forgot {
        #[arg(short, long)]
        email: String,
    },

    /// Set a new password with a reset token
    Reset {
        #[arg(short, long)]
        token: String,

        #[arg(short, long)]
        password: String,

        /// Repeat the new password
        #[arg(long)]
        confirm: String,
    },

    /// Change your password while signed in
    Passwd {
        #[arg(long)]
        current: String,

        #[arg(short, long)]
        password: String,

        #[arg(long)]
        confirm: String,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Show a profile (yours by default)
    Show {
        /// Profile ID
        id: Option<i64>,
    },

    /// Update profile fields; pass "" to clear one
    Edit(ProfileArgs),

    /// Upload a profile photo (max 1 MB)
    Avatar {
        file: PathBuf,
    },
}

#[derive(Args)]
struct ProfileArgs {
    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    bio: Option<String>,

    #[arg(long)]
    phone: Option<String>,

    #[arg(long)]
    linkedin: Option<String>,

    /// Who in the community can vouch for you
    #[arg(long)]
    reference: Option<String>,

    /// Comma separated skills
    #[arg(long)]
    skills: Option<String>,

    #[arg(long)]
    experience_summary: Option<String>,

    #[arg(long)]
    education_summary: Option<String>,
}

#[derive(Subcommand)]
enum CvCommands {
    /// Add a work experience
    AddExp {
        #[arg(long)]
        company: String,

        #[arg(long)]
        position: String,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<NaiveDate>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Still working here
        #[arg(long)]
        current: bool,

        #[arg(long)]
        description: Option<String>,
    },

    /// Remove a work experience
    RmExp {
        id: i64,
    },

    /// Add an education entry
    AddEdu {
        #[arg(long)]
        school: String,

        #[arg(long)]
        degree: Option<String>,

        #[arg(long)]
        field: Option<String>,

        #[arg(long)]
        start: Option<NaiveDate>,

        #[arg(long)]
        end: Option<NaiveDate>,

        #[arg(long)]
        description: Option<String>,
    },

    /// Remove an education entry
    RmEdu {
        id: i64,
    },
}

#[derive(Subcommand)]
enum CompanyCommands {
    /// Show a company (yours by default)
    Show {
        id: Option<i64>,
    },

    /// Create your company page
    Create(CompanyArgs),

    /// Update your company page
    Edit(CompanyArgs),

    /// Upload a company logo (max 1 MB)
    Logo {
        file: PathBuf,
    },
}

#[derive(Args)]
struct CompanyArgs {
    #[arg(long)]
    name: String,

    #[arg(long)]
    sector: Option<String>,

    #[arg(long)]
    location: Option<String>,

    #[arg(long)]
    website: Option<String>,

    #[arg(long)]
    description: Option<String>,
}

#[derive(Subcommand)]
enum JobCommands {
    /// List open jobs
    List(FilterArgs),

    /// Browse open jobs interactively
    Browse(FilterArgs),

    /// Show job details
    Show {
        id: i64,
    },

    /// Post a new job (employers)
    Post {
        #[command(flatten)]
        job: JobArgs,

        /// Days the listing stays up (7, 14, 30, 60 or 90 are typical)
        #[arg(short, long, default_value_t = jobs::DEFAULT_DURATION_DAYS)]
        days: i64,
    },

    /// Edit a job you posted
    Edit {
        id: i64,

        #[command(flatten)]
        job: JobArgs,
    },

    /// Delete a job and its applications
    Delete {
        id: i64,
    },

    /// Put an expired or archived job back up
    Republish {
        id: i64,

        #[arg(short, long, default_value_t = jobs::DEFAULT_DURATION_DAYS)]
        days: i64,
    },

    /// Take a job down without deleting it
    Archive {
        id: i64,
    },

    /// List your company's jobs
    Mine,
}

#[derive(Args)]
struct FilterArgs {
    /// Search title and description
    #[arg(short, long)]
    query: Option<String>,

    /// Filter by type (remote, onsite, hybrid)
    #[arg(short = 't', long = "type")]
    job_type: Option<JobType>,
}

#[derive(Args)]
struct JobArgs {
    #[arg(long)]
    title: String,

    #[arg(long)]
    description: String,

    /// remote, onsite or hybrid
    #[arg(short = 't', long = "type", default_value = "onsite")]
    job_type: JobType,

    #[arg(long)]
    location: Option<String>,

    #[arg(long)]
    salary: Option<String>,

    #[arg(long)]
    contact_name: Option<String>,

    #[arg(long)]
    contact_phone: Option<String>,

    #[arg(long)]
    contact_email: Option<String>,
}

#[derive(Subcommand)]
enum ApplicationCommands {
    /// Applications you sent (seekers)
    Mine,

    /// Withdraw one of your applications
    Withdraw {
        id: i64,
    },

    /// Applications to all your jobs (employers)
    Received,

    /// Applications to one of your jobs
    Job {
        job_id: i64,
    },

    /// Mark an application pending, reviewed, accepted or rejected
    Status {
        id: i64,
        status: ApplicationStatus,
    },
}

#[derive(Subcommand)]
enum ReferralCommands {
    /// Your rights, active code and referrals
    Show,

    /// Generate a referral code (uses one right)
    Generate,

    /// Check whether a code can still be used
    Check {
        code: String,
    },

    /// Issue owner-less bootstrap codes (operator)
    Issue {
        #[arg(short, long, default_value = "1")]
        count: usize,
    },

    /// Give a member more code rights (operator)
    Grant {
        #[arg(short, long)]
        email: String,

        #[arg(short, long, default_value = "1")]
        count: i64,
    },
}

/// File logging; stdout belongs to command output. Keep the guard alive.
fn init_logging(config: &Config) -> tracing_appender::non_blocking::WorkerGuard {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let logs_dir = config.logs_dir();
    std::fs::create_dir_all(&logs_dir).ok();

    let file_appender = tracing_appender::rolling::daily(&logs_dir, "xabzedin.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,xabzedin=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();

    guard
}

fn run(cli: Cli, config: Config) -> Result<()> {
    let app = App::open(config)?;
    if !matches!(cli.command, Commands::Init { .. }) {
        app.ensure_ready()?;
    }

    match cli.command {
        Commands::Init { codes } => app.init(codes),
        Commands::Auth { command } => match command {
            AuthCommands::Signup {
                email,
                password,
                name,
                code,
            } => app.sign_up(email, password, name, code),
            AuthCommands::Login { email, password } => app.login(&email, &password),
            AuthCommands::Logout => app.logout(),
            AuthCommands::Whoami => app.whoami(),
            AuthCommands::Forgot { email } => app.forgot(&email),
            AuthCommands::Reset {
                token,
                password,
                confirm,
            } => app.reset(&token, &password, &confirm),
            AuthCommands::Passwd {
                current,
                password,
                confirm,
            } => app.change_password(&current, &password, &confirm),
        },
        Commands::Role { role } => app.choose_role(role),
        Commands::Profile { command } => match command {
            ProfileCommands::Show { id } => app.show_profile(id),
            ProfileCommands::Edit(args) => app.edit_profile(models::ProfileUpdate {
                full_name: args.name,
                bio: args.bio,
                phone: args.phone,
                linkedin_url: args.linkedin,
                community_reference: args.reference,
                skills: args.skills,
                experience_summary: args.experience_summary,
                education_summary: args.education_summary,
            }),
            ProfileCommands::Avatar { file } => app.upload_avatar(&file),
        },
        Commands::Cv { command } => match command {
            CvCommands::AddExp {
                company,
                position,
                start,
                end,
                current,
                description,
            } => app.add_experience(models::ExperienceInput {
                company_name: company,
                position,
                start_date: start,
                end_date: end,
                is_current: current,
                description,
            }),
            CvCommands::RmExp { id } => app.remove_experience(id),
            CvCommands::AddEdu {
                school,
                degree,
                field,
                start,
                end,
                description,
            } => app.add_education(models::EducationInput {
                school_name: school,
                degree,
                field_of_study: field,
                start_date: start,
                end_date: end,
                description,
            }),
            CvCommands::RmEdu { id } => app.remove_education(id),
        },
        Commands::Company { command } => match command {
            CompanyCommands::Show { id } => app.show_company(id),
            CompanyCommands::Create(args) => app.create_company(args.into()),
            CompanyCommands::Edit(args) => app.edit_company(args.into()),
            CompanyCommands::Logo { file } => app.upload_logo(&file),
        },
        Commands::Jobs { command } => match command {
            JobCommands::List(filter) => app.list_jobs(&filter.into()),
            JobCommands::Browse(filter) => app.browse_jobs(&filter.into()),
            JobCommands::Show { id } => app.show_job(id),
            JobCommands::Post { job, days } => app.post_job(job.into(), days),
            JobCommands::Edit { id, job } => app.edit_job(id, job.into()),
            JobCommands::Delete { id } => app.delete_job(id),
            JobCommands::Republish { id, days } => app.republish_job(id, days),
            JobCommands::Archive { id } => app.archive_job(id),
            JobCommands::Mine => app.my_jobs(),
        },
        Commands::Apply {
            job_id,
            cover_letter,
        } => app.apply(job_id, cover_letter.as_deref()),
        Commands::Applications { command } => match command {
            ApplicationCommands::Mine => app.my_applications(),
            ApplicationCommands::Withdraw { id } => app.withdraw(id),
            ApplicationCommands::Received => app.received_applications(),
            ApplicationCommands::Job { job_id } => app.job_applications(job_id),
            ApplicationCommands::Status { id, status } => app.set_application_status(id, status),
        },
        Commands::Referral { command } => match command {
            ReferralCommands::Show => app.referral_overview(),
            ReferralCommands::Generate => app.generate_code(),
            ReferralCommands::Check { code } => app.check_code(&code),
            ReferralCommands::Issue { count } => app.issue_codes(count),
            ReferralCommands::Grant { email, count } => app.grant_rights(&email, count),
        },
        Commands::Dashboard => app.dashboard(),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    let _log_guard = init_logging(&config);
    config.log_summary();

    match run(cli, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<BoardError>() {
                Some(board) => {
                    tracing::warn!(error = %board, "Command rejected");
                    eprintln!("Error: {board}");
                }
                None => {
                    tracing::error!(error = ?e, "Command failed");
                    eprintln!("Something went wrong: {e:#}");
                }
            }
            ExitCode::FAILURE
        }
    }
}

impl From<CompanyArgs> for models::CompanyInput {
    fn from(args: CompanyArgs) -> Self {
        Self {
            name: args.name,
            sector: args.sector,
            location: args.location,
            website: args.website,
            description: args.description,
        }
    }
}

impl From<FilterArgs> for jobs::JobFilter {
    fn from(args: FilterArgs) -> Self {
        Self {
            query: args.query,
            job_type: args.job_type,
        }
    }
}

impl From<JobArgs> for models::JobInput {
    fn from(args: JobArgs) -> Self {
        Self {
            title: args.title,
            description: args.description,
            job_type: args.job_type,
            location: args.location,
            salary_range: args.salary,
            contact_name: args.contact_name,
            contact_phone: args.contact_phone,
            contact_email: args.contact_email,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_post_job() {
        let cli = Cli::try_parse_from([
            "xabzedin", "jobs", "post", "--title", "Dev", "--description", "Build things",
            "--type", "remote", "--days", "14",
        ])
        .unwrap();
        match cli.command {
            Commands::Jobs {
                command: JobCommands::Post { job, days },
            } => {
                assert_eq!(job.job_type, JobType::Remote);
                assert_eq!(days, 14);
            }
            _ => panic!("expected jobs post"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_role() {
        assert!(Cli::try_parse_from(["xabzedin", "role", "admin"]).is_err());
        assert!(Cli::try_parse_from(["xabzedin", "role", "Seeker"]).is_ok());
    }
}
