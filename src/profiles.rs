use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::db::Database;
use crate::error::BoardError;
use crate::models::{
    non_blank, Education, EducationInput, Experience, ExperienceInput, Profile, ProfileUpdate,
    Role,
};
use crate::storage::{validate_image, ImageStore};

const PROFILE_COLUMNS: &str = "id, email, full_name, role, avatar_url, bio, linkedin_url, phone,
    community_reference, skills, experience_summary, education_summary, referred_by,
    referral_code_rights, created_at, updated_at";

/// A profile as other users see it.
#[derive(Debug, Clone)]
pub struct PublicProfile {
    pub profile: Profile,
    pub experiences: Vec<Experience>,
    pub education: Vec<Education>,
}

/// Split a comma separated skill list, dropping blanks and repeats.
pub fn parse_skills(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.to_lowercase()))
        .map(str::to_string)
        .collect()
}

impl Database {
    pub fn get_profile(&self, id: i64) -> Result<Option<Profile>> {
        self.conn
            .query_row(
                &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1"),
                [id],
                row_to_profile,
            )
            .optional()
            .context("Failed to load profile")
    }

    /// A role is picked once, right after the first sign in.
    pub fn set_role(&self, account_id: i64, role: Role) -> Result<()> {
        let profile = self
            .get_profile(account_id)?
            .ok_or(BoardError::not_found("Profile", account_id))?;
        if let Some(existing) = profile.role {
            return Err(BoardError::RoleAlreadyChosen(existing).into());
        }
        self.conn.execute(
            "UPDATE profiles SET role = ?1, updated_at = ?2 WHERE id = ?3",
            params![role, Utc::now(), account_id],
        )?;
        info!(account_id, role = %role, "Role chosen");
        Ok(())
    }

    /// Apply the provided fields; `None` leaves a field alone, a blank
    /// string clears it.
    pub fn update_profile(&self, account_id: i64, update: &ProfileUpdate) -> Result<Profile> {
        let mut profile = self
            .get_profile(account_id)?
            .ok_or(BoardError::not_found("Profile", account_id))?;

        if let Some(url) = update.linkedin_url.as_deref().map(str::trim) {
            if !url.is_empty() && !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(BoardError::validation("LinkedIn URL must start with http:// or https://").into());
            }
        }

        let apply = |field: &mut Option<String>, value: &Option<String>| {
            if let Some(v) = value {
                *field = non_blank(Some(v.as_str()));
            }
        };
        apply(&mut profile.full_name, &update.full_name);
        apply(&mut profile.bio, &update.bio);
        apply(&mut profile.phone, &update.phone);
        apply(&mut profile.linkedin_url, &update.linkedin_url);
        apply(&mut profile.community_reference, &update.community_reference);
        apply(&mut profile.experience_summary, &update.experience_summary);
        apply(&mut profile.education_summary, &update.education_summary);
        if let Some(skills) = &update.skills {
            profile.skills = parse_skills(skills);
        }
        profile.updated_at = Utc::now();

        self.conn.execute(
            "UPDATE profiles SET full_name = ?1, bio = ?2, phone = ?3, linkedin_url = ?4,
                community_reference = ?5, skills = ?6, experience_summary = ?7,
                education_summary = ?8, updated_at = ?9
             WHERE id = ?10",
            params![
                profile.full_name,
                profile.bio,
                profile.phone,
                profile.linkedin_url,
                profile.community_reference,
                serde_json::to_string(&profile.skills)?,
                profile.experience_summary,
                profile.education_summary,
                profile.updated_at,
                account_id
            ],
        )?;

        info!(account_id, "Profile updated");
        Ok(profile)
    }

    pub fn upload_avatar(&self, store: &ImageStore, account_id: i64, bytes: &[u8]) -> Result<String> {
        let ext = validate_image(bytes)?;
        let key = format!("{account_id}/avatar.{ext}");
        store.upload(&key, bytes, true)?;
        let url = store.public_url(&key);

        self.conn.execute(
            "UPDATE profiles SET avatar_url = ?1, updated_at = ?2 WHERE id = ?3",
            params![url, Utc::now(), account_id],
        )?;
        info!(account_id, url = %url, "Avatar uploaded");
        Ok(url)
    }

    pub fn public_profile(&self, id: i64) -> Result<PublicProfile> {
        let profile = self
            .get_profile(id)?
            .ok_or(BoardError::not_found("Profile", id))?;
        Ok(PublicProfile {
            experiences: self.list_experiences(id)?,
            education: self.list_education(id)?,
            profile,
        })
    }

    // --- Experience ---

    pub fn add_experience(&self, account_id: i64, input: &ExperienceInput) -> Result<Experience> {
        let company_name = input.company_name.trim();
        let position = input.position.trim();
        if company_name.is_empty() || position.is_empty() {
            return Err(BoardError::validation("Company name and position are required").into());
        }
        // A current position has no end yet.
        let end_date = if input.is_current { None } else { input.end_date };
        check_date_order(input.start_date, end_date)?;

        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO experiences (profile_id, company_name, position, start_date, end_date,
                is_current, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                account_id,
                company_name,
                position,
                input.start_date,
                end_date,
                input.is_current,
                non_blank(input.description.as_deref()),
                now
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(account_id, experience_id = id, "Experience added");

        Ok(Experience {
            id,
            profile_id: account_id,
            company_name: company_name.to_string(),
            position: position.to_string(),
            start_date: input.start_date,
            end_date,
            is_current: input.is_current,
            description: non_blank(input.description.as_deref()),
            created_at: now,
        })
    }

    pub fn delete_experience(&self, account_id: i64, experience_id: i64) -> Result<()> {
        self.delete_cv_entry("experiences", "Experience", account_id, experience_id)
    }

    /// Newest first; entries without a start date sink to the bottom.
    pub fn list_experiences(&self, profile_id: i64) -> Result<Vec<Experience>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, profile_id, company_name, position, start_date, end_date, is_current,
                    description, created_at
             FROM experiences WHERE profile_id = ?1
             ORDER BY start_date IS NULL, start_date DESC, id DESC",
        )?;
        let rows = stmt.query_map([profile_id], |row| {
            Ok(Experience {
                id: row.get(0)?,
                profile_id: row.get(1)?,
                company_name: row.get(2)?,
                position: row.get(3)?,
                start_date: row.get(4)?,
                end_date: row.get(5)?,
                is_current: row.get(6)?,
                description: row.get(7)?,
                created_at: row.get(8)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list experiences")
    }

    // --- Education ---

    pub fn add_education(&self, account_id: i64, input: &EducationInput) -> Result<Education> {
        let school_name = input.school_name.trim();
        if school_name.is_empty() {
            return Err(BoardError::validation("School name is required").into());
        }
        check_date_order(input.start_date, input.end_date)?;

        let now = Utc::now();
        let degree = non_blank(input.degree.as_deref());
        let field_of_study = non_blank(input.field_of_study.as_deref());
        let description = non_blank(input.description.as_deref());
        self.conn.execute(
            "INSERT INTO education (profile_id, school_name, degree, field_of_study, start_date,
                end_date, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                account_id,
                school_name,
                degree,
                field_of_study,
                input.start_date,
                input.end_date,
                description,
                now
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(account_id, education_id = id, "Education added");

        Ok(Education {
            id,
            profile_id: account_id,
            school_name: school_name.to_string(),
            degree,
            field_of_study,
            start_date: input.start_date,
            end_date: input.end_date,
            description,
            created_at: now,
        })
    }

    pub fn delete_education(&self, account_id: i64, education_id: i64) -> Result<()> {
        self.delete_cv_entry("education", "Education", account_id, education_id)
    }

    pub fn list_education(&self, profile_id: i64) -> Result<Vec<Education>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, profile_id, school_name, degree, field_of_study, start_date, end_date,
                    description, created_at
             FROM education WHERE profile_id = ?1
             ORDER BY start_date IS NULL, start_date DESC, id DESC",
        )?;
        let rows = stmt.query_map([profile_id], |row| {
            Ok(Education {
                id: row.get(0)?,
                profile_id: row.get(1)?,
                school_name: row.get(2)?,
                degree: row.get(3)?,
                field_of_study: row.get(4)?,
                start_date: row.get(5)?,
                end_date: row.get(6)?,
                description: row.get(7)?,
                created_at: row.get(8)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list education")
    }

    fn delete_cv_entry(
        &self,
        table: &'static str,
        kind: &'static str,
        account_id: i64,
        entry_id: i64,
    ) -> Result<()> {
        let owner: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT profile_id FROM {table} WHERE id = ?1"),
                [entry_id],
                |row| row.get(0),
            )
            .optional()?;
        match owner {
            None => return Err(BoardError::not_found(kind, entry_id).into()),
            Some(owner) if owner != account_id => return Err(BoardError::Forbidden(kind).into()),
            Some(_) => {}
        }
        self.conn
            .execute(&format!("DELETE FROM {table} WHERE id = ?1"), [entry_id])?;
        debug!(account_id, entry_id, table, "CV entry deleted");
        Ok(())
    }
}

fn check_date_order(
    start: Option<chrono::NaiveDate>,
    end: Option<chrono::NaiveDate>,
) -> Result<(), BoardError> {
    match (start, end) {
        (Some(start), Some(end)) if end < start => {
            Err(BoardError::validation("End date cannot be before start date"))
        }
        _ => Ok(()),
    }
}

fn row_to_profile(row: &Row) -> rusqlite::Result<Profile> {
    let skills_json: String = row.get(9)?;
    let skills = serde_json::from_str(&skills_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?;
    Ok(Profile {
        id: row.get(0)?,
        email: row.get(1)?,
        full_name: row.get(2)?,
        role: row.get(3)?,
        avatar_url: row.get(4)?,
        bio: row.get(5)?,
        linkedin_url: row.get(6)?,
        phone: row.get(7)?,
        community_reference: row.get(8)?,
        skills,
        experience_summary: row.get(10)?,
        education_summary: row.get(11)?,
        referred_by: row.get(12)?,
        referral_code_rights: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn test_parse_skills() {
        assert_eq!(
            parse_skills(" Rust, sql,, SQL ,Leadership "),
            vec!["Rust", "sql", "Leadership"]
        );
        assert!(parse_skills(" , ").is_empty());
    }

    #[test]
    fn test_role_is_chosen_once() {
        let db = testing::db();
        let id = testing::account(&db, "a@example.com");
        db.set_role(id, Role::Seeker).unwrap();

        let err = db.set_role(id, Role::Employer).unwrap_err();
        assert_eq!(
            err.downcast_ref::<BoardError>(),
            Some(&BoardError::RoleAlreadyChosen(Role::Seeker))
        );
        assert_eq!(db.get_profile(id).unwrap().unwrap().role, Some(Role::Seeker));
    }

    #[test]
    fn test_update_profile_partial_and_clearing() {
        let db = testing::db();
        let id = testing::seeker(&db, "a@example.com");

        db.update_profile(
            id,
            &ProfileUpdate {
                bio: Some("Backend developer".to_string()),
                phone: Some("+90 555 000 0000".to_string()),
                skills: Some("Rust, Go".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        let updated = db
            .update_profile(
                id,
                &ProfileUpdate {
                    phone: Some("  ".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.bio.as_deref(), Some("Backend developer"));
        assert!(updated.phone.is_none());

        let stored = db.get_profile(id).unwrap().unwrap();
        assert_eq!(stored.skills, vec!["Rust", "Go"]);
        assert!(stored.phone.is_none());
        assert_eq!(stored.full_name.as_deref(), Some("User a@example.com"));
    }

    #[test]
    fn test_update_profile_rejects_bad_linkedin_url() {
        let db = testing::db();
        let id = testing::seeker(&db, "a@example.com");
        let result = db.update_profile(
            id,
            &ProfileUpdate {
                linkedin_url: Some("linkedin.com/in/me".to_string()),
                ..Default::default()
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_experience_ordering_and_current_role() {
        let db = testing::db();
        let id = testing::seeker(&db, "a@example.com");

        db.add_experience(id, &ExperienceInput {
            company_name: "Old Co".to_string(),
            position: "Intern".to_string(),
            start_date: date(2018, 6, 1),
            end_date: date(2018, 9, 1),
            ..Default::default()
        })
        .unwrap();
        db.add_experience(id, &ExperienceInput {
            company_name: "Undated".to_string(),
            position: "Volunteer".to_string(),
            ..Default::default()
        })
        .unwrap();
        let current = db
            .add_experience(id, &ExperienceInput {
                company_name: "New Co".to_string(),
                position: "Engineer".to_string(),
                start_date: date(2022, 1, 1),
                end_date: date(2023, 1, 1),
                is_current: true,
                ..Default::default()
            })
            .unwrap();
        assert!(current.end_date.is_none());

        let names: Vec<_> = db
            .list_experiences(id)
            .unwrap()
            .into_iter()
            .map(|e| e.company_name)
            .collect();
        assert_eq!(names, vec!["New Co", "Old Co", "Undated"]);
    }

    #[test]
    fn test_experience_validation() {
        let db = testing::db();
        let id = testing::seeker(&db, "a@example.com");

        let missing = db.add_experience(id, &ExperienceInput {
            company_name: "Acme".to_string(),
            ..Default::default()
        });
        assert!(missing.is_err());

        let backwards = db.add_experience(id, &ExperienceInput {
            company_name: "Acme".to_string(),
            position: "Dev".to_string(),
            start_date: date(2020, 1, 1),
            end_date: date(2019, 1, 1),
            ..Default::default()
        });
        assert!(backwards.is_err());
    }

    #[test]
    fn test_delete_cv_entries_only_by_owner() {
        let db = testing::db();
        let me = testing::seeker(&db, "me@example.com");
        let other = testing::seeker(&db, "other@example.com");

        let exp = db
            .add_experience(me, &ExperienceInput {
                company_name: "Acme".to_string(),
                position: "Dev".to_string(),
                ..Default::default()
            })
            .unwrap();
        let edu = db
            .add_education(me, &EducationInput {
                school_name: "METU".to_string(),
                degree: Some("BSc".to_string()),
                ..Default::default()
            })
            .unwrap();

        let err = db.delete_experience(other, exp.id).unwrap_err();
        assert_eq!(
            err.downcast_ref::<BoardError>(),
            Some(&BoardError::Forbidden("Experience"))
        );
        let err = db.delete_education(other, edu.id).unwrap_err();
        assert_eq!(
            err.downcast_ref::<BoardError>(),
            Some(&BoardError::Forbidden("Education"))
        );

        db.delete_experience(me, exp.id).unwrap();
        db.delete_education(me, edu.id).unwrap();
        let err = db.delete_experience(me, exp.id).unwrap_err();
        assert_eq!(
            err.downcast_ref::<BoardError>(),
            Some(&BoardError::not_found("Experience", exp.id))
        );

        let public = db.public_profile(me).unwrap();
        assert!(public.experiences.is_empty());
        assert!(public.education.is_empty());
    }

    #[test]
    fn test_upload_avatar_sets_url() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ImageStore::new(dir.path().to_path_buf(), "https://cdn.test");
        let db = testing::db();
        let id = testing::seeker(&db, "a@example.com");

        let url = db
            .upload_avatar(&store, id, &crate::storage::tests::tiny_png())
            .unwrap();
        assert_eq!(url, format!("https://cdn.test/images/{id}/avatar.png"));
        assert_eq!(
            db.get_profile(id).unwrap().unwrap().avatar_url.as_deref(),
            Some(url.as_str())
        );

        let err = db.upload_avatar(&store, id, b"plain text").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BoardError>(),
            Some(BoardError::InvalidImage(_))
        ));
    }
}
