use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tracing::info;

use crate::db::rows::{self, COMPANY_COLUMNS};
use crate::db::Database;
use crate::error::{is_unique_violation, BoardError};
use crate::models::{non_blank, Company, CompanyInput, Role};
use crate::storage::{validate_image, ImageStore};

fn validate(input: &CompanyInput) -> Result<(String, Option<String>), BoardError> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(BoardError::validation("Company name is required"));
    }
    let website = non_blank(input.website.as_deref());
    if let Some(site) = &website {
        if !(site.starts_with("http://") || site.starts_with("https://")) {
            return Err(BoardError::validation("Website must start with http:// or https://"));
        }
    }
    Ok((name.to_string(), website))
}

impl Database {
    pub fn create_company(&self, owner_id: i64, input: &CompanyInput) -> Result<Company> {
        self.require_role(owner_id, Role::Employer)?;
        let (name, website) = validate(input)?;

        let now = Utc::now();
        let inserted = self.conn.execute(
            "INSERT INTO companies (owner_id, name, sector, location, website, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                owner_id,
                name,
                non_blank(input.sector.as_deref()),
                non_blank(input.location.as_deref()),
                website,
                non_blank(input.description.as_deref()),
                now
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(BoardError::CompanyExists.into()),
            Err(e) => return Err(e.into()),
        }

        let id = self.conn.last_insert_rowid();
        info!(owner_id, company_id = id, name = %name, "Company created");
        self.get_company(id)?
            .ok_or_else(|| BoardError::not_found("Company", id).into())
    }

    pub fn update_company(&self, owner_id: i64, input: &CompanyInput) -> Result<Company> {
        let company = self.require_company(owner_id)?;
        let (name, website) = validate(input)?;

        self.conn.execute(
            "UPDATE companies SET name = ?1, sector = ?2, location = ?3, website = ?4, description = ?5
             WHERE id = ?6",
            params![
                name,
                non_blank(input.sector.as_deref()),
                non_blank(input.location.as_deref()),
                website,
                non_blank(input.description.as_deref()),
                company.id
            ],
        )?;

        info!(owner_id, company_id = company.id, "Company updated");
        self.get_company(company.id)?
            .ok_or_else(|| BoardError::not_found("Company", company.id).into())
    }

    pub fn get_company(&self, id: i64) -> Result<Option<Company>> {
        self.conn
            .query_row(
                &format!("SELECT {COMPANY_COLUMNS} FROM companies c WHERE c.id = ?1"),
                [id],
                |row| rows::company(row, 0),
            )
            .optional()
            .context("Failed to load company")
    }

    pub fn company_for_owner(&self, owner_id: i64) -> Result<Option<Company>> {
        self.conn
            .query_row(
                &format!("SELECT {COMPANY_COLUMNS} FROM companies c WHERE c.owner_id = ?1"),
                [owner_id],
                |row| rows::company(row, 0),
            )
            .optional()
            .context("Failed to load company")
    }

    /// The employer's company, or the error telling them to create one.
    pub fn require_company(&self, owner_id: i64) -> Result<Company> {
        self.require_role(owner_id, Role::Employer)?;
        self.company_for_owner(owner_id)?
            .ok_or_else(|| BoardError::NoCompany.into())
    }

    pub fn upload_logo(&self, store: &ImageStore, owner_id: i64, bytes: &[u8]) -> Result<String> {
        let company = self.require_company(owner_id)?;
        let ext = validate_image(bytes)?;
        let key = format!("{owner_id}/company-logo.{ext}");
        store.upload(&key, bytes, true)?;
        let url = store.public_url(&key);

        self.conn.execute(
            "UPDATE companies SET logo_url = ?1 WHERE id = ?2",
            params![url, company.id],
        )?;
        info!(owner_id, company_id = company.id, "Company logo uploaded");
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing;

    #[test]
    fn test_one_company_per_employer() {
        let db = testing::db();
        let owner = testing::employer_with_company(&db, "boss@example.com", "Kafkas Ltd");

        let err = db
            .create_company(owner, &CompanyInput {
                name: "Second".to_string(),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.downcast_ref::<BoardError>(), Some(&BoardError::CompanyExists));
        assert_eq!(db.company_for_owner(owner).unwrap().unwrap().name, "Kafkas Ltd");
    }

    #[test]
    fn test_seekers_cannot_create_companies() {
        let db = testing::db();
        let seeker = testing::seeker(&db, "s@example.com");
        let err = db
            .create_company(seeker, &CompanyInput {
                name: "Nope".to_string(),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<BoardError>(),
            Some(&BoardError::WrongRole(Role::Employer))
        );
    }

    #[test]
    fn test_update_company_and_validation() {
        let db = testing::db();
        let owner = testing::employer_with_company(&db, "boss@example.com", "Kafkas Ltd");

        let bad = db.update_company(owner, &CompanyInput {
            name: "  ".to_string(),
            ..Default::default()
        });
        assert!(bad.is_err());
        let bad = db.update_company(owner, &CompanyInput {
            name: "Kafkas".to_string(),
            website: Some("kafkas.example".to_string()),
            ..Default::default()
        });
        assert!(bad.is_err());

        let updated = db
            .update_company(owner, &CompanyInput {
                name: " Kafkas Group ".to_string(),
                sector: Some("Logistics".to_string()),
                website: Some("https://kafkas.example".to_string()),
                description: Some("".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(updated.name, "Kafkas Group");
        assert_eq!(updated.sector.as_deref(), Some("Logistics"));
        assert!(updated.description.is_none());
    }

    #[test]
    fn test_employer_without_company() {
        let db = testing::db();
        let id = testing::account(&db, "boss@example.com");
        db.set_role(id, Role::Employer).unwrap();
        let err = db.require_company(id).unwrap_err();
        assert_eq!(err.downcast_ref::<BoardError>(), Some(&BoardError::NoCompany));
    }

    #[test]
    fn test_upload_logo() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ImageStore::new(dir.path().to_path_buf(), "https://cdn.test");
        let db = testing::db();
        let owner = testing::employer_with_company(&db, "boss@example.com", "Kafkas Ltd");

        let url = db
            .upload_logo(&store, owner, &crate::storage::tests::tiny_png())
            .unwrap();
        assert_eq!(url, format!("https://cdn.test/images/{owner}/company-logo.png"));
        let company = db.company_for_owner(owner).unwrap().unwrap();
        assert_eq!(company.logo_url.as_deref(), Some(url.as_str()));
    }
}
