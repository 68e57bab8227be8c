//! Customer consignment submissions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::vehicle::{normalize_vin, validate_year};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsignmentStatus {
    Pending,
    Approved,
    Rejected,
}

impl ConsignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsignmentStatus::Pending => "pending",
            ConsignmentStatus::Approved => "approved",
            ConsignmentStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for ConsignmentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ConsignmentStatus::Pending),
            "approved" => Ok(ConsignmentStatus::Approved),
            "rejected" => Ok(ConsignmentStatus::Rejected),
            other => Err(Error::InvalidInput(format!("Unknown consignment status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsignmentSubmission {
    pub id: Uuid,
    pub owner_name: String,
    pub owner_email: String,
    pub owner_phone: Option<String>,
    pub vin: String,
    pub year: i32,
    pub make: String,
    pub model: String,
    pub trim: Option<String>,
    pub mileage: i64,
    pub asking_price: i64,
    pub condition: Option<String>,
    pub notes: Option<String>,
    pub photo_urls: Vec<String>,
    pub status: ConsignmentStatus,
    pub review_note: Option<String>,
    pub vehicle_id: Option<Uuid>,
    pub submitted_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl ConsignmentSubmission {
    /// Only pending submissions can be approved or rejected
    pub fn ensure_reviewable(&self) -> Result<()> {
        if self.status != ConsignmentStatus::Pending {
            return Err(Error::Conflict(format!(
                "Consignment {} was already {}",
                self.id,
                self.status.as_str()
            )));
        }
        Ok(())
    }
}

/// Public submission form
#[derive(Debug, Clone, Deserialize)]
pub struct NewConsignment {
    pub owner_name: String,
    pub owner_email: String,
    pub owner_phone: Option<String>,
    pub vin: String,
    pub year: i32,
    pub make: String,
    pub model: String,
    pub trim: Option<String>,
    pub mileage: i64,
    pub asking_price: i64,
    pub condition: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub photo_urls: Vec<String>,
}

impl NewConsignment {
    pub fn into_submission(self, now: DateTime<Utc>) -> Result<ConsignmentSubmission> {
        let owner_name = self.owner_name.trim().to_string();
        if owner_name.is_empty() {
            return Err(Error::InvalidInput("Owner name is required".to_string()));
        }
        let owner_email = self.owner_email.trim().to_ascii_lowercase();
        if !looks_like_email(&owner_email) {
            return Err(Error::InvalidInput(format!("Invalid email: {}", owner_email)));
        }
        let vin = normalize_vin(&self.vin)?;
        validate_year(self.year, now)?;
        if self.make.trim().is_empty() || self.model.trim().is_empty() {
            return Err(Error::InvalidInput("Make and model are required".to_string()));
        }
        if self.mileage < 0 {
            return Err(Error::InvalidInput("Mileage cannot be negative".to_string()));
        }
        if self.asking_price <= 0 {
            return Err(Error::InvalidInput("Asking price must be positive".to_string()));
        }

        Ok(ConsignmentSubmission {
            id: Uuid::new_v4(),
            owner_name,
            owner_email,
            owner_phone: self.owner_phone.filter(|p| !p.trim().is_empty()),
            vin,
            year: self.year,
            make: self.make.trim().to_string(),
            model: self.model.trim().to_string(),
            trim: self.trim.filter(|t| !t.trim().is_empty()),
            mileage: self.mileage,
            asking_price: self.asking_price,
            condition: self.condition,
            notes: self.notes,
            photo_urls: self.photo_urls,
            status: ConsignmentStatus::Pending,
            review_note: None,
            vehicle_id: None,
            submitted_at: now,
            reviewed_at: None,
        })
    }
}

fn looks_like_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> NewConsignment {
        NewConsignment {
            owner_name: "Pat Doe".to_string(),
            owner_email: "Pat@Example.com ".to_string(),
            owner_phone: Some("".to_string()),
            vin: "11111111111111111".to_string(),
            year: 2015,
            make: "Honda".to_string(),
            model: "Civic".to_string(),
            trim: None,
            mileage: 90_000,
            asking_price: 9_000,
            condition: Some("good".to_string()),
            notes: None,
            photo_urls: vec!["https://img.example/1.jpg".to_string()],
        }
    }

    #[test]
    fn test_submission_is_pending_and_normalized() {
        let sub = form().into_submission(Utc::now()).unwrap();
        assert_eq!(sub.status, ConsignmentStatus::Pending);
        assert_eq!(sub.owner_email, "pat@example.com");
        assert_eq!(sub.owner_phone, None);
        assert!(sub.ensure_reviewable().is_ok());
    }

    #[test]
    fn test_submission_validation() {
        let mut bad = form();
        bad.owner_email = "nobody".to_string();
        assert!(bad.into_submission(Utc::now()).is_err());

        let mut bad = form();
        bad.asking_price = 0;
        assert!(bad.into_submission(Utc::now()).is_err());
    }

    #[test]
    fn test_reviewed_submission_not_reviewable() {
        let mut sub = form().into_submission(Utc::now()).unwrap();
        sub.status = ConsignmentStatus::Rejected;
        assert!(matches!(sub.ensure_reviewable(), Err(Error::Conflict(_))));
    }
}
