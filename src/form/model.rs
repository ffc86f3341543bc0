//! Institution record and draft data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SubmissionError;

/// Kind of educational institution being registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstitutionCategory {
    School,
    College,
    University,
}

impl InstitutionCategory {
    pub const ALL: [InstitutionCategory; 3] = [Self::School, Self::College, Self::University];

    /// Canonical string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::School => "School",
            Self::College => "College",
            Self::University => "University",
        }
    }
}

impl std::fmt::Display for InstitutionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InstitutionCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "School" => Ok(Self::School),
            "College" => Ok(Self::College),
            "University" => Ok(Self::University),
            other => Err(format!("unknown institution category: {other}")),
        }
    }
}

/// Identity metadata captured from the event envelope, never typed by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitterIdentity {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Platform handle with a leading `@`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

impl SubmitterIdentity {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            display_name: None,
            handle: None,
        }
    }

    /// Build from platform first/last name and username.
    pub fn from_parts(
        id: i64,
        first_name: Option<&str>,
        last_name: Option<&str>,
        username: Option<&str>,
    ) -> Self {
        let display_name = [first_name, last_name]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            id,
            display_name: (!display_name.is_empty()).then_some(display_name),
            handle: username
                .filter(|u| !u.is_empty())
                .map(|u| format!("@{}", u.trim_start_matches('@'))),
        }
    }
}

/// A partially filled record held by an active session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub submitter_id: i64,
    pub display_name: Option<String>,
    pub handle: Option<String>,
    pub contact_number: Option<String>,
    pub institution_category: Option<InstitutionCategory>,
    pub institution_name: Option<String>,
    pub address: Option<String>,
    pub landmark: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub photo_reference: Option<String>,
}

impl Draft {
    pub fn new(identity: &SubmitterIdentity) -> Self {
        Self {
            submitter_id: identity.id,
            display_name: identity.display_name.clone(),
            handle: identity.handle.clone(),
            ..Default::default()
        }
    }

    /// Drop everything from the institution category onward, keeping contact
    /// and identity.
    pub fn clear_institution(&mut self) {
        self.institution_category = None;
        self.institution_name = None;
        self.address = None;
        self.landmark = None;
        self.latitude = None;
        self.longitude = None;
        self.photo_reference = None;
    }

    /// Check that every required field is present.
    pub fn require_complete(&self) -> Result<(), SubmissionError> {
        let missing = if self.contact_number.is_none() {
            Some("contact_number")
        } else if self.institution_category.is_none() {
            Some("institution_category")
        } else if self.institution_name.is_none() {
            Some("institution_name")
        } else if self.address.is_none() {
            Some("address")
        } else if self.landmark.is_none() {
            Some("landmark")
        } else if self.latitude.is_none() {
            Some("latitude")
        } else if self.longitude.is_none() {
            Some("longitude")
        } else {
            None
        };
        match missing {
            Some(field) => Err(SubmissionError::Incomplete { field }),
            None => Ok(()),
        }
    }

    /// Human-readable summary shown before confirmation.
    pub fn summary(&self) -> String {
        let coords = match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => format!("{lat}, {lon}"),
            _ => "—".to_string(),
        };
        format!(
            "Please check that everything is correct:\n\
             Type: {}\n\
             Name: {}\n\
             Address: {}\n\
             Landmark: {}\n\
             Coordinates: {}\n\
             Phone: {}\n\
             Photo: {}",
            self.institution_category
                .map(|c| c.to_string())
                .unwrap_or_else(|| "—".into()),
            self.institution_name.as_deref().unwrap_or("—"),
            self.address.as_deref().unwrap_or("—"),
            self.landmark.as_deref().unwrap_or("—"),
            coords,
            self.contact_number.as_deref().unwrap_or("—"),
            if self.photo_reference.is_some() { "attached" } else { "none" },
        )
    }
}

/// A finalized, stored institution record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub submitter_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    pub contact_number: String,
    pub institution_category: InstitutionCategory,
    pub institution_name: String,
    pub address: String,
    pub landmark: String,
    /// Absent (not zero) when the stored row lacks a coordinate.
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Record {
    /// Whether a non-empty photo reference is attached.
    pub fn has_photo(&self) -> bool {
        self.photo_reference
            .as_deref()
            .is_some_and(|p| !p.trim().is_empty())
    }

    /// Summary shown when a submitter asks to view their data.
    pub fn summary(&self) -> String {
        let coords = match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => format!("{lat}, {lon}"),
            _ => "—".to_string(),
        };
        format!(
            "Your data:\n\
             Type: {}\n\
             Name: {}\n\
             Address: {}\n\
             Landmark: {}\n\
             Coordinates: {}\n\
             Phone: {}\n\
             Date: {}",
            self.institution_category,
            self.institution_name,
            self.address,
            self.landmark,
            coords,
            self.contact_number,
            self.created_at.format("%d.%m.%Y %H:%M"),
        )
    }
}
