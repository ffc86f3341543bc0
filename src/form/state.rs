//! Form state machine: tracks which step a submitter is on.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::input::{Button, Intent};
use super::model::{Draft, SubmitterIdentity};
use crate::error::MalformedInput;

/// The steps of the registration form.
///
/// Progresses linearly: AwaitingContact → AwaitingInstitutionType →
/// AwaitingInstitutionName → AwaitingAddress → AwaitingLandmark →
/// AwaitingLocation → AwaitingPhoto (optional) → Confirming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormStep {
    AwaitingContact,
    AwaitingInstitutionType,
    AwaitingInstitutionName,
    AwaitingAddress,
    AwaitingLandmark,
    AwaitingLocation,
    AwaitingPhoto,
    Confirming,
}

impl FormStep {
    /// Get the next step in the linear progression, if any.
    pub fn next(&self, photo_step: bool) -> Option<FormStep> {
        use FormStep::*;
        match self {
            AwaitingContact => Some(AwaitingInstitutionType),
            AwaitingInstitutionType => Some(AwaitingInstitutionName),
            AwaitingInstitutionName => Some(AwaitingAddress),
            AwaitingAddress => Some(AwaitingLandmark),
            AwaitingLandmark => Some(AwaitingLocation),
            AwaitingLocation if photo_step => Some(AwaitingPhoto),
            AwaitingLocation => Some(Confirming),
            AwaitingPhoto => Some(Confirming),
            Confirming => None,
        }
    }

    /// Check if a forward transition from `self` to `target` is valid.
    ///
    /// `Confirming → AwaitingInstitutionType` is the restart edge.
    pub fn can_transition_to(&self, target: FormStep, photo_step: bool) -> bool {
        self.next(photo_step) == Some(target)
            || (*self == FormStep::Confirming && target == FormStep::AwaitingInstitutionType)
    }
}

impl Default for FormStep {
    fn default() -> Self {
        Self::AwaitingContact
    }
}

impl std::fmt::Display for FormStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AwaitingContact => "awaiting_contact",
            Self::AwaitingInstitutionType => "awaiting_institution_type",
            Self::AwaitingInstitutionName => "awaiting_institution_name",
            Self::AwaitingAddress => "awaiting_address",
            Self::AwaitingLandmark => "awaiting_landmark",
            Self::AwaitingLocation => "awaiting_location",
            Self::AwaitingPhoto => "awaiting_photo",
            Self::Confirming => "confirming",
        };
        write!(f, "{s}")
    }
}

/// What the caller must do after a step was accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The session moved to the given step.
    Advanced(FormStep),
    /// A photo arrived; ingest it, then call [`FormSession::attach_photo`].
    PhotoReceived { file_id: String },
    /// The submitter confirmed; persist the draft.
    ConfirmRequested,
    /// The submitter asked to re-enter the institution details.
    Restarted,
}

/// One submitter's in-progress form.
#[derive(Debug, Clone)]
pub struct FormSession {
    pub step: FormStep,
    pub draft: Draft,
    /// Whether the optional photo step is part of this form.
    pub photo_step: bool,
    pub last_activity: Instant,
}

impl FormSession {
    pub fn new(identity: &SubmitterIdentity, photo_step: bool) -> Self {
        Self {
            step: FormStep::AwaitingContact,
            draft: Draft::new(identity),
            photo_step,
            last_activity: Instant::now(),
        }
    }

    /// Validate `intent` against the current step and apply it.
    ///
    /// Never advances on a mismatch; the draft is untouched when this returns
    /// `Err`.
    pub fn apply(
        &mut self,
        identity: &SubmitterIdentity,
        intent: &Intent,
    ) -> Result<StepOutcome, MalformedInput> {
        use FormStep::*;
        self.last_activity = Instant::now();

        match (self.step, intent) {
            (AwaitingContact, Intent::Contact { phone_number }) => {
                let phone = non_empty(phone_number).ok_or_else(|| self.malformed(intent))?;
                self.draft.submitter_id = identity.id;
                self.draft.display_name = identity.display_name.clone();
                self.draft.handle = identity.handle.clone();
                self.draft.contact_number = Some(phone);
                self.advance()
            }
            (AwaitingInstitutionType, Intent::Button(Button::Category(category))) => {
                self.draft.institution_category = Some(*category);
                self.advance()
            }
            (AwaitingInstitutionName, Intent::Text(text)) => {
                let text = non_empty(text).ok_or_else(|| self.malformed(intent))?;
                self.draft.institution_name = Some(text);
                self.advance()
            }
            (AwaitingAddress, Intent::Text(text)) => {
                let text = non_empty(text).ok_or_else(|| self.malformed(intent))?;
                self.draft.address = Some(text);
                self.advance()
            }
            (AwaitingLandmark, Intent::Text(text)) => {
                let text = non_empty(text).ok_or_else(|| self.malformed(intent))?;
                self.draft.landmark = Some(text);
                self.advance()
            }
            (
                AwaitingLocation,
                Intent::Location {
                    latitude,
                    longitude,
                },
            ) => {
                if !valid_coordinate(*latitude, *longitude) {
                    return Err(self.malformed(intent));
                }
                self.draft.latitude = Some(*latitude);
                self.draft.longitude = Some(*longitude);
                self.advance()
            }
            (AwaitingPhoto, Intent::Photo { file_id }) => Ok(StepOutcome::PhotoReceived {
                file_id: file_id.clone(),
            }),
            (AwaitingPhoto, Intent::Button(Button::SkipPhoto)) => {
                self.draft.photo_reference = None;
                self.advance()
            }
            (Confirming, Intent::Button(Button::Confirm)) => Ok(StepOutcome::ConfirmRequested),
            (Confirming, Intent::Button(Button::Restart)) => {
                self.move_to(AwaitingInstitutionType)?;
                self.draft.clear_institution();
                Ok(StepOutcome::Restarted)
            }
            _ => Err(self.malformed(intent)),
        }
    }

    /// Store an ingested photo reference and move on to confirmation.
    pub fn attach_photo(&mut self, reference: String) -> Result<FormStep, MalformedInput> {
        if self.step != FormStep::AwaitingPhoto {
            return Err(MalformedInput {
                step: self.step,
                input: "photo".into(),
            });
        }
        let step = self.move_to(FormStep::Confirming)?;
        self.draft.photo_reference = Some(reference);
        Ok(step)
    }

    fn advance(&mut self) -> Result<StepOutcome, MalformedInput> {
        let next = self.step.next(self.photo_step).ok_or(MalformedInput {
            step: self.step,
            input: "advance past final step".into(),
        })?;
        self.move_to(next).map(StepOutcome::Advanced)
    }

    fn move_to(&mut self, target: FormStep) -> Result<FormStep, MalformedInput> {
        if !self.step.can_transition_to(target, self.photo_step) {
            return Err(MalformedInput {
                step: self.step,
                input: format!("transition to {target}"),
            });
        }
        self.step = target;
        Ok(target)
    }

    fn malformed(&self, intent: &Intent) -> MalformedInput {
        MalformedInput {
            step: self.step,
            input: intent.describe(),
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn valid_coordinate(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}
