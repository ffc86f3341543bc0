//! Messages and keyboards shown to submitters at each step of the form.

use std::time::Duration;

use super::model::{Draft, Record};
use super::state::FormStep;
use crate::channels::{Keyboard, OutgoingResponse};

pub const WELCOME: &str = "Hello! This bot collects data about educational institutions \
for the sanitary-epidemiological service.\nPlease answer a few questions.";

pub const START_OVER: &str = "Something went wrong. Let's start over.";

pub const PHOTO_RETRY: &str =
    "Could not save the photo. Please send it again or skip this step.";

pub const SAVE_SUCCESS: &str = "Thank you! Your data has been submitted.";

pub const SAVE_HINT: &str = "Press \"📋 My data\" to check what was saved.";

pub const SAVE_FAILED: &str =
    "Your data could not be saved right now. Please press Confirm again in a moment.";

pub const RECORD_NOT_FOUND: &str = "No data found.";

pub const UNAVAILABLE: &str = "The service is temporarily unavailable. Please try again later.";

/// Prompt asking for the input `step` expects.
///
/// `Confirming` shows the draft summary.
pub fn step_prompt(step: FormStep, draft: &Draft) -> OutgoingResponse {
    match step {
        FormStep::AwaitingContact => {
            OutgoingResponse::text("First, please share your phone number.")
                .with_keyboard(Keyboard::Contact)
        }
        FormStep::AwaitingInstitutionType => {
            OutgoingResponse::text("Thank you! Now choose the type of institution.")
                .with_keyboard(Keyboard::InstitutionType)
        }
        FormStep::AwaitingInstitutionName => {
            OutgoingResponse::text("Enter the name of the institution.")
                .with_keyboard(Keyboard::Remove)
        }
        FormStep::AwaitingAddress => OutgoingResponse::text(
            "Enter the address of the institution (street, building, district).",
        ),
        FormStep::AwaitingLandmark => {
            OutgoingResponse::text("Enter a landmark (for example, \"near the market\").")
        }
        FormStep::AwaitingLocation => {
            OutgoingResponse::text("Now send the location of the institution.")
                .with_keyboard(Keyboard::Location)
        }
        FormStep::AwaitingPhoto => {
            OutgoingResponse::text("Send a photo of the institution or skip this step.")
                .with_keyboard(Keyboard::Photo)
        }
        FormStep::Confirming => {
            OutgoingResponse::text(draft.summary())
                .plain()
                .with_keyboard(Keyboard::Confirmation)
        }
    }
}

/// Prompt after the submitter asked to re-enter the institution details.
pub fn restart_prompt() -> OutgoingResponse {
    OutgoingResponse::text("Let's start again from the institution type.")
        .with_keyboard(Keyboard::InstitutionType)
}

/// Explanation shown when the cooldown blocks a new submission.
pub fn cooldown_message(remaining: Duration) -> OutgoingResponse {
    OutgoingResponse::text(format!(
        "You have already submitted data recently. You can submit again in {}.",
        format_remaining(remaining)
    ))
    .with_keyboard(Keyboard::MainMenu)
}

pub fn saved(record: &Record) -> Vec<OutgoingResponse> {
    vec![
        OutgoingResponse::text(format!("{SAVE_SUCCESS} (No. {})", record.id)),
        OutgoingResponse::text(SAVE_HINT).with_keyboard(Keyboard::MainMenu),
    ]
}

pub fn my_data(record: Option<&Record>) -> OutgoingResponse {
    let reply = match record {
        Some(record) => OutgoingResponse::text(record.summary()).plain(),
        None => OutgoingResponse::text(RECORD_NOT_FOUND),
    };
    reply.with_keyboard(Keyboard::MainMenu)
}

/// `"5 h 3 min"`, rounding partial minutes up.
pub fn format_remaining(remaining: Duration) -> String {
    let total_minutes = remaining.as_secs().div_ceil(60);
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    match (hours, minutes) {
        (0, m) => format!("{m} min"),
        (h, 0) => format!("{h} h"),
        (h, m) => format!("{h} h {m} min"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_formats_hours_and_minutes() {
        assert_eq!(format_remaining(Duration::from_secs(5 * 3600 + 180)), "5 h 3 min");
        assert_eq!(format_remaining(Duration::from_secs(2 * 3600)), "2 h");
        assert_eq!(format_remaining(Duration::from_secs(59)), "1 min");
        assert_eq!(format_remaining(Duration::from_secs(24 * 3600 - 1)), "24 h");
    }

    #[test]
    fn each_step_prompt_carries_the_matching_keyboard() {
        let draft = Draft::default();
        assert_eq!(
            step_prompt(FormStep::AwaitingContact, &draft).keyboard,
            Some(Keyboard::Contact)
        );
        assert_eq!(
            step_prompt(FormStep::AwaitingInstitutionType, &draft).keyboard,
            Some(Keyboard::InstitutionType)
        );
        assert_eq!(
            step_prompt(FormStep::AwaitingLocation, &draft).keyboard,
            Some(Keyboard::Location)
        );
        assert_eq!(
            step_prompt(FormStep::AwaitingPhoto, &draft).keyboard,
            Some(Keyboard::Photo)
        );
        assert_eq!(
            step_prompt(FormStep::Confirming, &draft).keyboard,
            Some(Keyboard::Confirmation)
        );
    }

    #[test]
    fn missing_record_says_not_found() {
        assert_eq!(my_data(None).content, RECORD_NOT_FOUND);
    }

    #[test]
    fn summaries_echoing_user_text_are_sent_plain() {
        let draft = Draft {
            institution_name: Some("School_No_12".into()),
            ..Draft::default()
        };
        let reply = step_prompt(FormStep::Confirming, &draft);
        assert!(reply.content.contains("School_No_12"));
        assert!(!reply.markdown);

        assert!(step_prompt(FormStep::AwaitingContact, &draft).markdown);
        assert!(my_data(None).markdown);
    }
}
