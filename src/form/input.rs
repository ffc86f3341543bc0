//! Input intents: the closed set of tags the transport produces for the form.

use super::model::InstitutionCategory;

/// A button from one of the named keyboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Category(InstitutionCategory),
    SkipPhoto,
    Confirm,
    Restart,
    AddInstitution,
    ViewMyData,
    ExportSpreadsheet,
    ExportDocument,
    Statistics,
    MainMenu,
    OperatorPanel,
}

impl Button {
    /// Buttons that only operators may act on.
    pub fn is_operator_command(&self) -> bool {
        matches!(
            self,
            Self::ExportSpreadsheet
                | Self::ExportDocument
                | Self::Statistics
                | Self::MainMenu
                | Self::OperatorPanel
        )
    }
}

/// A classified inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// The `/start` command.
    Start,
    /// A shared phone contact.
    Contact { phone_number: String },
    /// A shared geographic point.
    Location { latitude: f64, longitude: f64 },
    /// An uploaded image, identified by the transport's file id.
    Photo { file_id: String },
    /// A press of a known keyboard button.
    Button(Button),
    /// Free text that is not a known button label.
    Text(String),
    /// Anything else (stickers, documents, ...).
    Unsupported(String),
}

impl Intent {
    /// Short description used in logs and `MalformedInput`.
    pub fn describe(&self) -> String {
        match self {
            Self::Start => "/start".into(),
            Self::Contact { .. } => "contact".into(),
            Self::Location { .. } => "location".into(),
            Self::Photo { .. } => "photo".into(),
            Self::Button(b) => format!("button {b:?}"),
            Self::Text(_) => "text".into(),
            Self::Unsupported(kind) => format!("unsupported {kind}"),
        }
    }
}
