//! Named keyboard sets and the button labels that map back to intents.

use crate::form::input::Button;
use crate::form::model::InstitutionCategory;

/// One key on a keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// Asks the client to share the user's phone contact.
    RequestContact,
    /// Asks the client to share a location.
    RequestLocation,
    Command(Button),
}

impl Key {
    pub fn label(&self) -> &'static str {
        match self {
            Self::RequestContact => "📱 Share contact",
            Self::RequestLocation => "📍 Share location",
            Self::Command(button) => button.label(),
        }
    }
}

/// The affordance set shown with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyboard {
    Contact,
    InstitutionType,
    Location,
    Photo,
    Confirmation,
    MainMenu,
    OperatorPanel,
    BackToPanel,
    /// Hide any custom keyboard.
    Remove,
}

impl Keyboard {
    /// Rows of keys; empty for [`Keyboard::Remove`].
    pub fn rows(&self) -> Vec<Vec<Key>> {
        use Button::*;
        match self {
            Self::Contact => vec![vec![Key::RequestContact]],
            Self::InstitutionType => InstitutionCategory::ALL
                .iter()
                .map(|c| vec![Key::Command(Category(*c))])
                .collect(),
            Self::Location => vec![vec![Key::RequestLocation]],
            Self::Photo => vec![vec![Key::Command(SkipPhoto)]],
            Self::Confirmation => vec![vec![Key::Command(Confirm), Key::Command(Restart)]],
            Self::MainMenu => vec![
                vec![Key::Command(AddInstitution)],
                vec![Key::Command(ViewMyData)],
            ],
            Self::OperatorPanel => vec![
                vec![Key::Command(ExportSpreadsheet), Key::Command(ExportDocument)],
                vec![Key::Command(Statistics)],
                vec![Key::Command(MainMenu)],
            ],
            Self::BackToPanel => vec![vec![Key::Command(OperatorPanel)]],
            Self::Remove => Vec::new(),
        }
    }
}

impl Button {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Category(InstitutionCategory::School) => "🏫 School",
            Self::Category(InstitutionCategory::College) => "🎓 College",
            Self::Category(InstitutionCategory::University) => "🏛 University",
            Self::SkipPhoto => "⏭ Skip photo",
            Self::Confirm => "✅ Confirm",
            Self::Restart => "🔄 Start over",
            Self::AddInstitution => "➕ Add institution",
            Self::ViewMyData => "📋 My data",
            Self::ExportSpreadsheet => "📊 Export spreadsheet",
            Self::ExportDocument => "📄 Export document",
            Self::Statistics => "📈 Statistics",
            Self::MainMenu => "🏠 Main menu",
            Self::OperatorPanel => "⚙️ Admin panel",
        }
    }

    /// Exact-match lookup of a button by its label.
    pub fn from_label(text: &str) -> Option<Button> {
        Self::all().into_iter().find(|b| b.label() == text)
    }

    fn all() -> [Button; 13] {
        use Button::*;
        [
            Category(InstitutionCategory::School),
            Category(InstitutionCategory::College),
            Category(InstitutionCategory::University),
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
        ]
    }
}
