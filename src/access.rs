//! Access policy: who may reach the operator commands.

use std::collections::HashSet;

use crate::error::ConfigError;
use crate::form::input::{Button, Intent};

/// Role of an inbound submitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Operator,
    Submitter,
}

/// Fixed set of privileged operator ids.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    operators: HashSet<i64>,
}

impl AccessPolicy {
    pub fn new(operators: impl IntoIterator<Item = i64>) -> Self {
        Self {
            operators: operators.into_iter().collect(),
        }
    }

    /// Parse a comma-separated id list such as `"123, 456"`.
    ///
    /// Blank entries are ignored; anything else that is not an integer is an
    /// error.
    pub fn parse(list: &str) -> Result<Self, ConfigError> {
        let ids = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<i64>().map_err(|e| ConfigError::InvalidValue {
                    key: "SES_ADMIN_IDS".into(),
                    message: format!("{s:?}: {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(ids))
    }

    pub fn is_privileged(&self, submitter_id: i64) -> bool {
        self.operators.contains(&submitter_id)
    }

    pub fn role(&self, submitter_id: i64) -> Role {
        if self.is_privileged(submitter_id) {
            Role::Operator
        } else {
            Role::Submitter
        }
    }

    /// The operator command carried by `intent`, if `submitter_id` may run it.
    ///
    /// Always `None` for non-privileged submitters.
    pub fn operator_command(&self, submitter_id: i64, intent: &Intent) -> Option<Button> {
        match intent {
            Intent::Button(button)
                if button.is_operator_command() && self.is_privileged(submitter_id) =>
            {
                Some(*button)
            }
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}
