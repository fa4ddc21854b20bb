//! Model version lifecycle stages

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle label of a model version.
///
/// Any stage may move to any other stage; there is no terminal stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Registered, not yet promoted
    #[default]
    None,
    /// Under validation
    Staging,
    /// Serving
    Production,
    /// Retired; the only stage that allows deleting the model
    Archived,
}

impl Stage {
    /// All stages in lifecycle order
    pub const ALL: [Self; 4] = [Self::None, Self::Staging, Self::Production, Self::Archived];

    /// Canonical name (`None`, `Staging`, `Production`, `Archived`)
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Staging => "Staging",
            Self::Production => "Production",
            Self::Archived => "Archived",
        }
    }

    /// Whether a version in this stage blocks deleting its model
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Archived)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = Error;

    /// Case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidStage(s.to_string()))
    }
}
