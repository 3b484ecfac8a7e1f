use std::fmt;

use serde::Serialize;

pub const OPENAI: &str = "openai";
pub const GEMINI: &str = "gemini";
pub const FLUX: &str = "flux";
pub const IDEOGRAM: &str = "ideogram";
pub const STABILITY: &str = "stability";
pub const FAL: &str = "fal";
pub const REPLICATE: &str = "replicate";

/// Provider order used when a prompt matches no use case, or when none of the
/// use case's preferred providers are available.
pub const GLOBAL_PREFERENCE: &[&str] = &[OPENAI, GEMINI, FLUX, IDEOGRAM, STABILITY, FAL, REPLICATE];

/// General-purpose providers recommended for prompts without a detected use case.
pub const GENERIC_FALLBACK: &[&str] = &[OPENAI, GEMINI, FLUX];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Generate,
    Edit,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Edit => "edit",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderCapabilities {
    pub generate: bool,
    pub edit: bool,
    pub models: Vec<String>,
    pub default_model: String,
    pub max_width: u32,
    pub max_height: u32,
}

impl ProviderCapabilities {
    pub fn supports(&self, operation: Operation) -> bool {
        match operation {
            Operation::Generate => self.generate,
            Operation::Edit => self.edit,
        }
    }

    pub fn knows_model(&self, model: &str) -> bool {
        self.models.iter().any(|item| item == model)
    }
}

/// Keeps `preferred` order, dropping anything not in `available`.
pub fn intersect_in_order<S: AsRef<str>>(preferred: &[&str], available: &[S]) -> Vec<String> {
    preferred
        .iter()
        .filter(|name| available.iter().any(|item| item.as_ref() == **name))
        .map(|name| (*name).to_string())
        .collect()
}
