use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

use crate::providers::{FAL, FLUX, GEMINI, IDEOGRAM, OPENAI, REPLICATE, STABILITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UseCase {
    Logo,
    TextHeavy,
    Photorealistic,
    Carousel,
    QuickDraft,
    PostProcess,
}

impl UseCase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Logo => "logo",
            Self::TextHeavy => "text-heavy",
            Self::Photorealistic => "photorealistic",
            Self::Carousel => "carousel",
            Self::QuickDraft => "quick-draft",
            Self::PostProcess => "post-process",
        }
    }
}

impl fmt::Display for UseCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    pub phrase: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UseCaseSpec {
    pub use_case: UseCase,
    pub keywords: Vec<Keyword>,
    pub preferred_providers: Vec<String>,
}

/// Static policy table: which words point at which use case, and which
/// providers handle that use case best. Iteration order is the tie-break
/// order for equally scored use cases.
#[derive(Debug, Clone)]
pub struct UseCaseCatalog {
    entries: IndexMap<UseCase, UseCaseSpec>,
}

impl UseCaseCatalog {
    pub fn new(entries: Option<IndexMap<UseCase, UseCaseSpec>>) -> Self {
        Self {
            entries: entries.unwrap_or_else(default_use_cases),
        }
    }

    pub fn get(&self, use_case: UseCase) -> Option<&UseCaseSpec> {
        self.entries.get(&use_case)
    }

    pub fn list(&self) -> impl Iterator<Item = &UseCaseSpec> {
        self.entries.values()
    }

    pub fn preferred_providers(&self, use_case: UseCase) -> &[String] {
        self.get(use_case)
            .map(|spec| spec.preferred_providers.as_slice())
            .unwrap_or_default()
    }
}

impl Default for UseCaseCatalog {
    fn default() -> Self {
        Self::new(None)
    }
}

fn default_use_cases() -> IndexMap<UseCase, UseCaseSpec> {
    let mut map = IndexMap::new();

    let mut insert = |use_case: UseCase, keywords: &[(&str, f64)], preferred: &[&str]| {
        map.insert(
            use_case,
            UseCaseSpec {
                use_case,
                keywords: keywords
                    .iter()
                    .map(|(phrase, weight)| Keyword {
                        phrase: (*phrase).to_string(),
                        weight: *weight,
                    })
                    .collect(),
                preferred_providers: preferred.iter().map(|item| (*item).to_string()).collect(),
            },
        );
    };

    insert(
        UseCase::Logo,
        &[
            ("logo", 1.0),
            ("wordmark", 1.0),
            ("logotype", 1.0),
            ("emblem", 0.8),
            ("monogram", 0.8),
            ("favicon", 0.8),
            ("brand", 0.6),
            ("branding", 0.6),
            ("brand identity", 0.9),
            ("icon", 0.6),
            ("app icon", 0.9),
            ("mascot", 0.5),
            ("badge", 0.5),
        ],
        &[IDEOGRAM, OPENAI, FLUX],
    );
    insert(
        UseCase::TextHeavy,
        &[
            ("typography", 1.0),
            ("lettering", 0.9),
            ("infographic", 0.9),
            ("headline", 0.8),
            ("poster", 0.7),
            ("flyer", 0.7),
            ("quote", 0.7),
            ("text", 0.6),
            ("banner", 0.6),
            ("caption", 0.6),
            ("words", 0.6),
            ("menu", 0.5),
            ("sign", 0.5),
            ("title", 0.5),
        ],
        &[IDEOGRAM, OPENAI, GEMINI],
    );
    insert(
        UseCase::Photorealistic,
        &[
            ("photorealistic", 1.0),
            ("hyperrealistic", 1.0),
            ("dslr", 1.0),
            ("lifelike", 0.9),
            ("35mm", 0.9),
            ("product shot", 0.9),
            ("photograph", 0.8),
            ("realistic", 0.8),
            ("headshot", 0.8),
            ("studio lighting", 0.8),
            ("photo", 0.7),
            ("portrait", 0.6),
            ("cinematic", 0.6),
            ("bokeh", 0.6),
        ],
        &[FLUX, GEMINI, STABILITY],
    );
    insert(
        UseCase::Carousel,
        &[
            ("carousel", 1.0),
            ("consistent style", 0.9),
            ("slides", 0.8),
            ("storyboard", 0.8),
            ("multiple images", 0.8),
            ("slide", 0.7),
            ("instagram post", 0.7),
            ("series", 0.6),
            ("sequence", 0.6),
            ("set of", 0.5),
        ],
        &[GEMINI, FLUX, OPENAI],
    );
    insert(
        UseCase::QuickDraft,
        &[
            ("draft", 0.9),
            ("sketch", 0.8),
            ("wireframe", 0.8),
            ("quick", 0.7),
            ("rough", 0.7),
            ("placeholder", 0.7),
            ("thumbnail", 0.6),
            ("mockup", 0.6),
            ("fast", 0.6),
            ("concept", 0.5),
            ("iteration", 0.5),
        ],
        &[FAL, REPLICATE, STABILITY],
    );
    insert(
        UseCase::PostProcess,
        &[
            ("upscale", 1.0),
            ("remove background", 1.0),
            ("background removal", 1.0),
            ("inpaint", 1.0),
            ("outpaint", 1.0),
            ("retouch", 0.9),
            ("colorize", 0.9),
            ("restore", 0.8),
            ("sharpen", 0.8),
            ("enhance", 0.7),
            ("edit", 0.6),
            ("fix", 0.5),
        ],
        &[STABILITY, OPENAI, FAL],
    );

    map
}
