use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::catalog::{UseCase, UseCaseCatalog};
use crate::providers::{intersect_in_order, GENERIC_FALLBACK, GLOBAL_PREFERENCE};

/// Prompts scoring below this confidence are treated as generic.
pub const MIN_CONFIDENCE: f64 = 0.4;

/// Score at which confidence reaches 0.5; one strong keyword (weight 1.0)
/// lands at roughly 0.67.
const CONFIDENCE_HALF_SCORE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UseCaseMatch {
    pub use_case: UseCase,
    pub confidence: f64,
}

impl UseCaseMatch {
    pub fn confidence_pct(&self) -> u32 {
        (self.confidence * 100.0).round() as u32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderRecommendations {
    pub primary: Vec<String>,
    pub secondary: Vec<String>,
    pub reason: String,
    pub detected: Option<UseCaseMatch>,
}

#[derive(Debug, Clone, Copy)]
struct KeywordRef {
    use_case: usize,
    keyword: usize,
    weight: f64,
}

/// Keyword lookup built once from the catalog.
#[derive(Debug, Clone, Default)]
struct KeywordIndex {
    tokens: HashMap<String, Vec<KeywordRef>>,
    phrases: Vec<(String, KeywordRef)>,
}

impl KeywordIndex {
    fn build(catalog: &UseCaseCatalog) -> Self {
        let mut index = Self::default();
        for (use_case, spec) in catalog.list().enumerate() {
            for (keyword, entry) in spec.keywords.iter().enumerate() {
                let normalized = normalize_text(&entry.phrase);
                if normalized.is_empty() {
                    continue;
                }
                let reference = KeywordRef {
                    use_case,
                    keyword,
                    weight: entry.weight,
                };
                if normalized.contains(' ') {
                    index.phrases.push((format!(" {normalized} "), reference));
                } else {
                    index.tokens.entry(normalized).or_default().push(reference);
                }
            }
        }
        index
    }

    fn lookup(&self, token: &str) -> Option<&[KeywordRef]> {
        if let Some(found) = self.tokens.get(token) {
            return Some(found.as_slice());
        }
        let singular = token.strip_suffix('s').filter(|stem| stem.len() >= 3)?;
        self.tokens.get(singular).map(Vec::as_slice)
    }
}

#[derive(Debug, Clone)]
pub struct ProviderSelector {
    pub catalog: UseCaseCatalog,
    index: KeywordIndex,
}

impl ProviderSelector {
    pub fn new(catalog: Option<UseCaseCatalog>) -> Self {
        let catalog = catalog.unwrap_or_default();
        let index = KeywordIndex::build(&catalog);
        Self { catalog, index }
    }

    /// Scores `prompt` against every use case and returns the best one, if it
    /// clears [`MIN_CONFIDENCE`]. Ties go to the use case listed first.
    pub fn analyze_prompt(&self, prompt: &str) -> Option<UseCaseMatch> {
        let normalized = normalize_text(prompt);
        if normalized.is_empty() {
            return None;
        }

        let use_cases: Vec<UseCase> = self.catalog.list().map(|spec| spec.use_case).collect();
        let mut scores = vec![0.0f64; use_cases.len()];
        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        let mut record = |reference: &KeywordRef| {
            if seen.insert((reference.use_case, reference.keyword)) {
                scores[reference.use_case] += reference.weight;
            }
        };

        for token in normalized.split(' ') {
            if let Some(refs) = self.index.lookup(token) {
                refs.iter().for_each(&mut record);
            }
        }
        if !self.index.phrases.is_empty() {
            let padded = format!(" {normalized} ");
            for (phrase, reference) in &self.index.phrases {
                if padded.contains(phrase.as_str()) {
                    record(reference);
                }
            }
        }

        let mut best: Option<UseCaseMatch> = None;
        for (idx, score) in scores.into_iter().enumerate() {
            if score <= 0.0 {
                continue;
            }
            let confidence = score / (score + CONFIDENCE_HALF_SCORE);
            if best
                .map(|current| confidence > current.confidence)
                .unwrap_or(true)
            {
                best = Some(UseCaseMatch {
                    use_case: use_cases[idx],
                    confidence,
                });
            }
        }
        best.filter(|found| found.confidence >= MIN_CONFIDENCE)
    }

    pub fn select_provider<S: AsRef<str>>(
        &self,
        prompt: &str,
        available: &[S],
        requested: Option<&str>,
    ) -> Option<String> {
        if available.is_empty() {
            return None;
        }
        if let Some(requested) = requested {
            if available.iter().any(|name| name.as_ref() == requested) {
                return Some(requested.to_string());
            }
        }

        if let Some(found) = self.analyze_prompt(prompt) {
            let preferred = self.catalog.preferred_providers(found.use_case);
            if let Some(name) = preferred
                .iter()
                .find(|name| available.iter().any(|item| item.as_ref() == name.as_str()))
            {
                return Some(name.clone());
            }
        }

        intersect_in_order(GLOBAL_PREFERENCE, available)
            .into_iter()
            .next()
            .or_else(|| available.first().map(|name| name.as_ref().to_string()))
    }

    pub fn recommendations(&self, prompt: &str) -> ProviderRecommendations {
        let Some(found) = self.analyze_prompt(prompt) else {
            let primary: Vec<String> =
                GENERIC_FALLBACK.iter().map(|name| name.to_string()).collect();
            return ProviderRecommendations {
                secondary: remaining_providers(&primary),
                primary,
                reason: "No specific use case detected; using general-purpose providers"
                    .to_string(),
                detected: None,
            };
        };

        let primary = self.catalog.preferred_providers(found.use_case).to_vec();
        ProviderRecommendations {
            secondary: remaining_providers(&primary),
            primary,
            reason: format!(
                "Detected {} use case ({}% confidence)",
                found.use_case,
                found.confidence_pct()
            ),
            detected: Some(found),
        }
    }
}

impl Default for ProviderSelector {
    fn default() -> Self {
        Self::new(None)
    }
}

fn remaining_providers(primary: &[String]) -> Vec<String> {
    GLOBAL_PREFERENCE
        .iter()
        .filter(|name| !primary.iter().any(|item| item == *name))
        .map(|name| name.to_string())
        .collect()
}

/// Lowercases and replaces every non-alphanumeric run with a single space.
fn normalize_text(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|ch| if ch.is_alphanumeric() { ch } else { ' ' })
        .flat_map(char::to_lowercase)
        .collect();
    mapped.split_whitespace().collect::<Vec<&str>>().join(" ")
}

#[cfg(test)]
mod tests {
    use crate::providers::{GENERIC_FALLBACK, GLOBAL_PREFERENCE};
    use crate::usecases::catalog::UseCase;

    use super::{normalize_text, ProviderSelector, MIN_CONFIDENCE};

    fn all_providers() -> Vec<String> {
        GLOBAL_PREFERENCE.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn recognized_keywords_clear_half_confidence() {
        let selector = ProviderSelector::default();
        for (prompt, expected) in [
            ("logo", UseCase::Logo),
            ("a minimalist logo", UseCase::Logo),
            ("poster with bold typography", UseCase::TextHeavy),
            ("photorealistic cat", UseCase::Photorealistic),
            ("instagram carousel about coffee", UseCase::Carousel),
            ("quick draft of a castle", UseCase::QuickDraft),
            ("upscale this picture", UseCase::PostProcess),
        ] {
            let found = selector.analyze_prompt(prompt);
            let found = found.unwrap_or_else(|| panic!("no use case for {prompt:?}"));
            assert_eq!(found.use_case, expected, "prompt {prompt:?}");
            assert!(found.confidence >= 0.5, "prompt {prompt:?}");
        }
    }

    #[test]
    fn blank_and_symbol_prompts_have_no_use_case() {
        let selector = ProviderSelector::default();
        assert_eq!(selector.analyze_prompt(""), None);
        assert_eq!(selector.analyze_prompt("   "), None);
        assert_eq!(selector.analyze_prompt("!!! ??? ***"), None);
        assert_eq!(selector.analyze_prompt("something nice"), None);
    }

    #[test]
    fn more_matches_raise_confidence() {
        let selector = ProviderSelector::default();
        let single = selector.analyze_prompt("logo").map(|found| found.confidence);
        let double = selector
            .analyze_prompt("logo for my brand")
            .map(|found| found.confidence);
        assert!(double > single);
        assert!(double.unwrap_or_default() > 0.6);
        assert!(double.unwrap_or_default() < 1.0);
    }

    #[test]
    fn plural_and_punctuation_still_match() {
        let selector = ProviderSelector::default();
        let found = selector.analyze_prompt("Three LOGOS, please!");
        assert_eq!(found.map(|item| item.use_case), Some(UseCase::Logo));

        let found = selector.analyze_prompt("a Product-Shot of sneakers");
        assert_eq!(found.map(|item| item.use_case), Some(UseCase::Photorealistic));
    }

    #[test]
    fn repeated_keyword_counts_once() {
        let selector = ProviderSelector::default();
        let once = selector.analyze_prompt("logo");
        let repeated = selector.analyze_prompt("logo logo logo logo");
        assert_eq!(once, repeated);
    }

    #[test]
    fn filler_words_do_not_change_the_score() {
        let selector = ProviderSelector::default();
        assert_eq!(selector.analyze_prompt("the quick"), selector.analyze_prompt("quick"));
    }

    #[test]
    fn every_catalog_keyword_alone_clears_half_confidence() {
        let selector = ProviderSelector::default();
        for spec in selector.catalog.list() {
            for keyword in &spec.keywords {
                let found = selector.analyze_prompt(&keyword.phrase);
                let confidence = found.map(|item| item.confidence).unwrap_or_default();
                assert!(
                    confidence >= 0.5 && confidence >= MIN_CONFIDENCE,
                    "{} scored {confidence}",
                    keyword.phrase
                );
            }
        }
    }

    #[test]
    fn long_prompts_are_handled() {
        let selector = ProviderSelector::default();
        let prompt = "a calm landscape ".repeat(5000) + "with a logo";
        let found = selector.analyze_prompt(&prompt);
        assert_eq!(found.map(|item| item.use_case), Some(UseCase::Logo));
    }

    #[test]
    fn explicit_request_wins_when_available() {
        let selector = ProviderSelector::default();
        let providers = all_providers();
        for prompt in ["create a logo for my brand", "photorealistic portrait", ""] {
            assert_eq!(
                selector.select_provider(prompt, &providers, Some("replicate")),
                Some("replicate".to_string())
            );
        }
    }

    #[test]
    fn unavailable_request_falls_through_to_heuristic() {
        let selector = ProviderSelector::default();
        let providers = vec!["flux", "openai"];
        assert_eq!(
            selector.select_provider("photorealistic portrait", &providers, Some("ideogram")),
            Some("flux".to_string())
        );
    }

    #[test]
    fn empty_provider_set_selects_nothing() {
        let selector = ProviderSelector::default();
        let providers: Vec<String> = Vec::new();
        assert_eq!(selector.select_provider("a logo", &providers, None), None);
        assert_eq!(selector.select_provider("a logo", &providers, Some("openai")), None);
    }

    #[test]
    fn logo_prompt_prefers_logo_provider() {
        let selector = ProviderSelector::default();
        assert_eq!(
            selector.select_provider("create a logo for my brand", &all_providers(), None),
            Some("ideogram".to_string())
        );
    }

    #[test]
    fn falls_back_to_global_order() {
        let selector = ProviderSelector::default();
        // Logo providers are ideogram, openai, flux; none available here.
        let providers = vec!["replicate", "gemini"];
        assert_eq!(
            selector.select_provider("a logo", &providers, None),
            Some("gemini".to_string())
        );
        assert_eq!(
            selector.select_provider("something nice", &providers, None),
            Some("gemini".to_string())
        );
        let unknown = vec!["custom-provider"];
        assert_eq!(
            selector.select_provider("something nice", &unknown, None),
            Some("custom-provider".to_string())
        );
    }

    #[test]
    fn recommendations_for_detected_use_case() {
        let selector = ProviderSelector::default();
        let recs = selector.recommendations("photorealistic portrait");
        assert!(recs.primary.contains(&"flux".to_string()));
        assert!(recs.reason.contains("photorealistic"));
        let pct = recs
            .detected
            .map(|found| found.confidence_pct())
            .unwrap_or_default();
        assert!(recs.reason.contains(&format!("{pct}% confidence")));
        assert!(recs
            .secondary
            .iter()
            .all(|name| !recs.primary.contains(name)));
    }

    #[test]
    fn recommendations_without_use_case() {
        let selector = ProviderSelector::default();
        let recs = selector.recommendations("something nice");
        assert!(recs.reason.contains("No specific use case"));
        assert_eq!(recs.primary, GENERIC_FALLBACK.to_vec());
        assert_eq!(recs.detected, None);
        assert_eq!(recs.primary.len() + recs.secondary.len(), GLOBAL_PREFERENCE.len());
    }

    #[test]
    fn normalize_collapses_symbols() {
        assert_eq!(normalize_text("  Hello,   WORLD!! "), "hello world");
        assert_eq!(normalize_text("***"), "");
    }

    #[test]
    fn normalize_folds_non_ascii_capitals() {
        assert_eq!(normalize_text("ÉDIT this"), "édit this");
        assert_eq!(normalize_text("CAFÉ-Menü"), "café menü");
        let selector = ProviderSelector::default();
        let found = selector.analyze_prompt("ÜBER LOGO");
        assert_eq!(found.map(|item| item.use_case), Some(UseCase::Logo));
    }
}
