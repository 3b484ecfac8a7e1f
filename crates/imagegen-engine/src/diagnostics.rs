use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use imagegen_contracts::providers::GLOBAL_PREFERENCE;
use imagegen_contracts::GenerateInput;

use crate::ImageProviderRegistry;

pub const DIAGNOSTIC_PROMPT: &str = "A simple red circle on a white background";
pub const DIAGNOSTIC_SIZE: u32 = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticOutcome {
    Succeeded { images: usize, bytes: usize },
    Failed { error: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticsEntry {
    pub provider: String,
    pub outcome: DiagnosticOutcome,
    pub latency: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticsReport {
    pub entries: Vec<DiagnosticsEntry>,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl DiagnosticsReport {
    fn push(&mut self, entry: DiagnosticsEntry) {
        match entry.outcome {
            DiagnosticOutcome::Succeeded { .. } => self.succeeded += 1,
            DiagnosticOutcome::Failed { .. } => self.failed += 1,
            DiagnosticOutcome::Skipped { .. } => self.skipped += 1,
        }
        self.entries.push(entry);
    }

    pub fn any_succeeded(&self) -> bool {
        self.succeeded > 0
    }
}

/// Provider names checked when the caller does not pass any.
pub fn default_diagnostic_names() -> Vec<String> {
    GLOBAL_PREFERENCE.iter().map(|name| name.to_string()).collect()
}

/// Runs one small generation per named provider. Unconfigured providers are
/// skipped; failures are recorded and never abort the run.
pub fn run_diagnostics(
    registry: &ImageProviderRegistry,
    names: &[String],
) -> Result<DiagnosticsReport> {
    let mut report = DiagnosticsReport::default();
    for name in names {
        let Some(provider) = registry.get(name) else {
            bail!(
                "unknown provider `{name}` (known: {})",
                registry.names().join(", ")
            );
        };
        if !provider.is_configured() {
            tracing::info!(provider = %name, "skipping unconfigured provider");
            report.push(DiagnosticsEntry {
                provider: name.clone(),
                outcome: DiagnosticOutcome::Skipped {
                    reason: format!(
                        "not configured (set {})",
                        provider.required_env_vars().join(" or ")
                    ),
                },
                latency: Duration::ZERO,
            });
            continue;
        }

        let input =
            GenerateInput::new(DIAGNOSTIC_PROMPT).with_size(DIAGNOSTIC_SIZE, DIAGNOSTIC_SIZE);
        let started = Instant::now();
        let result = provider.generate(&input);
        let latency = started.elapsed();
        let outcome = match result {
            Ok(result) => {
                let bytes = result.images.iter().map(|image| image.bytes.len()).sum();
                tracing::info!(
                    provider = %name,
                    latency_ms = latency.as_millis() as u64,
                    images = result.images.len(),
                    "diagnostic generation succeeded"
                );
                DiagnosticOutcome::Succeeded {
                    images: result.images.len(),
                    bytes,
                }
            }
            Err(err) => {
                tracing::info!(provider = %name, error = %err, "diagnostic generation failed");
                DiagnosticOutcome::Failed {
                    error: err.to_string(),
                }
            }
        };
        report.push(DiagnosticsEntry {
            provider: name.clone(),
            outcome,
            latency,
        });
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::{default_diagnostic_names, run_diagnostics, DiagnosticOutcome};
    use crate::tests::StubProvider;
    use crate::ImageProviderRegistry;

    #[test]
    fn tallies_each_outcome() -> anyhow::Result<()> {
        let healthy = StubProvider::new("openai");
        let healthy_calls = Arc::clone(&healthy.calls);
        let mut broken = StubProvider::new("flux");
        broken.fail = true;
        let mut offline = StubProvider::new("gemini");
        offline.configured = false;
        let offline_calls = Arc::clone(&offline.calls);

        let mut registry = ImageProviderRegistry::new();
        registry.register(healthy);
        registry.register(broken);
        registry.register(offline);

        let names = vec!["openai".to_string(), "gemini".to_string(), "flux".to_string()];
        let report = run_diagnostics(&registry, &names)?;
        assert_eq!((report.succeeded, report.failed, report.skipped), (1, 1, 1));
        assert!(report.any_succeeded());
        assert_eq!(healthy_calls.load(Ordering::SeqCst), 1);
        assert_eq!(offline_calls.load(Ordering::SeqCst), 0);

        let providers: Vec<&str> = report
            .entries
            .iter()
            .map(|entry| entry.provider.as_str())
            .collect();
        assert_eq!(providers, vec!["openai", "gemini", "flux"]);
        match &report.entries[1].outcome {
            DiagnosticOutcome::Skipped { reason } => assert!(reason.contains("STUB_API_KEY")),
            other => panic!("expected skip, got {other:?}"),
        }
        match &report.entries[2].outcome {
            DiagnosticOutcome::Failed { error } => assert!(error.contains("red circle")),
            other => panic!("expected failure, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn nothing_configured_means_no_success() -> anyhow::Result<()> {
        let mut offline = StubProvider::new("openai");
        offline.configured = false;
        let mut registry = ImageProviderRegistry::new();
        registry.register(offline);
        let report = run_diagnostics(&registry, &["openai".to_string()])?;
        assert!(!report.any_succeeded());
        assert_eq!(report.skipped, 1);
        Ok(())
    }

    #[test]
    fn unknown_names_are_rejected() {
        let registry = ImageProviderRegistry::new();
        assert!(run_diagnostics(&registry, &["dall-e".to_string()]).is_err());
        assert_eq!(default_diagnostic_names().len(), 7);
    }
}
