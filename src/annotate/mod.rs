//! Variant annotation: knowledge-source facts, classification derivation and filtering.
//!
//! Facts come from an injectable [`AnnotationFactSource`]; the derivation in
//! [`derive`] is a pure function of those facts and the variant kind, so the
//! same facts always produce the same annotation regardless of where they
//! were fetched from.

mod derive;
mod facts;
mod filter;

pub use derive::{
    Actionability, AnnotationEngine, ClinicalSignificance, DerivedAnnotation, OncogenicEffect,
    Verification, VariantEffect, VERIFICATION_PENDING,
};
pub use facts::{AnnotationFacts, InfoFactSource, JsonFactSource, SimulatedFactSource};
pub use filter::{FilterCriteria, Preset};

use crate::config::{AnnotationConfig, FactSourceKind};
use crate::error::Result;
use crate::vcf::VariantRecord;
use std::sync::Arc;

/// Capability for looking up raw annotation facts for one variant.
///
/// Production implementations call external knowledge bases; test
/// implementations are deterministic stubs.
///
/// # Example
/// ```ignore
/// pub struct MySource;
///
/// impl AnnotationFactSource for MySource {
///     fn name(&self) -> &str { "my_source" }
///     fn fetch(&self, variant: &VariantRecord) -> Result<AnnotationFacts> { /* ... */ }
/// }
/// ```
pub trait AnnotationFactSource: Send + Sync {
    /// Human-readable name of the source
    fn name(&self) -> &str;

    /// Fetch the facts known about `variant`. Unknown variants yield empty facts.
    fn fetch(&self, variant: &VariantRecord) -> Result<AnnotationFacts>;
}

/// Build the fact source selected in the configuration
pub fn fact_source_from_config(config: &AnnotationConfig) -> Result<Arc<dyn AnnotationFactSource>> {
    let source: Arc<dyn AnnotationFactSource> = match config.source {
        FactSourceKind::Info => Arc::new(InfoFactSource),
        FactSourceKind::Json => {
            let path = config.facts_path.as_ref().ok_or_else(|| {
                crate::error::PipelineError::Validation(
                    "annotation.facts_path is required for the json fact source".to_string(),
                )
            })?;
            Arc::new(JsonFactSource::from_path(path)?)
        }
        FactSourceKind::Simulated => Arc::new(match config.seed {
            Some(seed) => SimulatedFactSource::seeded(seed),
            None => SimulatedFactSource::new(),
        }),
    };
    log::info!("Annotation fact source: {}", source.name());
    Ok(source)
}
