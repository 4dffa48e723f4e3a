//! Classification derivation with explicit source precedence

use super::AnnotationFacts;
use crate::error::PipelineError;
use crate::job::JobId;
use crate::vcf::{VariantKind, VariantRecord};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const VERIFICATION_PENDING: &str = "PENDING";

/// Predicted consequence of the variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariantEffect {
    #[serde(rename = "missense_variant")]
    Missense,
    #[serde(rename = "frameshift_variant")]
    Frameshift,
    #[serde(rename = "unknown")]
    Unknown,
}

/// Clinical significance classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClinicalSignificance {
    Pathogenic,
    LikelyPathogenic,
    UncertainSignificance,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OncogenicEffect {
    Oncogenic,
    LikelyOncogenic,
    Unknown,
}

/// Kind of clinical implication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actionability {
    Therapeutic,
    Prognostic,
    Diagnostic,
    Unknown,
}

macro_rules! string_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = PipelineError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($text => Ok($ty::$variant),)+
                    other => Err(PipelineError::Validation(format!(
                        "unknown {} value: '{}'",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }
    };
}

string_enum!(VariantEffect {
    Missense => "missense_variant",
    Frameshift => "frameshift_variant",
    Unknown => "unknown",
});

string_enum!(ClinicalSignificance {
    Pathogenic => "pathogenic",
    LikelyPathogenic => "likely_pathogenic",
    UncertainSignificance => "uncertain_significance",
    Unknown => "unknown",
});

string_enum!(OncogenicEffect {
    Oncogenic => "oncogenic",
    LikelyOncogenic => "likely_oncogenic",
    Unknown => "unknown",
});

string_enum!(Actionability {
    Therapeutic => "therapeutic",
    Prognostic => "prognostic",
    Diagnostic => "diagnostic",
    Unknown => "unknown",
});

/// Orthogonal-assay verification bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    /// Caller-defined status; starts as PENDING
    pub status: String,
    /// Method requested (Sanger, ddPCR, ...)
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Default for Verification {
    fn default() -> Self {
        Verification {
            status: VERIFICATION_PENDING.to_string(),
            method: None,
            notes: None,
        }
    }
}

/// Derived annotation for one variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedAnnotation {
    pub job_id: JobId,
    pub variant_id: u64,
    #[serde(default)]
    pub gene_symbol: Option<String>,
    pub variant_kind: VariantKind,
    pub variant_effect: VariantEffect,
    pub clinical_significance: ClinicalSignificance,
    pub oncogenic_effect: OncogenicEffect,
    pub actionability: Actionability,
    /// Raw facts the classification was derived from
    pub facts: AnnotationFacts,
    #[serde(default)]
    pub verification: Verification,
    pub annotation_source: String,
    pub annotation_version: String,
}

impl DerivedAnnotation {
    pub fn population_frequency(&self) -> Option<f64> {
        self.facts.population_frequency
    }

    /// Ask for orthogonal verification; the status stays PENDING.
    pub fn request_verification(&mut self, method: &str, notes: Option<&str>) {
        self.verification.status = VERIFICATION_PENDING.to_string();
        self.verification.method = Some(method.to_string());
        self.verification.notes = notes.map(str::to_string);
    }

    /// Record a verification outcome. Any status string is accepted.
    pub fn update_verification_status(&mut self, status: &str, notes: Option<&str>) {
        self.verification.status = status.to_string();
        self.verification.notes = notes.map(str::to_string);
    }
}

/// SNVs are reported as missense and every indel as frameshift; reading
/// frame and codon context are not consulted.
pub fn variant_effect(kind: VariantKind) -> VariantEffect {
    match kind {
        VariantKind::Snv => VariantEffect::Missense,
        VariantKind::Insertion | VariantKind::Deletion => VariantEffect::Frameshift,
        VariantKind::Complex => VariantEffect::Unknown,
    }
}

/// ClinVar pathogenic tags win; otherwise COSMIC/OncoKB co-occurrence decides.
pub fn clinical_significance(facts: &AnnotationFacts) -> ClinicalSignificance {
    match facts.clinvar_significance() {
        Some("pathogenic") => return ClinicalSignificance::Pathogenic,
        Some("likely_pathogenic") => return ClinicalSignificance::LikelyPathogenic,
        _ => {}
    }
    match (facts.has_cosmic(), facts.has_oncokb()) {
        (true, true) => ClinicalSignificance::LikelyPathogenic,
        (true, false) => ClinicalSignificance::UncertainSignificance,
        _ => ClinicalSignificance::Unknown,
    }
}

pub fn oncogenic_effect(facts: &AnnotationFacts) -> OncogenicEffect {
    match (facts.has_cosmic(), facts.has_oncokb()) {
        (true, true) => OncogenicEffect::Oncogenic,
        (true, false) | (false, true) => OncogenicEffect::LikelyOncogenic,
        (false, false) => OncogenicEffect::Unknown,
    }
}

pub fn actionability(facts: &AnnotationFacts) -> Actionability {
    if facts.has_drug_associations() {
        Actionability::Therapeutic
    } else if facts.has_oncokb() || facts.has_civic() {
        Actionability::Prognostic
    } else if facts.has_clinvar() && facts.clinvar_significance() == Some("pathogenic") {
        Actionability::Diagnostic
    } else {
        Actionability::Unknown
    }
}

/// Stamps derived annotations with the annotator's name and version
#[derive(Debug, Clone)]
pub struct AnnotationEngine {
    source: String,
    version: String,
}

impl AnnotationEngine {
    pub fn new(source: impl Into<String>, version: impl Into<String>) -> Self {
        AnnotationEngine {
            source: source.into(),
            version: version.into(),
        }
    }

    /// Derive the annotation for `variant` from `facts`. Pure: no clock, no randomness.
    pub fn derive(&self, variant: &VariantRecord, facts: AnnotationFacts) -> DerivedAnnotation {
        let annotation = DerivedAnnotation {
            job_id: variant.job_id.clone(),
            variant_id: variant.id,
            gene_symbol: variant.gene_symbol.clone(),
            variant_kind: variant.kind,
            variant_effect: variant_effect(variant.kind),
            clinical_significance: clinical_significance(&facts),
            oncogenic_effect: oncogenic_effect(&facts),
            actionability: actionability(&facts),
            facts,
            verification: Verification::default(),
            annotation_source: self.source.clone(),
            annotation_version: self.version.clone(),
        };
        log::debug!(
            "Annotated {}:{} {}>{}: {} / {} / {}",
            variant.chrom,
            variant.pos,
            variant.ref_allele,
            variant.alt_allele,
            annotation.clinical_significance,
            annotation.oncogenic_effect,
            annotation.actionability
        );
        annotation
    }
}

impl Default for AnnotationEngine {
    fn default() -> Self {
        AnnotationEngine::new("Oncology Genomics Annotator", "1.0")
    }
}
