//! Raw annotation facts and the sources that provide them

use super::AnnotationFactSource;
use crate::error::{PipelineError, Result};
use crate::vcf::VariantRecord;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Facts contributed by external knowledge sources for one variant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationFacts {
    /// dbSNP identifier (rs...)
    #[serde(default)]
    pub dbsnp_id: Option<String>,
    /// COSMIC somatic mutation catalog identifier
    #[serde(default)]
    pub cosmic_id: Option<String>,
    /// ClinVar curated-variant identifier
    #[serde(default)]
    pub clinvar_id: Option<String>,
    /// ClinVar significance tag (pathogenic, likely_pathogenic, ...)
    #[serde(default)]
    pub clinvar_significance: Option<String>,
    #[serde(default)]
    pub hgmd_id: Option<String>,
    /// CIViC clinical-evidence identifier
    #[serde(default)]
    pub civic_id: Option<String>,
    /// OncoKB oncology-knowledgebase identifier
    #[serde(default)]
    pub oncokb_id: Option<String>,
    #[serde(default)]
    pub population_frequency: Option<f64>,
    #[serde(default)]
    pub drug_associations: Option<String>,
    #[serde(default)]
    pub literature_references: Option<String>,
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false)
}

impl AnnotationFacts {
    pub fn has_cosmic(&self) -> bool {
        present(&self.cosmic_id)
    }

    pub fn has_oncokb(&self) -> bool {
        present(&self.oncokb_id)
    }

    pub fn has_civic(&self) -> bool {
        present(&self.civic_id)
    }

    pub fn has_clinvar(&self) -> bool {
        present(&self.clinvar_id)
    }

    pub fn has_drug_associations(&self) -> bool {
        present(&self.drug_associations)
    }

    /// ClinVar significance, trimmed, if any
    pub fn clinvar_significance(&self) -> Option<&str> {
        self.clinvar_significance
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Facts taken from the annotator stage's own INFO keys (`DB`, `COSMIC`).
///
/// Deterministic and offline; it only knows what the pipeline wrote.
pub struct InfoFactSource;

impl AnnotationFactSource for InfoFactSource {
    fn name(&self) -> &str {
        "vcf_info"
    }

    fn fetch(&self, variant: &VariantRecord) -> Result<AnnotationFacts> {
        Ok(AnnotationFacts {
            dbsnp_id: variant.info.dbsnp_id.clone(),
            cosmic_id: variant.info.cosmic_id.clone(),
            ..AnnotationFacts::default()
        })
    }
}

/// Facts loaded from a JSON object keyed by `chrom:pos:ref>alt`.
///
/// Stands in for knowledge-base lookups that were exported ahead of time.
pub struct JsonFactSource {
    facts: HashMap<String, AnnotationFacts>,
}

impl JsonFactSource {
    pub fn new(facts: HashMap<String, AnnotationFacts>) -> Self {
        JsonFactSource { facts }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| PipelineError::protocol_io(path, e))?;
        let facts: HashMap<String, AnnotationFacts> = serde_json::from_str(&content)
            .map_err(|e| {
                PipelineError::Validation(format!(
                    "invalid facts file {}: {}",
                    path.display(),
                    e
                ))
            })?;
        log::info!("Loaded facts for {} variants from {}", facts.len(), path.display());
        Ok(Self::new(facts))
    }
}

impl AnnotationFactSource for JsonFactSource {
    fn name(&self) -> &str {
        "json_facts"
    }

    fn fetch(&self, variant: &VariantRecord) -> Result<AnnotationFacts> {
        Ok(self
            .facts
            .get(&variant.lookup_key())
            .cloned()
            .unwrap_or_default())
    }
}

/// Randomized stand-in for dbSNP/COSMIC/ClinVar/HGMD/CIViC/OncoKB lookups.
///
/// Development only: the hit rates mimic a typical somatic panel. Seed it
/// for reproducible runs.
pub struct SimulatedFactSource {
    rng: Mutex<StdRng>,
}

impl SimulatedFactSource {
    pub fn new() -> Self {
        SimulatedFactSource {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        SimulatedFactSource {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for SimulatedFactSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AnnotationFactSource for SimulatedFactSource {
    fn name(&self) -> &str {
        "simulated"
    }

    fn fetch(&self, _variant: &VariantRecord) -> Result<AnnotationFacts> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| PipelineError::Store("simulated fact source lock poisoned".to_string()))?;
        let mut facts = AnnotationFacts::default();

        if rng.random::<f64>() > 0.3 {
            facts.dbsnp_id = Some(format!("rs{}", rng.random_range(0..100_000_000u32)));
        }
        if rng.random::<f64>() > 0.5 {
            facts.cosmic_id = Some(format!("COSM{}", rng.random_range(0..1_000_000u32)));
        }
        if rng.random::<f64>() > 0.7 {
            facts.clinvar_id = Some(format!("VCV{}", rng.random_range(0..1_000_000u32)));
            let tag = match rng.random::<f64>() {
                r if r < 0.1 => "pathogenic",
                r if r < 0.2 => "likely_pathogenic",
                r if r < 0.3 => "uncertain_significance",
                r if r < 0.4 => "likely_benign",
                _ => "benign",
            };
            facts.clinvar_significance = Some(tag.to_string());
        }
        if rng.random::<f64>() > 0.8 {
            facts.hgmd_id = Some(format!("CM{}", rng.random_range(0..1_000_000u32)));
        }
        if rng.random::<f64>() > 0.7 {
            facts.civic_id = Some(rng.random_range(0..10_000u32).to_string());
            if rng.random::<f64>() > 0.5 {
                facts.drug_associations = Some("Pembrolizumab, Nivolumab".to_string());
            }
        }
        if rng.random::<f64>() > 0.7 {
            facts.oncokb_id = Some(rng.random_range(0..10_000u32).to_string());
        }
        facts.population_frequency = Some(rng.random::<f64>() * 0.1);
        if rng.random::<f64>() > 0.6 {
            facts.literature_references = Some("PMID:12345678, PMID:23456789".to_string());
        }

        Ok(facts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobId;
    use crate::vcf::parse_vcf_line;

    fn variant(info: &str) -> VariantRecord {
        let line = format!("chr12\t25398284\t.\tC\tT\t.\tPASS\t{}", info);
        parse_vcf_line(&line, &JobId::new("1"), 1).unwrap()
    }

    #[test]
    fn test_info_source_reads_db_and_cosmic() {
        let facts = InfoFactSource
            .fetch(&variant("DB=rs121913529;COSMIC=COSM516"))
            .unwrap();
        assert_eq!(facts.dbsnp_id.as_deref(), Some("rs121913529"));
        assert!(facts.has_cosmic());
        assert!(!facts.has_oncokb());
    }

    #[test]
    fn test_json_source_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.json");
        std::fs::write(
            &path,
            r#"{"chr12:25398284:C>T": {"cosmic_id": "COSM516", "oncokb_id": "42", "population_frequency": 0.0001}}"#,
        )
        .unwrap();

        let source = JsonFactSource::from_path(&path).unwrap();
        let facts = source.fetch(&variant(".")).unwrap();
        assert_eq!(facts.oncokb_id.as_deref(), Some("42"));
        assert_eq!(facts.population_frequency, Some(0.0001));

        let other = parse_vcf_line("chr1\t1\t.\tA\tT\t.\tPASS\t.", &JobId::new("1"), 1).unwrap();
        assert_eq!(source.fetch(&other).unwrap(), AnnotationFacts::default());
    }

    #[test]
    fn test_seeded_simulation_is_reproducible() {
        let v = variant(".");
        let a = SimulatedFactSource::seeded(7);
        let b = SimulatedFactSource::seeded(7);
        for _ in 0..20 {
            assert_eq!(a.fetch(&v).unwrap(), b.fetch(&v).unwrap());
        }
    }

    #[test]
    fn test_blank_identifiers_are_absent() {
        let facts = AnnotationFacts {
            cosmic_id: Some("  ".to_string()),
            ..AnnotationFacts::default()
        };
        assert!(!facts.has_cosmic());
    }
}
