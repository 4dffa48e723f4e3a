//! Configuration parsing for mutaflow
//!
//! Parses the YAML file describing the external pipeline, the samples it may
//! be run on, where job state lives and how variants are annotated.

use crate::samples::{SampleInfo, SampleTable};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// External pipeline
    pub pipeline: PipelineConfig,

    /// Sample definitions
    #[serde(default)]
    pub samples: HashMap<String, SampleConfig>,

    /// Job state persistence
    #[serde(default)]
    pub store: StoreConfig,

    /// Annotation settings
    #[serde(default)]
    pub annotation: AnnotationConfig,

    /// Optional settings
    #[serde(default)]
    pub options: Options,
}

/// How jobs are handed to the external pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// Request/status artifacts in shared directories
    #[default]
    FileDrop,
    /// Launch the caller as a child process
    Direct,
}

/// External pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub mode: PipelineMode,

    /// Directory watched by the pipeline for job requests
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,

    /// Directory where the pipeline writes status artifacts and outputs
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Reference FASTA handed to the caller
    #[serde(default = "default_reference_path")]
    pub reference_path: String,

    /// Reference build recorded on jobs
    #[serde(default = "default_reference_genome")]
    pub reference_genome: String,

    /// Caller executable for direct mode
    #[serde(default = "default_tool")]
    pub tool: String,

    /// Panel of normals (optional)
    #[serde(default)]
    pub panel_of_normals: Option<String>,

    /// Directory for direct-mode process logs (defaults to the job's output directory)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

/// Sample configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleConfig {
    /// Display label (optional)
    #[serde(default)]
    pub label: Option<String>,

    /// Aligned reads
    pub bam: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding job, variant and annotation documents
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            state_dir: default_state_dir(),
        }
    }
}

/// Where annotation facts come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FactSourceKind {
    /// DB/COSMIC keys written by the pipeline's annotator
    #[default]
    Info,
    /// Pre-exported knowledge-base facts
    Json,
    /// Randomized development stand-in
    Simulated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationConfig {
    #[serde(default)]
    pub source: FactSourceKind,

    /// Facts file for the json source
    #[serde(default)]
    pub facts_path: Option<PathBuf>,

    /// Seed for the simulated source
    #[serde(default)]
    pub seed: Option<u64>,

    /// Source stamp written on annotations
    #[serde(default = "default_annotation_name")]
    pub name: String,

    #[serde(default = "default_annotation_version")]
    pub version: String,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        AnnotationConfig {
            source: FactSourceKind::default(),
            facts_path: None,
            seed: None,
            name: default_annotation_name(),
            version: default_annotation_version(),
        }
    }
}

/// Optional settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    /// Background worker threads for submission and ingestion
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Seconds between status polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Ingest and annotate automatically once a job completes
    #[serde(default = "default_true")]
    pub auto_ingest: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            workers: default_workers(),
            poll_interval_secs: default_poll_interval(),
            auto_ingest: true,
        }
    }
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("/data/inputs")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("/data/outputs")
}

fn default_reference_path() -> String {
    "/data/references/GRCh38.fa".to_string()
}

fn default_reference_genome() -> String {
    "GRCh38".to_string()
}

fn default_tool() -> String {
    "gatk".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("mutaflow-state")
}

fn default_annotation_name() -> String {
    "Oncology Genomics Annotator".to_string()
}

fn default_annotation_version() -> String {
    "1.0".to_string()
}

fn default_workers() -> usize {
    num_cpus::get().min(4)
}

fn default_poll_interval() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from YAML file
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.input_dir.as_os_str().is_empty()
            || self.pipeline.output_dir.as_os_str().is_empty()
        {
            anyhow::bail!("pipeline.input_dir and pipeline.output_dir must be set");
        }

        if self.pipeline.mode == PipelineMode::Direct && self.pipeline.tool.trim().is_empty() {
            anyhow::bail!("pipeline.tool must be set for direct mode");
        }

        for (sample_id, sample) in &self.samples {
            if sample.bam.trim().is_empty() {
                anyhow::bail!("No BAM file specified for sample '{}'", sample_id);
            }
        }

        if self.annotation.source == FactSourceKind::Json && self.annotation.facts_path.is_none() {
            anyhow::bail!("annotation.facts_path is required when annotation.source is 'json'");
        }

        if self.options.workers == 0 {
            anyhow::bail!("options.workers must be at least 1");
        }

        Ok(())
    }

    /// Sample registry backed by the `samples` section
    pub fn sample_table(&self) -> SampleTable {
        SampleTable::new(self.samples.iter().map(|(id, s)| SampleInfo {
            id: id.clone(),
            label: s.label.clone(),
            bam: s.bam.clone(),
        }))
    }

    /// Get all sample IDs, sorted
    pub fn all_sample_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.samples.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
pipeline:
  mode: direct
  input_dir: /shared/in
  output_dir: /shared/out
  reference_path: /refs/GRCh38.fa
  panel_of_normals: /refs/pon.vcf.gz

samples:
  S1:
    label: "Tumor biopsy"
    bam: /bams/S1.bam
  N1:
    bam: /bams/N1.bam

annotation:
  source: simulated
  seed: 42

options:
  workers: 2
  poll_interval_secs: 1
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.pipeline.mode, PipelineMode::Direct);
        assert_eq!(config.pipeline.tool, "gatk");
        assert_eq!(config.pipeline.reference_genome, "GRCh38");
        assert_eq!(config.annotation.source, FactSourceKind::Simulated);
        assert_eq!(config.annotation.seed, Some(42));
        assert!(config.options.auto_ingest);
        assert_eq!(config.all_sample_ids(), vec!["N1", "S1"]);
    }

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str("pipeline: {}\n").unwrap();
        assert_eq!(config.pipeline.mode, PipelineMode::FileDrop);
        assert_eq!(config.pipeline.input_dir, PathBuf::from("/data/inputs"));
        assert_eq!(config.annotation.source, FactSourceKind::Info);
        assert_eq!(config.options.poll_interval_secs, 10);
        assert!(config.options.workers >= 1);
    }

    #[test]
    fn test_json_source_needs_facts_path() {
        let config: Config =
            serde_yaml::from_str("pipeline: {}\nannotation:\n  source: json\n").unwrap();
        assert!(config.validate().is_err());
    }
}
