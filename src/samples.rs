//! Sample lookup used when submitting jobs
//!
//! Sample records are owned by the surrounding application; the core only
//! needs to turn a sample identifier into its aligned-read file.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleInfo {
    pub id: String,
    pub label: Option<String>,
    /// Aligned reads (BAM/CRAM)
    pub bam: String,
}

/// Resolves sample identifiers to alignment files
pub trait SampleRegistry: Send + Sync {
    fn resolve(&self, sample_id: &str) -> Option<SampleInfo>;
}

/// In-memory registry, built from configuration or by tests
#[derive(Debug, Clone, Default)]
pub struct SampleTable {
    samples: HashMap<String, SampleInfo>,
}

impl SampleTable {
    pub fn new(samples: impl IntoIterator<Item = SampleInfo>) -> Self {
        SampleTable {
            samples: samples.into_iter().map(|s| (s.id.clone(), s)).collect(),
        }
    }

    pub fn insert(&mut self, id: &str, bam: &str) {
        self.samples.insert(
            id.to_string(),
            SampleInfo {
                id: id.to_string(),
                label: None,
                bam: bam.to_string(),
            },
        );
    }
}

impl SampleRegistry for SampleTable {
    fn resolve(&self, sample_id: &str) -> Option<SampleInfo> {
        self.samples.get(sample_id).cloned()
    }
}
