//! Predicate filtering over derived annotations

use super::{Actionability, ClinicalSignificance, DerivedAnnotation, VariantEffect};
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Population frequency below which a variant counts as rare
const RARE_VARIANT_FREQUENCY: f64 = 0.01;

/// Conjunctive filter. Unset criteria and missing optional facts never exclude.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterCriteria {
    #[serde(default)]
    pub variant_effects: Option<Vec<VariantEffect>>,
    #[serde(default)]
    pub clinical_significance: Option<Vec<ClinicalSignificance>>,
    /// Applied only when the annotation carries a population frequency
    #[serde(default)]
    pub max_population_frequency: Option<f64>,
    #[serde(default)]
    pub actionability: Option<Vec<Actionability>>,
}

fn parse_list<T: FromStr<Err = PipelineError>>(value: &str) -> Result<Vec<T>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(T::from_str)
        .collect()
}

impl FilterCriteria {
    /// Build criteria from `key=value` pairs, values being comma-separated lists.
    ///
    /// Keys accept both the camelCase form used by the request layer and snake_case.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut criteria = FilterCriteria::default();
        for (key, value) in pairs {
            match key {
                "variantEffect" | "variant_effect" => {
                    criteria.variant_effects = Some(parse_list(value)?)
                }
                "clinicalSignificance" | "clinical_significance" => {
                    criteria.clinical_significance = Some(parse_list(value)?)
                }
                "maxPopulationFrequency" | "max_population_frequency" => {
                    let max: f64 = value.trim().parse().map_err(|_| {
                        PipelineError::Validation(format!(
                            "maxPopulationFrequency is not a number: '{}'",
                            value
                        ))
                    })?;
                    criteria.max_population_frequency = Some(max);
                }
                "actionability" => criteria.actionability = Some(parse_list(value)?),
                other => {
                    return Err(PipelineError::Validation(format!(
                        "unknown filter criterion: '{}'",
                        other
                    )))
                }
            }
        }
        Ok(criteria)
    }

    pub fn matches(&self, annotation: &DerivedAnnotation) -> bool {
        if let Some(effects) = &self.variant_effects {
            if !effects.contains(&annotation.variant_effect) {
                return false;
            }
        }
        if let Some(significance) = &self.clinical_significance {
            if !significance.contains(&annotation.clinical_significance) {
                return false;
            }
        }
        if let (Some(max), Some(freq)) = (
            self.max_population_frequency,
            annotation.population_frequency(),
        ) {
            if freq > max {
                return false;
            }
        }
        if let Some(actionability) = &self.actionability {
            if !actionability.contains(&annotation.actionability) {
                return false;
            }
        }
        true
    }

    pub fn apply<'a, I>(&self, annotations: I) -> Vec<DerivedAnnotation>
    where
        I: IntoIterator<Item = &'a DerivedAnnotation>,
    {
        annotations
            .into_iter()
            .filter(|a| self.matches(a))
            .cloned()
            .collect()
    }
}

/// Canned annotation queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// Pathogenic or likely pathogenic
    Pathogenic,
    /// Coding effect and rare in the population (frequency must be known)
    ClinicallyRelevant,
    /// Any known actionability
    Actionable,
}

impl Preset {
    pub fn matches(self, annotation: &DerivedAnnotation) -> bool {
        match self {
            Preset::Pathogenic => matches!(
                annotation.clinical_significance,
                ClinicalSignificance::Pathogenic | ClinicalSignificance::LikelyPathogenic
            ),
            Preset::ClinicallyRelevant => annotation
                .population_frequency()
                .map(|f| f < RARE_VARIANT_FREQUENCY)
                .unwrap_or(false),
            Preset::Actionable => annotation.actionability != Actionability::Unknown,
        }
    }
}

impl FromStr for Preset {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pathogenic" => Ok(Preset::Pathogenic),
            "clinically-relevant" | "clinically_relevant" => Ok(Preset::ClinicallyRelevant),
            "actionable" => Ok(Preset::Actionable),
            other => Err(PipelineError::Validation(format!(
                "unknown preset: '{}'",
                other
            ))),
        }
    }
}
