//! Shared setup for the study scripts.
use qu::ick_use::*;
use std::path::Path;

use crate::{
    codelists::Codelists,
    config::StudyConfig,
    dataset::Dataset,
    definition::{make_dataset, make_dataset_opioids},
    measures::{MeasureResults, Measures},
    PatientRecords,
};

/// Everything a study script needs, loaded up front so nothing is evaluated until all inputs are
/// known to be good.
pub struct Study {
    pub config: StudyConfig,
    pub codelists: Codelists,
    pub records: PatientRecords,
}

impl Study {
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        let config = StudyConfig::load(config_path)?;
        let codelists = Codelists::load(&config.codelist_dir)?;
        let records = PatientRecords::load(&config.records)?;
        Ok(Study {
            config,
            codelists,
            records,
        })
    }

    /// The opioid columns only.
    pub fn opioid_dataset(&self) -> Result<Dataset> {
        Ok(make_dataset_opioids(
            &self.codelists,
            &self.config.dataset_params(),
            None,
        )?)
    }

    /// The opioid columns and demographics.
    pub fn full_dataset(&self) -> Result<Dataset> {
        Ok(make_dataset(&self.codelists, &self.config.dataset_params())?)
    }

    /// Calculate the measures and write them to `<output_dir>/<script>.csv`.
    pub fn run(&self, script: &str, measures: &Measures) -> Result<MeasureResults> {
        let results = measures
            .calculate(&self.records)
            .with_context(|| format!("calculating measures for {}", script))?;
        results.write_csv(self.config.output_path(script))?;
        Ok(results)
    }
}
