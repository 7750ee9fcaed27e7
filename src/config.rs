//! The study configuration file, `study.toml` by default.
use qu::ick_use::*;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    definition::{DatasetParams, Lookback},
    error::StudyError,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StudyConfig {
    /// Directory holding the codelist csv files.
    pub codelist_dir: PathBuf,
    /// The binary records cache written by `import_data`.
    pub records: PathBuf,
    /// Where measure tables are written.
    pub output_dir: PathBuf,
    pub dataset: DatasetConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetConfig {
    /// How far back to look for earlier opioid prescriptions when deciding if a patient is
    /// opioid naive. No default.
    pub naive_lookback_months: u32,
}

impl StudyConfig {
    /// Load the config. Relative paths in it are taken relative to the file itself.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        fn inner(path: &Path) -> Result<StudyConfig> {
            let text = fs::read_to_string(path)?;
            let mut config: StudyConfig = toml::from_str(&text)?;
            config.validate()?;
            let base = path.parent().unwrap_or_else(|| Path::new(""));
            for dir in [
                &mut config.codelist_dir,
                &mut config.records,
                &mut config.output_dir,
            ] {
                if dir.is_relative() {
                    *dir = base.join(&*dir);
                }
            }
            Ok(config)
        }
        let path = path.as_ref();
        let config = inner(path)
            .with_context(|| format!("loading study config \"{}\"", path.display()))?;
        event!(Level::DEBUG, "config: {:?}", config);
        Ok(config)
    }

    fn validate(&self) -> Result<(), StudyError> {
        if self.dataset.naive_lookback_months == 0 {
            return Err(StudyError::Config(
                "`dataset.naive_lookback_months` must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn dataset_params(&self) -> DatasetParams {
        DatasetParams {
            naive_lookback: Lookback::months(self.dataset.naive_lookback_months),
        }
    }

    /// The csv file a study script writes its measures to.
    pub fn output_path(&self, script: &str) -> PathBuf {
        self.output_dir.join(format!("{}.csv", script))
    }
}
