//! Convert a csv extract into the binary records cache the study scripts read.
use clap::Parser;
use opioid_prescribing::{PatientRecords, ResultExt, StudyConfig};
use qu::ick_use::*;
use std::path::PathBuf;

#[derive(Parser)]
struct Opt {
    /// Directory holding `patients.csv`, `addresses.csv`, `practice_registrations.csv`,
    /// `clinical_events.csv` and `medications.csv`.
    extract_dir: PathBuf,
    /// The study configuration file. The cache is written to its `records` path.
    #[clap(long, default_value = "study.toml")]
    config: PathBuf,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let config = StudyConfig::load(&opt.config)?;
    let records = PatientRecords::load_extract(&opt.extract_dir).print_error()?;
    records.save(&config.records)?;
    event!(
        Level::INFO,
        "saved records to \"{}\"",
        config.records.display()
    );
    Ok(())
}
