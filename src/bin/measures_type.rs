//! Monthly rates of opioid prescribing by route of administration, for 12 months.
use chrono::NaiveDate;
use clap::Parser;
use opioid_prescribing::{definition::population, study::Study, Intervals, Measure, Measures};
use qu::ick_use::*;
use std::path::PathBuf;

#[derive(Parser)]
struct Opt {
    /// First day of the first month (yyyy-mm-dd).
    #[clap(long)]
    start_date: NaiveDate,
    /// The study configuration file.
    #[clap(long, default_value = "study.toml")]
    config: PathBuf,
    /// Print the results as well as writing them out.
    #[clap(long)]
    show: bool,
}

const ROUTES: [&str; 7] = ["oral", "trans", "par", "rec", "inh", "buc", "oth"];

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let study = Study::load(&opt.config)?;
    let dataset = study.opioid_dataset()?;
    let numerators = ROUTES
        .iter()
        .map(|route| Ok((*route, dataset.col(&format!("{}_opioid_any", route))?)))
        .collect::<Result<Vec<_>>>()?;
    let no_cancer = !dataset.col("cancer")?;

    let mut measures = Measures::new(dataset);
    measures.define_defaults(Intervals::months(12).starting_on(opt.start_date)?);

    for (suffix, denominator) in [
        ("", population()),
        ("_nocancer", population() & no_cancer),
    ] {
        for (route, numerator) in &numerators {
            measures.define_measure(
                Measure::new(format!("{}_opioid{}", route, suffix))
                    .numerator(numerator.clone())
                    .denominator(denominator.clone()),
            )?;
        }
    }

    let results = study.run("measures_type", &measures)?;
    if opt.show {
        println!("{}", results.term_table());
    }
    Ok(())
}
