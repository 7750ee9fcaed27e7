//! Monthly rates of any, new, and high dose long-acting opioid prescribing during 2019.
use chrono::NaiveDate;
use clap::Parser;
use opioid_prescribing::{definition::population, study::Study, Intervals, Measure, Measures};
use qu::ick_use::*;
use std::path::PathBuf;

#[derive(Parser)]
struct Opt {
    /// The study configuration file.
    #[clap(long, default_value = "study.toml")]
    config: PathBuf,
    /// Print the results as well as writing them out.
    #[clap(long)]
    show: bool,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let study = Study::load(&opt.config)?;
    let dataset = study.opioid_dataset()?;
    let opioid_any = dataset.col("opioid_any")?;
    let opioid_new = dataset.col("opioid_new")?;
    let hi_opioid_any = dataset.col("hi_opioid_any")?;
    let naive = dataset.col("opioid_naive")?;
    let no_cancer = !dataset.col("cancer")?;

    let mut measures = Measures::new(dataset);
    let start = NaiveDate::from_ymd_opt(2019, 1, 1).context("bad start date")?;
    measures.define_defaults(Intervals::months(12).starting_on(start)?);

    let denominator = population();
    for (suffix, denominator) in [
        ("", denominator.clone()),
        ("_nocancer", denominator & no_cancer),
    ] {
        measures.define_measure(
            Measure::new(format!("opioid_any{}", suffix))
                .numerator(opioid_any.clone())
                .denominator(denominator.clone()),
        )?;
        measures.define_measure(
            Measure::new(format!("opioid_new{}", suffix))
                .numerator(opioid_new.clone())
                .denominator(denominator.clone() & naive.clone()),
        )?;
        measures.define_measure(
            Measure::new(format!("hi_opioid_any{}", suffix))
                .numerator(hi_opioid_any.clone())
                .denominator(denominator),
        )?;
    }

    let results = study.run("measures_overall_2019", &measures)?;
    if opt.show {
        println!("{}", results.term_table());
    }
    Ok(())
}
