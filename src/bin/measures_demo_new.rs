//! Monthly rates of new opioid prescribing by demographic group.
use chrono::NaiveDate;
use clap::Parser;
use opioid_prescribing::{
    query::{age_on, date_of_death, registered_between, sex, DateExpr},
    study::Study,
    Intervals, Measure, Measures,
};
use qu::ick_use::*;
use std::path::PathBuf;

#[derive(Parser)]
struct Opt {
    /// First day of the first month (yyyy-mm-dd).
    #[clap(long)]
    start_date: NaiveDate,
    /// How many months to calculate.
    #[clap(long)]
    intervals: u32,
    /// The study configuration file.
    #[clap(long, default_value = "study.toml")]
    config: PathBuf,
    /// Print the results as well as writing them out.
    #[clap(long)]
    show: bool,
}

/// (measure suffix, group name, dataset column)
const GROUPS: [(&str, &str, &str); 5] = [
    ("age", "age_group", "age_group"),
    ("sex", "sex", "sex"),
    ("region", "region", "region"),
    ("imd", "imd", "imd10"),
    ("eth6", "ethnicity6", "ethnicity6"),
];

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let study = Study::load(&opt.config)?;
    let dataset = study.full_dataset()?;

    let d = DateExpr::index_date;
    // Registered for the whole of the index date.
    let denominator_naive = age_on(d()).ge(18i64)
        & age_on(d()).lt(110i64)
        & (sex().equals("male") | sex().equals("female"))
        & (date_of_death().is_after(d()) | date_of_death().is_null())
        & registered_between(d(), d())
        & dataset.col("opioid_naive")?;
    let opioid_new = dataset.col("opioid_new")?;
    let groups = GROUPS
        .iter()
        .map(|(suffix, name, column)| Ok((*suffix, *name, dataset.col(column)?)))
        .collect::<Result<Vec<_>>>()?;

    let mut measures = Measures::new(dataset);
    measures.define_defaults(Intervals::months(opt.intervals).starting_on(opt.start_date)?);
    for (suffix, name, group) in groups {
        measures.define_measure(
            Measure::new(format!("opioid_new_{}", suffix))
                .numerator(opioid_new.clone())
                .denominator(denominator_naive.clone())
                .group_by(name, group),
        )?;
    }

    let results = study.run("measures_demo_new", &measures)?;
    if opt.show {
        println!("{}", results.term_table());
    }
    Ok(())
}
