//! Monthly rates of any and new opioid prescribing by demographic group, excluding people with
//! cancer, from January 2018.
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

/// (measure infix, group name, dataset column)
const GROUPS: [(&str, &str, &str); 6] = [
    ("age", "age_group", "age_group"),
    ("sex", "sex", "sex"),
    ("region", "region", "region"),
    ("imd", "imd", "imd10"),
    ("eth6", "ethnicity6", "ethnicity6"),
    ("carehome", "carehome", "carehome"),
];

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let study = Study::load(&opt.config)?;
    let dataset = study.full_dataset()?;

    let denominator = population() & !dataset.col("cancer")?;
    let denominator_naive = denominator.clone() & dataset.col("opioid_naive")?;
    let opioid_any = dataset.col("opioid_any")?;
    let opioid_new = dataset.col("opioid_new")?;
    let groups = GROUPS
        .iter()
        .map(|(infix, name, column)| Ok((*infix, *name, dataset.col(column)?)))
        .collect::<Result<Vec<_>>>()?;

    let mut measures = Measures::new(dataset);
    let start = NaiveDate::from_ymd_opt(2018, 1, 1).context("bad start date")?;
    measures.define_defaults(Intervals::months(54).starting_on(start)?);

    for (kind, numerator, denominator) in [
        ("any", &opioid_any, &denominator),
        ("new", &opioid_new, &denominator_naive),
    ] {
        for (infix, name, group) in &groups {
            measures.define_measure(
                Measure::new(format!("opioid_{}_{}_nocancer", kind, infix))
                    .numerator(numerator.clone())
                    .denominator(denominator.clone())
                    .group_by(*name, group.clone()),
            )?;
        }
    }

    let results = study.run("measures_demo_nocancer", &measures)?;
    if opt.show {
        println!("{}", results.term_table());
    }
    Ok(())
}
