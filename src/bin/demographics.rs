//! Summary tables of the study population on an index date.
use chrono::NaiveDate;
use clap::Parser;
use opioid_prescribing::{
    definition::population,
    header,
    query::{EvalContext, Value},
    study::Study,
    Interval,
};
use qu::ick_use::*;
use std::{collections::BTreeMap, path::PathBuf};
use term_data_table::{Cell, Row, Table};

#[derive(Parser)]
struct Opt {
    /// The date to describe the population on (yyyy-mm-dd).
    #[clap(long)]
    index_date: NaiveDate,
    /// The study configuration file.
    #[clap(long, default_value = "study.toml")]
    config: PathBuf,
}

const COLUMNS: [(&str, &str); 7] = [
    ("Age group", "age_group"),
    ("Sex", "sex"),
    ("IMD decile", "imd10"),
    ("Ethnicity (6 groups)", "ethnicity6"),
    ("Region", "region"),
    ("Care home", "carehome"),
    ("Cancer", "cancer"),
];

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let study = Study::load(&opt.config)?;
    let dataset = study.full_dataset()?;
    let population = population();
    population.check(&dataset)?;
    let interval = Interval::month_starting(opt.index_date)?;

    let mut counts: Vec<BTreeMap<Value, usize>> = vec![BTreeMap::new(); COLUMNS.len()];
    let mut total = 0;
    for view in study.records.iter_patients() {
        let row = dataset.evaluate(&view, &interval)?;
        if !population
            .eval(&EvalContext::new(&view, &interval, &row))?
            .is_true()
        {
            continue;
        }
        total += 1;
        for ((_, column), counts) in COLUMNS.iter().zip(counts.iter_mut()) {
            let value = row
                .get(column)
                .with_context(|| format!("no column \"{}\"", column))?;
            *counts.entry(value.clone()).or_default() += 1;
        }
    }

    header("Population");
    println!("index date: {}", opt.index_date);
    println!("total patients: {}", study.records.patients.len());
    println!("in population: {}", total);

    for ((title, _), counts) in COLUMNS.iter().zip(counts) {
        header(title);
        let mut table = Table::new().with_row(
            Row::new()
                .with_cell(Cell::from(*title))
                .with_cell(Cell::from("Count"))
                .with_cell(Cell::from("Percentage")),
        );
        for (value, count) in counts {
            let label = match value {
                Value::Null => "missing".to_string(),
                value => value.to_string(),
            };
            table.add_row(
                Row::new()
                    .with_cell(Cell::from(label))
                    .with_cell(Cell::from(count.to_string()))
                    .with_cell(Cell::from(format!(
                        "{:.1}%",
                        count as f64 / total as f64 * 100.
                    ))),
            );
        }
        println!("{}", table);
    }
    Ok(())
}
