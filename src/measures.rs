//! Measures: numerator / denominator counts per group, repeated over intervals.
use chrono::{Duration, Months, NaiveDate};
use itertools::Itertools;
use qu::ick_use::*;
use rayon::prelude::*;
use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::Path,
};

use crate::{
    dataset::Dataset,
    error::StudyError,
    query::{EvalContext, Expr, Type, Value},
    util, ArcStr, PatientRecords,
};

/// A closed range of days, `start..=end`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Interval {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Interval {
    /// The month starting on `start`, ending the day before the same day next month.
    pub fn month_starting(start: NaiveDate) -> Result<Self, StudyError> {
        let end = start
            .checked_add_months(Months::new(1))
            .and_then(|next| next.checked_sub_signed(Duration::days(1)))
            .ok_or(StudyError::DateOutOfRange(start))?;
        Ok(Interval { start, end })
    }
}

/// An ordered list of non-overlapping intervals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intervals(Vec<Interval>);

impl Intervals {
    /// `count` consecutive months; finish with [`MonthlyIntervals::starting_on`].
    pub fn months(count: u32) -> MonthlyIntervals {
        MonthlyIntervals { count }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interval> + '_ {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn contains(&self, interval: &Interval) -> bool {
        self.0.contains(interval)
    }
}

pub struct MonthlyIntervals {
    count: u32,
}

impl MonthlyIntervals {
    pub fn starting_on(self, start: NaiveDate) -> Result<Intervals, StudyError> {
        if self.count == 0 {
            return Err(StudyError::Config(
                "at least one interval is required".into(),
            ));
        }
        // Every boundary is offset from `start`, never from the previous interval.
        let offset = |months| {
            start
                .checked_add_months(Months::new(months))
                .ok_or(StudyError::DateOutOfRange(start))
        };
        (0..self.count)
            .map(|idx| {
                let end = offset(idx + 1)?
                    .checked_sub_signed(Duration::days(1))
                    .ok_or(StudyError::DateOutOfRange(start))?;
                Ok(Interval {
                    start: offset(idx)?,
                    end,
                })
            })
            .collect::<Result<_, StudyError>>()
            .map(Intervals)
    }
}

/// A measure waiting to be registered with [`Measures::define_measure`].
#[derive(Debug, Clone)]
pub struct Measure {
    name: ArcStr,
    numerator: Option<Expr>,
    denominator: Option<Expr>,
    group_by: Vec<(ArcStr, Expr)>,
    intervals: Option<Intervals>,
}

impl Measure {
    pub fn new(name: impl Into<ArcStr>) -> Self {
        Self {
            name: name.into(),
            numerator: None,
            denominator: None,
            group_by: vec![],
            intervals: None,
        }
    }

    pub fn numerator(mut self, expr: Expr) -> Self {
        self.numerator = Some(expr);
        self
    }

    pub fn denominator(mut self, expr: Expr) -> Self {
        self.denominator = Some(expr);
        self
    }

    pub fn group_by(mut self, name: impl Into<ArcStr>, expr: Expr) -> Self {
        self.group_by.push((name.into(), expr));
        self
    }

    /// Use these intervals rather than the defaults.
    pub fn intervals(mut self, intervals: Intervals) -> Self {
        self.intervals = Some(intervals);
        self
    }
}

/// A validated measure.
#[derive(Debug)]
struct Defined {
    name: ArcStr,
    numerator: Expr,
    denominator: Expr,
    group_by: Vec<(ArcStr, Expr)>,
    intervals: Intervals,
}

/// The measures of one study script, over the columns of one dataset.
pub struct Measures {
    dataset: Dataset,
    defaults: Option<Intervals>,
    measures: Vec<Defined>,
}

impl Measures {
    pub fn new(dataset: Dataset) -> Self {
        Self {
            dataset,
            defaults: None,
            measures: vec![],
        }
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Intervals used by any measure that doesn't set its own.
    pub fn define_defaults(&mut self, intervals: Intervals) {
        self.defaults = Some(intervals);
    }

    /// Register a measure, checking everything that can be checked before evaluation.
    pub fn define_measure(&mut self, measure: Measure) -> Result<(), StudyError> {
        let Measure {
            name,
            numerator,
            denominator,
            group_by,
            intervals,
        } = measure;

        if self.measures.iter().any(|m| m.name == name) {
            return Err(StudyError::DuplicateMeasure(name));
        }
        let (numerator, denominator) = match (numerator, denominator) {
            (Some(num), Some(den)) => (num, den),
            _ => {
                return Err(StudyError::Config(format!(
                    "measure \"{}\" needs both a numerator and a denominator",
                    name
                )))
            }
        };
        for (context, expr) in [("numerator", &numerator), ("denominator", &denominator)] {
            let found = expr.check(&self.dataset)?;
            if found != Type::Bool {
                return Err(StudyError::TypeMismatch {
                    context,
                    expected: Type::Bool,
                    found,
                });
            }
        }
        let mut seen = BTreeSet::new();
        for (group, expr) in &group_by {
            if !seen.insert(group.clone()) {
                return Err(StudyError::Config(format!(
                    "measure \"{}\" groups by \"{}\" twice",
                    name, group
                )));
            }
            let ty = expr.check(&self.dataset)?;
            if !ty.is_categorical() {
                return Err(StudyError::Query(format!(
                    "measure \"{}\" cannot group by \"{}\" of type {}",
                    name, group, ty
                )));
            }
        }
        let intervals = intervals
            .or_else(|| self.defaults.clone())
            .ok_or_else(|| StudyError::NoIntervals(name.clone()))?;

        self.measures.push(Defined {
            name,
            numerator,
            denominator,
            group_by,
            intervals,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.measures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measures.is_empty()
    }

    /// Evaluate every measure over the patient records.
    ///
    /// Intervals are independent, so they are evaluated in parallel.
    pub fn calculate(&self, records: &PatientRecords) -> Result<MeasureResults, StudyError> {
        let intervals = self
            .measures
            .iter()
            .flat_map(|m| m.intervals.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();
        event!(
            Level::INFO,
            "calculating {} measures over {} intervals for {} patients",
            self.measures.len(),
            intervals.len(),
            records.patients.len()
        );

        let per_interval = intervals
            .par_iter()
            .map(|interval| self.calculate_interval(records, interval))
            .collect::<Result<Vec<_>, _>>()?;

        let mut rows = per_interval.into_iter().flatten().collect::<Vec<_>>();
        rows.sort_by(|a, b| {
            (a.measure_idx, a.interval, &a.groups).cmp(&(b.measure_idx, b.interval, &b.groups))
        });
        Ok(MeasureResults {
            group_names: self
                .measures
                .iter()
                .flat_map(|m| m.group_by.iter().map(|(name, _)| name.clone()))
                .unique()
                .collect(),
            rows,
        })
    }

    fn calculate_interval(
        &self,
        records: &PatientRecords,
        interval: &Interval,
    ) -> Result<Vec<MeasureRow>, StudyError> {
        let active = self
            .measures
            .iter()
            .enumerate()
            .filter(|(_, m)| m.intervals.contains(interval))
            .collect::<Vec<_>>();
        let mut tallies: Vec<BTreeMap<Vec<Value>, Tally>> = vec![BTreeMap::new(); active.len()];

        for view in records.iter_patients() {
            let row = self.dataset.evaluate(&view, interval)?;
            let ctx = EvalContext::new(&view, interval, &row);
            for ((_, measure), tally) in active.iter().zip(tallies.iter_mut()) {
                let groups = measure
                    .group_by
                    .iter()
                    .map(|(_, expr)| expr.eval(&ctx))
                    .collect::<Result<Vec<_>, _>>()?;
                let entry = tally.entry(groups).or_default();
                if measure.denominator.eval(&ctx)?.is_true() {
                    entry.denominator += 1;
                    if measure.numerator.eval(&ctx)?.is_true() {
                        entry.numerator += 1;
                    }
                }
            }
        }
        event!(Level::DEBUG, "finished interval starting {}", interval.start);

        let mut rows = vec![];
        for ((measure_idx, measure), mut tally) in active.into_iter().zip(tallies) {
            if measure.group_by.is_empty() && tally.is_empty() {
                tally.insert(vec![], Tally::default());
            }
            for (groups, Tally { numerator, denominator }) in tally {
                rows.push(MeasureRow {
                    measure_idx,
                    measure: measure.name.clone(),
                    interval: *interval,
                    numerator,
                    denominator,
                    ratio: ratio(numerator, denominator),
                    groups: measure
                        .group_by
                        .iter()
                        .map(|(name, _)| name.clone())
                        .zip(groups)
                        .collect(),
                });
            }
        }
        Ok(rows)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    numerator: u64,
    denominator: u64,
}

/// `None` when nobody is in the denominator.
fn ratio(numerator: u64, denominator: u64) -> Option<f64> {
    if denominator == 0 {
        None
    } else {
        Some(numerator as f64 / denominator as f64)
    }
}

/// One measure, one interval, one combination of group values.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasureRow {
    measure_idx: usize,
    pub measure: ArcStr,
    pub interval: Interval,
    pub numerator: u64,
    pub denominator: u64,
    pub ratio: Option<f64>,
    pub groups: Vec<(ArcStr, Value)>,
}

impl MeasureRow {
    /// The value of the named group column, if this measure is grouped by it.
    pub fn group(&self, name: &str) -> Option<&Value> {
        self.groups
            .iter()
            .find(|(group, _)| &**group == name)
            .map(|(_, value)| value)
    }
}

/// The output of [`Measures::calculate`], ordered by measure, interval, then group values.
#[derive(Debug, Clone)]
pub struct MeasureResults {
    group_names: Vec<ArcStr>,
    rows: Vec<MeasureRow>,
}

impl MeasureResults {
    pub fn rows(&self) -> &[MeasureRow] {
        &self.rows
    }

    /// Rows for one measure.
    pub fn for_measure<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MeasureRow> + 'a {
        self.rows.iter().filter(move |row| &*row.measure == name)
    }

    /// Write the results as csv, one column per group name used by any measure.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result {
        fn inner(this: &MeasureResults, path: &Path) -> Result {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).context("could not create parent")?;
            }
            if util::path_exists(path)? {
                event!(
                    Level::WARN,
                    "overwriting existing file at \"{}\"",
                    path.display()
                );
            }
            let mut out = csv::Writer::from_path(path)?;
            let header = [
                "measure",
                "interval_start",
                "interval_end",
                "ratio",
                "numerator",
                "denominator",
            ];
            out.write_record(
                header
                    .iter()
                    .copied()
                    .chain(this.group_names.iter().map(|name| &**name)),
            )?;
            for row in &this.rows {
                let mut record = vec![
                    row.measure.to_string(),
                    row.interval.start.to_string(),
                    row.interval.end.to_string(),
                    row.ratio.map(|r| r.to_string()).unwrap_or_default(),
                    row.numerator.to_string(),
                    row.denominator.to_string(),
                ];
                record.extend(this.group_names.iter().map(|name| {
                    row.group(name)
                        .map(ToString::to_string)
                        .unwrap_or_default()
                }));
                out.write_record(&record)?;
            }
            out.flush()?;
            Ok(())
        }

        let path = path.as_ref();
        inner(self, path)
            .with_context(|| format!("unable to write measures to \"{}\"", path.display()))?;
        event!(Level::INFO, "wrote {} rows to \"{}\"", self.rows.len(), path.display());
        Ok(())
    }

    /// A table for showing results in the terminal.
    pub fn term_table(&self) -> term_data_table::Table<'_> {
        use term_data_table::{Cell, Row, Table};
        let mut table = Table::new().with_row(
            Row::new()
                .with_cell(Cell::from("Measure"))
                .with_cell(Cell::from("Interval"))
                .with_cell(Cell::from("Groups"))
                .with_cell(Cell::from("Numerator"))
                .with_cell(Cell::from("Denominator"))
                .with_cell(Cell::from("Ratio")),
        );
        for row in &self.rows {
            let groups = row
                .groups
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .join(", ");
            table.add_row(
                Row::new()
                    .with_cell(Cell::from(row.measure.to_string()))
                    .with_cell(Cell::from(format!(
                        "{} - {}",
                        row.interval.start, row.interval.end
                    )))
                    .with_cell(Cell::from(groups))
                    .with_cell(Cell::from(row.numerator.to_string()))
                    .with_cell(Cell::from(row.denominator.to_string()))
                    .with_cell(Cell::from(
                        row.ratio
                            .map(|r| format!("{:.4}", r))
                            .unwrap_or_else(|| "-".into()),
                    )),
            );
        }
        table
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        query::{age_on, col, lit, sex, DateExpr},
        test_util::*,
        Sex,
    };

    #[test]
    fn monthly_intervals() {
        let intervals = Intervals::months(3).starting_on(ymd(2019, 11, 1)).unwrap();
        let got = intervals.iter().map(|i| (i.start, i.end)).collect::<Vec<_>>();
        assert_eq!(
            got,
            [
                (ymd(2019, 11, 1), ymd(2019, 11, 30)),
                (ymd(2019, 12, 1), ymd(2019, 12, 31)),
                (ymd(2020, 1, 1), ymd(2020, 1, 31)),
            ]
        );
        assert!(Intervals::months(0).starting_on(ymd(2019, 1, 1)).is_err());
    }

    #[test]
    fn month_end_start_tiles() {
        let intervals = Intervals::months(4).starting_on(ymd(2020, 1, 31)).unwrap();
        let got = intervals.iter().map(|i| (i.start, i.end)).collect::<Vec<_>>();
        assert_eq!(
            got,
            [
                (ymd(2020, 1, 31), ymd(2020, 2, 28)),
                (ymd(2020, 2, 29), ymd(2020, 3, 30)),
                (ymd(2020, 3, 31), ymd(2020, 4, 29)),
                (ymd(2020, 4, 30), ymd(2020, 5, 30)),
            ]
        );
        for (prev, next) in got.iter().tuple_windows() {
            assert_eq!(next.0, prev.1 + Duration::days(1));
        }
    }

    fn adults_dataset() -> Dataset {
        let mut dataset = Dataset::new();
        dataset
            .define("adult", age_on(DateExpr::index_date()).ge(18i64))
            .unwrap();
        dataset.define("sex", sex()).unwrap();
        dataset
    }

    #[test]
    fn declaration_errors() {
        let mut measures = Measures::new(adults_dataset());
        let err = measures
            .define_measure(Measure::new("m").numerator(col("adult")).denominator(lit(true)))
            .unwrap_err();
        assert!(matches!(err, StudyError::NoIntervals(_)));

        measures.define_defaults(Intervals::months(1).starting_on(ymd(2020, 1, 1)).unwrap());
        let err = measures
            .define_measure(Measure::new("m").numerator(col("missing")).denominator(lit(true)))
            .unwrap_err();
        assert!(matches!(err, StudyError::UndefinedColumn(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);

        let err = measures
            .define_measure(Measure::new("m").numerator(col("sex")).denominator(lit(true)))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Query);

        measures
            .define_measure(Measure::new("m").numerator(col("adult")).denominator(lit(true)))
            .unwrap();
        let err = measures
            .define_measure(Measure::new("m").numerator(col("adult")).denominator(lit(true)))
            .unwrap_err();
        assert!(matches!(err, StudyError::DuplicateMeasure(_)));
    }

    #[test]
    fn counts_and_zero_denominators() {
        let records = records(vec![
            patient(1, Some(ymd(1990, 1, 1)), Sex::Female, None),
            patient(2, Some(ymd(1950, 1, 1)), Sex::Female, None),
            patient(3, Some(ymd(2010, 1, 1)), Sex::Male, None),
        ]);
        let mut measures = Measures::new(adults_dataset());
        measures.define_defaults(Intervals::months(2).starting_on(ymd(2020, 1, 1)).unwrap());
        measures
            .define_measure(
                Measure::new("female_adults")
                    .numerator(col("sex").equals("female"))
                    .denominator(col("adult"))
                    .group_by("sex", col("sex")),
            )
            .unwrap();
        measures
            .define_measure(
                Measure::new("nobody")
                    .numerator(lit(true))
                    .denominator(lit(false)),
            )
            .unwrap();

        let results = measures.calculate(&records).unwrap();
        let female = results.for_measure("female_adults").collect::<Vec<_>>();
        assert_eq!(female.len(), 4);
        let jan_female = female[0];
        assert_eq!(jan_female.group("sex"), Some(&Value::from("female")));
        assert_eq!((jan_female.numerator, jan_female.denominator), (2, 2));
        assert_eq!(jan_female.ratio, Some(1.0));
        // the only male is a child: the group is reported but its ratio is undefined
        let jan_male = female[1];
        assert_eq!(jan_male.group("sex"), Some(&Value::from("male")));
        assert_eq!((jan_male.numerator, jan_male.denominator), (0, 0));
        assert_eq!(jan_male.ratio, None);

        let nobody = results.for_measure("nobody").collect::<Vec<_>>();
        assert_eq!(nobody.len(), 2);
        assert!(nobody.iter().all(|row| row.denominator == 0 && row.ratio.is_none()));
    }

    #[test]
    fn write_csv() {
        let records = records(vec![patient(1, Some(ymd(1990, 1, 1)), Sex::Female, None)]);
        let mut measures = Measures::new(adults_dataset());
        measures.define_defaults(Intervals::months(1).starting_on(ymd(2020, 1, 1)).unwrap());
        measures
            .define_measure(
                Measure::new("adults")
                    .numerator(col("adult"))
                    .denominator(lit(true))
                    .group_by("sex", col("sex")),
            )
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("measures.csv");
        measures.calculate(&records).unwrap().write_csv(&path).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(
            written,
            "measure,interval_start,interval_end,ratio,numerator,denominator,sex\n\
             adults,2020-01-01,2020-01-31,1,1,1,female\n"
        );
    }
}
