//! The study's dataset and population definitions.
//!
//! Dates are relative to the measure interval: `d` is the index date (the interval start) and `e`
//! the end date (by default the last day of the interval).
use crate::{
    codelist::Codelist,
    codelists::Codelists,
    dataset::Dataset,
    error::StudyError,
    query::{
        age_on, case, clinical_events, date_of_death, imd_on, lit, medications, region_on,
        registered_on, sex, when, DateExpr, Expr,
    },
    range::{Range, RangeSet},
};

/// Upper bound of the `imd_rounded` rank.
pub const IMD_MAX: i64 = 32844;

/// How far before the index date to look for earlier prescriptions.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Lookback {
    months: u32,
}

impl Lookback {
    pub fn months(months: u32) -> Self {
        Self { months }
    }

    pub fn as_months(self) -> u32 {
        self.months
    }
}

/// Parameters of the dataset definitions that have no sensible default.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DatasetParams {
    pub naive_lookback: Lookback,
}

/// Opioid prescribing, cancer and care home columns.
///
/// `end` defaults to the last day of the interval.
pub fn make_dataset_opioids(
    codelists: &Codelists,
    params: &DatasetParams,
    end: Option<DateExpr>,
) -> Result<Dataset, StudyError> {
    let d = DateExpr::index_date;
    let e = end.unwrap_or_else(DateExpr::end_date);
    let any_in_period = |codelist: &Codelist| {
        medications(codelist)
            .between(d(), e.clone())
            .exists_for_patient()
    };
    let lookback = params.naive_lookback.as_months();
    let lookback = i32::try_from(lookback).map_err(|_| {
        StudyError::Config(format!("naive lookback of {} months is too long", lookback))
    })?;

    let mut dataset = Dataset::new();

    // Any prescribing, overall and by route.
    dataset.define("opioid_any", any_in_period(&codelists.opioid))?;
    dataset.define("oral_opioid_any", any_in_period(&codelists.oral_opioid))?;
    dataset.define("trans_opioid_any", any_in_period(&codelists.trans_opioid))?;
    dataset.define("par_opioid_any", any_in_period(&codelists.par_opioid))?;
    dataset.define("rec_opioid_any", any_in_period(&codelists.rec_opioid))?;
    dataset.define("inh_opioid_any", any_in_period(&codelists.inh_opioid))?;
    dataset.define("buc_opioid_any", any_in_period(&codelists.buc_opioid))?;
    dataset.define("oth_opioid_any", any_in_period(&codelists.oth_opioid))?;
    dataset.define("hi_opioid_any", any_in_period(&codelists.hi_opioid))?;
    dataset.define("long_opioid_any", any_in_period(&codelists.long_opioid))?;
    dataset.define(
        "opioid_any_date",
        medications(&codelists.opioid)
            .between(d(), e.clone())
            .first_date(),
    )?;

    dataset.define(
        "cancer",
        clinical_events(&codelists.cancer)
            .between(d().minus_years(5), e.clone())
            .exists_for_patient(),
    )?;

    // New prescribing
    dataset.define(
        "opioid_naive",
        !medications(&codelists.opioid)
            .between(d().minus_months(lookback), d().minus_days(1))
            .exists_for_patient(),
    )?;
    dataset.define(
        "opioid_new",
        dataset.col("opioid_naive")? & dataset.col("opioid_any")?,
    )?;

    dataset.define(
        "carehome",
        clinical_events(&codelists.carehome_primis)
            .on_or_before(e)
            .exists_for_patient(),
    )?;

    Ok(dataset)
}

/// Everything in [`make_dataset_opioids`], plus demographics on the index date.
pub fn make_dataset(codelists: &Codelists, params: &DatasetParams) -> Result<Dataset, StudyError> {
    let d = DateExpr::index_date;
    let mut dataset = make_dataset_opioids(codelists, params, None)?;

    dataset.define("age_group", age_bands().case_expr(age_on(d()), "missing"))?;
    dataset.define("sex", sex())?;
    dataset.define("imd10", imd_deciles().case_expr(imd_on(d()), "unknown"))?;

    // Latest recorded ethnicity, at any time.
    let latest_ethnicity = |codelist: &Codelist| clinical_events(codelist).last_category();
    let ethnicity6 = latest_ethnicity(&codelists.ethnicity_6);
    dataset.define(
        "ethnicity6",
        case(
            ETHNICITY_6
                .iter()
                .map(|(group, label)| when(ethnicity6.clone().equals(*group)).then(*label)),
            "Unknown",
        ),
    )?;
    dataset.define("ethnicity16", latest_ethnicity(&codelists.ethnicity_16))?;
    dataset.define("region", region_on(d()))?;

    Ok(dataset)
}

const ETHNICITY_6: [(&str, &str); 6] = [
    ("1", "White"),
    ("2", "Mixed"),
    ("3", "South Asian"),
    ("4", "Black"),
    ("5", "Other"),
    ("6", "Not stated"),
];

/// Ten year age bands, with everyone 90 or over in the last band.
///
/// The first band is open below, so any known age under 30 is `"18-29"`.
pub fn age_bands() -> RangeSet<i64> {
    let mut bands = RangeSet::new().with(Range::new(i64::MIN, Some(30)), "18-29");
    for lower in (30..90).step_by(10) {
        bands = bands.with(
            Range::new(lower, Some(lower + 10)),
            format!("{}-{}", lower, lower + 9),
        );
    }
    bands.with(Range::new(90, None), "90+")
}

/// Deciles of the IMD rank, most deprived first.
///
/// Boundaries are `IMD_MAX * k / 10` with integer division.
pub fn imd_deciles() -> RangeSet<i64> {
    let bound = |k: i64| IMD_MAX * k / 10;
    let mut deciles = RangeSet::new();
    for k in 0..10 {
        let label = match k {
            0 => "1 (most deprived)".to_string(),
            9 => "10 (least deprived)".to_string(),
            k => (k + 1).to_string(),
        };
        deciles = deciles.with(Range::new(bound(k), Some(bound(k + 1))), label);
    }
    deciles
}

/// Adults (18 to 109) of known sex, alive and registered with a practice on the index date.
pub fn population() -> Expr {
    let d = DateExpr::index_date;
    age_on(d()).ge(18i64)
        & age_on(d()).lt(110i64)
        & (sex().equals("male") | sex().equals("female"))
        & (date_of_death().is_after(d()) | date_of_death().is_null())
        & registered_on(d())
}

/// The population of the earlier study definition, phrased as "has not died on or before the
/// index date".
///
/// Selects the same patients as [`population`].
pub fn population_cohortextractor() -> Expr {
    let d = DateExpr::index_date;
    let has_died = case(
        [when(date_of_death().is_on_or_before(d())).then(true)],
        lit(false),
    );
    !has_died
        & registered_on(d())
        & (sex().equals("male") | sex().equals("female"))
        & (age_on(d()).ge(18i64) & age_on(d()).lt(110i64))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        codelists::test_util::write_codelists,
        measures::Interval,
        query::{EvalContext, NoColumns, Value},
        test_util::*,
        Address, Registration, Sex,
    };
    use proptest::prelude::*;

    fn params() -> DatasetParams {
        DatasetParams {
            naive_lookback: Lookback::months(12),
        }
    }

    fn codelists() -> Codelists {
        let dir = tempfile::tempdir().unwrap();
        write_codelists(dir.path());
        Codelists::load(dir.path()).unwrap()
    }

    fn eval_plain(expr: &Expr, fixture: &Fixture, interval: &Interval) -> Value {
        let view = fixture.view();
        expr.eval(&EvalContext::new(&view, interval, &NoColumns))
            .unwrap()
    }

    fn registered(fixture: &mut Fixture) {
        fixture.practice_registrations = vec![Registration {
            patient_id: fixture.patient.patient_id,
            start_date: ymd(2000, 1, 1),
            end_date: None,
            practice_nuts1_region_name: Some("East".into()),
        }];
    }

    #[test]
    fn new_oral_prescription() {
        let codelists = codelists();
        let dataset = make_dataset(&codelists, &params()).unwrap();
        let mut fixture = Fixture::new(patient(1, Some(ymd(1974, 6, 1)), Sex::Female, None));
        fixture.addresses = vec![Address {
            patient_id: 1,
            start_date: ymd(2010, 1, 1),
            end_date: None,
            imd_rounded: Some(1000),
        }];
        registered(&mut fixture);
        fixture.medications = vec![event(1, ymd(2019, 7, 12), "oral1")];
        fixture.clinical_events = vec![event(1, ymd(2015, 1, 1), "eth1")];
        let interval = Interval::month_starting(ymd(2019, 7, 1)).unwrap();

        let row = dataset.evaluate(&fixture.view(), &interval).unwrap();
        let get = |name| row.get(name).unwrap().clone();
        assert_eq!(get("age_group"), Value::from("40-49"));
        assert_eq!(get("sex"), Value::from("female"));
        assert_eq!(get("imd10"), Value::from("1 (most deprived)"));
        assert_eq!(get("ethnicity6"), Value::from("South Asian"));
        assert_eq!(get("ethnicity16"), Value::from("Indian"));
        assert_eq!(get("region"), Value::from("East"));
        for name in ["opioid_any", "oral_opioid_any", "opioid_naive", "opioid_new"] {
            assert_eq!(get(name), Value::Bool(true), "{}", name);
        }
        assert_eq!(get("hi_opioid_any"), Value::Bool(true));
        assert_eq!(get("opioid_any_date"), Value::Date(ymd(2019, 7, 12)));
        assert_eq!(get("cancer"), Value::Bool(false));
        assert_eq!(get("carehome"), Value::Bool(false));

        // A month later they aren't naive any more.
        let next = Interval::month_starting(ymd(2019, 8, 1)).unwrap();
        let row = dataset.evaluate(&fixture.view(), &next).unwrap();
        assert_eq!(row.get("opioid_any"), Some(&Value::Bool(false)));
        assert_eq!(row.get("opioid_naive"), Some(&Value::Bool(false)));
        assert_eq!(row.get("opioid_new"), Some(&Value::Bool(false)));
    }

    #[test]
    fn cancer_lookback() {
        let codelists = codelists();
        let dataset = make_dataset_opioids(&codelists, &params(), None).unwrap();
        let mut fixture = Fixture::new(patient(1, Some(ymd(1950, 1, 1)), Sex::Male, None));
        fixture.clinical_events = vec![event(1, ymd(2015, 3, 1), "ca2")];
        let cancer_in = |start| {
            let interval = Interval::month_starting(start).unwrap();
            let row = dataset.evaluate(&fixture.view(), &interval).unwrap();
            row.get("cancer").cloned()
        };
        assert_eq!(cancer_in(ymd(2020, 3, 1)), Some(Value::Bool(true)));
        assert_eq!(cancer_in(ymd(2020, 4, 1)), Some(Value::Bool(false)));
        assert_eq!(cancer_in(ymd(2015, 2, 1)), Some(Value::Bool(false)));
    }

    #[test]
    fn unknown_demographics() {
        let codelists = codelists();
        let dataset = make_dataset(&codelists, &params()).unwrap();
        let mut fixture = Fixture::new(patient(1, None, Sex::Unknown, None));
        fixture.addresses = vec![Address {
            patient_id: 1,
            start_date: ymd(2010, 1, 1),
            end_date: None,
            imd_rounded: Some(-100),
        }];
        let interval = Interval::month_starting(ymd(2019, 7, 1)).unwrap();
        let row = dataset.evaluate(&fixture.view(), &interval).unwrap();
        assert_eq!(row.get("age_group"), Some(&Value::from("missing")));
        assert_eq!(row.get("imd10"), Some(&Value::from("unknown")));
        assert_eq!(row.get("ethnicity6"), Some(&Value::from("Unknown")));
        assert_eq!(row.get("region"), Some(&Value::Null));
    }

    #[test]
    fn naive_lookback_window() {
        let codelists = codelists();
        let dataset = make_dataset_opioids(&codelists, &params(), None).unwrap();
        let interval = Interval::month_starting(ymd(2020, 7, 1)).unwrap();
        let flags = |date| {
            let mut fixture = Fixture::new(patient(1, Some(ymd(1970, 1, 1)), Sex::Male, None));
            fixture.medications = vec![event(1, date, "oral1")];
            let row = dataset.evaluate(&fixture.view(), &interval).unwrap();
            ["opioid_any", "opioid_naive", "opioid_new"].map(|name| row.get(name).cloned().unwrap())
        };
        let (t, f) = (Value::Bool(true), Value::Bool(false));
        // Twelve months before the index date is the first day looked at.
        assert_eq!(flags(ymd(2019, 7, 1)), [f.clone(), f.clone(), f.clone()]);
        assert_eq!(flags(ymd(2019, 6, 30)), [f.clone(), t.clone(), f.clone()]);
        assert_eq!(flags(ymd(2020, 6, 30)), [f.clone(), f.clone(), f.clone()]);
        // A prescription on the index date itself is in the interval, not the lookback.
        assert_eq!(flags(ymd(2020, 7, 1)), [t.clone(), t.clone(), t]);
    }

    #[test]
    fn under_18_in_youngest_band() {
        let codelists = codelists();
        let dataset = make_dataset(&codelists, &params()).unwrap();
        let fixture = Fixture::new(patient(1, Some(ymd(2005, 1, 1)), Sex::Female, None));
        let interval = Interval::month_starting(ymd(2020, 1, 1)).unwrap();
        let row = dataset.evaluate(&fixture.view(), &interval).unwrap();
        assert_eq!(row.get("age_group"), Some(&Value::from("18-29")));
        assert_eq!(age_bands().label_for(Some(&0)), Some("18-29"));
        assert_eq!(age_bands().label_for(Some(&30)), Some("30-39"));
        assert_eq!(age_bands().label_for(Some(&120)), Some("90+"));
    }

    #[test]
    fn populations_agree() {
        let interval = Interval::month_starting(ymd(2020, 1, 1)).unwrap();
        let cases = [
            (Some(ymd(1980, 1, 1)), Sex::Male, None, true),
            (Some(ymd(1980, 1, 1)), Sex::Female, Some(ymd(2020, 1, 1)), false),
            (Some(ymd(1980, 1, 1)), Sex::Female, Some(ymd(2020, 1, 2)), true),
            (Some(ymd(2005, 1, 1)), Sex::Female, None, false),
            (Some(ymd(1980, 1, 1)), Sex::Intersex, None, false),
            (None, Sex::Male, None, false),
        ];
        for (dob, sex, dod, expected) in cases {
            let mut fixture = Fixture::new(patient(1, dob, sex, dod));
            registered(&mut fixture);
            for expr in [population(), population_cohortextractor()] {
                expr.check(&NoColumns).unwrap();
                assert_eq!(
                    eval_plain(&expr, &fixture, &interval).is_true(),
                    expected,
                    "{:?} {:?} {:?}",
                    dob,
                    sex,
                    dod
                );
            }
        }
        let fixture = Fixture::new(patient(1, Some(ymd(1980, 1, 1)), Sex::Male, None));
        assert!(!eval_plain(&population(), &fixture, &interval).is_true());
    }

    #[test]
    fn imd_boundaries() {
        let deciles = imd_deciles();
        assert_eq!(deciles.label_for(Some(&0)), Some("1 (most deprived)"));
        assert_eq!(deciles.label_for(Some(&3283)), Some("1 (most deprived)"));
        assert_eq!(deciles.label_for(Some(&3284)), Some("2"));
        assert_eq!(deciles.label_for(Some(&32843)), Some("10 (least deprived)"));
        assert_eq!(deciles.label_for(Some(&32844)), None);
        assert_eq!(deciles.label_for(Some(&-1)), None);
    }

    proptest! {
        #[test]
        fn age_bands_partition(age in -10i64..130) {
            let bands = age_bands();
            let matches = bands.iter().filter(|(range, _)| range.contains(&age)).count();
            prop_assert_eq!(matches, 1);
        }

        #[test]
        fn imd_deciles_monotonic(a in 0i64..IMD_MAX, b in 0i64..IMD_MAX) {
            let deciles = imd_deciles();
            let labels = deciles.labels().collect::<Vec<_>>();
            let position = |v: i64| {
                let label = deciles.label_for(Some(&v)).unwrap();
                labels.iter().position(|l| *l == label).unwrap()
            };
            if a <= b {
                prop_assert!(position(a) <= position(b));
            } else {
                prop_assert!(position(a) >= position(b));
            }
        }

        #[test]
        fn any_opioid_iff_any_route(routes in proptest::collection::vec(0usize..7, 0..4)) {
            let codes = ["oral1", "trans1", "par1", "rec1", "inh1", "buc1", "other"];
            let codelists = codelists();
            let dataset = make_dataset_opioids(&codelists, &params(), None).unwrap();
            let mut fixture = Fixture::new(patient(1, Some(ymd(1970, 1, 1)), Sex::Male, None));
            fixture.medications = routes
                .iter()
                .map(|idx| event(1, ymd(2021, 5, 10), codes[*idx]))
                .collect();
            let interval = Interval::month_starting(ymd(2021, 5, 1)).unwrap();
            let row = dataset.evaluate(&fixture.view(), &interval).unwrap();
            let any_route = [
                "oral_opioid_any",
                "trans_opioid_any",
                "par_opioid_any",
                "rec_opioid_any",
                "inh_opioid_any",
                "buc_opioid_any",
            ]
            .iter()
            .any(|name| row.get(name).unwrap().is_true());
            prop_assert_eq!(row.get("opioid_any").unwrap().is_true(), any_route);
        }
    }
}
