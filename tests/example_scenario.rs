use chrono::NaiveDate;
use opioid_prescribing::{
    definition::population, query::Value, study::Study, Intervals, Measure, Measures,
    PatientRecords,
};
use std::{fs, path::Path};

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn write(dir: &Path, name: &str, contents: &str) {
    fs::write(dir.join(name), contents).unwrap();
}

fn write_codelists(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    write(dir, "primis-covid19-vacc-uptake-longres.csv", "code,term\nhome1,Care home\n");
    write(
        dir,
        "opensafely-cancer-excluding-lung-and-haematological-snomed.csv",
        "id,name\nca1,Other\n",
    );
    write(dir, "opensafely-lung-cancer-snomed.csv", "id,name\nca2,Lung\n");
    write(dir, "opensafely-haematological-cancer-snomed.csv", "id,name\nca3,Haem\n");
    write(
        dir,
        "opensafely-high-dose-long-acting-opioids-openprescribing-dmd.csv",
        "code,term\nhi1,High dose\n",
    );
    write(
        dir,
        "opensafely-non-high-dose-long-acting-opioids-openprescribing-dmd.csv",
        "code,term\nlo1,Low dose\n",
    );
    for (route, code) in [
        ("buccal-nasal-and-oromucosal", "buc1"),
        ("inhalation", "inh1"),
        ("oral", "oral1"),
        ("parenteral", "par1"),
        ("rectal", "rec1"),
        ("transdermal", "trans1"),
    ] {
        write(
            dir,
            &format!(
                "opensafely-opioid-containing-medicines-{}-excluding-drugs-for-substance-misuse-dmd.csv",
                route
            ),
            &format!("code,term\n{},{}\n", code, route),
        );
    }
    write(
        dir,
        "opensafely-ethnicity-snomed-0removed.csv",
        "snomedcode,Grouping_16,Grouping_6\neth1,British,1\n",
    );
    write(dir, "opensafely-oxycodone-subcutaneous-dmd.csv", "code,term\npar1,Oxycodone\n");
    write(dir, "opensafely-morphine-subcutaneous-dmd.csv", "code,term\npar2,Morphine\n");
}

fn write_extract(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    write(
        dir,
        "patients.csv",
        "patient_id,date_of_birth,sex,date_of_death\n\
         1,1974-06-01,female,\n\
         2,1980-02-01,male,\n\
         3,2010-01-01,female,\n\
         4,1950-01-01,male,2019-07-01\n",
    );
    write(
        dir,
        "addresses.csv",
        "patient_id,start_date,end_date,imd_rounded\n\
         1,2010-01-01,,1000\n\
         2,2010-01-01,,null\n",
    );
    write(
        dir,
        "practice_registrations.csv",
        "patient_id,start_date,end_date,practice_nuts1_region_name\n\
         1,2000-01-01,,London\n\
         2,2000-01-01,,London\n\
         3,2010-01-01,,London\n\
         4,2000-01-01,,London\n",
    );
    write(
        dir,
        "clinical_events.csv",
        "patient_id,date,snomedct_code\n1,2001-01-01,eth1\n",
    );
    write(
        dir,
        "medications.csv",
        "patient_id,date,dmd_code\n\
         1,2019-07-12,oral1\n\
         3,2019-07-03,oral1\n",
    );
}

/// A study directory with codelists, a records cache and a config.
fn setup(dir: &Path) -> Study {
    write_codelists(&dir.join("codelists"));
    write_extract(&dir.join("extract"));
    let records = PatientRecords::load_extract(dir.join("extract")).unwrap();
    records.save(dir.join("records.bin")).unwrap();
    write(
        dir,
        "study.toml",
        "codelist_dir = \"codelists\"\n\
         records = \"records.bin\"\n\
         output_dir = \"output\"\n\
         [dataset]\n\
         naive_lookback_months = 24\n",
    );
    Study::load(dir.join("study.toml")).unwrap()
}

#[test]
fn new_oral_prescription_in_index_month() {
    let dir = tempfile::tempdir().unwrap();
    let study = setup(dir.path());
    let dataset = study.full_dataset().unwrap();
    let interval = opioid_prescribing::Interval::month_starting(ymd(2019, 7, 1)).unwrap();

    let records = &study.records;
    let patient = records.patients.find_by_id(1).unwrap();
    let row = dataset.evaluate(&records.view(patient), &interval).unwrap();
    assert_eq!(row.get("age_group"), Some(&Value::from("40-49")));
    assert_eq!(row.get("sex"), Some(&Value::from("female")));
    assert_eq!(row.get("imd10"), Some(&Value::from("1 (most deprived)")));
    assert_eq!(row.get("ethnicity6"), Some(&Value::from("White")));
    for name in ["opioid_any", "oral_opioid_any", "opioid_naive", "opioid_new"] {
        assert_eq!(row.get(name), Some(&Value::Bool(true)), "{}", name);
    }
}

#[test]
fn measures_by_sex() {
    let dir = tempfile::tempdir().unwrap();
    let study = setup(dir.path());
    let dataset = study.full_dataset().unwrap();
    let opioid_any = dataset.col("opioid_any").unwrap();
    let sex = dataset.col("sex").unwrap();

    let mut measures = Measures::new(dataset);
    measures.define_defaults(Intervals::months(2).starting_on(ymd(2019, 7, 1)).unwrap());
    measures
        .define_measure(
            Measure::new("opioid_any_sex")
                .numerator(opioid_any)
                .denominator(population())
                .group_by("sex", sex),
        )
        .unwrap();
    let results = study.run("measures_test", &measures).unwrap();

    let july = results
        .rows()
        .iter()
        .filter(|row| row.interval.start == ymd(2019, 7, 1))
        .map(|row| (row.group("sex").unwrap().to_string(), row.numerator, row.denominator))
        .collect::<Vec<_>>();
    // Patient 3 is a child and patient 4 died on the index date, so neither counts.
    assert_eq!(
        july,
        [
            ("female".to_string(), 1, 1),
            ("male".to_string(), 0, 1)
        ]
    );

    let written = fs::read_to_string(dir.path().join("output").join("measures_test.csv")).unwrap();
    let mut lines = written.lines();
    assert_eq!(
        lines.next(),
        Some("measure,interval_start,interval_end,ratio,numerator,denominator,sex")
    );
    assert_eq!(
        lines.next(),
        Some("opioid_any_sex,2019-07-01,2019-07-31,1,1,1,female")
    );
}
