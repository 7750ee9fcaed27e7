pub mod codelist;
pub mod codelists;
pub mod config;
pub mod dataset;
pub mod definition;
pub mod error;
pub mod measures;
pub mod query;
mod range;
pub mod study;
mod util;

pub use anyhow::{Context, Error};
use chrono::{Datelike, NaiveDate};
use itertools::Itertools;
use qu::ick_use::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt, fs, io,
    ops::Deref,
    path::{Path, PathBuf},
    sync::Arc,
};

pub use crate::{
    codelist::{Code, Codelist},
    codelists::Codelists,
    config::StudyConfig,
    dataset::Dataset,
    error::StudyError,
    measures::{Interval, Intervals, Measure, Measures},
    range::{Range, RangeSet},
    util::{header, ResultExt},
};
use crate::util::{optional_date, optional_int, optional_string};

pub type ArcStr = Arc<str>;
pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
pub type PatientId = u64;

/// Anything stored per patient.
pub trait PatientRow {
    fn patient_id(&self) -> PatientId;
}

#[derive(Debug, Clone, Deserialize)]
struct PatientRaw {
    patient_id: PatientId,
    #[serde(deserialize_with = "optional_date")]
    date_of_birth: Option<NaiveDate>,
    sex: Sex,
    #[serde(deserialize_with = "optional_date")]
    date_of_death: Option<NaiveDate>,
}

/// A row in the patients table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub patient_id: PatientId,
    pub date_of_birth: Option<NaiveDate>,
    pub sex: Sex,
    pub date_of_death: Option<NaiveDate>,
}

impl From<PatientRaw> for Patient {
    fn from(from: PatientRaw) -> Self {
        Self {
            patient_id: from.patient_id,
            date_of_birth: from.date_of_birth,
            sex: from.sex,
            date_of_death: from.date_of_death,
        }
    }
}

impl Patient {
    /// Age in whole years on `date`, or `None` if we don't know when they were born.
    pub fn age_on(&self, date: NaiveDate) -> Option<i64> {
        let dob = self.date_of_birth?;
        let mut age = i64::from(date.year() - dob.year());
        if (date.month(), date.day()) < (dob.month(), dob.day()) {
            age -= 1;
        }
        Some(age)
    }
}

impl PatientRow for Patient {
    fn patient_id(&self) -> PatientId {
        self.patient_id
    }
}

/// The parsed list of patients, with a pre-built index for the `patient_id` field.
#[derive(Debug, Clone, Default)]
pub struct Patients {
    els: Arc<Vec<Patient>>,
    id_idx: BTreeMap<PatientId, usize>,
}

impl Patients {
    pub fn new(els: Vec<Patient>) -> Result<Self> {
        let mut this = Patients {
            els: els.into(),
            id_idx: BTreeMap::new(),
        };
        this.rebuild_index()?;
        Ok(this)
    }

    pub fn find_by_id(&self, id: PatientId) -> Option<&Patient> {
        let idx = self.id_idx.get(&id)?;
        self.els.get(*idx)
    }

    fn rebuild_index(&mut self) -> Result {
        self.id_idx.clear();
        for (idx, el) in self.els.iter().enumerate() {
            ensure!(
                self.id_idx.insert(el.patient_id, idx).is_none(),
                "patient {} appears more than once",
                el.patient_id
            );
        }
        Ok(())
    }
}

impl Deref for Patients {
    type Target = [Patient];
    fn deref(&self) -> &Self::Target {
        &self.els
    }
}

#[derive(Debug, Clone, Deserialize)]
struct AddressRaw {
    patient_id: PatientId,
    start_date: NaiveDate,
    #[serde(deserialize_with = "optional_date")]
    end_date: Option<NaiveDate>,
    #[serde(deserialize_with = "optional_int")]
    imd_rounded: Option<i64>,
}

/// A row in the addresses table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub patient_id: PatientId,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    /// Index of multiple deprivation rank, rounded to the nearest 100. Lower is more deprived.
    pub imd_rounded: Option<i64>,
}

impl From<AddressRaw> for Address {
    fn from(from: AddressRaw) -> Self {
        Self {
            patient_id: from.patient_id,
            start_date: from.start_date,
            end_date: from.end_date,
            imd_rounded: from.imd_rounded,
        }
    }
}

impl PatientRow for Address {
    fn patient_id(&self) -> PatientId {
        self.patient_id
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RegistrationRaw {
    patient_id: PatientId,
    start_date: NaiveDate,
    #[serde(deserialize_with = "optional_date")]
    end_date: Option<NaiveDate>,
    #[serde(deserialize_with = "optional_string")]
    practice_nuts1_region_name: Option<ArcStr>,
}

/// A row in the practice registrations table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub patient_id: PatientId,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub practice_nuts1_region_name: Option<ArcStr>,
}

impl From<RegistrationRaw> for Registration {
    fn from(from: RegistrationRaw) -> Self {
        Self {
            patient_id: from.patient_id,
            start_date: from.start_date,
            end_date: from.end_date,
            practice_nuts1_region_name: from.practice_nuts1_region_name,
        }
    }
}

impl PatientRow for Registration {
    fn patient_id(&self) -> PatientId {
        self.patient_id
    }
}

#[derive(Debug, Deserialize)]
struct ClinicalEventRaw {
    patient_id: PatientId,
    date: NaiveDate,
    snomedct_code: Code,
}

#[derive(Debug, Deserialize)]
struct MedicationRaw {
    patient_id: PatientId,
    date: NaiveDate,
    dmd_code: Code,
}

/// A coded, dated row in the clinical events or medications table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub patient_id: PatientId,
    pub date: NaiveDate,
    pub code: Code,
}

impl From<ClinicalEventRaw> for Event {
    fn from(from: ClinicalEventRaw) -> Self {
        Self {
            patient_id: from.patient_id,
            date: from.date,
            code: from.snomedct_code,
        }
    }
}

impl From<MedicationRaw> for Event {
    fn from(from: MedicationRaw) -> Self {
        Self {
            patient_id: from.patient_id,
            date: from.date,
            code: from.dmd_code,
        }
    }
}

impl PatientRow for Event {
    fn patient_id(&self) -> PatientId {
        self.patient_id
    }
}

/// Rows of one table grouped by patient, so each patient's rows can be borrowed as a slice.
#[derive(Debug, Clone)]
pub struct Rows<T> {
    els: Arc<Vec<T>>,
    id_idx: BTreeMap<PatientId, (usize, usize)>,
}

impl<T: PatientRow> Rows<T> {
    /// Row order is kept within each patient.
    pub fn new(mut els: Vec<T>) -> Self {
        els.sort_by_key(|el| el.patient_id());
        let mut id_idx = BTreeMap::new();
        let mut start = 0;
        for (patient_id, group) in &els.iter().group_by(|el| el.patient_id()) {
            let len = group.count();
            id_idx.insert(patient_id, (start, start + len));
            start += len;
        }
        Self {
            els: Arc::new(els),
            id_idx,
        }
    }

    pub fn for_patient(&self, patient_id: PatientId) -> &[T] {
        match self.id_idx.get(&patient_id) {
            Some((start, end)) => &self.els[*start..*end],
            None => &[],
        }
    }

    /// Patient ids that have rows here.
    pub fn patient_ids(&self) -> impl Iterator<Item = PatientId> + '_ {
        self.id_idx.keys().copied()
    }
}

impl<T> Default for Rows<T> {
    fn default() -> Self {
        Self {
            els: Arc::new(vec![]),
            id_idx: BTreeMap::new(),
        }
    }
}

impl<T> Deref for Rows<T> {
    type Target = [T];
    fn deref(&self) -> &Self::Target {
        &self.els
    }
}

/// Everything we know about the patients in the extract. Read only once loaded.
#[derive(Debug, Clone, Default)]
pub struct PatientRecords {
    pub patients: Patients,
    pub addresses: Rows<Address>,
    pub practice_registrations: Rows<Registration>,
    pub clinical_events: Rows<Event>,
    pub medications: Rows<Event>,
}

/// The on-disk form of `PatientRecords`.
#[derive(Serialize, Deserialize)]
struct RecordsData {
    patients: Vec<Patient>,
    addresses: Vec<Address>,
    practice_registrations: Vec<Registration>,
    clinical_events: Vec<Event>,
    medications: Vec<Event>,
}

impl PatientRecords {
    pub fn new(
        patients: Vec<Patient>,
        addresses: Vec<Address>,
        practice_registrations: Vec<Registration>,
        clinical_events: Vec<Event>,
        medications: Vec<Event>,
    ) -> Result<Self> {
        let this = Self {
            patients: Patients::new(patients)?,
            addresses: Rows::new(addresses),
            practice_registrations: Rows::new(practice_registrations),
            clinical_events: Rows::new(clinical_events),
            medications: Rows::new(medications),
        };
        this.warn_orphans();
        Ok(this)
    }

    /// Load the tables from a directory of csv files, as delivered in the database extract.
    pub fn load_extract(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let patients: Vec<PatientRaw> = load_orig(dir.join("patients.csv"))?;
        let addresses: Vec<AddressRaw> = load_orig(dir.join("addresses.csv"))?;
        let registrations: Vec<RegistrationRaw> =
            load_orig(dir.join("practice_registrations.csv"))?;
        let clinical_events: Vec<ClinicalEventRaw> = load_orig(dir.join("clinical_events.csv"))?;
        let medications: Vec<MedicationRaw> = load_orig(dir.join("medications.csv"))?;
        let this = Self::new(
            patients.into_iter().map(Into::into).collect(),
            addresses.into_iter().map(Into::into).collect(),
            registrations.into_iter().map(Into::into).collect(),
            clinical_events.into_iter().map(Into::into).collect(),
            medications.into_iter().map(Into::into).collect(),
        )?;
        event!(
            Level::INFO,
            "loaded extract from \"{}\": {}",
            dir.display(),
            this.summary()
        );
        Ok(this)
    }

    /// Load records previously written with [`PatientRecords::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data: RecordsData = load(path.as_ref())?;
        let this = Self::new(
            data.patients,
            data.addresses,
            data.practice_registrations,
            data.clinical_events,
            data.medications,
        )?;
        event!(Level::INFO, "loaded records: {}", this.summary());
        Ok(this)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        let data = RecordsData {
            patients: self.patients.to_vec(),
            addresses: self.addresses.to_vec(),
            practice_registrations: self.practice_registrations.to_vec(),
            clinical_events: self.clinical_events.to_vec(),
            medications: self.medications.to_vec(),
        };
        save(&data, path)
    }

    /// Every patient, with their rows from the other tables.
    pub fn iter_patients(&self) -> impl Iterator<Item = PatientView<'_>> + '_ {
        self.patients.iter().map(move |patient| self.view(patient))
    }

    pub fn view<'a>(&'a self, patient: &'a Patient) -> PatientView<'a> {
        let id = patient.patient_id;
        PatientView {
            patient,
            addresses: self.addresses.for_patient(id),
            practice_registrations: self.practice_registrations.for_patient(id),
            clinical_events: self.clinical_events.for_patient(id),
            medications: self.medications.for_patient(id),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} patients, {} addresses, {} registrations, {} clinical events, {} medications",
            self.patients.len(),
            self.addresses.len(),
            self.practice_registrations.len(),
            self.clinical_events.len(),
            self.medications.len()
        )
    }

    /// Rows whose patient isn't in the patients table are never looked at.
    fn warn_orphans(&self) {
        let ids = self
            .addresses
            .patient_ids()
            .chain(self.practice_registrations.patient_ids())
            .chain(self.clinical_events.patient_ids())
            .chain(self.medications.patient_ids());
        for id in ids {
            if self.patients.find_by_id(id).is_none() {
                event!(Level::WARN, "no patient with ID {}", id);
            }
        }
    }
}

/// One patient and their rows in every table.
#[derive(Debug, Clone, Copy)]
pub struct PatientView<'a> {
    pub patient: &'a Patient,
    pub addresses: &'a [Address],
    pub practice_registrations: &'a [Registration],
    pub clinical_events: &'a [Event],
    pub medications: &'a [Event],
}

impl<'a> PatientView<'a> {
    /// The address active on `date`. If several are, the most recently started one.
    pub fn address_on(&self, date: NaiveDate) -> Option<&'a Address> {
        self.addresses
            .iter()
            .filter(|addr| active_on(addr.start_date, addr.end_date, date))
            .max_by_key(|addr| addr.start_date)
    }

    /// The practice registration active on `date`. If several are, the most recently started
    /// one.
    pub fn registration_on(&self, date: NaiveDate) -> Option<&'a Registration> {
        self.practice_registrations
            .iter()
            .filter(|reg| active_on(reg.start_date, reg.end_date, date))
            .max_by_key(|reg| reg.start_date)
    }

    /// Whether a single registration covers every day from `from` to `to`.
    pub fn registered_between(&self, from: NaiveDate, to: NaiveDate) -> bool {
        self.practice_registrations.iter().any(|reg| {
            reg.start_date <= from && reg.end_date.map_or(true, |end| end >= to)
        })
    }
}

/// Both ends are inclusive.
fn active_on(start: NaiveDate, end: Option<NaiveDate>, date: NaiveDate) -> bool {
    start <= date && end.map_or(true, |end| end >= date)
}

// Sub-types

/// Sex as recorded in the patients table.
///
/// Ordering is arbitrary.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize, Hash, Ord, PartialOrd)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    #[serde(alias = "M", alias = "m")]
    Male,
    #[serde(alias = "F", alias = "f")]
    Female,
    Intersex,
    #[serde(alias = "")]
    Unknown,
}

impl Sex {
    pub fn as_str(self) -> &'static str {
        match self {
            Sex::Male => "male",
            Sex::Female => "female",
            Sex::Intersex => "intersex",
            Sex::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Load data into memory.
fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    fn inner<T: DeserializeOwned>(path: &Path) -> Result<T> {
        let reader = io::BufReader::new(fs::File::open(path)?);
        bincode::deserialize_from(reader).map_err(Into::into)
    }
    check_extension(path, "bin")?;

    inner(path).with_context(|| format!("unable to load data from \"{}\"", path.display()))
}

/// Save data to disk.
fn save<T: Serialize>(contents: &T, path: impl AsRef<Path>) -> Result {
    fn inner<T: Serialize>(contents: &T, path: &Path) -> Result {
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
        let mut out = io::BufWriter::new(fs::File::create(path)?);
        bincode::serialize_into(&mut out, contents)?;
        Ok(())
    }
    let path = path.as_ref();
    check_extension(path, "bin")?;

    inner(contents, path).with_context(|| format!("unable to save data to \"{}\"", path.display()))
}

/// Load a table from the original database extract.
fn load_orig<T: DeserializeOwned>(path: PathBuf) -> Result<Vec<T>> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(&path)?
        .into_deserialize()
        .collect::<Result<Vec<T>, _>>()
        .with_context(|| format!("while loading \"{}\"", path.display()))
}

pub fn check_extension(path: &Path, ext: &str) -> Result<()> {
    ensure!(
        matches!(path.extension(), Some(p) if p == ext),
        "filename should end with `.{}`",
        ext
    );
    Ok(())
}
