//! Every codelist the study uses, loaded once from the codelist directory.
use qu::ick_use::*;
use std::path::Path;

use crate::codelist::Codelist;

const ETHNICITY: &str = "opensafely-ethnicity-snomed-0removed.csv";

/// The study's codelists.
///
/// Cheap to clone.
#[derive(Debug, Clone)]
pub struct Codelists {
    pub carehome_primis: Codelist,

    pub oth_ca: Codelist,
    pub lung_ca: Codelist,
    pub haem_ca: Codelist,
    /// `oth_ca + lung_ca + haem_ca`
    pub cancer: Codelist,

    /// High dose, long-acting opioids.
    pub hi_opioid: Codelist,
    pub non_hi_opioid: Codelist,
    /// `hi_opioid + non_hi_opioid`
    pub long_opioid: Codelist,

    /// Buccal, nasal and oromucosal.
    pub buc_opioid: Codelist,
    pub inh_opioid: Codelist,
    pub oral_opioid: Codelist,
    pub par_opioid: Codelist,
    pub rec_opioid: Codelist,
    pub trans_opioid: Codelist,
    /// Buccal, inhaled and rectal.
    pub oth_opioid: Codelist,
    /// All six routes.
    pub opioid: Codelist,

    /// Categorised by the 16 ethnicity groups.
    pub ethnicity_16: Codelist,
    /// Categorised by the 6 ethnicity groups ("1" to "6").
    pub ethnicity_6: Codelist,

    /// Subcutaneous oxycodone.
    pub oxy_par: Codelist,
    /// Subcutaneous morphine.
    pub morph_par: Codelist,
}

impl Codelists {
    /// Load all codelists from csv files in `dir`.
    ///
    /// Fails on the first list that can't be loaded.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        macro_rules! load {
            ($file:expr, $column:expr) => {
                Codelist::from_csv(dir.join($file), $column, None)?
            };
            ($file:expr, $column:expr, $category:expr) => {
                Codelist::from_csv(dir.join($file), $column, Some($category))?
            };
        }
        macro_rules! opioid_route {
            ($route:expr) => {
                load!(
                    format!(
                        "opensafely-opioid-containing-medicines-{}-excluding-drugs-for-substance-misuse-dmd.csv",
                        $route
                    ),
                    "code"
                )
            };
        }

        let carehome_primis = load!("primis-covid19-vacc-uptake-longres.csv", "code");

        let oth_ca = load!(
            "opensafely-cancer-excluding-lung-and-haematological-snomed.csv",
            "id"
        );
        let lung_ca = load!("opensafely-lung-cancer-snomed.csv", "id");
        let haem_ca = load!("opensafely-haematological-cancer-snomed.csv", "id");
        let cancer = Codelist::union([&oth_ca, &lung_ca, &haem_ca]);

        let hi_opioid = load!(
            "opensafely-high-dose-long-acting-opioids-openprescribing-dmd.csv",
            "code"
        );
        let non_hi_opioid = load!(
            "opensafely-non-high-dose-long-acting-opioids-openprescribing-dmd.csv",
            "code"
        );
        let long_opioid = &hi_opioid + &non_hi_opioid;

        let buc_opioid = opioid_route!("buccal-nasal-and-oromucosal");
        let inh_opioid = opioid_route!("inhalation");
        let oral_opioid = opioid_route!("oral");
        let par_opioid = opioid_route!("parenteral");
        let rec_opioid = opioid_route!("rectal");
        let trans_opioid = opioid_route!("transdermal");
        let oth_opioid = Codelist::union([&buc_opioid, &inh_opioid, &rec_opioid]);
        let opioid = Codelist::union([
            &buc_opioid,
            &inh_opioid,
            &oral_opioid,
            &par_opioid,
            &rec_opioid,
            &trans_opioid,
        ]);

        let ethnicity_16 = load!(ETHNICITY, "snomedcode", "Grouping_16");
        let ethnicity_6 = load!(ETHNICITY, "snomedcode", "Grouping_6");

        let oxy_par = load!("opensafely-oxycodone-subcutaneous-dmd.csv", "code");
        let morph_par = load!("opensafely-morphine-subcutaneous-dmd.csv", "code");

        event!(
            Level::INFO,
            "loaded codelists from \"{}\" ({} opioid codes, {} cancer codes)",
            dir.display(),
            opioid.len(),
            cancer.len()
        );

        Ok(Codelists {
            carehome_primis,
            oth_ca,
            lung_ca,
            haem_ca,
            cancer,
            hi_opioid,
            non_hi_opioid,
            long_opioid,
            buc_opioid,
            inh_opioid,
            oral_opioid,
            par_opioid,
            rec_opioid,
            trans_opioid,
            oth_opioid,
            opioid,
            ethnicity_16,
            ethnicity_6,
            oxy_par,
            morph_par,
        })
    }
}
