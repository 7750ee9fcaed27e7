use crate::{error::StudyError, ArcStr};

use serde::{Deserialize, Serialize};
use std::{
    collections::{btree_map, BTreeMap},
    fmt, iter, ops,
    path::Path,
    sync::Arc,
};

/// A clinical (SNOMED CT) or medication (dm+d) code.
///
/// Codes are opaque: we never look inside them, only compare them for equality.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Code(ArcStr);

impl Code {
    pub fn new(code: impl AsRef<str>) -> Self {
        Code(code.as_ref().trim().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Code {
    fn from(s: &str) -> Self {
        Code::new(s)
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A set of codes, each optionally tagged with a category label.
#[derive(Debug, Default, Clone)]
pub struct Codelist {
    codes: Arc<BTreeMap<Code, Option<ArcStr>>>,
}

impl Codelist {
    /// Duplicates will be removed (the first category seen for a code wins).
    fn new(codes: BTreeMap<Code, Option<ArcStr>>) -> Self {
        Self {
            codes: Arc::new(codes),
        }
    }

    /// Load a codelist from a csv file with a header row.
    ///
    /// `column` names the column holding the codes. If `category_column` is given, each code is
    /// tagged with the value in that column.
    pub fn from_csv(
        path: impl AsRef<Path>,
        column: &str,
        category_column: Option<&str>,
    ) -> Result<Self, StudyError> {
        let path = path.as_ref();
        let read_err = |source| StudyError::CodelistRead {
            path: path.to_owned(),
            source,
        };
        let missing_col = |column: &str| StudyError::CodelistColumn {
            column: column.to_owned(),
            path: path.to_owned(),
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(read_err)?;
        let headers = reader.headers().map_err(read_err)?.clone();
        let code_idx = headers
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| missing_col(column))?;
        let category_idx = match category_column {
            Some(name) => Some(
                headers
                    .iter()
                    .position(|h| h == name)
                    .ok_or_else(|| missing_col(name))?,
            ),
            None => None,
        };

        let mut codes = BTreeMap::new();
        for record in reader.into_records() {
            let record = record.map_err(read_err)?;
            let code = match record.get(code_idx) {
                Some(code) if !code.is_empty() => Code::new(code),
                _ => continue,
            };
            let category = category_idx
                .and_then(|idx| record.get(idx))
                .map(ArcStr::from);
            codes.entry(code).or_insert(category);
        }
        Ok(Self::new(codes))
    }

    /// Combine several codelists into one whose members are the members of any of them.
    ///
    /// Categories do not survive a union.
    pub fn union<'a>(lists: impl IntoIterator<Item = &'a Codelist>) -> Self {
        lists
            .into_iter()
            .flat_map(|list| list.iter())
            .cloned()
            .collect()
    }

    pub fn contains(&self, code: &Code) -> bool {
        self.codes.contains_key(code)
    }

    /// The category attached to `code`, if this list is categorised and contains it.
    pub fn category(&self, code: &Code) -> Option<&str> {
        self.codes.get(code).and_then(|cat| cat.as_deref())
    }

    pub fn has_categories(&self) -> bool {
        !self.codes.is_empty() && self.codes.values().all(Option::is_some)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn iter(&self) -> btree_map::Keys<'_, Code, Option<ArcStr>> {
        self.codes.keys()
    }
}

impl FromIterator<Code> for Codelist {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = Code>,
    {
        Self::new(iter.into_iter().zip(iter::repeat(None)).collect())
    }
}

impl FromIterator<(Code, ArcStr)> for Codelist {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = (Code, ArcStr)>,
    {
        let mut codes = BTreeMap::new();
        for (code, category) in iter {
            codes.entry(code).or_insert(Some(category));
        }
        Self::new(codes)
    }
}

/// Addition for `Codelist`s is the union: A + B contains every code in A or in B.
impl ops::Add<&Codelist> for &Codelist {
    type Output = Codelist;
    fn add(self, rhs: &Codelist) -> Self::Output {
        Codelist::union([self, rhs])
    }
}

impl ops::Add<&Codelist> for Codelist {
    type Output = Codelist;
    fn add(self, rhs: &Codelist) -> Self::Output {
        &self + rhs
    }
}

impl fmt::Display for Codelist {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        let mut codes = self.codes.keys();
        if let Some(code) = codes.next() {
            write!(f, "{}", code)?;
        }
        for code in codes {
            write!(f, ", {}", code)?;
        }
        write!(f, "}}")
    }
}
