//! Named per-patient columns, computed once per patient per interval.
use std::collections::BTreeMap;

use crate::{
    error::StudyError,
    measures::Interval,
    query::{ColumnValues, EvalContext, Expr, Schema, Type, Value},
    ArcStr, PatientView,
};

#[derive(Debug, Clone)]
pub struct Column {
    pub name: ArcStr,
    pub expr: Expr,
    pub ty: Type,
}

/// An ordered set of columns. Later columns may refer to earlier ones by name.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    columns: Vec<Column>,
    index: BTreeMap<ArcStr, usize>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column, checking its expression against the columns already defined.
    pub fn define(&mut self, name: impl Into<ArcStr>, expr: Expr) -> Result<(), StudyError> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(StudyError::DuplicateColumn(name));
        }
        let ty = expr.check(self)?;
        self.index.insert(name.clone(), self.columns.len());
        self.columns.push(Column { name, expr, ty });
        Ok(())
    }

    /// A reference to a defined column, for use in later expressions.
    pub fn col(&self, name: &str) -> Result<Expr, StudyError> {
        match self.index.get_key_value(name) {
            Some((name, _)) => Ok(Expr::Column(name.clone())),
            None => Err(StudyError::UndefinedColumn(name.into())),
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.index.get(name).map(|idx| &self.columns[*idx])
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Compute every column for one patient.
    pub fn evaluate<'d>(
        &'d self,
        patient: &PatientView<'_>,
        interval: &Interval,
    ) -> Result<Row<'d>, StudyError> {
        let mut row = Row {
            dataset: self,
            values: Vec::with_capacity(self.columns.len()),
        };
        for column in &self.columns {
            let value = column
                .expr
                .eval(&EvalContext::new(patient, interval, &row))?;
            row.values.push(value);
        }
        Ok(row)
    }
}

impl Schema for Dataset {
    fn column_type(&self, name: &str) -> Option<Type> {
        self.column(name).map(|column| column.ty)
    }
}

/// The column values of one patient.
#[derive(Debug)]
pub struct Row<'d> {
    dataset: &'d Dataset,
    values: Vec<Value>,
}

impl<'d> Row<'d> {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(*self.dataset.index.get(name)?)
    }

    /// (name, value) pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.dataset
            .columns
            .iter()
            .map(|column| &*column.name)
            .zip(self.values.iter())
    }
}

impl ColumnValues for Row<'_> {
    fn value(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}
