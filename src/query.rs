//! A small query language over patient records.
//!
//! Expressions are trees built with the helper functions and operators in this module, type
//! checked once when they are declared (see [`Expr::check`]), then evaluated per patient per
//! interval (see [`Expr::eval`]).
//!
//! Nulls behave like they do in SQL: comparing with a null gives null, `&` and `|` use
//! three-valued logic, and a `case` branch whose condition is null is skipped.
use chrono::{Duration, Months, NaiveDate};
use std::{cmp::Ordering, fmt, ops};

use crate::{
    codelist::Codelist, error::StudyError, measures::Interval, ArcStr, Event, PatientView,
};

/// A single computed value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(ArcStr),
    Date(NaiveDate),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// `true` only for `Bool(true)`. Nulls count as false.
    pub fn is_true(&self) -> bool {
        matches!(self, Value::Bool(true))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    fn ty(&self) -> Option<Type> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(Type::Bool),
            Value::Int(_) => Some(Type::Int),
            Value::Str(_) => Some(Type::Str),
            Value::Date(_) => Some(Type::Date),
        }
    }
}

// Nulls render as an empty cell.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(v) => write!(f, "{}", v),
            Value::Str(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.into())
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

/// The type of an expression.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Type {
    Bool,
    Int,
    Str,
    Date,
}

impl Type {
    /// Whether values of this type can be used to group measures.
    pub fn is_categorical(self) -> bool {
        matches!(self, Type::Bool | Type::Int | Type::Str)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Type::Bool => "boolean",
            Type::Int => "integer",
            Type::Str => "string",
            Type::Date => "date",
        })
    }
}

// Dates

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Anchor {
    IndexDate,
    EndDate,
    Fixed(NaiveDate),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Shift {
    Days(i64),
    Months(i32),
}

/// A date relative to the interval being evaluated (or a fixed date), shifted by whole days,
/// months or years.
///
/// Month arithmetic clamps to the end of the month, so 31 January plus one month is the last
/// day of February.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateExpr {
    anchor: Anchor,
    shifts: Vec<Shift>,
}

impl DateExpr {
    /// The start of the interval.
    pub fn index_date() -> Self {
        Self::anchored(Anchor::IndexDate)
    }

    /// The last day of the interval.
    pub fn end_date() -> Self {
        Self::anchored(Anchor::EndDate)
    }

    pub fn fixed(date: NaiveDate) -> Self {
        Self::anchored(Anchor::Fixed(date))
    }

    fn anchored(anchor: Anchor) -> Self {
        DateExpr {
            anchor,
            shifts: vec![],
        }
    }

    pub fn plus_days(mut self, days: i64) -> Self {
        self.shifts.push(Shift::Days(days));
        self
    }

    pub fn minus_days(self, days: i64) -> Self {
        self.plus_days(-days)
    }

    pub fn plus_months(mut self, months: i32) -> Self {
        self.shifts.push(Shift::Months(months));
        self
    }

    pub fn minus_months(self, months: i32) -> Self {
        self.plus_months(-months)
    }

    pub fn plus_years(self, years: i32) -> Self {
        self.plus_months(years * 12)
    }

    pub fn minus_years(self, years: i32) -> Self {
        self.plus_months(-years * 12)
    }

    pub fn resolve(&self, interval: &Interval) -> Result<NaiveDate, StudyError> {
        let start = match self.anchor {
            Anchor::IndexDate => interval.start,
            Anchor::EndDate => interval.end,
            Anchor::Fixed(date) => date,
        };
        self.shifts
            .iter()
            .try_fold(start, |date, shift| match *shift {
                Shift::Days(days) => date.checked_add_signed(Duration::days(days)),
                Shift::Months(months) if months >= 0 => {
                    date.checked_add_months(Months::new(months.unsigned_abs()))
                }
                Shift::Months(months) => date.checked_sub_months(Months::new(months.unsigned_abs())),
            })
            .ok_or(StudyError::DateOutOfRange(start))
    }
}

// Patient attributes

/// A per-patient value read from one of the patient-level tables.
#[derive(Debug, Clone)]
pub enum Attribute {
    /// Whole years between date of birth and the given date.
    AgeOn(DateExpr),
    Sex,
    DateOfDeath,
    /// `imd_rounded` of the address active on the date.
    ImdOn(DateExpr),
    /// NUTS1 region of the practice the patient is registered with on the date.
    RegionOn(DateExpr),
    /// Whether any registration is active on the date.
    RegisteredOn(DateExpr),
    /// Whether one registration covers the whole period (both ends inclusive).
    RegisteredBetween(DateExpr, DateExpr),
}

impl Attribute {
    fn ty(&self) -> Type {
        match self {
            Attribute::AgeOn(_) | Attribute::ImdOn(_) => Type::Int,
            Attribute::Sex | Attribute::RegionOn(_) => Type::Str,
            Attribute::DateOfDeath => Type::Date,
            Attribute::RegisteredOn(_) | Attribute::RegisteredBetween(..) => Type::Bool,
        }
    }

    fn eval(&self, ctx: &EvalContext<'_>) -> Result<Value, StudyError> {
        let view = ctx.patient;
        Ok(match self {
            Attribute::AgeOn(date) => {
                let date = date.resolve(ctx.interval)?;
                view.patient.age_on(date).map_or(Value::Null, Value::Int)
            }
            Attribute::Sex => Value::Str(view.patient.sex.as_str().into()),
            Attribute::DateOfDeath => view.patient.date_of_death.map_or(Value::Null, Value::Date),
            Attribute::ImdOn(date) => {
                let date = date.resolve(ctx.interval)?;
                view.address_on(date)
                    .and_then(|addr| addr.imd_rounded)
                    .map_or(Value::Null, Value::Int)
            }
            Attribute::RegionOn(date) => {
                let date = date.resolve(ctx.interval)?;
                view.registration_on(date)
                    .and_then(|reg| reg.practice_nuts1_region_name.clone())
                    .map_or(Value::Null, Value::Str)
            }
            Attribute::RegisteredOn(date) => {
                let date = date.resolve(ctx.interval)?;
                Value::Bool(view.registration_on(date).is_some())
            }
            Attribute::RegisteredBetween(from, to) => {
                let from = from.resolve(ctx.interval)?;
                let to = to.resolve(ctx.interval)?;
                Value::Bool(view.registered_between(from, to))
            }
        })
    }
}

pub fn age_on(date: DateExpr) -> Expr {
    Expr::Attr(Attribute::AgeOn(date))
}

pub fn sex() -> Expr {
    Expr::Attr(Attribute::Sex)
}

pub fn date_of_death() -> Expr {
    Expr::Attr(Attribute::DateOfDeath)
}

pub fn imd_on(date: DateExpr) -> Expr {
    Expr::Attr(Attribute::ImdOn(date))
}

pub fn region_on(date: DateExpr) -> Expr {
    Expr::Attr(Attribute::RegionOn(date))
}

pub fn registered_on(date: DateExpr) -> Expr {
    Expr::Attr(Attribute::RegisteredOn(date))
}

pub fn registered_between(from: DateExpr, to: DateExpr) -> Expr {
    Expr::Attr(Attribute::RegisteredBetween(from, to))
}

// Event queries

/// The coded event tables.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EventTable {
    ClinicalEvents,
    Medications,
}

/// What to compute from the events that match a query.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Returning {
    Exists,
    FirstDate,
    LastDate,
    Count,
    /// The codelist category of the latest matching event.
    LastCategory,
}

/// Events from one table whose code is in a codelist and whose date is in a window.
///
/// Both ends of the window are inclusive. A missing end is unbounded.
#[derive(Debug, Clone)]
pub struct EventQuery {
    table: EventTable,
    codelist: Codelist,
    from: Option<DateExpr>,
    to: Option<DateExpr>,
}

pub fn clinical_events(codelist: &Codelist) -> EventQuery {
    EventQuery::new(EventTable::ClinicalEvents, codelist)
}

pub fn medications(codelist: &Codelist) -> EventQuery {
    EventQuery::new(EventTable::Medications, codelist)
}

impl EventQuery {
    fn new(table: EventTable, codelist: &Codelist) -> Self {
        Self {
            table,
            codelist: codelist.clone(),
            from: None,
            to: None,
        }
    }

    pub fn between(mut self, from: DateExpr, to: DateExpr) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn on_or_after(mut self, from: DateExpr) -> Self {
        self.from = Some(from);
        self
    }

    pub fn on_or_before(mut self, to: DateExpr) -> Self {
        self.to = Some(to);
        self
    }

    pub fn exists_for_patient(self) -> Expr {
        self.returning(Returning::Exists)
    }

    pub fn first_date(self) -> Expr {
        self.returning(Returning::FirstDate)
    }

    pub fn last_date(self) -> Expr {
        self.returning(Returning::LastDate)
    }

    pub fn count(self) -> Expr {
        self.returning(Returning::Count)
    }

    /// The category (from the codelist) of the latest matching event.
    pub fn last_category(self) -> Expr {
        self.returning(Returning::LastCategory)
    }

    fn returning(self, returning: Returning) -> Expr {
        Expr::Events(Box::new(self), returning)
    }

    fn check(&self, returning: Returning) -> Result<Type, StudyError> {
        Ok(match returning {
            Returning::Exists => Type::Bool,
            Returning::FirstDate | Returning::LastDate => Type::Date,
            Returning::Count => Type::Int,
            Returning::LastCategory => {
                if !self.codelist.has_categories() {
                    return Err(StudyError::Config(
                        "category requested from a codelist without categories".into(),
                    ));
                }
                Type::Str
            }
        })
    }

    fn eval(&self, returning: Returning, ctx: &EvalContext<'_>) -> Result<Value, StudyError> {
        let from = self.from.as_ref().map(|d| d.resolve(ctx.interval)).transpose()?;
        let to = self.to.as_ref().map(|d| d.resolve(ctx.interval)).transpose()?;
        let events = match self.table {
            EventTable::ClinicalEvents => ctx.patient.clinical_events,
            EventTable::Medications => ctx.patient.medications,
        };
        let mut matching = events.iter().filter(|evt| {
            from.map_or(true, |from| evt.date >= from)
                && to.map_or(true, |to| evt.date <= to)
                && self.codelist.contains(&evt.code)
        });

        Ok(match returning {
            Returning::Exists => Value::Bool(matching.next().is_some()),
            Returning::FirstDate => matching.map(|evt| evt.date).min().map_or(Value::Null, Value::Date),
            Returning::LastDate => matching.map(|evt| evt.date).max().map_or(Value::Null, Value::Date),
            Returning::Count => Value::Int(matching.count() as i64),
            Returning::LastCategory => matching
                // `max_by_key` keeps the last of equal dates, i.e. the last one recorded.
                .max_by_key(|evt: &&Event| evt.date)
                .and_then(|evt| self.codelist.category(&evt.code))
                .map_or(Value::Null, |cat| Value::Str(cat.into())),
        })
    }
}

// Expressions

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn is_ordering(self) -> bool {
        !matches!(self, CmpOp::Eq | CmpOp::Ne)
    }

    fn test(self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        }
    }
}

/// A per-patient expression.
#[derive(Debug, Clone)]
pub enum Expr {
    Lit(Value),
    /// A reference to a dataset column defined earlier.
    Column(ArcStr),
    Date(DateExpr),
    Attr(Attribute),
    Events(Box<EventQuery>, Returning),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    IsNull(Box<Expr>),
    Case {
        branches: Vec<(Expr, Expr)>,
        default: Box<Expr>,
    },
}

pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Lit(value.into())
}

pub fn col(name: impl Into<ArcStr>) -> Expr {
    Expr::Column(name.into())
}

pub fn date(date: DateExpr) -> Expr {
    Expr::Date(date)
}

/// Start a `case` branch.
pub fn when(condition: Expr) -> When {
    When { condition }
}

pub struct When {
    condition: Expr,
}

impl When {
    pub fn then(self, value: impl Into<Expr>) -> (Expr, Expr) {
        (self.condition, value.into())
    }
}

/// The value of the first branch whose condition is true, or `default` if there is none.
pub fn case(branches: impl IntoIterator<Item = (Expr, Expr)>, default: impl Into<Expr>) -> Expr {
    Expr::Case {
        branches: branches.into_iter().collect(),
        default: Box::new(default.into()),
    }
}

impl Expr {
    fn cmp_with(self, op: CmpOp, rhs: impl Into<Expr>) -> Expr {
        Expr::Cmp(op, Box::new(self), Box::new(rhs.into()))
    }

    pub fn equals(self, rhs: impl Into<Expr>) -> Expr {
        self.cmp_with(CmpOp::Eq, rhs)
    }

    pub fn not_equals(self, rhs: impl Into<Expr>) -> Expr {
        self.cmp_with(CmpOp::Ne, rhs)
    }

    pub fn lt(self, rhs: impl Into<Expr>) -> Expr {
        self.cmp_with(CmpOp::Lt, rhs)
    }

    pub fn le(self, rhs: impl Into<Expr>) -> Expr {
        self.cmp_with(CmpOp::Le, rhs)
    }

    pub fn gt(self, rhs: impl Into<Expr>) -> Expr {
        self.cmp_with(CmpOp::Gt, rhs)
    }

    pub fn ge(self, rhs: impl Into<Expr>) -> Expr {
        self.cmp_with(CmpOp::Ge, rhs)
    }

    pub fn is_null(self) -> Expr {
        Expr::IsNull(Box::new(self))
    }

    pub fn is_after(self, date: DateExpr) -> Expr {
        self.gt(Expr::Date(date))
    }

    pub fn is_on_or_before(self, date: DateExpr) -> Expr {
        self.le(Expr::Date(date))
    }

    /// Work out the type of this expression, failing on anything that could not be evaluated.
    ///
    /// Column references are resolved against `schema`.
    pub fn check(&self, schema: &dyn Schema) -> Result<Type, StudyError> {
        fn expect(context: &'static str, expected: Type, found: Type) -> Result<(), StudyError> {
            if expected == found {
                Ok(())
            } else {
                Err(StudyError::TypeMismatch {
                    context,
                    expected,
                    found,
                })
            }
        }

        match self {
            Expr::Lit(value) => value
                .ty()
                .ok_or_else(|| StudyError::Query("untyped null literal".into())),
            Expr::Column(name) => schema
                .column_type(name)
                .ok_or_else(|| StudyError::UndefinedColumn(name.clone())),
            Expr::Date(_) => Ok(Type::Date),
            Expr::Attr(attr) => Ok(attr.ty()),
            Expr::Events(query, returning) => query.check(*returning),
            Expr::Not(inner) => {
                expect("`not`", Type::Bool, inner.check(schema)?)?;
                Ok(Type::Bool)
            }
            Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) => {
                expect("boolean operator", Type::Bool, lhs.check(schema)?)?;
                expect("boolean operator", Type::Bool, rhs.check(schema)?)?;
                Ok(Type::Bool)
            }
            Expr::Cmp(op, lhs, rhs) => {
                let lhs = lhs.check(schema)?;
                expect("comparison", lhs, rhs.check(schema)?)?;
                if op.is_ordering() && !matches!(lhs, Type::Int | Type::Date) {
                    return Err(StudyError::Query(format!("cannot order values of type {}", lhs)));
                }
                Ok(Type::Bool)
            }
            Expr::IsNull(inner) => {
                inner.check(schema)?;
                Ok(Type::Bool)
            }
            Expr::Case { branches, default } => {
                let ty = default.check(schema)?;
                for (condition, value) in branches {
                    expect("`case` condition", Type::Bool, condition.check(schema)?)?;
                    expect("`case` branch", ty, value.check(schema)?)?;
                }
                Ok(ty)
            }
        }
    }

    /// Evaluate this expression for one patient in one interval.
    pub fn eval(&self, ctx: &EvalContext<'_>) -> Result<Value, StudyError> {
        Ok(match self {
            Expr::Lit(value) => value.clone(),
            Expr::Column(name) => ctx
                .columns
                .value(name)
                .cloned()
                .ok_or_else(|| StudyError::UndefinedColumn(name.clone()))?,
            Expr::Date(date) => Value::Date(date.resolve(ctx.interval)?),
            Expr::Attr(attr) => attr.eval(ctx)?,
            Expr::Events(query, returning) => query.eval(*returning, ctx)?,
            Expr::Not(inner) => match inner.eval(ctx)? {
                Value::Bool(b) => Value::Bool(!b),
                Value::Null => Value::Null,
                other => return Err(mismatch("`not`", Type::Bool, &other)),
            },
            Expr::And(lhs, rhs) => match eval_bool(lhs, ctx)? {
                Some(false) => Value::Bool(false),
                lhs => match (lhs, eval_bool(rhs, ctx)?) {
                    (_, Some(false)) => Value::Bool(false),
                    (Some(true), Some(true)) => Value::Bool(true),
                    _ => Value::Null,
                },
            },
            Expr::Or(lhs, rhs) => match eval_bool(lhs, ctx)? {
                Some(true) => Value::Bool(true),
                lhs => match (lhs, eval_bool(rhs, ctx)?) {
                    (_, Some(true)) => Value::Bool(true),
                    (Some(false), Some(false)) => Value::Bool(false),
                    _ => Value::Null,
                },
            },
            Expr::Cmp(op, lhs, rhs) => {
                let lhs = lhs.eval(ctx)?;
                let rhs = rhs.eval(ctx)?;
                if lhs.is_null() || rhs.is_null() {
                    Value::Null
                } else if lhs.ty() != rhs.ty() {
                    return Err(StudyError::Query(format!(
                        "cannot compare {:?} with {:?}",
                        lhs, rhs
                    )));
                } else {
                    Value::Bool(op.test(lhs.cmp(&rhs)))
                }
            }
            Expr::IsNull(inner) => Value::Bool(inner.eval(ctx)?.is_null()),
            Expr::Case { branches, default } => {
                for (condition, value) in branches {
                    if eval_bool(condition, ctx)? == Some(true) {
                        return value.eval(ctx);
                    }
                }
                default.eval(ctx)?
            }
        })
    }
}

fn eval_bool(expr: &Expr, ctx: &EvalContext<'_>) -> Result<Option<bool>, StudyError> {
    match expr.eval(ctx)? {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(b)),
        other => Err(mismatch("boolean operator", Type::Bool, &other)),
    }
}

fn mismatch(context: &'static str, expected: Type, found: &Value) -> StudyError {
    match found.ty() {
        Some(found) => StudyError::TypeMismatch {
            context,
            expected,
            found,
        },
        None => StudyError::Query(format!("unexpected null in {}", context)),
    }
}

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Expr::Lit(v)
    }
}

impl From<bool> for Expr {
    fn from(v: bool) -> Self {
        lit(v)
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        lit(v)
    }
}

impl From<&str> for Expr {
    fn from(v: &str) -> Self {
        lit(v)
    }
}

impl From<DateExpr> for Expr {
    fn from(v: DateExpr) -> Self {
        Expr::Date(v)
    }
}

impl ops::BitAnd for Expr {
    type Output = Expr;
    fn bitand(self, rhs: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(rhs))
    }
}

impl ops::BitOr for Expr {
    type Output = Expr;
    fn bitor(self, rhs: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(rhs))
    }
}

impl ops::Not for Expr {
    type Output = Expr;
    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

// Evaluation context

/// Types of the columns an expression may refer to.
pub trait Schema {
    fn column_type(&self, name: &str) -> Option<Type>;
}

/// Values of the columns an expression may refer to.
pub trait ColumnValues {
    fn value(&self, name: &str) -> Option<&Value>;
}

/// No columns at all.
pub struct NoColumns;

impl Schema for NoColumns {
    fn column_type(&self, _: &str) -> Option<Type> {
        None
    }
}

impl ColumnValues for NoColumns {
    fn value(&self, _: &str) -> Option<&Value> {
        None
    }
}

/// Everything needed to evaluate an expression for one patient.
pub struct EvalContext<'a> {
    pub patient: &'a PatientView<'a>,
    pub interval: &'a Interval,
    pub columns: &'a dyn ColumnValues,
}

impl<'a> EvalContext<'a> {
    pub fn new(
        patient: &'a PatientView<'a>,
        interval: &'a Interval,
        columns: &'a dyn ColumnValues,
    ) -> Self {
        Self {
            patient,
            interval,
            columns,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{codelist::Code, test_util::*, Sex};

    fn eval(expr: &Expr, view: &PatientView<'_>, interval: &Interval) -> Value {
        expr.check(&NoColumns).unwrap();
        expr.eval(&EvalContext::new(view, interval, &NoColumns)).unwrap()
    }

    #[test]
    fn date_arithmetic() {
        let interval = Interval::month_starting(ymd(2020, 1, 31)).unwrap();
        let end = DateExpr::index_date().plus_months(1).minus_days(1);
        assert_eq!(end.resolve(&interval).unwrap(), ymd(2020, 2, 28));
        let back = DateExpr::end_date().minus_years(5);
        assert_eq!(back.resolve(&interval).unwrap(), ymd(2015, 2, 28));
        let far = DateExpr::fixed(NaiveDate::MAX).plus_days(1);
        assert!(far.resolve(&interval).is_err());
    }

    #[test]
    fn three_valued_logic() {
        let fixture = Fixture::new(patient(1, Some(ymd(1980, 6, 1)), Sex::Female, None));
        let view = fixture.view();
        let interval = Interval::month_starting(ymd(2020, 1, 1)).unwrap();
        let null_bool = date_of_death().is_after(DateExpr::index_date());

        assert_eq!(eval(&null_bool, &view, &interval), Value::Null);
        assert_eq!(eval(&(null_bool.clone() & lit(false)), &view, &interval), Value::Bool(false));
        assert_eq!(eval(&(null_bool.clone() | lit(true)), &view, &interval), Value::Bool(true));
        assert_eq!(eval(&(null_bool.clone() & lit(true)), &view, &interval), Value::Null);
        assert_eq!(eval(&!null_bool.clone(), &view, &interval), Value::Null);
        let alive = null_bool.clone() | date_of_death().is_null();
        assert_eq!(eval(&alive, &view, &interval), Value::Bool(true));
        let cased = case([when(null_bool).then("dead later")], "other");
        assert_eq!(eval(&cased, &view, &interval), Value::from("other"));
    }

    #[test]
    fn age_and_events() {
        let codes: Codelist = ["a", "b"].into_iter().map(Code::from).collect();
        let mut fixture = Fixture::new(patient(1, Some(ymd(1975, 3, 15)), Sex::Male, None));
        fixture.medications = vec![
            event(1, ymd(2020, 3, 2), "a"),
            event(1, ymd(2020, 3, 20), "b"),
            event(1, ymd(2020, 3, 25), "z"),
            event(1, ymd(2020, 4, 1), "a"),
        ];
        let view = fixture.view();
        let interval = Interval::month_starting(ymd(2020, 3, 1)).unwrap();

        assert_eq!(eval(&age_on(DateExpr::index_date()), &view, &interval), Value::Int(44));
        assert_eq!(eval(&age_on(DateExpr::end_date()), &view, &interval), Value::Int(45));

        let in_month = medications(&codes).between(DateExpr::index_date(), DateExpr::end_date());
        assert_eq!(eval(&in_month.clone().count(), &view, &interval), Value::Int(2));
        assert_eq!(
            eval(&in_month.clone().first_date(), &view, &interval),
            Value::Date(ymd(2020, 3, 2))
        );
        assert_eq!(
            eval(&in_month.last_date(), &view, &interval),
            Value::Date(ymd(2020, 3, 20))
        );
        let before = medications(&codes).on_or_before(DateExpr::index_date().minus_days(1));
        assert_eq!(eval(&before.exists_for_patient(), &view, &interval), Value::Bool(false));
    }

    #[test]
    fn rejects_bad_types() {
        let schema = NoColumns;
        let err = (age_on(DateExpr::index_date()) & lit(true)).check(&schema).unwrap_err();
        assert!(matches!(err, StudyError::TypeMismatch { .. }));
        assert!(sex().lt("male").check(&schema).is_err());
        assert!(case([when(lit(true)).then(1i64)], "x").check(&schema).is_err());
        assert!(matches!(
            col("nope").check(&schema),
            Err(StudyError::UndefinedColumn(_))
        ));
        let plain: Codelist = ["a"].into_iter().map(Code::from).collect();
        assert!(clinical_events(&plain).last_category().check(&schema).is_err());
    }
}
