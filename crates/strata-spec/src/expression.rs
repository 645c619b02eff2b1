//! Computed-field expressions
//!
//! A computed field is a small expression tree evaluated against the row
//! built so far. Four node kinds exist:
//!
//! ```json
//! {"conditional": {"if": ["$pages", ">", 100], "then": "long", "else": "short"}}
//! {"arithmetic":  {"operator": "*", "operands": ["$price", 1.2]}}
//! {"replace":     {"search": "http://", "replace": "https://", "subject": "$link"}}
//! {"date":        {"value": "$issued", "format": "%Y"}}
//! ```
//!
//! Operands are nested expressions, `$name` field references or JSON
//! literals. An undefined reference evaluates to `null`, which is falsy and
//! propagates through arithmetic, replace and date.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt::{self, Write as _};

/// Expression errors; the first group is raised while parsing
/// configuration, the rest during evaluation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpressionError {
    /// Structure does not match any expression form
    #[error("malformed expression: {0}")]
    Malformed(String),

    /// Object key is not an expression kind
    #[error("unknown expression kind '{0}'")]
    UnknownKind(String),

    /// Comparison or arithmetic operator not supported
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    /// `date` format string is not a valid strftime pattern
    #[error("invalid date format '{0}'")]
    InvalidDateFormat(String),

    /// A field references itself or a later computed field
    #[error("computed field '{field}' references '{reference}' which is not computed before it")]
    ReferenceCycle {
        /// Field being defined
        field: String,
        /// Offending reference
        reference: String,
    },

    /// Two computed fields share a name
    #[error("computed field '{0}' is defined twice")]
    DuplicateField(String),

    /// Arithmetic operand is not a number
    #[error("arithmetic operand {0} is not numeric")]
    NotNumeric(String),

    /// Division by zero
    #[error("division by zero")]
    DivisionByZero,

    /// `date` subject could not be parsed
    #[error("'{0}' is not a recognised date")]
    InvalidDate(String),
}

impl ExpressionError {
    /// Whether the error indicates bad configuration rather than bad data
    #[inline]
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        !matches!(
            self,
            Self::NotNumeric(_) | Self::DivisionByZero | Self::InvalidDate(_)
        )
    }
}

/// Comparison operators of `conditional`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    Ge,
    /// `<=`
    Le,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `contains`: substring or array membership
    Contains,
    /// `notcontains`
    NotContains,
}

impl Comparison {
    fn parse(op: &str) -> Result<Self, ExpressionError> {
        Ok(match op {
            ">" => Self::Gt,
            "<" => Self::Lt,
            ">=" => Self::Ge,
            "<=" => Self::Le,
            "==" => Self::Eq,
            "!=" => Self::Ne,
            "contains" => Self::Contains,
            "notcontains" => Self::NotContains,
            other => return Err(ExpressionError::UnknownOperator(other.to_string())),
        })
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Contains => "contains",
            Self::NotContains => "notcontains",
        }
    }
}

/// Arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
}

impl ArithmeticOp {
    fn parse(op: &str) -> Result<Self, ExpressionError> {
        Ok(match op {
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "/" => Self::Div,
            other => return Err(ExpressionError::UnknownOperator(other.to_string())),
        })
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }
}

/// Expression input
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Nested expression
    Expression(Box<Expression>),
    /// `$name` reference to a field of the row
    Reference(String),
    /// JSON literal
    Literal(Value),
}

/// Condition of a `conditional`
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Single-element `if`: truthiness of the operand
    Truthy(Operand),
    /// `[left, op, right]`
    Compare(Operand, Comparison, Operand),
}

/// Expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// `if` / `then` / `else`
    Conditional {
        /// Test
        condition: Condition,
        /// Value when the test holds
        then: Operand,
        /// Value otherwise (`null` when omitted)
        otherwise: Option<Operand>,
    },
    /// Left-to-right fold of operands
    Arithmetic {
        /// Operator applied between every pair
        operator: ArithmeticOp,
        /// At least one operand
        operands: Vec<Operand>,
    },
    /// Literal substring substitution
    Replace {
        /// Needle
        search: Operand,
        /// Replacement
        replace: Operand,
        /// Haystack; arrays are replaced element-wise
        subject: Operand,
    },
    /// Parse and re-render a date
    Date {
        /// Date to parse
        value: Operand,
        /// strftime pattern; RFC 3339 when omitted
        format: Option<String>,
    },
}

const KINDS: [&str; 4] = ["conditional", "arithmetic", "replace", "date"];

fn object_field<'a>(obj: &'a Map<String, Value>, key: &str, kind: &str) -> Result<&'a Value, ExpressionError> {
    obj.get(key)
        .ok_or_else(|| ExpressionError::Malformed(format!("{kind} requires '{key}'")))
}

impl Operand {
    /// Parse an operand from JSON
    ///
    /// # Errors
    /// Nested expression errors
    pub fn parse(value: &Value) -> Result<Self, ExpressionError> {
        match value {
            Value::String(s) if s.starts_with('$') && s.len() > 1 => {
                Ok(Self::Reference(s[1..].to_string()))
            }
            Value::Object(obj) if obj.len() == 1 && obj.keys().any(|k| KINDS.contains(&k.as_str())) => {
                Ok(Self::Expression(Box::new(Expression::parse(value)?)))
            }
            other => Ok(Self::Literal(other.clone())),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::Expression(e) => e.to_value(),
            Self::Reference(name) => Value::String(format!("${name}")),
            Self::Literal(v) => v.clone(),
        }
    }

    fn evaluate(&self, row: &Map<String, Value>) -> Result<Value, ExpressionError> {
        match self {
            Self::Expression(e) => e.evaluate(row),
            Self::Reference(name) => Ok(row.get(name).cloned().unwrap_or(Value::Null)),
            Self::Literal(v) => Ok(v.clone()),
        }
    }

    fn collect_references(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Expression(e) => e.collect_references(out),
            Self::Reference(name) => {
                out.insert(name.clone());
            }
            Self::Literal(_) => {}
        }
    }
}

impl Expression {
    /// Parse an expression object
    ///
    /// # Errors
    /// [`ExpressionError::UnknownKind`], [`ExpressionError::UnknownOperator`],
    /// [`ExpressionError::InvalidDateFormat`] or
    /// [`ExpressionError::Malformed`]
    pub fn parse(value: &Value) -> Result<Self, ExpressionError> {
        let obj = value
            .as_object()
            .ok_or_else(|| ExpressionError::Malformed(format!("expected an object, got {value}")))?;
        if obj.len() != 1 {
            return Err(ExpressionError::Malformed(
                "an expression object must have exactly one key".to_string(),
            ));
        }
        let (kind, body) = obj
            .iter()
            .next()
            .ok_or_else(|| ExpressionError::Malformed("empty expression".to_string()))?;
        let body = body
            .as_object()
            .ok_or_else(|| ExpressionError::Malformed(format!("{kind} body must be an object")))?;

        match kind.as_str() {
            "conditional" => Self::parse_conditional(body),
            "arithmetic" => {
                let operator = object_field(body, "operator", kind)?
                    .as_str()
                    .ok_or_else(|| ExpressionError::Malformed("operator must be a string".to_string()))?;
                let operator = ArithmeticOp::parse(operator)?;
                let operands = object_field(body, "operands", kind)?
                    .as_array()
                    .ok_or_else(|| ExpressionError::Malformed("operands must be an array".to_string()))?
                    .iter()
                    .map(Operand::parse)
                    .collect::<Result<Vec<_>, _>>()?;
                if operands.is_empty() {
                    return Err(ExpressionError::Malformed(
                        "arithmetic needs at least one operand".to_string(),
                    ));
                }
                Ok(Self::Arithmetic { operator, operands })
            }
            "replace" => Ok(Self::Replace {
                search: Operand::parse(object_field(body, "search", kind)?)?,
                replace: Operand::parse(object_field(body, "replace", kind)?)?,
                subject: Operand::parse(object_field(body, "subject", kind)?)?,
            }),
            "date" => {
                let format = match body.get("format") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(f)) => {
                        if StrftimeItems::new(f).any(|i| matches!(i, Item::Error)) {
                            return Err(ExpressionError::InvalidDateFormat(f.clone()));
                        }
                        Some(f.clone())
                    }
                    Some(other) => {
                        return Err(ExpressionError::Malformed(format!(
                            "date format must be a string, got {other}"
                        )))
                    }
                };
                Ok(Self::Date {
                    value: Operand::parse(object_field(body, "value", kind)?)?,
                    format,
                })
            }
            other => Err(ExpressionError::UnknownKind(other.to_string())),
        }
    }

    fn parse_conditional(body: &Map<String, Value>) -> Result<Self, ExpressionError> {
        let test = object_field(body, "if", "conditional")?
            .as_array()
            .ok_or_else(|| ExpressionError::Malformed("'if' must be an array".to_string()))?;
        let condition = match test.as_slice() {
            [single] => Condition::Truthy(Operand::parse(single)?),
            [left, Value::String(op), right] => Condition::Compare(
                Operand::parse(left)?,
                Comparison::parse(op)?,
                Operand::parse(right)?,
            ),
            [_, op, _] => {
                return Err(ExpressionError::Malformed(format!(
                    "comparison operator must be a string, got {op}"
                )))
            }
            _ => {
                return Err(ExpressionError::Malformed(
                    "'if' takes [reference] or [left, operator, right]".to_string(),
                ))
            }
        };

        Ok(Self::Conditional {
            condition,
            then: Operand::parse(object_field(body, "then", "conditional")?)?,
            otherwise: body.get("else").map(Operand::parse).transpose()?,
        })
    }

    /// Serialize back to the JSON form
    #[must_use]
    pub fn to_value(&self) -> Value {
        let (kind, body) = match self {
            Self::Conditional {
                condition,
                then,
                otherwise,
            } => {
                let test = match condition {
                    Condition::Truthy(o) => vec![o.to_value()],
                    Condition::Compare(l, op, r) => {
                        vec![l.to_value(), Value::String(op.as_str().to_string()), r.to_value()]
                    }
                };
                let mut body = Map::new();
                body.insert("if".to_string(), Value::Array(test));
                body.insert("then".to_string(), then.to_value());
                if let Some(o) = otherwise {
                    body.insert("else".to_string(), o.to_value());
                }
                ("conditional", body)
            }
            Self::Arithmetic { operator, operands } => {
                let mut body = Map::new();
                body.insert("operator".to_string(), Value::String(operator.as_str().to_string()));
                body.insert(
                    "operands".to_string(),
                    Value::Array(operands.iter().map(Operand::to_value).collect()),
                );
                ("arithmetic", body)
            }
            Self::Replace {
                search,
                replace,
                subject,
            } => {
                let mut body = Map::new();
                body.insert("search".to_string(), search.to_value());
                body.insert("replace".to_string(), replace.to_value());
                body.insert("subject".to_string(), subject.to_value());
                ("replace", body)
            }
            Self::Date { value, format } => {
                let mut body = Map::new();
                body.insert("value".to_string(), value.to_value());
                if let Some(f) = format {
                    body.insert("format".to_string(), Value::String(f.clone()));
                }
                ("date", body)
            }
        };
        let mut out = Map::new();
        out.insert(kind.to_string(), Value::Object(body));
        Value::Object(out)
    }

    /// Every `$name` referenced anywhere in the tree
    #[must_use]
    pub fn references(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Conditional {
                condition,
                then,
                otherwise,
            } => {
                match condition {
                    Condition::Truthy(o) => o.collect_references(out),
                    Condition::Compare(l, _, r) => {
                        l.collect_references(out);
                        r.collect_references(out);
                    }
                }
                then.collect_references(out);
                if let Some(o) = otherwise {
                    o.collect_references(out);
                }
            }
            Self::Arithmetic { operands, .. } => {
                for o in operands {
                    o.collect_references(out);
                }
            }
            Self::Replace {
                search,
                replace,
                subject,
            } => {
                search.collect_references(out);
                replace.collect_references(out);
                subject.collect_references(out);
            }
            Self::Date { value, .. } => value.collect_references(out),
        }
    }

    /// Evaluate against a row
    ///
    /// # Errors
    /// Data errors: non-numeric arithmetic, division by zero, bad dates
    pub fn evaluate(&self, row: &Map<String, Value>) -> Result<Value, ExpressionError> {
        match self {
            Self::Conditional {
                condition,
                then,
                otherwise,
            } => {
                let holds = match condition {
                    Condition::Truthy(o) => is_truthy(&o.evaluate(row)?),
                    Condition::Compare(l, op, r) => compare(&l.evaluate(row)?, *op, &r.evaluate(row)?),
                };
                if holds {
                    then.evaluate(row)
                } else {
                    otherwise
                        .as_ref()
                        .map_or(Ok(Value::Null), |o| o.evaluate(row))
                }
            }
            Self::Arithmetic { operator, operands } => {
                let mut acc: Option<f64> = None;
                for operand in operands {
                    let value = operand.evaluate(row)?;
                    if value.is_null() {
                        return Ok(Value::Null);
                    }
                    let n = as_number(&value).ok_or_else(|| ExpressionError::NotNumeric(value.to_string()))?;
                    acc = Some(match acc {
                        None => n,
                        Some(a) => apply(*operator, a, n)?,
                    });
                }
                Ok(acc.map_or(Value::Null, number_value))
            }
            Self::Replace {
                search,
                replace,
                subject,
            } => {
                let needle = text(&search.evaluate(row)?);
                let replacement = text(&replace.evaluate(row)?);
                let replace_one = |v: &Value| -> Value {
                    match v {
                        Value::Null => Value::Null,
                        other if needle.is_empty() => other.clone(),
                        other => Value::String(text(other).replace(&needle, &replacement)),
                    }
                };
                Ok(match subject.evaluate(row)? {
                    Value::Array(items) => Value::Array(items.iter().map(replace_one).collect()),
                    other => replace_one(&other),
                })
            }
            Self::Date { value, format } => {
                let raw = match value.evaluate(row)? {
                    Value::Null => return Ok(Value::Null),
                    Value::Array(items) => match items.into_iter().next() {
                        Some(first) => first,
                        None => return Ok(Value::Null),
                    },
                    other => other,
                };
                let raw = text(&raw);
                let parsed = parse_date(&raw).ok_or_else(|| ExpressionError::InvalidDate(raw.clone()))?;
                match format {
                    None => Ok(Value::String(parsed.and_utc().to_rfc3339())),
                    Some(f) => {
                        let mut out = String::new();
                        write!(out, "{}", parsed.format(f))
                            .map_err(|_| ExpressionError::InvalidDateFormat(f.clone()))?;
                        Ok(Value::String(out))
                    }
                }
            }
        }
    }
}

impl Serialize for Expression {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Expression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Expression::parse(&value).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

/// Defined and non-empty
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(_) => true,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Array(items) if items.len() == 1 => as_number(&items[0]),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

fn apply(op: ArithmeticOp, a: f64, b: f64) -> Result<f64, ExpressionError> {
    Ok(match op {
        ArithmeticOp::Add => a + b,
        ArithmeticOp::Sub => a - b,
        ArithmeticOp::Mul => a * b,
        ArithmeticOp::Div => {
            if b == 0.0 {
                return Err(ExpressionError::DivisionByZero);
            }
            a / b
        }
    })
}

fn compare(left: &Value, op: Comparison, right: &Value) -> bool {
    match op {
        Comparison::Contains => contains(left, right),
        Comparison::NotContains => !contains(left, right),
        _ => match left {
            // multi-valued fields match when any value does
            Value::Array(items) => items.iter().any(|item| compare_scalar(item, op, right)),
            _ => compare_scalar(left, op, right),
        },
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Null => false,
        Value::Array(items) => items.iter().any(|i| text(i) == text(needle)),
        other => text(other).contains(&text(needle)),
    }
}

fn compare_scalar(left: &Value, op: Comparison, right: &Value) -> bool {
    let ordering = match (as_number(left), as_number(right)) {
        (Some(l), Some(r)) => l.partial_cmp(&r),
        _ => {
            if left.is_null() || right.is_null() {
                // only equality is meaningful against an undefined value
                return match op {
                    Comparison::Eq => left.is_null() && right.is_null(),
                    Comparison::Ne => !(left.is_null() && right.is_null()),
                    _ => false,
                };
            }
            Some(text(left).cmp(&text(right)))
        }
    };
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        Comparison::Gt => ordering == Ordering::Greater,
        Comparison::Lt => ordering == Ordering::Less,
        Comparison::Ge => ordering != Ordering::Less,
        Comparison::Le => ordering != Ordering::Greater,
        Comparison::Eq => ordering == Ordering::Equal,
        Comparison::Ne => ordering != Ordering::Equal,
        Comparison::Contains | Comparison::NotContains => false,
    }
}

fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// A named expression evaluated into the row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedField {
    /// Output field
    #[serde(rename = "fieldName")]
    pub field_name: String,
    /// Expression producing the value
    pub value: Expression,
    /// Stripped from the stored document after evaluation
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub temporary: bool,
}

/// Check a computed field list: unique names and only backward references
///
/// # Errors
/// [`ExpressionError::DuplicateField`] or [`ExpressionError::ReferenceCycle`]
pub fn validate_computed_fields(fields: &[ComputedField]) -> Result<(), ExpressionError> {
    let positions: HashMap<&str, usize> = fields
        .iter()
        .enumerate()
        .map(|(i, f)| (f.field_name.as_str(), i))
        .collect();
    if positions.len() != fields.len() {
        let mut seen = BTreeSet::new();
        for f in fields {
            if !seen.insert(f.field_name.as_str()) {
                return Err(ExpressionError::DuplicateField(f.field_name.clone()));
            }
        }
    }

    for (i, field) in fields.iter().enumerate() {
        for reference in field.value.references() {
            if positions.get(reference.as_str()).is_some_and(|&j| j >= i) {
                return Err(ExpressionError::ReferenceCycle {
                    field: field.field_name.clone(),
                    reference,
                });
            }
        }
    }
    Ok(())
}

/// Evaluate computed fields in declaration order, writing each into `row`
///
/// `null` results leave the field unset.
///
/// # Errors
/// The name of the failing field with its error
pub fn evaluate_computed_fields(
    fields: &[ComputedField],
    row: &mut Map<String, Value>,
) -> Result<(), (String, ExpressionError)> {
    for field in fields {
        let value = field
            .value
            .evaluate(row)
            .map_err(|e| (field.field_name.clone(), e))?;
        if value.is_null() {
            row.remove(&field.field_name);
        } else {
            row.insert(field.field_name.clone(), value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn expr(v: Value) -> Expression {
        Expression::parse(&v).unwrap()
    }

    fn row(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn conditional_compares_numbers_and_strings() {
        let e = expr(json!({"conditional": {"if": ["$pages", ">", 100], "then": "long", "else": "short"}}));
        assert_eq!(e.evaluate(&row(json!({"pages": "250"}))).unwrap(), json!("long"));
        assert_eq!(e.evaluate(&row(json!({"pages": 12}))).unwrap(), json!("short"));

        let e = expr(json!({"conditional": {"if": ["$title", "<", "m"], "then": 1, "else": 2}}));
        assert_eq!(e.evaluate(&row(json!({"title": "apple"}))).unwrap(), json!(1));
        assert_eq!(e.evaluate(&row(json!({"title": "zebra"}))).unwrap(), json!(2));
    }

    #[test]
    fn single_element_if_tests_truthiness() {
        let e = expr(json!({"conditional": {"if": ["$isbn"], "then": true, "else": false}}));
        assert_eq!(e.evaluate(&row(json!({"isbn": "123"}))).unwrap(), json!(true));
        assert_eq!(e.evaluate(&row(json!({"isbn": ""}))).unwrap(), json!(false));
        assert_eq!(e.evaluate(&row(json!({}))).unwrap(), json!(false));
    }

    #[test]
    fn missing_else_yields_null() {
        let e = expr(json!({"conditional": {"if": ["$x"], "then": "yes"}}));
        assert_eq!(e.evaluate(&row(json!({}))).unwrap(), Value::Null);
    }

    #[test]
    fn arithmetic_folds_left_to_right() {
        let e = expr(json!({"arithmetic": {"operator": "-", "operands": [10, 3, 2]}}));
        assert_eq!(e.evaluate(&row(json!({}))).unwrap(), json!(5));

        let e = expr(json!({"arithmetic": {"operator": "/", "operands": [7, 2]}}));
        assert_eq!(e.evaluate(&row(json!({}))).unwrap(), json!(3.5));
    }

    #[test]
    fn arithmetic_errors_on_bad_operands() {
        let e = expr(json!({"arithmetic": {"operator": "/", "operands": [1, 0]}}));
        assert_eq!(e.evaluate(&row(json!({}))), Err(ExpressionError::DivisionByZero));

        let e = expr(json!({"arithmetic": {"operator": "+", "operands": ["$title", 1]}}));
        assert!(matches!(
            e.evaluate(&row(json!({"title": "abc"}))),
            Err(ExpressionError::NotNumeric(_))
        ));

        // undefined propagates rather than failing
        assert_eq!(e.evaluate(&row(json!({}))).unwrap(), Value::Null);
    }

    #[test]
    fn nesting_is_unbounded() {
        let e = expr(json!({"arithmetic": {"operator": "*", "operands": [
            {"conditional": {"if": ["$flag"], "then": 2, "else": 3}},
            {"arithmetic": {"operator": "+", "operands": ["$n", 1]}}
        ]}}));
        assert_eq!(e.evaluate(&row(json!({"flag": "y", "n": 4}))).unwrap(), json!(10));
        assert_eq!(e.evaluate(&row(json!({"n": 4}))).unwrap(), json!(15));

        let e = expr(json!({"conditional": {
            "if": [{"arithmetic": {"operator": "+", "operands": ["$a", "$b"]}}, ">=", 10],
            "then": "big", "else": "small"}}));
        assert_eq!(e.evaluate(&row(json!({"a": 4, "b": 6}))).unwrap(), json!("big"));
    }

    #[test]
    fn replace_substitutes_literally() {
        let e = expr(json!({"replace": {"search": "http://", "replace": "https://", "subject": "$link"}}));
        assert_eq!(
            e.evaluate(&row(json!({"link": "http://example.com/a"}))).unwrap(),
            json!("https://example.com/a")
        );
        assert_eq!(
            e.evaluate(&row(json!({"link": ["http://a", "http://b"]}))).unwrap(),
            json!(["https://a", "https://b"])
        );
        assert_eq!(e.evaluate(&row(json!({}))).unwrap(), Value::Null);

        // regex metacharacters are not special
        let e = expr(json!({"replace": {"search": ".*", "replace": "", "subject": "a.*b"}}));
        assert_eq!(e.evaluate(&row(json!({}))).unwrap(), json!("ab"));
    }

    #[test]
    fn date_reformats() {
        let e = expr(json!({"date": {"value": "$issued", "format": "%Y"}}));
        assert_eq!(e.evaluate(&row(json!({"issued": "2014-06-01"}))).unwrap(), json!("2014"));
        assert_eq!(
            e.evaluate(&row(json!({"issued": "2014-06-01T10:00:00+02:00"}))).unwrap(),
            json!("2014")
        );

        let e = expr(json!({"date": {"value": "2014-06-01"}}));
        assert_eq!(e.evaluate(&row(json!({}))).unwrap(), json!("2014-06-01T00:00:00+00:00"));

        let e = expr(json!({"date": {"value": "not a date"}}));
        assert!(matches!(e.evaluate(&row(json!({}))), Err(ExpressionError::InvalidDate(_))));
    }

    #[test]
    fn parse_rejects_malformed() {
        assert_eq!(
            Expression::parse(&json!({"arithmetic": {"operator": "%", "operands": [1]}})),
            Err(ExpressionError::UnknownOperator("%".to_string()))
        );
        assert_eq!(
            Expression::parse(&json!({"conditional": {"if": [1, "=~", 2], "then": 1}})),
            Err(ExpressionError::UnknownOperator("=~".to_string()))
        );
        assert_eq!(
            Expression::parse(&json!({"concat": {}})),
            Err(ExpressionError::UnknownKind("concat".to_string()))
        );
        assert!(matches!(
            Expression::parse(&json!({"date": {"value": "$d", "format": "%Q%"}})),
            Err(ExpressionError::InvalidDateFormat(_))
        ));
        assert!(matches!(
            Expression::parse(&json!({"conditional": {"if": [1, 2], "then": 1}})),
            Err(ExpressionError::Malformed(_))
        ));
        assert!(matches!(
            Expression::parse(&json!("x")),
            Err(ExpressionError::Malformed(_))
        ));
    }

    #[test]
    fn computed_fields_chain_in_order() {
        let fields: Vec<ComputedField> = serde_json::from_value(json!([
            {"fieldName": "tmp", "temporary": true,
             "value": {"replace": {"search": "a", "replace": "b", "subject": "$title"}}},
            {"fieldName": "final",
             "value": {"replace": {"search": "b", "replace": "c", "subject": "$tmp"}}}
        ]))
        .unwrap();
        validate_computed_fields(&fields).unwrap();

        let mut r = row(json!({"title": "aab"}));
        evaluate_computed_fields(&fields, &mut r).unwrap();
        assert_eq!(r["tmp"], json!("bbb"));
        assert_eq!(r["final"], json!("ccc"));
    }

    #[test]
    fn forward_and_self_references_are_cycles() {
        let fields: Vec<ComputedField> = serde_json::from_value(json!([
            {"fieldName": "a", "value": {"arithmetic": {"operator": "+", "operands": ["$b", 1]}}},
            {"fieldName": "b", "value": {"arithmetic": {"operator": "+", "operands": ["$a", 1]}}}
        ]))
        .unwrap();
        assert!(matches!(
            validate_computed_fields(&fields),
            Err(ExpressionError::ReferenceCycle { ref field, .. }) if field == "a"
        ));

        let fields: Vec<ComputedField> = serde_json::from_value(json!([
            {"fieldName": "a", "value": {"arithmetic": {"operator": "+", "operands": ["$a", 1]}}}
        ]))
        .unwrap();
        assert!(validate_computed_fields(&fields).is_err());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let fields: Vec<ComputedField> = serde_json::from_value(json!([
            {"fieldName": "a", "value": {"date": {"value": "2014-01-01"}}},
            {"fieldName": "a", "value": {"date": {"value": "2014-01-01"}}}
        ]))
        .unwrap();
        assert_eq!(
            validate_computed_fields(&fields),
            Err(ExpressionError::DuplicateField("a".to_string()))
        );
    }

    #[test]
    fn serialization_round_trips_through_parse() {
        let source = json!({"conditional": {"if": ["$a", "contains", "x"], "then": "$b", "else": {"date": {"value": "$c"}}}});
        let e = expr(source.clone());
        assert_eq!(e.to_value(), source);
    }

    proptest! {
        #[test]
        fn addition_matches_float_sum(a in -1_000i64..1_000, b in -1_000i64..1_000) {
            let e = expr(json!({"arithmetic": {"operator": "+", "operands": ["$a", "$b"]}}));
            let v = e.evaluate(&row(json!({"a": a, "b": b}))).unwrap();
            prop_assert_eq!(v, json!(a + b));
        }

        #[test]
        fn comparison_is_antisymmetric(a in -50i64..50, b in -50i64..50) {
            let gt = expr(json!({"conditional": {"if": ["$a", ">", "$b"], "then": true, "else": false}}));
            let lt = expr(json!({"conditional": {"if": ["$b", "<", "$a"], "then": true, "else": false}}));
            let r = row(json!({"a": a, "b": b}));
            prop_assert_eq!(gt.evaluate(&r).unwrap(), lt.evaluate(&r).unwrap());
        }
    }
}
