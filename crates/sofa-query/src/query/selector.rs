//! Selector and sort parsing
//!
//! Turns the JSON query language into a typed tree. Only shape is checked
//! here; whether an index can answer the tree is the planner's business.

use serde_json::{Map, Value};

use crate::error::{QueryError, QueryResult};
use crate::index::validate_field_path;

/// Comparison operators that map directly onto SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Operator {
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
        }
    }
}

/// A condition on one field
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare(Operator, Value),
    In(Vec<Value>),
    Exists(bool),
    /// Present in the index but not matching the inner condition
    Not(Box<Condition>),
}

impl Condition {
    /// Logical negation, folding double negations and `$exists`
    #[must_use]
    pub fn negate(self) -> Self {
        match self {
            Self::Exists(exists) => Self::Exists(!exists),
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }

    /// Conditions answered by subtracting matches from a base set
    pub fn is_negative(&self) -> bool {
        matches!(self, Self::Not(_) | Self::Exists(false))
    }
}

/// Parsed selector tree
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    And(Vec<Selector>),
    Or(Vec<Selector>),
    Field { path: String, condition: Condition },
    /// Full-text search against the text index
    Text(String),
}

impl Selector {
    fn field(path: &str, condition: Condition) -> Self {
        Self::Field {
            path: path.to_string(),
            condition,
        }
    }
}

/// Parse a JSON selector object
pub fn parse_selector(value: &Value) -> QueryResult<Selector> {
    parse_object(value, false)
}

fn parse_object(value: &Value, under_or: bool) -> QueryResult<Selector> {
    let object = value
        .as_object()
        .ok_or_else(|| invalid(format!("selector must be an object, got {}", value)))?;

    let mut clauses = Vec::with_capacity(object.len());
    for (key, value) in object {
        clauses.push(parse_clause(key, value, under_or)?);
    }

    Ok(match clauses.len() {
        1 => clauses.remove(0),
        _ => Selector::And(clauses),
    })
}

fn parse_clause(key: &str, value: &Value, under_or: bool) -> QueryResult<Selector> {
    match key {
        "$and" => Ok(Selector::And(parse_list(key, value, under_or)?)),
        "$or" => {
            let children = parse_list(key, value, true)?;
            if children.is_empty() {
                return Err(invalid("$or needs at least one selector"));
            }
            Ok(Selector::Or(children))
        }
        "$text" => {
            if under_or {
                return Err(invalid("$text cannot be used inside $or"));
            }
            parse_text(value)
        }
        op if op.starts_with('$') => Err(invalid(format!("unknown operator '{}'", op))),
        path => {
            validate_field_path(path)?;
            parse_field(path, value)
        }
    }
}

fn parse_list(key: &str, value: &Value, under_or: bool) -> QueryResult<Vec<Selector>> {
    value
        .as_array()
        .ok_or_else(|| invalid(format!("{} takes an array of selectors", key)))?
        .iter()
        .map(|item| parse_object(item, under_or))
        .collect()
}

fn parse_text(value: &Value) -> QueryResult<Selector> {
    let search = value
        .as_object()
        .filter(|o| o.len() == 1)
        .and_then(|o| o.get("$search"))
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("$text takes {\"$search\": \"terms\"}"))?;
    Ok(Selector::Text(search.to_string()))
}

fn parse_field(path: &str, value: &Value) -> QueryResult<Selector> {
    let operators = match value {
        Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => map,
        Value::Object(_) => {
            return Err(invalid(format!(
                "field '{}' must be compared with a scalar or operators",
                path
            )))
        }
        scalar => {
            return Ok(Selector::field(
                path,
                Condition::Compare(Operator::Eq, scalar_operand(path, scalar)?),
            ))
        }
    };

    let mut conditions = operators
        .iter()
        .map(|(op, operand)| parse_condition(path, op, operand))
        .collect::<QueryResult<Vec<_>>>()?;

    Ok(if conditions.len() == 1 {
        Selector::field(path, conditions.remove(0))
    } else {
        Selector::And(
            conditions
                .into_iter()
                .map(|c| Selector::field(path, c))
                .collect(),
        )
    })
}

fn parse_condition(path: &str, op: &str, operand: &Value) -> QueryResult<Condition> {
    let compare = |operator: Operator| -> QueryResult<Condition> {
        Ok(Condition::Compare(operator, scalar_operand(path, operand)?))
    };
    match op {
        "$eq" => compare(Operator::Eq),
        "$lt" => compare(Operator::Lt),
        "$lte" => compare(Operator::Lte),
        "$gt" => compare(Operator::Gt),
        "$gte" => compare(Operator::Gte),
        "$ne" => Ok(compare(Operator::Eq)?.negate()),
        "$in" => Ok(Condition::In(list_operand(path, op, operand)?)),
        "$nin" => Ok(Condition::In(list_operand(path, op, operand)?).negate()),
        "$exists" => operand
            .as_bool()
            .map(Condition::Exists)
            .ok_or_else(|| invalid(format!("$exists on '{}' takes a boolean", path))),
        "$not" => {
            let inner = single_operator(path, operand)?;
            Ok(parse_condition(path, inner.0, inner.1)?.negate())
        }
        other => Err(invalid(format!("unknown operator '{}' on '{}'", other, path))),
    }
}

fn single_operator<'a>(path: &str, operand: &'a Value) -> QueryResult<(&'a str, &'a Value)> {
    match operand.as_object().map(Map::iter) {
        Some(mut ops) => match (ops.next(), ops.next()) {
            (Some((op, value)), None) if op.starts_with('$') => Ok((op.as_str(), value)),
            _ => Err(invalid(format!(
                "$not on '{}' takes exactly one operator",
                path
            ))),
        },
        None => Err(invalid(format!("$not on '{}' takes an operator object", path))),
    }
}

fn scalar_operand(path: &str, value: &Value) -> QueryResult<Value> {
    match value {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => Ok(value.clone()),
        Value::Null => Err(invalid(format!("cannot compare '{}' with null", path))),
        _ => Err(invalid(format!(
            "'{}' can only be compared with strings, numbers and booleans",
            path
        ))),
    }
}

fn list_operand(path: &str, op: &str, value: &Value) -> QueryResult<Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| invalid(format!("{} on '{}' takes an array", op, path)))?
        .iter()
        .map(|item| scalar_operand(path, item))
        .collect()
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// One sort key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub path: String,
    pub direction: SortDirection,
}

impl SortField {
    pub fn asc(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Parse `["name", {"age": "desc"}]`
pub fn parse_sort(value: &Value) -> QueryResult<Vec<SortField>> {
    let items = value
        .as_array()
        .ok_or_else(|| QueryError::InvalidSort("sort must be an array".to_string()))?;

    items
        .iter()
        .map(|item| {
            let field = match item {
                Value::String(path) => SortField::asc(path.as_str()),
                Value::Object(map) if map.len() == 1 => {
                    let (path, direction) = map
                        .iter()
                        .next()
                        .ok_or_else(|| QueryError::InvalidSort("empty sort entry".to_string()))?;
                    match direction.as_str() {
                        Some("asc") => SortField::asc(path.as_str()),
                        Some("desc") => SortField::desc(path.as_str()),
                        _ => {
                            return Err(QueryError::InvalidSort(format!(
                                "direction of '{}' must be \"asc\" or \"desc\"",
                                path
                            )))
                        }
                    }
                }
                other => {
                    return Err(QueryError::InvalidSort(format!(
                        "unsupported sort entry {}",
                        other
                    )))
                }
            };
            validate_field_path(&field.path)
                .map_err(|_| QueryError::InvalidSort(format!("invalid sort field '{}'", field.path)))?;
            Ok(field)
        })
        .collect()
}

fn invalid(message: impl Into<String>) -> QueryError {
    QueryError::InvalidQuery(message.into())
}
