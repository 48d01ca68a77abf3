use std::{
    collections::{BTreeMap, BTreeSet},
    marker::PhantomData,
};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::document::DocumentKind;

pub const DOCTYPE_FIELD: &str = "Doctype";

/// Accumulates equality selectors for documents of kind `D`.
///
/// Selectors are kept sorted, so the order of [`QueryBuilder::add_selector`]
/// calls never shows up in the built query.
#[derive(Debug, Clone)]
pub struct QueryBuilder<D> {
    selectors: BTreeMap<String, BTreeSet<String>>,
    kind: PhantomData<D>,
}

impl<D: DocumentKind> Default for QueryBuilder<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: DocumentKind> QueryBuilder<D> {
    pub fn new() -> Self {
        Self {
            selectors: BTreeMap::new(),
            kind: PhantomData,
        }
    }

    pub fn add_selector(&mut self, field: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.selectors
            .entry(field.into())
            .or_default()
            .insert(value.into());
        self
    }

    /// Serializes the conjunction, including the implicit `Doctype` selector.
    ///
    /// Output is `{"selector":{"Field":"value",...}}`. When one field carries
    /// more than one distinct value the conjunction is spelled out with `$and`
    /// instead, one single-field object per constraint.
    pub fn build(&self) -> String {
        let mut constraints = self.selectors.clone();
        constraints
            .entry(DOCTYPE_FIELD.to_string())
            .or_default()
            .insert(D::DOCTYPE.to_string());

        let single_valued = constraints.values().all(|values| values.len() == 1);
        let mut selector = Map::new();
        if single_valued {
            for (field, values) in constraints {
                if let Some(value) = values.into_iter().next() {
                    selector.insert(field, Value::String(value));
                }
            }
        } else {
            let clauses = constraints
                .into_iter()
                .flat_map(|(field, values)| {
                    values.into_iter().map(move |value| {
                        let mut clause = Map::new();
                        clause.insert(field.clone(), Value::String(value));
                        Value::Object(clause)
                    })
                })
                .collect();
            selector.insert("$and".to_string(), Value::Array(clauses));
        }

        let mut query = Map::new();
        query.insert("selector".to_string(), Value::Object(selector));
        Value::Object(query).to_string()
    }
}

#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("Query is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Query must be an object with a `selector` object")]
    MissingSelector,
    #[error("Operator `{0}` is not supported")]
    UnsupportedOperator(String),
    #[error("`$and` expects an array of selector objects")]
    MalformedConjunction,
}

#[derive(Debug, Clone, PartialEq)]
enum Clause {
    Eq { field: String, value: Value },
    All(Vec<Selector>),
}

/// Parsed form of a selector query, able to test documents against it.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    clauses: Vec<Clause>,
}

impl Selector {
    pub fn parse(query: &str) -> Result<Self, SelectorError> {
        let value: Value = serde_json::from_str(query)?;
        match value.get("selector") {
            Some(Value::Object(selector)) => Self::from_object(selector),
            _ => Err(SelectorError::MissingSelector),
        }
    }

    fn from_object(object: &Map<String, Value>) -> Result<Self, SelectorError> {
        let mut clauses = Vec::with_capacity(object.len());
        for (field, value) in object {
            if field == "$and" {
                let Value::Array(items) = value else {
                    return Err(SelectorError::MalformedConjunction);
                };
                let nested: Vec<Selector> = items
                    .iter()
                    .map(|item| match item {
                        Value::Object(object) => Self::from_object(object),
                        _ => Err(SelectorError::MalformedConjunction),
                    })
                    .collect::<Result<_, _>>()?;
                clauses.push(Clause::All(nested));
            } else if field.starts_with('$') {
                return Err(SelectorError::UnsupportedOperator(field.clone()));
            } else {
                clauses.push(Clause::Eq {
                    field: field.clone(),
                    value: Self::equality_operand(value)?,
                });
            }
        }
        Ok(Self { clauses })
    }

    fn equality_operand(value: &Value) -> Result<Value, SelectorError> {
        let Value::Object(operator) = value else {
            return Ok(value.clone());
        };
        match operator.iter().next() {
            Some((name, operand)) if operator.len() == 1 && name == "$eq" => Ok(operand.clone()),
            Some((name, _)) => Err(SelectorError::UnsupportedOperator(name.clone())),
            None => Err(SelectorError::UnsupportedOperator("{}".to_string())),
        }
    }

    pub fn matches(&self, document: &Value) -> bool {
        self.clauses.iter().all(|clause| match clause {
            Clause::Eq { field, value } => document.get(field) == Some(value),
            Clause::All(selectors) => selectors.iter().all(|s| s.matches(document)),
        })
    }
}
