//! Transform step: a declarative bundle of batch operators.
//!
//! A step is usually decoded from the surrounding pipeline's configuration.
//! Whatever subset of operations it names runs in a fixed order:
//! select, rename, filter, compute, sort, dedupe, limit.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::cache::ExprCache;
use crate::expr::CompiledExpr;
use crate::ops;
use crate::record::Record;
use crate::{EngineError, Result};

/// Sort field and direction, written as `"price"`, `"price asc"` or `"price desc"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SortSpec {
    pub field: String,
    pub descending: bool,
}

impl SortSpec {
    pub fn parse(spec: &str) -> Result<Self> {
        let mut parts = spec.split_whitespace();
        let field = parts
            .next()
            .ok_or_else(|| EngineError::InvalidTransform("sort needs a field name".to_string()))?;
        let descending = match parts.next() {
            None => false,
            Some(dir) if dir.eq_ignore_ascii_case("asc") => false,
            Some(dir) if dir.eq_ignore_ascii_case("desc") => true,
            Some(dir) => {
                return Err(EngineError::InvalidTransform(format!(
                    "unknown sort direction '{}' in '{}'",
                    dir, spec
                )))
            }
        };
        if parts.next().is_some() {
            return Err(EngineError::InvalidTransform(format!(
                "sort expects '<field> [asc|desc]', got '{}'",
                spec
            )));
        }
        Ok(Self {
            field: field.to_string(),
            descending,
        })
    }
}

impl TryFrom<String> for SortSpec {
    type Error = EngineError;

    fn try_from(spec: String) -> Result<Self> {
        SortSpec::parse(&spec)
    }
}

impl From<SortSpec> for String {
    fn from(spec: SortSpec) -> Self {
        spec.to_string()
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            write!(f, "{} desc", self.field)
        } else {
            write!(f, "{}", self.field)
        }
    }
}

/// Dedupe keys, given either as a single field name or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyFields {
    One(String),
    Many(Vec<String>),
}

impl KeyFields {
    pub fn as_slice(&self) -> &[String] {
        match self {
            KeyFields::One(field) => std::slice::from_ref(field),
            KeyFields::Many(fields) => fields,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransformStep {
    /// Fields to keep, in output order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select: Option<Vec<String>>,
    /// Old name to new name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rename: Option<IndexMap<String, String>>,
    /// Keep records for which this expression is truthy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Target field to expression, applied in order so later expressions
    /// see earlier results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compute: Option<IndexMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedupe: Option<KeyFields>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// A transform step with every expression compiled.
struct PreparedStep<'s> {
    filter: Option<Arc<CompiledExpr>>,
    compute: Vec<(&'s str, Arc<CompiledExpr>)>,
}

impl TransformStep {
    /// Compiles every expression the step names, without touching any data.
    pub fn validate(&self, cache: &ExprCache) -> Result<()> {
        self.prepare(cache).map(|_| ())
    }

    /// Runs the step over `records`.
    ///
    /// All expressions are compiled before the first operator runs, so a bad
    /// expression never leaves a half-transformed collection behind.
    pub fn apply(&self, records: Vec<Record>, cache: &ExprCache) -> Result<Vec<Record>> {
        let prepared = self.prepare(cache)?;
        let mut data = records;

        if let Some(fields) = &self.select {
            data = ops::select(fields, &data);
        }
        if let Some(mapping) = &self.rename {
            data = ops::rename(mapping, data);
        }
        if let Some(expr) = &prepared.filter {
            data = ops::filter(expr, data);
        }
        for (field, expr) in &prepared.compute {
            ops::compute(expr, &mut data, field);
        }
        if let Some(spec) = &self.sort {
            data = ops::sort(&spec.field, data, spec.descending);
        }
        if let Some(keys) = &self.dedupe {
            data = ops::dedupe(keys.as_slice(), data);
        }
        if let Some(n) = self.limit {
            data = ops::limit(n, data);
        }
        Ok(data)
    }

    fn prepare(&self, cache: &ExprCache) -> Result<PreparedStep<'_>> {
        let filter = self
            .filter
            .as_deref()
            .map(|src| cache.get_or_compile(src))
            .transpose()?;
        let compute = match &self.compute {
            Some(exprs) => exprs
                .iter()
                .map(|(field, src)| Ok((field.as_str(), cache.get_or_compile(src)?)))
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };
        if let Some(spec) = &self.sort {
            if spec.field.is_empty() {
                return Err(EngineError::InvalidTransform("sort needs a field name".to_string()));
            }
        }
        let prepared = PreparedStep { filter, compute };
        self.warn_on_unselected_fields(&prepared);
        Ok(prepared)
    }

    // After select, any other field reads as null in filter and compute.
    fn warn_on_unselected_fields(&self, prepared: &PreparedStep<'_>) {
        let Some(selected) = &self.select else {
            return;
        };
        let visible = |name: &str| {
            selected.iter().any(|f| {
                let renamed = self
                    .rename
                    .as_ref()
                    .and_then(|m| m.get(f))
                    .map_or(f.as_str(), |n| n.as_str());
                renamed == name
            }) || prepared.compute.iter().any(|(target, _)| *target == name)
        };
        let exprs = prepared
            .filter
            .iter()
            .chain(prepared.compute.iter().map(|(_, e)| e));
        for expr in exprs {
            for field in expr.fields() {
                if !visible(field) {
                    log::warn!(
                        "expression '{}' reads unselected field '{}'; it will always be None",
                        expr.source(),
                        field
                    );
                }
            }
        }
    }
}
