//! Engine module: the entry point a surrounding pipeline holds on to.
//!
//! An Engine owns the configuration and the compiled expression cache, and
//! runs batch operators and transform steps from expression source text.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::{ExprCache, DEFAULT_CACHE_CAPACITY};
use crate::expr::CompiledExpr;
use crate::ops;
use crate::record::Record;
use crate::transform::TransformStep;
use crate::types::Value;
use crate::vm::{Evaluator, DEFAULT_MAX_STACK_DEPTH};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Evaluation stack limit; deeper expressions are rejected when compiled.
    pub max_stack_depth: usize,
    /// Number of compiled expressions kept in the cache.
    pub cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_stack_depth: DEFAULT_MAX_STACK_DEPTH,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    cache: ExprCache,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let cache = ExprCache::with_capacity(config.cache_capacity, config.max_stack_depth);
        Self { config, cache }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &ExprCache {
        &self.cache
    }

    /// Compile `source`, reusing a cached compilation when there is one.
    pub fn compile(&self, source: &str) -> Result<Arc<CompiledExpr>> {
        self.cache.get_or_compile(source)
    }

    /// An evaluator using this engine's stack limit.
    pub fn evaluator(&self) -> Evaluator {
        Evaluator::with_max_depth(self.config.max_stack_depth)
    }

    /// Compile and evaluate `source` against one record.
    pub fn evaluate(&self, source: &str, record: &Record) -> Result<Value> {
        let expr = self.compile(source)?;
        Ok(expr.evaluate(record))
    }

    pub fn filter(&self, source: &str, records: Vec<Record>) -> Result<Vec<Record>> {
        let expr = self.compile(source)?;
        Ok(ops::filter(&expr, records))
    }

    pub fn compute(&self, source: &str, records: &mut [Record], field: &str) -> Result<()> {
        let expr = self.compile(source)?;
        ops::compute(&expr, records, field);
        Ok(())
    }

    pub fn transform(&self, step: &TransformStep, records: Vec<Record>) -> Result<Vec<Record>> {
        step.apply(records, &self.cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineError;
    use serde_json;

    #[test]
    fn test_config_defaults() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.max_stack_depth, 64);
        assert_eq!(config.cache_capacity, 256);

        let config: EngineConfig = serde_json::from_str(r#"{"max_stack_depth": 8}"#).unwrap();
        assert_eq!(config.max_stack_depth, 8);
        assert_eq!(config.cache_capacity, 256);
    }

    #[test]
    fn test_engine_compiles_through_cache() {
        let engine = Engine::default();
        let a = engine.compile("x + 1").unwrap();
        let b = engine.compile("x + 1").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(engine.cache().len(), 1);
    }

    #[test]
    fn test_engine_stack_limit() {
        let engine = Engine::new(EngineConfig {
            max_stack_depth: 2,
            ..Default::default()
        });
        assert!(matches!(
            engine.compile("1 + (2 + 3)"),
            Err(EngineError::StackOverflow { .. })
        ));
        assert_eq!(engine.evaluator().max_depth(), 2);
    }

    #[test]
    fn test_engine_higher_stack_limit() {
        let engine = Engine::new(EngineConfig {
            max_stack_depth: 128,
            ..Default::default()
        });
        let src = format!("{}1{}", "1 + (".repeat(99), ")".repeat(99));
        let expr = engine.compile(&src).unwrap();
        assert_eq!(expr.evaluate(&Record::new()), Value::Integer(100));
    }

    #[test]
    fn test_engine_filter_and_compute() {
        let engine = Engine::default();
        let mut records = vec![
            Record::new().with("a", 1),
            Record::new().with("a", 5),
        ];
        engine.compute("a * 10", &mut records, "b").unwrap();
        let out = engine.filter("b > 20", records).unwrap();
        assert_eq!(out, vec![Record::new().with("a", 5).with("b", 50)]);
        assert!(engine.filter("b >", Vec::new()).is_err());
    }

    #[test]
    fn test_engine_evaluate() {
        let engine = Engine::default();
        let rec = Record::new().with("x", Value::Null);
        assert_eq!(engine.evaluate("x == None", &rec).unwrap(), Value::Boolean(true));
        assert_eq!(engine.evaluate("x > 1", &Record::new()).unwrap(), Value::Boolean(false));
    }
}
