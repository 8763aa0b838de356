//! Dynamic evaluation capability
//!
//! Hosts may inject a [`DynamicEval`] to let sub-applications evaluate
//! source text at runtime. In enhanced mode each sandbox session memoises
//! results by exact source text. The memo assumes evaluating the same source
//! twice yields the same result, which does not hold for code with side
//! effects or code that reads changing globals. It is an approximation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::scope::Value;

use super::session::ScopeProxy;

/// A function built from source text by [`DynamicEval::construct_function`]
#[derive(Clone)]
pub struct CompiledFunction {
    source: String,
    call: Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>,
}

impl CompiledFunction {
    pub fn new<F>(source: impl Into<String>, call: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            source: source.into(),
            call: Arc::new(call),
        }
    }

    /// Invoke the function with positional arguments
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.call)(args)
    }

    /// Source text the function was built from
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Both handles refer to the same compiled function
    pub fn same_as(&self, other: &CompiledFunction) -> bool {
        Arc::ptr_eq(&self.call, &other.call)
    }
}

impl fmt::Debug for CompiledFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledFunction")
            .field("source", &self.source)
            .finish()
    }
}

/// Evaluates source text on behalf of a sandboxed sub-application
pub trait DynamicEval: Send + Sync {
    /// Evaluate free-form source text against the sandboxed scope
    fn evaluate(&self, scope: &ScopeProxy, source: &str) -> Result<Value>;

    /// Build a function from parameter names and a body
    fn construct_function(
        &self,
        scope: &ScopeProxy,
        params: &[String],
        body: &str,
    ) -> Result<CompiledFunction>;
}

/// Per-session cache of evaluation results
#[derive(Debug, Default)]
pub(crate) struct EvalMemo {
    values: HashMap<String, Value>,
    functions: HashMap<String, CompiledFunction>,
}

impl EvalMemo {
    pub(crate) fn value(&self, source: &str) -> Option<Value> {
        self.values.get(source).cloned()
    }

    pub(crate) fn remember_value(&mut self, source: &str, value: Value) {
        self.values.insert(source.to_string(), value);
    }

    pub(crate) fn function(&self, key: &str) -> Option<CompiledFunction> {
        self.functions.get(key).cloned()
    }

    pub(crate) fn remember_function(&mut self, key: &str, function: CompiledFunction) {
        self.functions.insert(key.to_string(), function);
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len() + self.functions.len()
    }

    pub(crate) fn clear(&mut self) {
        self.values.clear();
        self.functions.clear();
    }
}

/// Memo key for a constructed function: parameters then body, comma-joined
pub(crate) fn function_key(params: &[String], body: &str) -> String {
    let mut parts: Vec<&str> = params.iter().map(String::as_str).collect();
    parts.push(body);
    parts.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_function_key() {
        let params = vec!["a".to_string(), "b".to_string()];
        assert_eq!(function_key(&params, "a + b"), "a,b,a + b");
        assert_eq!(function_key(&[], "1"), "1");
    }

    #[test]
    fn test_memo_roundtrip() {
        let mut memo = EvalMemo::default();
        memo.remember_value("1 + 1", json!(2));
        assert_eq!(memo.value("1 + 1"), Some(json!(2)));
        assert_eq!(memo.value("1+1"), None);

        let f = CompiledFunction::new("x", |_| Ok(json!(null)));
        memo.remember_function("x", f.clone());
        assert!(memo.function("x").unwrap().same_as(&f));
        assert_eq!(memo.len(), 2);

        memo.clear();
        assert_eq!(memo.len(), 0);
    }

    #[test]
    fn test_compiled_function_call() {
        let f = CompiledFunction::new("double", |args| {
            let n = args.first().and_then(Value::as_f64).unwrap_or(0.0);
            Ok(json!(n * 2.0))
        });
        assert_eq!(f.call(&[json!(4)]).unwrap(), json!(8.0));
        assert_eq!(f.source(), "double");
    }
}
