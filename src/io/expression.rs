//! Boolean expression evaluation over pixel rectangles.
//!
//! The expression language itself lives outside this crate. Operators only
//! need to parse an expression once and then evaluate it per tile into a byte
//! buffer, which is what [`ExpressionEvaluator`] and [`BooleanTerm`] model.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{RasterError, RasterResult, Rect};

/// A parsed boolean expression, evaluable over any rectangle
pub trait BooleanTerm: Send + Sync {
    /// Evaluate into `out` (row-major, `rect.width * rect.height` bytes),
    /// writing `true_byte` where the term holds and `false_byte` elsewhere
    fn evaluate_into(
        &self,
        rect: Rect,
        true_byte: u8,
        false_byte: u8,
        out: &mut [u8],
    ) -> RasterResult<()>;
}

/// Parses expressions into terms
pub trait ExpressionEvaluator: Send + Sync {
    /// Parse `expression`, failing with [`RasterError::InvalidExpression`]
    fn parse(&self, expression: &str) -> RasterResult<Arc<dyn BooleanTerm>>;

    /// Parse and evaluate in one go
    fn evaluate_boolean(
        &self,
        expression: &str,
        rect: Rect,
        true_byte: u8,
        false_byte: u8,
    ) -> RasterResult<Vec<u8>> {
        let term = self.parse(expression)?;
        let mut out = vec![false_byte; rect.area()];
        term.evaluate_into(rect, true_byte, false_byte, &mut out)?;
        Ok(out)
    }
}

type PixelPredicate = dyn Fn(i32, i32) -> bool + Send + Sync;

/// Evaluator resolving expressions against named per-pixel predicates.
///
/// Accepted forms are a registered name, the literals `true` and `false`,
/// and any of these prefixed with `!` for negation.
#[derive(Clone, Default)]
pub struct PredicateEvaluator {
    predicates: HashMap<String, Arc<PixelPredicate>>,
}

impl std::fmt::Debug for PredicateEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.predicates.keys().collect();
        names.sort();
        f.debug_struct("PredicateEvaluator").field("predicates", &names).finish()
    }
}

impl PredicateEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a predicate under `name`, replacing any previous one
    pub fn register<F>(&mut self, name: &str, predicate: F) -> &mut Self
    where
        F: Fn(i32, i32) -> bool + Send + Sync + 'static,
    {
        self.predicates.insert(name.to_string(), Arc::new(predicate));
        self
    }

    /// Builder form of [`Self::register`]
    pub fn with<F>(mut self, name: &str, predicate: F) -> Self
    where
        F: Fn(i32, i32) -> bool + Send + Sync + 'static,
    {
        self.register(name, predicate);
        self
    }

    fn resolve(&self, original: &str, text: &str) -> RasterResult<PredicateTerm> {
        let text = text.trim();
        if let Some(rest) = text.strip_prefix('!') {
            let inner = self.resolve(original, rest)?;
            return Ok(PredicateTerm::Not(Box::new(inner)));
        }
        match text {
            "" => Err(RasterError::invalid_expression(original, "empty expression")),
            "true" => Ok(PredicateTerm::Constant(true)),
            "false" => Ok(PredicateTerm::Constant(false)),
            name => self
                .predicates
                .get(name)
                .map(|p| PredicateTerm::Named(Arc::clone(p)))
                .ok_or_else(|| {
                    RasterError::invalid_expression(original, format!("undefined symbol '{}'", name))
                }),
        }
    }
}

impl ExpressionEvaluator for PredicateEvaluator {
    fn parse(&self, expression: &str) -> RasterResult<Arc<dyn BooleanTerm>> {
        let term = self.resolve(expression, expression)?;
        Ok(Arc::new(term))
    }
}

enum PredicateTerm {
    Constant(bool),
    Named(Arc<PixelPredicate>),
    Not(Box<PredicateTerm>),
}

impl PredicateTerm {
    fn eval(&self, x: i32, y: i32) -> bool {
        match self {
            PredicateTerm::Constant(value) => *value,
            PredicateTerm::Named(predicate) => predicate(x, y),
            PredicateTerm::Not(inner) => !inner.eval(x, y),
        }
    }
}

impl BooleanTerm for PredicateTerm {
    fn evaluate_into(
        &self,
        rect: Rect,
        true_byte: u8,
        false_byte: u8,
        out: &mut [u8],
    ) -> RasterResult<()> {
        if out.len() < rect.area() {
            return Err(RasterError::InvalidLayout(format!(
                "Output buffer of {} bytes too small for {}",
                out.len(),
                rect
            )));
        }
        let mut i = 0;
        for y in rect.y..rect.y + rect.height as i32 {
            for x in rect.x..rect.x + rect.width as i32 {
                out[i] = if self.eval(x, y) { true_byte } else { false_byte };
                i += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluator() -> PredicateEvaluator {
        PredicateEvaluator::new().with("left", |x, _| x < 2)
    }

    #[test]
    fn test_named_predicate() {
        let out = evaluator()
            .evaluate_boolean("left", Rect::new(0, 0, 4, 1), 1, 0)
            .unwrap();
        assert_eq!(out, vec![1, 1, 0, 0]);
    }

    #[test]
    fn test_negation_and_literals() {
        let ev = evaluator();
        let rect = Rect::new(1, 5, 2, 1);
        assert_eq!(ev.evaluate_boolean("!left", rect, 9, 3).unwrap(), vec![3, 9]);
        assert_eq!(ev.evaluate_boolean(" true ", rect, 1, 0).unwrap(), vec![1, 1]);
        assert_eq!(ev.evaluate_boolean("!!false", rect, 1, 0).unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_invalid_expression_keeps_original_text() {
        match evaluator().parse("cloud_flag") {
            Err(RasterError::InvalidExpression { expression, message }) => {
                assert_eq!(expression, "cloud_flag");
                assert!(message.contains("cloud_flag"));
            }
            other => panic!("unexpected result: {:?}", other.err()),
        }
        assert!(evaluator().parse("  ").is_err());
    }
}
