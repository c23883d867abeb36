//! Expression evaluation against scope frames.
//!
//! The core decides *when* an expression is evaluated; an [`Evaluator`]
//! decides *how*. Names resolve against a stack of scope frames, innermost
//! first, so a list item's local scope shadows the enclosing state.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::EvalError;
use crate::reactive::Value;

/// Scope frames, outermost first.
#[derive(Debug, Clone, Default)]
pub struct Frames(SmallVec<[Value; 4]>);

impl Frames {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of these frames with `frame` as the new innermost frame.
    pub fn push(&self, frame: Value) -> Self {
        let mut frames = self.0.clone();
        frames.push(frame);
        Self(frames)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Resolve `name` in the innermost frame that has it. Each frame consulted
    /// is tracked, so a name appearing in an inner frame later reruns the
    /// caller.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.0.iter().rev().find_map(|frame| {
            let scope = frame.as_observable()?;
            scope.has(name).then(|| scope.get(name))
        })
    }
}

/// Evaluates expressions for bindings.
pub trait Evaluator: Send + Sync + 'static {
    type Expr: Clone + Send + Sync + 'static;

    fn evaluate(&self, expr: &Self::Expr, frames: &Frames) -> Result<Value, EvalError>;

    /// Diagnostic label for observers bound to `expr`.
    fn label(&self, _expr: &Self::Expr) -> Option<String> {
        None
    }
}

/// Turn an expression into a tracked computation.
pub fn binding<E: Evaluator>(
    evaluator: Arc<E>,
    expr: E::Expr,
    frames: Frames,
) -> impl FnMut() -> Result<Value, EvalError> + Send + 'static {
    move || evaluator.evaluate(&expr, &frames)
}

/// A small evaluator for dotted member paths.
///
/// Supports `name`, `name.member.member`, numeric segments for sequence
/// positions, `length`, leading `!` negation and the literals `true`,
/// `false`, `null`, numbers and single-quoted strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathEvaluator;

impl PathEvaluator {
    fn literal(expr: &str) -> Option<Value> {
        match expr {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            "null" => Some(Value::Null),
            _ => {
                if let Some(s) = expr.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
                    return Some(Value::from(s));
                }
                expr.parse::<f64>().ok().map(Value::Number)
            }
        }
    }

    fn member(value: &Value, segment: &str) -> Result<Value, EvalError> {
        match value {
            Value::Observable(o) if segment == "length" && o.is_sequence() => {
                Ok(Value::from(o.len()))
            }
            Value::Observable(o) => Ok(o.get(segment)),
            Value::String(s) if segment == "length" => Ok(Value::from(s.chars().count())),
            Value::Null => Err(EvalError::new(format!("cannot read `{segment}` of null"))),
            _ => Ok(Value::Null),
        }
    }

    fn resolve(path: &str, frames: &Frames) -> Result<Value, EvalError> {
        if let Some(value) = Self::literal(path) {
            return Ok(value);
        }

        let mut segments = path.split('.');
        let root = segments.next().unwrap_or_default();
        if root.is_empty() {
            return Err(EvalError::new("empty expression"));
        }
        let mut value = frames
            .lookup(root)
            .ok_or_else(|| EvalError::new(format!("`{root}` is not defined")))?;

        for segment in segments {
            if segment.is_empty() {
                return Err(EvalError::new("empty path segment"));
            }
            value = Self::member(&value, segment)?;
        }
        Ok(value)
    }
}

impl Evaluator for PathEvaluator {
    type Expr = String;

    fn evaluate(&self, expr: &String, frames: &Frames) -> Result<Value, EvalError> {
        let trimmed = expr.trim();
        let path = trimmed.trim_start_matches('!');
        let negations = trimmed.len() - path.len();

        let value = Self::resolve(path.trim(), frames).map_err(|e| e.in_expression(expr.as_str()))?;
        if negations == 0 {
            return Ok(value);
        }
        let truthy = value.is_truthy() ^ (negations % 2 == 1);
        Ok(Value::Bool(truthy))
    }

    fn label(&self, expr: &String) -> Option<String> {
        Some(expr.clone())
    }
}
