//! The playbook expression sub-language.
//!
//! Shared by the indicator engine, the playbook state machine, and the
//! backtest replayer so all three judge a bar the same way: a small,
//! side-effect-free grammar over dotted names, arithmetic, comparisons, and a
//! handful of functions — never a host-language `eval`. Parsing never
//! touches the filesystem or network and evaluation never panics; malformed
//! or unresolved expressions become `ExprError`s that calling code turns into
//! an inert result ("this rule is false", "this action is a no-op").

mod ast;
mod context;
mod error;
mod eval;
mod parser;
mod token;

pub use ast::{BinOp, CmpOp, Comparison, Expr};
pub use context::EvalContext;
pub use error::{ExprError, Result};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// A single comparison between two expression strings, e.g.
/// `left = "ind.rsi14.value"`, `op = Lt`, `right = "30"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub left: String,
    pub op: CmpOp,
    pub right: String,
}

/// A boolean tree of rules. Transitions and position-management guards are
/// built from these; an empty `All`/`Any` is false rather than vacuously true,
/// since a rule list that forgot to list any rules should never fire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "logic", rename_all = "snake_case")]
pub enum Condition {
    Rule(Rule),
    All(Vec<Condition>),
    Any(Vec<Condition>),
}

/// Per-rule evaluation result, kept for the signal's "conditions snapshot".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSnapshot {
    pub left: String,
    pub op: CmpOp,
    pub right: String,
    pub left_value: Option<f64>,
    pub right_value: Option<f64>,
    pub result: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "logic", rename_all = "snake_case")]
pub enum ConditionSnapshot {
    Rule(RuleSnapshot),
    All(Vec<ConditionSnapshot>, bool),
    Any(Vec<ConditionSnapshot>, bool),
}

impl ConditionSnapshot {
    pub fn result(&self) -> bool {
        match self {
            ConditionSnapshot::Rule(r) => r.result,
            ConditionSnapshot::All(_, result) | ConditionSnapshot::Any(_, result) => *result,
        }
    }
}

/// Parses expression strings into `Expr` ASTs and caches them by source text
/// so a playbook with thousands of bar evaluations only pays the parse cost
/// once per distinct rule string.
#[derive(Default)]
pub struct AstCache {
    cache: Mutex<HashMap<String, Arc<Expr>>>,
}

impl AstCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(&self, src: &str) -> Result<Arc<Expr>> {
        if let Some(expr) = self.cache.lock().expect("ast cache poisoned").get(src) {
            return Ok(expr.clone());
        }
        let parsed = Arc::new(parser::parse(src)?);
        self.cache
            .lock()
            .expect("ast cache poisoned")
            .insert(src.to_string(), parsed.clone());
        Ok(parsed)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().expect("ast cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Evaluate a single expression string to a scalar.
pub fn evaluate(cache: &AstCache, src: &str, ctx: &EvalContext) -> Result<f64> {
    let ast = cache.parse(src)?;
    eval::eval(&ast, ctx)
}

fn evaluate_rule(cache: &AstCache, rule: &Rule, ctx: &EvalContext) -> Result<(f64, f64, bool)> {
    let left = evaluate(cache, &rule.left, ctx)?;
    let right = evaluate(cache, &rule.right, ctx)?;
    Ok((left, right, rule.op.apply(left, right)))
}

/// Evaluate a condition tree to a single boolean. Any rule whose expressions
/// fail to resolve (unresolved indicator, division by zero, ...) is treated
/// as false rather than aborting the whole tree.
pub fn evaluate_condition(cache: &AstCache, cond: &Condition, ctx: &EvalContext) -> bool {
    match cond {
        Condition::Rule(rule) => evaluate_rule(cache, rule, ctx)
            .map(|(_, _, result)| result)
            .unwrap_or(false),
        Condition::All(items) => {
            if items.is_empty() {
                return false;
            }
            items.iter().all(|c| evaluate_condition(cache, c, ctx))
        }
        Condition::Any(items) => {
            if items.is_empty() {
                return false;
            }
            items.iter().any(|c| evaluate_condition(cache, c, ctx))
        }
    }
}

/// Same as [`evaluate_condition`] but keeps every rule's resolved operand
/// values and sub-result, for the signal's reasoning/conditions snapshot.
pub fn evaluate_condition_detailed(
    cache: &AstCache,
    cond: &Condition,
    ctx: &EvalContext,
) -> ConditionSnapshot {
    match cond {
        Condition::Rule(rule) => {
            let (left_value, right_value, result) = match evaluate_rule(cache, rule, ctx) {
                Ok((l, r, res)) => (Some(l), Some(r), res),
                Err(_) => (None, None, false),
            };
            ConditionSnapshot::Rule(RuleSnapshot {
                left: rule.left.clone(),
                op: rule.op,
                right: rule.right.clone(),
                left_value,
                right_value,
                result,
            })
        }
        Condition::All(items) => {
            let snaps: Vec<ConditionSnapshot> = items
                .iter()
                .map(|c| evaluate_condition_detailed(cache, c, ctx))
                .collect();
            let result = !snaps.is_empty() && snaps.iter().all(|s| s.result());
            ConditionSnapshot::All(snaps, result)
        }
        Condition::Any(items) => {
            let snaps: Vec<ConditionSnapshot> = items
                .iter()
                .map(|c| evaluate_condition_detailed(cache, c, ctx))
                .collect();
            let result = !snaps.is_empty() && snaps.iter().any(|s| s.result());
            ConditionSnapshot::Any(snaps, result)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ast_cache_reuses_parsed_expressions() {
        let cache = AstCache::new();
        let ctx = EvalContext::new(10.0);
        assert_eq!(evaluate(&cache, "_price * 2", &ctx).unwrap(), 20.0);
        assert_eq!(evaluate(&cache, "_price * 2", &ctx).unwrap(), 20.0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn empty_condition_lists_are_false() {
        let cache = AstCache::new();
        let ctx = EvalContext::new(1.0);
        assert!(!evaluate_condition(&cache, &Condition::All(vec![]), &ctx));
        assert!(!evaluate_condition(&cache, &Condition::Any(vec![]), &ctx));
    }

    #[test]
    fn all_requires_every_rule_true() {
        let cache = AstCache::new();
        let ctx = EvalContext::new(50.0);
        let cond = Condition::All(vec![
            Condition::Rule(Rule {
                left: "_price".into(),
                op: CmpOp::Gt,
                right: "10".into(),
            }),
            Condition::Rule(Rule {
                left: "_price".into(),
                op: CmpOp::Lt,
                right: "10".into(),
            }),
        ]);
        assert!(!evaluate_condition(&cache, &cond, &ctx));
    }

    #[test]
    fn any_requires_one_rule_true() {
        let cache = AstCache::new();
        let ctx = EvalContext::new(50.0);
        let cond = Condition::Any(vec![
            Condition::Rule(Rule {
                left: "_price".into(),
                op: CmpOp::Gt,
                right: "10".into(),
            }),
            Condition::Rule(Rule {
                left: "_price".into(),
                op: CmpOp::Lt,
                right: "10".into(),
            }),
        ]);
        assert!(evaluate_condition(&cache, &cond, &ctx));
    }

    #[test]
    fn unresolved_rule_is_false_not_an_error() {
        let cache = AstCache::new();
        let ctx = EvalContext::new(1.0);
        let cond = Condition::Rule(Rule {
            left: "ind.missing.value".into(),
            op: CmpOp::Gt,
            right: "0".into(),
        });
        assert!(!evaluate_condition(&cache, &cond, &ctx));
    }

    #[test]
    fn detailed_evaluation_preserves_operand_values() {
        let cache = AstCache::new();
        let ctx = EvalContext::new(50.0);
        let cond = Condition::Rule(Rule {
            left: "_price".into(),
            op: CmpOp::Gt,
            right: "10".into(),
        });
        let snap = evaluate_condition_detailed(&cache, &cond, &ctx);
        match snap {
            ConditionSnapshot::Rule(r) => {
                assert_eq!(r.left_value, Some(50.0));
                assert_eq!(r.right_value, Some(10.0));
                assert!(r.result);
            }
            _ => panic!("expected Rule snapshot"),
        }
    }
}
