//! Resolution context: the dotted-name namespace an expression can read from.

use std::collections::HashMap;

use super::error::{ExprError, Result};

/// Everything an expression can resolve a name against when a playbook
/// transition or position-management rule is evaluated for one bar.
///
/// Root namespaces, matching the dotted-name grammar:
/// - `_price` — the price the evaluation is anchored to (usually bar close).
/// - `ind.<id>.<field>` — current-bar output of indicator `<id>`.
/// - `prev.<id>.<field>` — the same indicator's output one bar back.
/// - `var.<name>` — a playbook-instance variable.
/// - `trade.<field>` — a field of the currently open trade, if any.
/// - `risk.<field>` — a field of the active risk configuration.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    pub price: f64,
    pub indicators: HashMap<String, HashMap<String, f64>>,
    pub prev_indicators: HashMap<String, HashMap<String, f64>>,
    pub vars: HashMap<String, f64>,
    pub trade: Option<HashMap<String, f64>>,
    pub risk: HashMap<String, f64>,
}

impl EvalContext {
    pub fn new(price: f64) -> Self {
        Self {
            price,
            ..Default::default()
        }
    }

    pub fn with_var(mut self, name: impl Into<String>, value: f64) -> Self {
        self.vars.insert(name.into(), value);
        self
    }

    pub fn set_indicator(&mut self, id: impl Into<String>, field: impl Into<String>, value: f64) {
        self.indicators
            .entry(id.into())
            .or_default()
            .insert(field.into(), value);
    }

    pub fn set_prev_indicator(
        &mut self,
        id: impl Into<String>,
        field: impl Into<String>,
        value: f64,
    ) {
        self.prev_indicators
            .entry(id.into())
            .or_default()
            .insert(field.into(), value);
    }

    /// Resolve a dotted name to a scalar. Never panics — an absent indicator,
    /// unknown variable, missing trade field, or malformed root all come back
    /// as `ExprError::UnresolvedName`, which callers treat as a false rule.
    pub fn resolve(&self, name: &str) -> Result<f64> {
        if name == "_price" {
            return Ok(self.price);
        }

        if let Some(rest) = name.strip_prefix("ind.") {
            let (id, field) = split_dotted(rest).ok_or_else(|| ExprError::UnresolvedName(name.to_string()))?;
            return self
                .indicators
                .get(id)
                .and_then(|fields| fields.get(field))
                .copied()
                .ok_or_else(|| ExprError::UnresolvedName(name.to_string()));
        }

        if let Some(rest) = name.strip_prefix("prev.") {
            let (id, field) = split_dotted(rest).ok_or_else(|| ExprError::UnresolvedName(name.to_string()))?;
            return self
                .prev_indicators
                .get(id)
                .and_then(|fields| fields.get(field))
                .copied()
                .ok_or_else(|| ExprError::UnresolvedName(name.to_string()));
        }

        if let Some(rest) = name.strip_prefix("var.") {
            return self
                .vars
                .get(rest)
                .copied()
                .ok_or_else(|| ExprError::UnresolvedName(name.to_string()));
        }

        if let Some(rest) = name.strip_prefix("trade.") {
            return self
                .trade
                .as_ref()
                .and_then(|t| t.get(rest))
                .copied()
                .ok_or_else(|| ExprError::UnresolvedName(name.to_string()));
        }

        if let Some(rest) = name.strip_prefix("risk.") {
            return self
                .risk
                .get(rest)
                .copied()
                .ok_or_else(|| ExprError::UnresolvedName(name.to_string()));
        }

        Err(ExprError::UnresolvedName(name.to_string()))
    }
}

/// Split `"<id>.<field>"` on the last dot — indicator ids never contain dots
/// themselves, but splitting from the right keeps this robust either way.
fn split_dotted(rest: &str) -> Option<(&str, &str)> {
    let idx = rest.rfind('.')?;
    Some((&rest[..idx], &rest[idx + 1..]))
}
