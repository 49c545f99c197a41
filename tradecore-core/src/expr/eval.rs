//! AST evaluator: walks an `Expr` against an `EvalContext`, producing a scalar.

use super::ast::{BinOp, Expr};
use super::context::EvalContext;
use super::error::{ExprError, Result};

pub fn eval(expr: &Expr, ctx: &EvalContext) -> Result<f64> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Name(name) => ctx.resolve(name),
        Expr::Neg(inner) => Ok(-eval(inner, ctx)?),
        Expr::BinOp(op, left, right) => {
            let l = eval(left, ctx)?;
            let r = eval(right, ctx)?;
            apply_binop(*op, l, r)
        }
        Expr::Call(name, args) => eval_call(name, args, ctx),
        Expr::Iff(cmp, true_val, false_val) => {
            let l = eval(&cmp.left, ctx)?;
            let r = eval(&cmp.right, ctx)?;
            if cmp.op.apply(l, r) {
                eval(true_val, ctx)
            } else {
                eval(false_val, ctx)
            }
        }
    }
}

fn apply_binop(op: BinOp, l: f64, r: f64) -> Result<f64> {
    match op {
        BinOp::Add => Ok(l + r),
        BinOp::Sub => Ok(l - r),
        BinOp::Mul => Ok(l * r),
        BinOp::Div => {
            if r == 0.0 {
                Err(ExprError::DivisionByZero)
            } else {
                Ok(l / r)
            }
        }
        BinOp::Mod => {
            if r == 0.0 {
                Err(ExprError::DivisionByZero)
            } else {
                Ok(l % r)
            }
        }
        BinOp::Pow => Ok(l.powf(r)),
    }
}

fn eval_call(name: &str, args: &[Expr], ctx: &EvalContext) -> Result<f64> {
    let vals: Result<Vec<f64>> = args.iter().map(|a| eval(a, ctx)).collect();
    let vals = vals?;

    let arity = |expected: usize| -> Result<()> {
        if vals.len() != expected {
            Err(ExprError::WrongArity {
                func: name.to_string(),
                expected,
                got: vals.len(),
            })
        } else {
            Ok(())
        }
    };

    match name {
        "abs" => {
            arity(1)?;
            Ok(vals[0].abs())
        }
        "min" => {
            arity(2)?;
            Ok(vals[0].min(vals[1]))
        }
        "max" => {
            arity(2)?;
            Ok(vals[0].max(vals[1]))
        }
        "sqrt" => {
            arity(1)?;
            Ok(vals[0].max(0.0).sqrt())
        }
        "log" => {
            arity(1)?;
            if vals[0] <= 0.0 {
                Err(ExprError::DivisionByZero)
            } else {
                Ok(vals[0].ln())
            }
        }
        "round" => {
            if vals.len() != 1 && vals.len() != 2 {
                return Err(ExprError::WrongArity {
                    func: name.to_string(),
                    expected: 2,
                    got: vals.len(),
                });
            }
            let n = if vals.len() == 2 { vals[1] } else { 0.0 };
            let factor = 10f64.powi(n as i32);
            Ok((vals[0] * factor).round() / factor)
        }
        "clamp" => {
            arity(3)?;
            Ok(vals[0].clamp(vals[1].min(vals[2]), vals[1].max(vals[2])))
        }
        other => Err(ExprError::UnknownFunction(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse;
    use super::*;

    fn ctx() -> EvalContext {
        EvalContext::new(100.0)
    }

    #[test]
    fn evaluates_arithmetic() {
        let expr = parse("1 + 2 * 3 - 4 / 2").unwrap();
        assert_eq!(eval(&expr, &ctx()).unwrap(), 5.0);
    }

    #[test]
    fn division_by_zero_errors_not_panics() {
        let expr = parse("1 / 0").unwrap();
        assert_eq!(eval(&expr, &ctx()), Err(ExprError::DivisionByZero));
    }

    #[test]
    fn functions_round_clamp_abs() {
        assert_eq!(eval(&parse("abs(-3)").unwrap(), &ctx()).unwrap(), 3.0);
        assert_eq!(eval(&parse("round(3.14159, 2)").unwrap(), &ctx()).unwrap(), 3.14);
        assert_eq!(eval(&parse("clamp(15, 0, 10)").unwrap(), &ctx()).unwrap(), 10.0);
    }

    #[test]
    fn round_defaults_to_zero_decimals_with_one_arg() {
        assert_eq!(eval(&parse("round(3.7)").unwrap(), &ctx()).unwrap(), 4.0);
    }

    #[test]
    fn wrong_arity_errors() {
        let expr = parse("abs(1, 2)").unwrap();
        assert!(matches!(
            eval(&expr, &ctx()),
            Err(ExprError::WrongArity { .. })
        ));
    }

    #[test]
    fn unknown_function_errors() {
        let expr = parse("wibble(1)").unwrap();
        assert!(matches!(
            eval(&expr, &ctx()),
            Err(ExprError::UnknownFunction(_))
        ));
    }

    #[test]
    fn iff_picks_branch_by_comparison() {
        let expr = parse("iff(_price > 50, 1, -1)").unwrap();
        assert_eq!(eval(&expr, &ctx()).unwrap(), 1.0);

        let expr = parse("iff(_price < 50, 1, -1)").unwrap();
        assert_eq!(eval(&expr, &ctx()).unwrap(), -1.0);
    }
}
