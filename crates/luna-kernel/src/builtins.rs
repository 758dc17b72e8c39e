//! Builtin functions and methods.

use std::cmp::Ordering;

use proc_macro2::Span;

use crate::error::ErrorKind;
use crate::interp::{Eval, Interpreter, MAX_RANGE_LEN, Op, apply_op, checked_index, expect_int, fail};
use crate::plot::{Series, SeriesKind};
use crate::value::Value;

/// Names resolved as builtins when not shadowed by a binding.
const BUILTINS: &[&str] = &[
    "print", "eprint", "len", "str", "int", "float", "range", "sum", "min", "max", "abs", "round",
    "type_of", "figure", "plot", "scatter", "bar",
];

const MUTATING_METHODS: &[&str] = &[
    "push", "push_str", "pop", "insert", "remove", "clear", "sort", "reverse", "extend",
];

impl Interpreter {
    /// Call a builtin; `None` if `name` is not one.
    pub(crate) fn call_builtin(
        &mut self,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
        span: Span,
    ) -> Option<Eval<Value>> {
        if !BUILTINS.contains(&name) {
            return None;
        }
        if !kwargs.is_empty() && name != "print" && name != "eprint" {
            return Some(fail(
                ErrorKind::Type,
                format!("`{}` takes no keyword arguments", name),
                span,
            ));
        }

        let result = match name {
            "print" => self.builtin_print(false, args, kwargs, span),
            "eprint" => self.builtin_print(true, args, kwargs, span),
            "len" => one_arg(name, args, span).and_then(|v| len_of(&v, span)),
            "str" => one_arg(name, args, span).map(|v| Value::Str(v.to_string())),
            "int" => one_arg(name, args, span).and_then(|v| to_int(v, span)),
            "float" => one_arg(name, args, span).and_then(|v| to_float(v, span)),
            "range" => builtin_range(args, span),
            "sum" => one_arg(name, args, span).and_then(|v| sum_of(v, span)),
            "min" => extremum(args, Ordering::Less, span),
            "max" => extremum(args, Ordering::Greater, span),
            "abs" => one_arg(name, args, span).and_then(|v| abs_of(v, span)),
            "round" => builtin_round(args, span),
            "type_of" => one_arg(name, args, span).map(|v| Value::Str(v.type_name().to_string())),
            "figure" => {
                self.figures.new_figure();
                Ok(Value::Unit)
            }
            "plot" => self.add_series(SeriesKind::Line, args, span),
            "scatter" => self.add_series(SeriesKind::Scatter, args, span),
            "bar" => self.add_series(SeriesKind::Bar, args, span),
            _ => return None,
        };
        Some(result)
    }

    /// `print(a, b, sep=" ", end="\n")`.
    fn builtin_print(
        &mut self,
        to_stderr: bool,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
        span: Span,
    ) -> Eval<Value> {
        let mut sep = " ".to_string();
        let mut end = "\n".to_string();
        for (key, value) in kwargs {
            match key.as_str() {
                "sep" => sep = value.to_string(),
                "end" => end = value.to_string(),
                other => {
                    return fail(
                        ErrorKind::Type,
                        format!("`print` got an unexpected keyword argument `{}`", other),
                        span,
                    );
                }
            }
        }

        let mut text = args
            .iter()
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join(&sep);
        text.push_str(&end);

        if to_stderr {
            self.stderr.push_str(&text);
        } else {
            self.stdout.push_str(&text);
        }
        Ok(Value::Unit)
    }

    /// `plot(ys)` or `plot(xs, ys)`; likewise for `scatter` and `bar`.
    fn add_series(&mut self, kind: SeriesKind, args: Vec<Value>, span: Span) -> Eval<Value> {
        let (xs, ys) = match args.as_slice() {
            [ys] => {
                let ys = numbers(ys, span)?;
                ((0..ys.len()).map(|i| i as f64).collect(), ys)
            }
            [xs, ys] => (numbers(xs, span)?, numbers(ys, span)?),
            _ => {
                return fail(
                    ErrorKind::Type,
                    format!("expected 1 or 2 arguments, got {}", args.len()),
                    span,
                );
            }
        };
        if xs.len() != ys.len() {
            return fail(
                ErrorKind::Value,
                format!("x and y must have the same length, got {} and {}", xs.len(), ys.len()),
                span,
            );
        }
        self.figures.add_series(Series { kind, xs, ys });
        Ok(Value::Unit)
    }
}

fn one_arg(name: &str, args: Vec<Value>, span: Span) -> Eval<Value> {
    let count = args.len();
    match <[Value; 1]>::try_from(args) {
        Ok([value]) => Ok(value),
        Err(_) => fail(
            ErrorKind::Type,
            format!("`{}` takes exactly one argument ({} given)", name, count),
            span,
        ),
    }
}

fn numbers(value: &Value, span: Span) -> Eval<Vec<f64>> {
    let Value::List(items) = value else {
        return fail(
            ErrorKind::Type,
            format!("expected a list of numbers, found {}", value.type_name()),
            span,
        );
    };
    items
        .iter()
        .map(|item| match item.as_f64() {
            Some(f) => Ok(f),
            None => fail(
                ErrorKind::Type,
                format!("expected a number, found {}", item.type_name()),
                span,
            ),
        })
        .collect()
}

fn len_of(value: &Value, span: Span) -> Eval<Value> {
    match value {
        Value::List(items) => Ok(Value::Int(items.len() as i64)),
        Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
        other => fail(ErrorKind::Type, format!("{} has no length", other.type_name()), span),
    }
}

fn to_int(value: Value, span: Span) -> Eval<Value> {
    match value {
        Value::Int(i) => Ok(Value::Int(i)),
        Value::Bool(b) => Ok(Value::Int(b as i64)),
        Value::Float(f) if f.is_finite() && f.trunc().abs() < 9.2e18 => Ok(Value::Int(f.trunc() as i64)),
        Value::Float(f) => fail(ErrorKind::Overflow, format!("cannot convert {} to int", f), span),
        Value::Str(s) => match s.trim().parse::<i64>() {
            Ok(i) => Ok(Value::Int(i)),
            Err(_) => fail(ErrorKind::Value, format!("invalid literal for int(): {:?}", s), span),
        },
        other => fail(ErrorKind::Type, format!("cannot convert {} to int", other.type_name()), span),
    }
}

fn to_float(value: Value, span: Span) -> Eval<Value> {
    match value {
        Value::Int(i) => Ok(Value::Float(i as f64)),
        Value::Float(f) => Ok(Value::Float(f)),
        Value::Str(s) => match s.trim().parse::<f64>() {
            Ok(f) => Ok(Value::Float(f)),
            Err(_) => fail(ErrorKind::Value, format!("could not convert string to float: {:?}", s), span),
        },
        other => fail(ErrorKind::Type, format!("cannot convert {} to float", other.type_name()), span),
    }
}

fn builtin_range(args: Vec<Value>, span: Span) -> Eval<Value> {
    let ints = args
        .into_iter()
        .map(|v| expect_int(v, span))
        .collect::<Eval<Vec<_>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => {
            return fail(
                ErrorKind::Type,
                format!("`range` expected 1 to 3 arguments, got {}", ints.len()),
                span,
            );
        }
    };
    if step == 0 {
        return fail(ErrorKind::Value, "`range` step must not be zero", span);
    }

    let span_len = if step > 0 {
        (stop as i128 - start as i128 + step as i128 - 1) / step as i128
    } else {
        (start as i128 - stop as i128 - step as i128 - 1) / -(step as i128)
    };
    if span_len > MAX_RANGE_LEN as i128 {
        return fail(ErrorKind::Value, "range is too large to materialise", span);
    }

    let mut items = Vec::with_capacity(span_len.max(0) as usize);
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        items.push(Value::Int(current));
        match current.checked_add(step) {
            Some(next) => current = next,
            None => break,
        }
    }
    Ok(Value::List(items))
}

fn sum_of(value: Value, span: Span) -> Eval<Value> {
    let Value::List(items) = value else {
        return fail(ErrorKind::Type, format!("cannot sum {}", value.type_name()), span);
    };
    items
        .into_iter()
        .try_fold(Value::Int(0), |acc, item| apply_op(Op::Add, acc, item, span))
}

/// `min`/`max` over a single list argument or over the arguments themselves.
fn extremum(args: Vec<Value>, keep: Ordering, span: Span) -> Eval<Value> {
    let items = match <[Value; 1]>::try_from(args) {
        Ok([Value::List(items)]) => items,
        Ok([other]) => vec![other],
        Err(args) => args,
    };

    let mut iter = items.into_iter();
    let Some(mut best) = iter.next() else {
        return fail(ErrorKind::Value, "arg is an empty sequence", span);
    };
    let op = if keep == Ordering::Less { Op::Lt } else { Op::Gt };
    for item in iter {
        if let Value::Bool(true) = apply_op(op, item.clone(), best.clone(), span)? {
            best = item;
        }
    }
    Ok(best)
}

fn abs_of(value: Value, span: Span) -> Eval<Value> {
    match value {
        Value::Int(i) => match i.checked_abs() {
            Some(a) => Ok(Value::Int(a)),
            None => fail(ErrorKind::Overflow, "integer overflow in abs", span),
        },
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => fail(ErrorKind::Type, format!("bad operand type for abs(): {}", other.type_name()), span),
    }
}

fn builtin_round(args: Vec<Value>, span: Span) -> Eval<Value> {
    match args.as_slice() {
        [Value::Int(i)] => Ok(Value::Int(*i)),
        [Value::Float(f)] => to_int(Value::Float(f.round()), span),
        [value, Value::Int(digits)] => match value.as_f64() {
            Some(f) => {
                let scale = 10f64.powi((*digits).clamp(-300, 300) as i32);
                Ok(Value::Float((f * scale).round() / scale))
            }
            None => fail(ErrorKind::Type, format!("cannot round {}", value.type_name()), span),
        },
        _ => fail(ErrorKind::Type, "`round` expects a number and optional digits", span),
    }
}

// =============================================================================
// Methods
// =============================================================================

pub(crate) fn is_mutating_method(method: &str) -> bool {
    MUTATING_METHODS.contains(&method)
}

/// Methods that modify the receiver in place.
pub(crate) fn call_mutating_method(
    receiver: &mut Value,
    method: &str,
    args: Vec<Value>,
    span: Span,
) -> Eval<Value> {
    let type_name = receiver.type_name();
    match (receiver, method, args.as_slice()) {
        (Value::List(items), "push", [item]) => {
            items.push(item.clone());
            Ok(Value::Unit)
        }
        (Value::Str(s), "push" | "push_str", [Value::Str(tail)]) => {
            s.push_str(tail);
            Ok(Value::Unit)
        }
        (Value::List(items), "pop", []) => match items.pop() {
            Some(item) => Ok(item),
            None => fail(ErrorKind::Index, "pop from empty list", span),
        },
        (Value::List(items), "insert", [Value::Int(index), item]) => {
            match usize::try_from(*index) {
                Ok(i) if i <= items.len() => {
                    items.insert(i, item.clone());
                    Ok(Value::Unit)
                }
                _ => fail(
                    ErrorKind::Index,
                    format!("insertion index {} out of bounds for length {}", index, items.len()),
                    span,
                ),
            }
        }
        (Value::List(items), "remove", [Value::Int(index)]) => {
            let i = checked_index(*index, items.len(), span)?;
            Ok(items.remove(i))
        }
        (Value::List(items), "clear", []) => {
            items.clear();
            Ok(Value::Unit)
        }
        (Value::Str(s), "clear", []) => {
            s.clear();
            Ok(Value::Unit)
        }
        (Value::List(items), "reverse", []) => {
            items.reverse();
            Ok(Value::Unit)
        }
        (Value::List(items), "extend", [Value::List(more)]) => {
            items.extend(more.iter().cloned());
            Ok(Value::Unit)
        }
        (Value::List(items), "sort", []) => {
            if items.iter().all(|v| v.as_f64().is_some()) {
                items.sort_by(|a, b| {
                    let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
                });
                Ok(Value::Unit)
            } else if items.iter().all(|v| matches!(v, Value::Str(_))) {
                items.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
                Ok(Value::Unit)
            } else {
                fail(ErrorKind::Type, "cannot sort a list of mixed types", span)
            }
        }
        (_, method, args) => fail(
            ErrorKind::Type,
            format!(
                "no method `{}` taking {} argument(s) on {}",
                method,
                args.len(),
                type_name
            ),
            span,
        ),
    }
}

/// Methods that leave the receiver untouched.
pub(crate) fn call_method(receiver: &Value, method: &str, args: Vec<Value>, span: Span) -> Eval<Value> {
    match (receiver, method, args.as_slice()) {
        (_, "to_string", []) => Ok(Value::Str(receiver.to_string())),
        (_, "clone" | "to_owned" | "iter" | "into_iter" | "to_vec" | "collect", []) => Ok(receiver.clone()),
        (Value::List(_) | Value::Str(_), "len", []) => len_of(receiver, span),
        (Value::List(items), "is_empty", []) => Ok(Value::Bool(items.is_empty())),
        (Value::Str(s), "is_empty", []) => Ok(Value::Bool(s.is_empty())),
        (Value::List(items), "contains", [needle]) => Ok(Value::Bool(items.iter().any(|v| v.loose_eq(needle)))),
        (Value::List(items), "first", []) => items
            .first()
            .cloned()
            .map_or_else(|| fail(ErrorKind::Index, "first of empty list", span), Ok),
        (Value::List(items), "last", []) => items
            .last()
            .cloned()
            .map_or_else(|| fail(ErrorKind::Index, "last of empty list", span), Ok),
        (Value::List(items), "join", [Value::Str(sep)]) => Ok(Value::Str(
            items.iter().map(Value::to_string).collect::<Vec<_>>().join(sep),
        )),
        (Value::List(_), "sum", []) => sum_of(receiver.clone(), span),
        (Value::List(items), "max", []) => extremum(items.clone(), Ordering::Greater, span),
        (Value::List(items), "min", []) => extremum(items.clone(), Ordering::Less, span),

        (Value::Str(s), "contains", [Value::Str(needle)]) => Ok(Value::Bool(s.contains(needle.as_str()))),
        (Value::Str(s), "starts_with", [Value::Str(prefix)]) => Ok(Value::Bool(s.starts_with(prefix.as_str()))),
        (Value::Str(s), "ends_with", [Value::Str(suffix)]) => Ok(Value::Bool(s.ends_with(suffix.as_str()))),
        (Value::Str(s), "to_uppercase", []) => Ok(Value::Str(s.to_uppercase())),
        (Value::Str(s), "to_lowercase", []) => Ok(Value::Str(s.to_lowercase())),
        (Value::Str(s), "trim", []) => Ok(Value::Str(s.trim().to_string())),
        (Value::Str(s), "replace", [Value::Str(from), Value::Str(to)]) => {
            Ok(Value::Str(s.replace(from.as_str(), to)))
        }
        (Value::Str(s), "split", [Value::Str(sep)]) => Ok(Value::List(
            s.split(sep.as_str()).map(|p| Value::Str(p.to_string())).collect(),
        )),
        (Value::Str(s), "split_whitespace", []) => Ok(Value::List(
            s.split_whitespace().map(|p| Value::Str(p.to_string())).collect(),
        )),
        (Value::Str(s), "lines", []) => Ok(Value::List(s.lines().map(|p| Value::Str(p.to_string())).collect())),
        (Value::Str(s), "chars", []) => Ok(Value::List(s.chars().map(|c| Value::Str(c.to_string())).collect())),

        (Value::Int(i), "abs", []) => abs_of(Value::Int(*i), span),
        (Value::Int(base), "pow", [Value::Int(exp)]) => match u32::try_from(*exp).ok().and_then(|e| base.checked_pow(e)) {
            Some(v) => Ok(Value::Int(v)),
            None => fail(ErrorKind::Overflow, format!("integer overflow in {}.pow({})", base, exp), span),
        },
        (Value::Int(a), "min", [Value::Int(b)]) => Ok(Value::Int(*a.min(b))),
        (Value::Int(a), "max", [Value::Int(b)]) => Ok(Value::Int(*a.max(b))),
        (Value::Int(_) | Value::Float(_), _, _) => float_method(receiver, method, &args, span),

        (_, method, args) => fail(
            ErrorKind::Type,
            format!(
                "no method `{}` taking {} argument(s) on {}",
                method,
                args.len(),
                receiver.type_name()
            ),
            span,
        ),
    }
}

fn float_method(receiver: &Value, method: &str, args: &[Value], span: Span) -> Eval<Value> {
    let x = receiver.as_f64().unwrap_or(f64::NAN);
    let arg = |i: usize| args.get(i).and_then(Value::as_f64);

    let result = match (method, args.len()) {
        ("abs", 0) => x.abs(),
        ("sqrt", 0) => x.sqrt(),
        ("floor", 0) => x.floor(),
        ("ceil", 0) => x.ceil(),
        ("round", 0) => x.round(),
        ("trunc", 0) => x.trunc(),
        ("sin", 0) => x.sin(),
        ("cos", 0) => x.cos(),
        ("tan", 0) => x.tan(),
        ("exp", 0) => x.exp(),
        ("ln", 0) => x.ln(),
        ("log10", 0) => x.log10(),
        ("powi", 1) | ("powf", 1) | ("min", 1) | ("max", 1) => {
            let Some(y) = arg(0) else {
                return fail(ErrorKind::Type, format!("`{}` expects a numeric argument", method), span);
            };
            match method {
                "powi" | "powf" => x.powf(y),
                "min" => x.min(y),
                _ => x.max(y),
            }
        }
        _ => {
            return fail(
                ErrorKind::Type,
                format!(
                    "no method `{}` taking {} argument(s) on {}",
                    method,
                    args.len(),
                    receiver.type_name()
                ),
                span,
            );
        }
    };
    Ok(Value::Float(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Value {
        Value::List(values.iter().copied().map(Value::Int).collect())
    }

    fn ok(result: Eval<Value>) -> Value {
        match result {
            Ok(value) => value,
            Err(_) => panic!("expected success"),
        }
    }

    #[test]
    fn test_range_variants() {
        let span = Span::call_site();
        assert!(ok(builtin_range(vec![Value::Int(3)], span)).loose_eq(&ints(&[0, 1, 2])));
        assert!(ok(builtin_range(vec![Value::Int(2), Value::Int(5)], span)).loose_eq(&ints(&[2, 3, 4])));
        assert!(
            ok(builtin_range(vec![Value::Int(5), Value::Int(0), Value::Int(-2)], span))
                .loose_eq(&ints(&[5, 3, 1]))
        );
        assert!(builtin_range(vec![Value::Int(0), Value::Int(1), Value::Int(0)], span).is_err());
    }

    #[test]
    fn test_sum_promotes_to_float() {
        let span = Span::call_site();
        assert!(ok(sum_of(ints(&[1, 2, 3]), span)).loose_eq(&Value::Int(6)));
        let mixed = Value::List(vec![Value::Int(1), Value::Float(0.5)]);
        assert!(matches!(ok(sum_of(mixed, span)), Value::Float(f) if f == 1.5));
    }

    #[test]
    fn test_extremum_over_list_and_args() {
        let span = Span::call_site();
        assert!(ok(extremum(vec![ints(&[4, 9, 2])], Ordering::Greater, span)).loose_eq(&Value::Int(9)));
        assert!(ok(extremum(vec![Value::Int(4), Value::Float(1.5)], Ordering::Less, span)).loose_eq(&Value::Float(1.5)));
        assert!(extremum(vec![Value::List(Vec::new())], Ordering::Less, span).is_err());
    }

    #[test]
    fn test_mutating_methods() {
        let span = Span::call_site();
        let mut list = ints(&[3, 1, 2]);
        ok(call_mutating_method(&mut list, "push", vec![Value::Int(0)], span));
        ok(call_mutating_method(&mut list, "sort", Vec::new(), span));
        assert!(list.loose_eq(&ints(&[0, 1, 2, 3])));

        let popped = ok(call_mutating_method(&mut list, "pop", Vec::new(), span));
        assert!(popped.loose_eq(&Value::Int(3)));
        assert!(call_mutating_method(&mut Value::List(Vec::new()), "pop", Vec::new(), span).is_err());
    }

    #[test]
    fn test_string_methods() {
        let span = Span::call_site();
        let s = Value::Str(" a,b ".into());
        let parts = ok(call_method(&ok(call_method(&s, "trim", Vec::new(), span)), "split", vec![Value::Str(",".into())], span));
        assert_eq!(parts.to_string(), "[\"a\", \"b\"]");
        assert!(call_method(&s, "frobnicate", Vec::new(), span).is_err());
    }
}
