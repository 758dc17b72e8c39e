//! `format!`-style templates and the macros cells can invoke.

use proc_macro2::Span;
use syn::parse::ParseStream;
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{Expr, Lit, Token};

use crate::error::{ErrorKind, KernelError, Location};
use crate::interp::{Eval, Flow, Interpreter, MAX_RANGE_LEN, expect_bool, fail, keyword_arg, repeat_value};
use crate::value::Value;

/// Body of a `vec!` invocation.
enum VecArgs {
    List(Vec<Expr>),
    Repeat(Expr, Expr),
}

impl Interpreter {
    pub(crate) fn eval_macro(&mut self, mac: &syn::Macro) -> Eval<Value> {
        let span = mac.span();
        let name = mac
            .path
            .segments
            .last()
            .map(|segment| segment.ident.to_string())
            .unwrap_or_default();

        match name.as_str() {
            "println" | "print" | "eprintln" | "eprint" => {
                let mut text = if mac.tokens.is_empty() {
                    String::new()
                } else {
                    let args = parse_args(mac)?;
                    self.format_exprs(&args, span)?
                };
                if name.ends_with("ln") {
                    text.push('\n');
                }
                if name.starts_with('e') {
                    self.stderr.push_str(&text);
                } else {
                    self.stdout.push_str(&text);
                }
                Ok(Value::Unit)
            }
            "format" => {
                let args = parse_args(mac)?;
                Ok(Value::Str(self.format_exprs(&args, span)?))
            }
            "vec" => self.eval_vec(mac),
            "panic" => {
                let message = if mac.tokens.is_empty() {
                    "explicit panic".to_string()
                } else {
                    let args = parse_args(mac)?;
                    self.format_exprs(&args, span)?
                };
                fail(ErrorKind::Panic, message, span)
            }
            "assert" => {
                let args = parse_args(mac)?;
                let Some((cond_expr, rest)) = args.split_first() else {
                    return fail(ErrorKind::Unsupported, "`assert!` requires a condition", span);
                };
                let cond = self.eval(cond_expr)?;
                if expect_bool(cond, cond_expr.span())? {
                    return Ok(Value::Unit);
                }
                let message = if rest.is_empty() {
                    "assertion failed".to_string()
                } else {
                    self.format_exprs(rest, span)?
                };
                fail(ErrorKind::Assertion, message, span)
            }
            "assert_eq" | "assert_ne" => {
                let args = parse_args(mac)?;
                let [left_expr, right_expr, rest @ ..] = args.as_slice() else {
                    return fail(
                        ErrorKind::Unsupported,
                        format!("`{}!` requires two operands", name),
                        span,
                    );
                };
                let left = self.eval(left_expr)?;
                let right = self.eval(right_expr)?;
                let want_equal = name == "assert_eq";
                if left.loose_eq(&right) == want_equal {
                    return Ok(Value::Unit);
                }
                let message = if rest.is_empty() {
                    format!(
                        "assertion `left {} right` failed\n  left: {}\n right: {}",
                        if want_equal { "==" } else { "!=" },
                        left.repr(),
                        right.repr()
                    )
                } else {
                    self.format_exprs(rest, span)?
                };
                fail(ErrorKind::Assertion, message, span)
            }
            _ => fail(ErrorKind::Unsupported, format!("unknown macro `{}!`", name), span),
        }
    }

    fn eval_vec(&mut self, mac: &syn::Macro) -> Eval<Value> {
        let parsed = mac
            .parse_body_with(|input: ParseStream| -> syn::Result<VecArgs> {
                if input.is_empty() {
                    return Ok(VecArgs::List(Vec::new()));
                }
                let first: Expr = input.parse()?;
                if input.peek(Token![;]) {
                    input.parse::<Token![;]>()?;
                    let count: Expr = input.parse()?;
                    return Ok(VecArgs::Repeat(first, count));
                }
                let mut items = vec![first];
                while !input.is_empty() {
                    input.parse::<Token![,]>()?;
                    if input.is_empty() {
                        break;
                    }
                    items.push(input.parse()?);
                }
                Ok(VecArgs::List(items))
            })
            .map_err(syntax_error)?;

        match parsed {
            VecArgs::List(exprs) => {
                let items = exprs
                    .iter()
                    .map(|e| self.eval(e))
                    .collect::<Eval<Vec<_>>>()?;
                Ok(Value::List(items))
            }
            VecArgs::Repeat(item, count) => {
                let item = self.eval(&item)?;
                let count_value = self.eval(&count)?;
                repeat_value(item, count_value, count.span())
            }
        }
    }

    /// Evaluate `"template", args..` into a string.
    fn format_exprs(&mut self, exprs: &[Expr], span: Span) -> Eval<String> {
        let Some((first, rest)) = exprs.split_first() else {
            return Ok(String::new());
        };
        let template = match first {
            Expr::Lit(syn::ExprLit { lit: Lit::Str(s), .. }) => s.value(),
            other => {
                return fail(ErrorKind::Unsupported, "format string must be a string literal", other.span());
            }
        };

        let mut positional = Vec::new();
        let mut named = Vec::new();
        for arg in rest {
            match keyword_arg(arg) {
                Some((key, value_expr)) => named.push((key, self.eval(value_expr)?)),
                None => positional.push(self.eval(arg)?),
            }
        }
        self.render_template(&template, &positional, &named, span)
    }

    /// Expand `{}`, `{0}`, `{name}` and `{:spec}` placeholders.
    ///
    /// Names not passed explicitly are captured from the namespace, like
    /// inline arguments in Rust's own `format!`.
    pub(crate) fn render_template(
        &self,
        template: &str,
        positional: &[Value],
        named: &[(String, Value)],
        span: Span,
    ) -> Eval<String> {
        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();
        let mut next_positional = 0;

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let mut placeholder = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => placeholder.push(ch),
                            None => return fail(ErrorKind::Value, "unterminated `{` in format string", span),
                        }
                    }
                    let (arg, spec) = placeholder.split_once(':').unwrap_or((placeholder.as_str(), ""));
                    let arg = arg.trim();
                    let value = if arg.is_empty() {
                        next_positional += 1;
                        positional.get(next_positional - 1).cloned()
                    } else if let Ok(index) = arg.parse::<usize>() {
                        positional.get(index).cloned()
                    } else {
                        named
                            .iter()
                            .find(|(key, _)| key == arg)
                            .map(|(_, v)| v.clone())
                            .or_else(|| self.lookup(arg).cloned())
                    };
                    let Some(value) = value else {
                        return fail(
                            ErrorKind::Value,
                            format!("missing format argument for `{{{}}}`", placeholder),
                            span,
                        );
                    };
                    out.push_str(&apply_spec(&value, spec, span)?);
                }
                '}' => return fail(ErrorKind::Value, "unmatched `}` in format string", span),
                other => out.push(other),
            }
        }
        Ok(out)
    }
}

fn parse_args(mac: &syn::Macro) -> Eval<Vec<Expr>> {
    mac.parse_body_with(Punctuated::<Expr, Token![,]>::parse_terminated)
        .map(|args| args.into_iter().collect())
        .map_err(syntax_error)
}

fn syntax_error(e: syn::Error) -> Flow {
    Flow::Error(KernelError::Syntax {
        message: e.to_string(),
        location: Location::from_span(e.span()),
    })
}

/// Apply a `[[fill]align][width][.precision][?]` spec.
fn apply_spec(value: &Value, spec: &str, span: Span) -> Eval<String> {
    if spec.is_empty() {
        return Ok(value.to_string());
    }
    let (body, debug) = match spec.strip_suffix('?') {
        Some(body) => (body, true),
        None => (spec, false),
    };

    let chars: Vec<char> = body.chars().collect();
    let mut pos = 0;
    let mut fill = ' ';
    let mut align = None;
    if chars.len() >= 2 && matches!(chars[1], '<' | '>' | '^') {
        fill = chars[0];
        align = Some(chars[1]);
        pos = 2;
    } else if let Some(&c) = chars.first()
        && matches!(c, '<' | '>' | '^')
    {
        align = Some(c);
        pos = 1;
    }

    let digits = |pos: &mut usize| -> Option<usize> {
        let start = *pos;
        while *pos < chars.len() && chars[*pos].is_ascii_digit() {
            *pos += 1;
        }
        chars[start..*pos].iter().collect::<String>().parse().ok()
    };
    let width = digits(&mut pos);
    let mut precision = None;
    if pos < chars.len() && chars[pos] == '.' {
        pos += 1;
        precision = digits(&mut pos);
        if precision.is_none() {
            return fail(ErrorKind::Value, format!("invalid precision in `{{:{}}}`", spec), span);
        }
    }
    if pos != chars.len() {
        return fail(ErrorKind::Value, format!("unsupported format spec `{{:{}}}`", spec), span);
    }
    if width.into_iter().chain(precision).any(|n| n as u64 > MAX_RANGE_LEN as u64) {
        return fail(ErrorKind::Value, format!("format spec `{{:{}}}` is too wide", spec), span);
    }

    let text = match (precision, value.as_f64()) {
        (Some(p), Some(f)) => format!("{:.*}", p, f),
        (Some(p), None) if matches!(value, Value::Str(_)) && !debug => value.to_string().chars().take(p).collect(),
        _ if debug => value.repr(),
        _ => value.to_string(),
    };

    let Some(width) = width else {
        return Ok(text);
    };
    let len = text.chars().count();
    if len >= width {
        return Ok(text);
    }
    let pad = width - len;
    let numeric = matches!(value, Value::Int(_) | Value::Float(_));
    let (left, right) = match align.unwrap_or(if numeric { '>' } else { '<' }) {
        '>' => (pad, 0),
        '^' => (pad / 2, pad - pad / 2),
        _ => (0, pad),
    };
    let fill_str = |n: usize| std::iter::repeat_n(fill, n).collect::<String>();
    Ok(format!("{}{}{}", fill_str(left), text, fill_str(right)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abort::AbortHandle;

    fn render(template: &str, positional: &[Value]) -> String {
        let interp = Interpreter::new(AbortHandle::new());
        match interp.render_template(template, positional, &[], Span::call_site()) {
            Ok(text) => text,
            Err(_) => panic!("template failed: {}", template),
        }
    }

    #[test]
    fn test_positional_and_indexed_placeholders() {
        let args = [Value::Int(1), Value::Str("two".into())];
        assert_eq!(render("{} and {}", &args), "1 and two");
        assert_eq!(render("{1} {0} {1}", &args), "two 1 two");
        assert_eq!(render("{{literal}}", &[]), "{literal}");
    }

    #[test]
    fn test_debug_and_precision() {
        assert_eq!(render("{:?}", &[Value::Str("hi".into())]), "\"hi\"");
        assert_eq!(render("{:.2}", &[Value::Float(3.14159)]), "3.14");
        assert_eq!(render("{:.1}", &[Value::Int(2)]), "2.0");
    }

    #[test]
    fn test_width_and_alignment() {
        assert_eq!(render("[{:5}]", &[Value::Int(42)]), "[   42]");
        assert_eq!(render("[{:<5}]", &[Value::Int(42)]), "[42   ]");
        assert_eq!(render("[{:*^6}]", &[Value::Str("ab".into())]), "[**ab**]");
    }

    #[test]
    fn test_missing_argument_is_an_error() {
        let interp = Interpreter::new(AbortHandle::new());
        let result = interp.render_template("{} {}", &[Value::Int(1)], &[], Span::call_site());
        assert!(result.is_err());
    }
}
