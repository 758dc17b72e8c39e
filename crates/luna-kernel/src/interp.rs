//! Tree-walking evaluator over `syn` statements.
//!
//! Cell source is parsed as the body of a Rust block, so cells read like
//! Rust statements: `let x = 1;`, `x = x + 1`, `fn f(a: i64) -> i64 { a }`.
//! Plain assignment to an unbound name at the top level creates a global, which
//! keeps notebook cells terse (`x = 1` in one cell, `print(x)` in the next).

use std::rc::Rc;

use proc_macro2::Span;
use rustc_hash::FxHashMap;
use syn::parse::Parser;
use syn::spanned::Spanned;
use syn::{BinOp, Expr, Item, Lit, Pat, RangeLimits, Stmt, UnOp};

use crate::abort::AbortHandle;
use crate::error::{ErrorKind, KernelError, Location};
use crate::plot::FigureBuffer;
use crate::value::{Function, Value};

/// Maximum nesting of user function calls.
pub(crate) const MAX_CALL_DEPTH: usize = 200;

/// Largest list a range may materialise into. Also bounds repetition results
/// and format widths.
pub(crate) const MAX_RANGE_LEN: i64 = 10_000_000;

/// Non-local control flow, threaded through `Err` so `?` unwinds it.
pub(crate) enum Flow {
    Break(Value),
    Continue,
    Return(Value),
    Error(KernelError),
}

impl From<KernelError> for Flow {
    fn from(e: KernelError) -> Self {
        Flow::Error(e)
    }
}

pub(crate) type Eval<T> = std::result::Result<T, Flow>;

pub(crate) fn fail<T>(kind: ErrorKind, message: impl Into<String>, span: Span) -> Eval<T> {
    Err(Flow::Error(KernelError::runtime(kind, message, span)))
}

/// Interpreter state: the persistent namespace plus per-run buffers.
pub struct Interpreter {
    pub(crate) globals: FxHashMap<String, Value>,
    pub(crate) scopes: Vec<FxHashMap<String, Value>>,
    pub(crate) depth: usize,
    pub(crate) stdout: String,
    pub(crate) stderr: String,
    pub(crate) figures: FigureBuffer,
    abort: AbortHandle,
}

impl Interpreter {
    pub fn new(abort: AbortHandle) -> Self {
        Self {
            globals: FxHashMap::default(),
            scopes: Vec::new(),
            depth: 0,
            stdout: String::new(),
            stderr: String::new(),
            figures: FigureBuffer::new(),
            abort,
        }
    }

    /// Parse and execute `code` against the persistent namespace.
    pub fn run(&mut self, code: &str) -> Result<(), KernelError> {
        let stmts = Self::parse(code)?;
        self.scopes.clear();
        self.depth = 0;

        match self.exec_stmts(&stmts) {
            Ok(_) | Err(Flow::Return(_)) => Ok(()),
            Err(Flow::Break(_)) => Err(stray_control("break")),
            Err(Flow::Continue) => Err(stray_control("continue")),
            Err(Flow::Error(e)) => Err(e),
        }
    }

    fn parse(code: &str) -> Result<Vec<Stmt>, KernelError> {
        syn::Block::parse_within
            .parse_str(code)
            .map_err(|e| KernelError::Syntax {
                message: e.to_string(),
                location: Location::from_span(e.span()),
            })
    }

    pub(crate) fn check_abort(&self) -> Eval<()> {
        if self.abort.is_aborted() {
            Err(Flow::Error(KernelError::Interrupted))
        } else {
            Ok(())
        }
    }

    // =========================================================================
    // Namespace
    // =========================================================================

    pub(crate) fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .or_else(|| self.globals.get(name))
    }

    fn lookup_mut(&mut self, name: &str) -> Option<&mut Value> {
        if let Some(scope) = self.scopes.iter_mut().rev().find(|s| s.contains_key(name)) {
            return scope.get_mut(name);
        }
        self.globals.get_mut(name)
    }

    /// `let` binding: innermost scope, or the globals at top level.
    fn define(&mut self, name: String, value: Value) {
        match self.scopes.last_mut() {
            Some(scope) => {
                scope.insert(name, value);
            }
            None => {
                self.globals.insert(name, value);
            }
        }
    }

    /// Plain assignment: rebinds an existing name, otherwise creates one.
    fn assign_name(&mut self, name: &str, value: Value) {
        if let Some(slot) = self.lookup_mut(name) {
            *slot = value;
        } else if self.depth == 0 {
            self.globals.insert(name.to_string(), value);
        } else {
            self.define(name.to_string(), value);
        }
    }

    // =========================================================================
    // Statements
    // =========================================================================

    pub(crate) fn exec_stmts(&mut self, stmts: &[Stmt]) -> Eval<Value> {
        let mut last = Value::Unit;
        for (i, stmt) in stmts.iter().enumerate() {
            self.check_abort()?;
            let is_tail = i + 1 == stmts.len();
            last = Value::Unit;
            match stmt {
                Stmt::Local(local) => self.exec_local(local)?,
                Stmt::Item(item) => self.exec_item(item)?,
                Stmt::Expr(expr, semi) => {
                    let value = self.eval(expr)?;
                    if is_tail && semi.is_none() {
                        last = value;
                    }
                }
                Stmt::Macro(stmt) => {
                    let value = self.eval_macro(&stmt.mac)?;
                    if is_tail && stmt.semi_token.is_none() {
                        last = value;
                    }
                }
            }
        }
        Ok(last)
    }

    fn exec_block(&mut self, block: &syn::Block) -> Eval<Value> {
        self.scopes.push(FxHashMap::default());
        let result = self.exec_stmts(&block.stmts);
        self.scopes.pop();
        result
    }

    fn exec_local(&mut self, local: &syn::Local) -> Eval<()> {
        let name = binding_name(&local.pat)?;
        let value = match &local.init {
            Some(init) if init.diverge.is_some() => {
                return fail(ErrorKind::Unsupported, "`let ... else` is not supported", local.span());
            }
            Some(init) => self.eval(&init.expr)?,
            None => Value::Unit,
        };
        if let Some(name) = name {
            self.define(name, value);
        }
        Ok(())
    }

    fn exec_item(&mut self, item: &Item) -> Eval<()> {
        match item {
            Item::Fn(func) => {
                let mut params = Vec::with_capacity(func.sig.inputs.len());
                for input in &func.sig.inputs {
                    match input {
                        syn::FnArg::Typed(pat_type) => {
                            params.push(binding_name(&pat_type.pat)?.unwrap_or_else(|| "_".to_string()));
                        }
                        syn::FnArg::Receiver(receiver) => {
                            return fail(ErrorKind::Unsupported, "`self` parameters are not supported", receiver.span());
                        }
                    }
                }
                let name = func.sig.ident.to_string();
                tracing::trace!("Defining fn {}", name);
                let function = Function {
                    name: name.clone(),
                    params,
                    body: (*func.block).clone(),
                };
                self.define(name, Value::Function(Rc::new(function)));
                Ok(())
            }
            Item::Const(item) => {
                let value = self.eval(&item.expr)?;
                self.define(item.ident.to_string(), value);
                Ok(())
            }
            Item::Static(item) => {
                let value = self.eval(&item.expr)?;
                self.define(item.ident.to_string(), value);
                Ok(())
            }
            other => fail(ErrorKind::Unsupported, "only `fn`, `const` and `static` items are supported", other.span()),
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    pub(crate) fn eval(&mut self, expr: &Expr) -> Eval<Value> {
        match expr {
            Expr::Lit(lit) => eval_lit(&lit.lit),
            Expr::Path(path) => {
                let name = path_ident(path)?;
                match self.lookup(&name) {
                    Some(value) => Ok(value.clone()),
                    None => undefined(&name, path.span()),
                }
            }
            Expr::Paren(inner) => self.eval(&inner.expr),
            Expr::Group(inner) => self.eval(&inner.expr),
            Expr::Reference(inner) => self.eval(&inner.expr),
            Expr::Tuple(tuple) if tuple.elems.is_empty() => Ok(Value::Unit),
            Expr::Array(array) => {
                let items = array
                    .elems
                    .iter()
                    .map(|e| self.eval(e))
                    .collect::<Eval<Vec<_>>>()?;
                Ok(Value::List(items))
            }
            Expr::Repeat(repeat) => {
                let item = self.eval(&repeat.expr)?;
                let count = self.eval(&repeat.len)?;
                repeat_value(item, count, repeat.span())
            }
            Expr::Unary(unary) => {
                let value = self.eval(&unary.expr)?;
                eval_unary(&unary.op, value, unary.span())
            }
            Expr::Binary(binary) => self.eval_binary(binary),
            Expr::Assign(assign) => {
                let value = self.eval(&assign.right)?;
                self.assign_to(&assign.left, value)?;
                Ok(Value::Unit)
            }
            Expr::Block(block) => {
                reject_label(block.label.is_some(), block.span())?;
                self.exec_block(&block.block)
            }
            Expr::If(expr_if) => {
                let cond = self.eval(&expr_if.cond)?;
                if expect_bool(cond, expr_if.cond.span())? {
                    self.exec_block(&expr_if.then_branch)
                } else if let Some((_, else_branch)) = &expr_if.else_branch {
                    self.eval(else_branch)
                } else {
                    Ok(Value::Unit)
                }
            }
            Expr::While(expr_while) => {
                reject_label(expr_while.label.is_some(), expr_while.span())?;
                loop {
                    self.check_abort()?;
                    let cond = self.eval(&expr_while.cond)?;
                    if !expect_bool(cond, expr_while.cond.span())? {
                        break;
                    }
                    if self.loop_body(&expr_while.body, None)?.is_some() {
                        break;
                    }
                }
                Ok(Value::Unit)
            }
            Expr::Loop(expr_loop) => {
                reject_label(expr_loop.label.is_some(), expr_loop.span())?;
                loop {
                    if let Some(value) = self.loop_body(&expr_loop.body, None)? {
                        return Ok(value);
                    }
                }
            }
            Expr::ForLoop(for_loop) => self.eval_for(for_loop),
            Expr::Break(expr_break) => {
                reject_label(expr_break.label.is_some(), expr_break.span())?;
                let value = match &expr_break.expr {
                    Some(e) => self.eval(e)?,
                    None => Value::Unit,
                };
                Err(Flow::Break(value))
            }
            Expr::Continue(expr_continue) => {
                reject_label(expr_continue.label.is_some(), expr_continue.span())?;
                Err(Flow::Continue)
            }
            Expr::Return(expr_return) => {
                let value = match &expr_return.expr {
                    Some(e) => self.eval(e)?,
                    None => Value::Unit,
                };
                Err(Flow::Return(value))
            }
            Expr::Call(call) => self.eval_call(call),
            Expr::MethodCall(call) => self.eval_method_call(call),
            Expr::Macro(mac) => self.eval_macro(&mac.mac),
            Expr::Index(index) => {
                let base = self.eval(&index.expr)?;
                self.eval_index(base, &index.index)
            }
            Expr::Range(range) => {
                let (start, end) = self.range_bounds(range)?;
                if end.saturating_sub(start) > MAX_RANGE_LEN {
                    return fail(ErrorKind::Value, "range is too large to materialise", range.span());
                }
                Ok(Value::List((start..end).map(Value::Int).collect()))
            }
            Expr::Cast(cast) => {
                let value = self.eval(&cast.expr)?;
                eval_cast(value, &cast.ty, cast.span())
            }
            other => fail(ErrorKind::Unsupported, "unsupported expression", other.span()),
        }
    }

    fn eval_binary(&mut self, binary: &syn::ExprBinary) -> Eval<Value> {
        let span = binary.span();
        match binary.op {
            BinOp::And(_) => {
                let left = self.eval(&binary.left)?;
                if !expect_bool(left, binary.left.span())? {
                    return Ok(Value::Bool(false));
                }
                let right = self.eval(&binary.right)?;
                return Ok(Value::Bool(expect_bool(right, binary.right.span())?));
            }
            BinOp::Or(_) => {
                let left = self.eval(&binary.left)?;
                if expect_bool(left, binary.left.span())? {
                    return Ok(Value::Bool(true));
                }
                let right = self.eval(&binary.right)?;
                return Ok(Value::Bool(expect_bool(right, binary.right.span())?));
            }
            _ => {}
        }

        let Some((op, compound)) = Op::from_syn(&binary.op) else {
            return fail(ErrorKind::Unsupported, "unsupported operator", span);
        };

        if compound {
            let right = self.eval(&binary.right)?;
            let current = self.eval(&binary.left)?;
            let updated = apply_op(op, current, right, span)?;
            self.assign_to(&binary.left, updated)?;
            Ok(Value::Unit)
        } else {
            let left = self.eval(&binary.left)?;
            let right = self.eval(&binary.right)?;
            apply_op(op, left, right, span)
        }
    }

    fn eval_for(&mut self, for_loop: &syn::ExprForLoop) -> Eval<Value> {
        reject_label(for_loop.label.is_some(), for_loop.span())?;
        let var = binding_name(&for_loop.pat)?;

        if let Expr::Range(range) = strip_parens(&for_loop.expr) {
            let (start, end) = self.range_bounds(range)?;
            let mut i = start;
            while i < end {
                let binding = var.as_deref().map(|name| (name, Value::Int(i)));
                if self.loop_body(&for_loop.body, binding)?.is_some() {
                    break;
                }
                i += 1;
            }
            return Ok(Value::Unit);
        }

        let items = match self.eval(&for_loop.expr)? {
            Value::List(items) => items,
            Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
            other => {
                return fail(
                    ErrorKind::Type,
                    format!("`{}` is not iterable", other.type_name()),
                    for_loop.expr.span(),
                );
            }
        };
        for item in items {
            let binding = var.as_deref().map(|name| (name, item));
            if self.loop_body(&for_loop.body, binding)?.is_some() {
                break;
            }
        }
        Ok(Value::Unit)
    }

    /// Run one loop iteration. `Some(value)` means the loop broke.
    fn loop_body(&mut self, body: &syn::Block, binding: Option<(&str, Value)>) -> Eval<Option<Value>> {
        self.check_abort()?;
        let mut scope = FxHashMap::default();
        if let Some((name, value)) = binding {
            scope.insert(name.to_string(), value);
        }
        self.scopes.push(scope);
        let result = self.exec_stmts(&body.stmts);
        self.scopes.pop();

        match result {
            Ok(_) | Err(Flow::Continue) => Ok(None),
            Err(Flow::Break(value)) => Ok(Some(value)),
            Err(other) => Err(other),
        }
    }

    /// Integer bounds of a range, normalised to half-open.
    fn range_bounds(&mut self, range: &syn::ExprRange) -> Eval<(i64, i64)> {
        let span = range.span();
        let (Some(start), Some(end)) = (&range.start, &range.end) else {
            return fail(ErrorKind::Unsupported, "open-ended ranges are not supported here", span);
        };
        let start = expect_int(self.eval(start)?, span)?;
        let end = expect_int(self.eval(end)?, span)?;
        let end = match range.limits {
            RangeLimits::HalfOpen(_) => end,
            RangeLimits::Closed(_) => end.saturating_add(1),
        };
        Ok((start, end))
    }

    fn eval_index(&mut self, base: Value, index: &Expr) -> Eval<Value> {
        let span = index.span();
        if let Expr::Range(range) = strip_parens(index) {
            let len = match &base {
                Value::List(items) => items.len(),
                Value::Str(s) => s.chars().count(),
                other => return fail(ErrorKind::Type, format!("cannot slice `{}`", other.type_name()), span),
            };
            let start = match &range.start {
                Some(e) => expect_int(self.eval(e)?, span)?,
                None => 0,
            };
            let end = match &range.end {
                Some(e) => {
                    let end = expect_int(self.eval(e)?, span)?;
                    match range.limits {
                        RangeLimits::HalfOpen(_) => end,
                        RangeLimits::Closed(_) => end.saturating_add(1),
                    }
                }
                None => len as i64,
            };
            if start < 0 || end < start || end > len as i64 {
                return fail(
                    ErrorKind::Index,
                    format!("range {}..{} out of bounds for length {}", start, end, len),
                    span,
                );
            }
            let (start, end) = (start as usize, end as usize);
            return Ok(match base {
                Value::List(items) => Value::List(items[start..end].to_vec()),
                Value::Str(s) => Value::Str(s.chars().skip(start).take(end - start).collect()),
                _ => Value::Unit,
            });
        }

        let i = expect_int(self.eval(index)?, span)?;
        match base {
            Value::List(mut items) => {
                let i = checked_index(i, items.len(), span)?;
                Ok(items.swap_remove(i))
            }
            Value::Str(s) => {
                let len = s.chars().count();
                let i = checked_index(i, len, span)?;
                Ok(Value::Str(s.chars().nth(i).map(String::from).unwrap_or_default()))
            }
            other => fail(ErrorKind::Type, format!("cannot index into `{}`", other.type_name()), span),
        }
    }

    // =========================================================================
    // Places
    // =========================================================================

    fn assign_to(&mut self, target: &Expr, value: Value) -> Eval<()> {
        match target {
            Expr::Path(path) => {
                let name = path_ident(path)?;
                self.assign_name(&name, value);
                Ok(())
            }
            Expr::Paren(inner) => self.assign_to(&inner.expr, value),
            Expr::Unary(unary) if matches!(unary.op, UnOp::Deref(_)) => self.assign_to(&unary.expr, value),
            Expr::Index(_) => {
                let slot = self.place_mut(target)?;
                *slot = value;
                Ok(())
            }
            other => fail(ErrorKind::Unsupported, "invalid assignment target", other.span()),
        }
    }

    /// Resolve a place expression (`x`, `xs[i]`, `grid[i][j]`) to its slot.
    pub(crate) fn place_mut(&mut self, target: &Expr) -> Eval<&mut Value> {
        let mut indices = Vec::new();
        let mut cursor = target;
        let name = loop {
            match cursor {
                Expr::Index(index) => {
                    let i = expect_int(self.eval(&index.index)?, index.index.span())?;
                    indices.push((i, index.index.span()));
                    cursor = &index.expr;
                }
                Expr::Paren(inner) => cursor = &inner.expr,
                Expr::Reference(inner) => cursor = &inner.expr,
                Expr::Unary(unary) if matches!(unary.op, UnOp::Deref(_)) => cursor = &unary.expr,
                Expr::Path(path) => break path_ident(path)?,
                other => return fail(ErrorKind::Unsupported, "expected a variable or indexed variable", other.span()),
            }
        };

        let target_span = target.span();
        let mut slot = match self.lookup_mut(&name) {
            Some(slot) => slot,
            None => return undefined(&name, target_span),
        };
        for (i, span) in indices.into_iter().rev() {
            slot = match slot {
                Value::List(items) => {
                    let i = checked_index(i, items.len(), span)?;
                    &mut items[i]
                }
                other => {
                    return fail(
                        ErrorKind::Type,
                        format!("cannot index into `{}`", other.type_name()),
                        span,
                    );
                }
            };
        }
        Ok(slot)
    }

    // =========================================================================
    // Calls
    // =========================================================================

    fn eval_call(&mut self, call: &syn::ExprCall) -> Eval<Value> {
        let span = call.span();
        let name = match strip_parens(&call.func) {
            Expr::Path(path) => path_ident(path)?,
            other => return fail(ErrorKind::Unsupported, "only named functions can be called", other.span()),
        };

        let mut args = Vec::with_capacity(call.args.len());
        let mut kwargs = Vec::new();
        for arg in &call.args {
            match keyword_arg(arg) {
                Some((key, value_expr)) => kwargs.push((key, self.eval(value_expr)?)),
                None => args.push(self.eval(arg)?),
            }
        }

        let callee = self.lookup(&name).cloned();
        match callee {
            Some(Value::Function(func)) => {
                if !kwargs.is_empty() {
                    return fail(ErrorKind::Type, "keyword arguments are only accepted by builtins", span);
                }
                self.call_function(&func, args, span)
            }
            Some(other) => fail(
                ErrorKind::Type,
                format!("`{}` is not callable (found {})", name, other.type_name()),
                span,
            ),
            None => match self.call_builtin(&name, args, kwargs, span) {
                Some(result) => result,
                None => fail(ErrorKind::Name, format!("undefined function `{}`", name), span),
            },
        }
    }

    fn call_function(&mut self, func: &Rc<Function>, args: Vec<Value>, span: Span) -> Eval<Value> {
        self.check_abort()?;
        if args.len() != func.params.len() {
            return fail(
                ErrorKind::Type,
                format!(
                    "fn `{}` takes {} argument(s) but {} were given",
                    func.name,
                    func.params.len(),
                    args.len()
                ),
                span,
            );
        }
        if self.depth >= MAX_CALL_DEPTH {
            return fail(ErrorKind::Recursion, "maximum call depth exceeded", span);
        }

        let frame: FxHashMap<String, Value> = func.params.iter().cloned().zip(args).collect();
        let saved = std::mem::replace(&mut self.scopes, vec![frame]);
        self.depth += 1;
        let result = self.exec_stmts(&func.body.stmts);
        self.depth -= 1;
        self.scopes = saved;

        match result {
            Ok(value) | Err(Flow::Return(value)) => Ok(value),
            Err(Flow::Break(_)) => Err(Flow::Error(stray_control("break"))),
            Err(Flow::Continue) => Err(Flow::Error(stray_control("continue"))),
            Err(Flow::Error(e)) => Err(Flow::Error(e.with_frame(format!(
                "in fn `{}`, called at {}",
                func.name,
                Location::from_span(span)
            )))),
        }
    }

    fn eval_method_call(&mut self, call: &syn::ExprMethodCall) -> Eval<Value> {
        let span = call.span();
        let method = call.method.to_string();
        let args = call
            .args
            .iter()
            .map(|a| self.eval(a))
            .collect::<Eval<Vec<_>>>()?;

        if crate::builtins::is_mutating_method(&method) {
            if is_place(&call.receiver) {
                let slot = self.place_mut(&call.receiver)?;
                return crate::builtins::call_mutating_method(slot, &method, args, span);
            }
            let mut temp = self.eval(&call.receiver)?;
            return crate::builtins::call_mutating_method(&mut temp, &method, args, span);
        }

        if let Expr::Path(path) = strip_parens(&call.receiver) {
            let name = path_ident(path)?;
            return match self.lookup(&name) {
                Some(receiver) => crate::builtins::call_method(receiver, &method, args, span),
                None => undefined(&name, path.span()),
            };
        }
        let receiver = self.eval(&call.receiver)?;
        crate::builtins::call_method(&receiver, &method, args, span)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Arithmetic, bitwise and comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Op {
    /// Map a syn operator to `(op, is_compound_assignment)`.
    fn from_syn(op: &BinOp) -> Option<(Op, bool)> {
        Some(match op {
            BinOp::Add(_) => (Op::Add, false),
            BinOp::Sub(_) => (Op::Sub, false),
            BinOp::Mul(_) => (Op::Mul, false),
            BinOp::Div(_) => (Op::Div, false),
            BinOp::Rem(_) => (Op::Rem, false),
            BinOp::BitAnd(_) => (Op::BitAnd, false),
            BinOp::BitOr(_) => (Op::BitOr, false),
            BinOp::BitXor(_) => (Op::BitXor, false),
            BinOp::Shl(_) => (Op::Shl, false),
            BinOp::Shr(_) => (Op::Shr, false),
            BinOp::Eq(_) => (Op::Eq, false),
            BinOp::Ne(_) => (Op::Ne, false),
            BinOp::Lt(_) => (Op::Lt, false),
            BinOp::Le(_) => (Op::Le, false),
            BinOp::Gt(_) => (Op::Gt, false),
            BinOp::Ge(_) => (Op::Ge, false),
            BinOp::AddAssign(_) => (Op::Add, true),
            BinOp::SubAssign(_) => (Op::Sub, true),
            BinOp::MulAssign(_) => (Op::Mul, true),
            BinOp::DivAssign(_) => (Op::Div, true),
            BinOp::RemAssign(_) => (Op::Rem, true),
            BinOp::BitAndAssign(_) => (Op::BitAnd, true),
            BinOp::BitOrAssign(_) => (Op::BitOr, true),
            BinOp::BitXorAssign(_) => (Op::BitXor, true),
            BinOp::ShlAssign(_) => (Op::Shl, true),
            BinOp::ShrAssign(_) => (Op::Shr, true),
            _ => return None,
        })
    }

    fn symbol(&self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Rem => "%",
            Op::BitAnd => "&",
            Op::BitOr => "|",
            Op::BitXor => "^",
            Op::Shl => "<<",
            Op::Shr => ">>",
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
        }
    }
}

pub(crate) fn apply_op(op: Op, left: Value, right: Value, span: Span) -> Eval<Value> {
    use std::cmp::Ordering;

    match op {
        Op::Eq => return Ok(Value::Bool(left.loose_eq(&right))),
        Op::Ne => return Ok(Value::Bool(!left.loose_eq(&right))),
        Op::Lt | Op::Le | Op::Gt | Op::Ge => {
            let ordering = match (&left, &right) {
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
                (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
                (a, b) => match (a.as_f64(), b.as_f64()) {
                    (Some(x), Some(y)) => x.partial_cmp(&y),
                    _ => {
                        return mismatched(op, &left, &right, span);
                    }
                },
            };
            let result = match ordering {
                None => false,
                Some(ord) => match op {
                    Op::Lt => ord == Ordering::Less,
                    Op::Le => ord != Ordering::Greater,
                    Op::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                },
            };
            return Ok(Value::Bool(result));
        }
        _ => {}
    }

    match (left, right) {
        (Value::Int(a), Value::Int(b)) => int_op(op, a, b, span),
        (Value::Bool(a), Value::Bool(b)) => match op {
            Op::BitAnd => Ok(Value::Bool(a & b)),
            Op::BitOr => Ok(Value::Bool(a | b)),
            Op::BitXor => Ok(Value::Bool(a ^ b)),
            _ => mismatched(op, &Value::Bool(a), &Value::Bool(b), span),
        },
        (Value::Str(a), Value::Str(b)) if op == Op::Add => Ok(Value::Str(a + &b)),
        (Value::Str(a), Value::Int(n)) if op == Op::Mul => {
            let n = repeat_count(a.len(), n, span)?;
            Ok(Value::Str(a.repeat(n)))
        }
        (Value::List(mut a), Value::List(b)) if op == Op::Add => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (Value::List(a), Value::Int(n)) if op == Op::Mul => {
            let n = repeat_count(a.len(), n, span)?;
            let mut out = Vec::with_capacity(a.len() * n);
            for _ in 0..n {
                out.extend(a.iter().cloned());
            }
            Ok(Value::List(out))
        }
        (left, right) => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => float_op(op, a, b, span).map(Value::Float),
            _ => mismatched(op, &left, &right, span),
        },
    }
}

/// Clamp a negative count to zero and reject results over [`MAX_RANGE_LEN`].
fn repeat_count(unit: usize, n: i64, span: Span) -> Eval<usize> {
    let n = usize::try_from(n).unwrap_or(0);
    match unit.checked_mul(n) {
        Some(total) if total as u64 <= MAX_RANGE_LEN as u64 => Ok(n),
        _ => fail(ErrorKind::Value, format!("repetition by {} is too large", n), span),
    }
}

fn int_op(op: Op, a: i64, b: i64, span: Span) -> Eval<Value> {
    let overflow = || KernelError::runtime(ErrorKind::Overflow, format!("integer overflow in `{} {} {}`", a, op.symbol(), b), span);
    let result = match op {
        Op::Add => a.checked_add(b),
        Op::Sub => a.checked_sub(b),
        Op::Mul => a.checked_mul(b),
        Op::Div | Op::Rem if b == 0 => {
            return fail(ErrorKind::ZeroDivision, "division by zero", span);
        }
        Op::Div => a.checked_div(b),
        Op::Rem => a.checked_rem(b),
        Op::BitAnd => Some(a & b),
        Op::BitOr => Some(a | b),
        Op::BitXor => Some(a ^ b),
        Op::Shl => u32::try_from(b).ok().and_then(|s| a.checked_shl(s)),
        Op::Shr => u32::try_from(b).ok().and_then(|s| a.checked_shr(s)),
        _ => None,
    };
    result.map(Value::Int).ok_or_else(|| Flow::Error(overflow()))
}

fn float_op(op: Op, a: f64, b: f64, span: Span) -> Eval<f64> {
    match op {
        Op::Add => Ok(a + b),
        Op::Sub => Ok(a - b),
        Op::Mul => Ok(a * b),
        Op::Div | Op::Rem if b == 0.0 => fail(ErrorKind::ZeroDivision, "division by zero", span),
        Op::Div => Ok(a / b),
        Op::Rem => Ok(a % b),
        _ => fail(ErrorKind::Type, format!("operator `{}` requires integers", op.symbol()), span),
    }
}

fn mismatched<T>(op: Op, left: &Value, right: &Value, span: Span) -> Eval<T> {
    fail(
        ErrorKind::Type,
        format!(
            "unsupported operand types for `{}`: {} and {}",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ),
        span,
    )
}

fn eval_unary(op: &UnOp, value: Value, span: Span) -> Eval<Value> {
    match (op, value) {
        (UnOp::Deref(_), value) => Ok(value),
        (UnOp::Not(_), Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnOp::Not(_), Value::Int(i)) => Ok(Value::Int(!i)),
        (UnOp::Neg(_), Value::Int(i)) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| Flow::Error(KernelError::runtime(ErrorKind::Overflow, "integer overflow in negation", span))),
        (UnOp::Neg(_), Value::Float(f)) => Ok(Value::Float(-f)),
        (_, other) => fail(
            ErrorKind::Type,
            format!("bad operand type for unary operator: {}", other.type_name()),
            span,
        ),
    }
}

fn eval_lit(lit: &Lit) -> Eval<Value> {
    let span = lit.span();
    match lit {
        Lit::Int(int) => match int.base10_parse::<i64>() {
            Ok(i) => Ok(Value::Int(i)),
            Err(_) => fail(ErrorKind::Overflow, "integer literal out of range", span),
        },
        Lit::Float(float) => match float.base10_parse::<f64>() {
            Ok(f) => Ok(Value::Float(f)),
            Err(e) => fail(ErrorKind::Value, e.to_string(), span),
        },
        Lit::Str(s) => Ok(Value::Str(s.value())),
        Lit::Char(c) => Ok(Value::Str(c.value().to_string())),
        Lit::Bool(b) => Ok(Value::Bool(b.value)),
        _ => fail(ErrorKind::Unsupported, "unsupported literal", span),
    }
}

fn eval_cast(value: Value, ty: &syn::Type, span: Span) -> Eval<Value> {
    let target = match ty {
        syn::Type::Path(path) => path.path.get_ident().map(|i| i.to_string()),
        _ => None,
    };
    let Some(target) = target else {
        return fail(ErrorKind::Unsupported, "unsupported cast target", span);
    };

    match target.as_str() {
        "f64" | "f32" => match value {
            Value::Int(i) => Ok(Value::Float(i as f64)),
            Value::Float(f) => Ok(Value::Float(f)),
            other => fail(ErrorKind::Type, format!("cannot cast {} to {}", other.type_name(), target), span),
        },
        "i8" | "i16" | "i32" | "i64" | "i128" | "isize" | "u8" | "u16" | "u32" | "u64" | "u128"
        | "usize" => match value {
            Value::Int(i) => Ok(Value::Int(i)),
            Value::Float(f) if f.is_finite() && f.trunc().abs() < 9.2e18 => Ok(Value::Int(f.trunc() as i64)),
            Value::Bool(b) => Ok(Value::Int(b as i64)),
            other => fail(ErrorKind::Type, format!("cannot cast {} to {}", other.type_name(), target), span),
        },
        other => fail(ErrorKind::Unsupported, format!("unsupported cast target `{}`", other), span),
    }
}

pub(crate) fn repeat_value(item: Value, count: Value, span: Span) -> Eval<Value> {
    let count = expect_int(count, span)?;
    if !(0..=MAX_RANGE_LEN).contains(&count) {
        return fail(ErrorKind::Value, format!("invalid repeat count {}", count), span);
    }
    Ok(Value::List(vec![item; count as usize]))
}

pub(crate) fn undefined<T>(name: &str, span: Span) -> Eval<T> {
    fail(ErrorKind::Name, format!("undefined variable `{}`", name), span)
}

pub(crate) fn expect_bool(value: Value, span: Span) -> Eval<bool> {
    match value {
        Value::Bool(b) => Ok(b),
        other => fail(ErrorKind::Type, format!("expected bool, found {}", other.type_name()), span),
    }
}

pub(crate) fn expect_int(value: Value, span: Span) -> Eval<i64> {
    match value {
        Value::Int(i) => Ok(i),
        other => fail(ErrorKind::Type, format!("expected int, found {}", other.type_name()), span),
    }
}

pub(crate) fn checked_index(i: i64, len: usize, span: Span) -> Eval<usize> {
    match usize::try_from(i) {
        Ok(i) if i < len => Ok(i),
        _ => fail(
            ErrorKind::Index,
            format!("index {} out of bounds for length {}", i, len),
            span,
        ),
    }
}

fn stray_control(keyword: &str) -> KernelError {
    KernelError::Runtime {
        kind: ErrorKind::Unsupported,
        message: format!("`{}` outside of a loop", keyword),
        location: None,
        frames: Vec::new(),
    }
}

fn reject_label(has_label: bool, span: Span) -> Eval<()> {
    if has_label {
        fail(ErrorKind::Unsupported, "loop labels are not supported", span)
    } else {
        Ok(())
    }
}

fn path_ident(path: &syn::ExprPath) -> Eval<String> {
    match path.path.get_ident() {
        Some(ident) if path.qself.is_none() => Ok(ident.to_string()),
        _ => fail(ErrorKind::Unsupported, "paths are not supported; use a plain name", path.span()),
    }
}

/// Name bound by a pattern; `None` for `_`.
fn binding_name(pat: &Pat) -> Eval<Option<String>> {
    match pat {
        Pat::Ident(ident) if ident.subpat.is_none() => Ok(Some(ident.ident.to_string())),
        Pat::Type(typed) => binding_name(&typed.pat),
        Pat::Wild(_) => Ok(None),
        other => fail(ErrorKind::Unsupported, "only simple name patterns are supported", other.span()),
    }
}

/// `name = expr` in call position is a keyword argument.
pub(crate) fn keyword_arg(arg: &Expr) -> Option<(String, &Expr)> {
    if let Expr::Assign(assign) = arg
        && let Expr::Path(path) = assign.left.as_ref()
        && let Some(ident) = path.path.get_ident()
    {
        return Some((ident.to_string(), assign.right.as_ref()));
    }
    None
}

fn strip_parens(expr: &Expr) -> &Expr {
    match expr {
        Expr::Paren(inner) => strip_parens(&inner.expr),
        Expr::Group(inner) => strip_parens(&inner.expr),
        other => other,
    }
}

fn is_place(expr: &Expr) -> bool {
    match expr {
        Expr::Path(_) => true,
        Expr::Index(index) => is_place(&index.expr),
        Expr::Paren(inner) => is_place(&inner.expr),
        Expr::Reference(inner) => is_place(&inner.expr),
        Expr::Unary(unary) => matches!(unary.op, UnOp::Deref(_)) && is_place(&unary.expr),
        _ => false,
    }
}
