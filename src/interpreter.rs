use crate::ast::*;
use crate::error::EvalError;
use crate::tree::format_float;
use std::cmp::Ordering;
use std::fmt;

/// A runtime value of the expression language.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
}

/// Bounds on parsing and evaluation work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalLimits {
    /// Maximum depth of a parsed expression tree. Brackets, prefix
    /// operators and each link of an operator or postfix chain add a level.
    pub max_depth: usize,
    /// Maximum number of comprehension steps per evaluation.
    pub max_iterations: usize,
    /// Maximum number of list elements and string bytes built or copied
    /// during one evaluation, nested lists included.
    pub max_sequence_len: usize,
    /// Maximum length in bytes of an expression's source text.
    pub max_source_len: usize,
}

impl Default for EvalLimits {
    fn default() -> Self {
        EvalLimits {
            max_depth: 64,
            max_iterations: 100_000,
            max_sequence_len: 100_000,
            max_source_len: 100_000,
        }
    }
}

/// How equality comparisons are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// `==` between unrelated types is simply false.
    Normal,
    /// `==`, `!=` and `<>` demand operands that could also be ordered, so
    /// mixed-type comparisons fail with `IncomparableTypes`.
    Strict,
}

/// Parse and evaluate `source` in one step.
pub fn eval_str(source: &str, limits: &EvalLimits, mode: Mode) -> Result<Value, EvalError> {
    let expr = crate::parser::parse(source, limits)?;
    evaluate(&expr, limits, mode)
}

/// Evaluate a parsed expression.
pub fn evaluate(expr: &Expr, limits: &EvalLimits, mode: Mode) -> Result<Value, EvalError> {
    let mut interpreter = Interpreter {
        limits,
        mode,
        scope: Vec::new(),
        iterations: 0,
        materialized: 0,
    };
    interpreter.eval(expr)
}

struct Interpreter<'a> {
    limits: &'a EvalLimits,
    mode: Mode,
    /// Comprehension variables, innermost last.
    scope: Vec<(String, Value)>,
    iterations: usize,
    /// Elements and string bytes charged so far.
    materialized: usize,
}

impl<'a> Interpreter<'a> {
    fn eval(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Constant(c) => Ok(match c {
                Constant::None => Value::None,
                Constant::Boolean(b) => Value::Bool(*b),
                Constant::Integer(n) => Value::Int(*n),
                Constant::Float(x) => Value::Float(*x),
                Constant::String(s) => Value::Str(s.clone()),
            }),
            Expr::Name(name) => {
                let value = self
                    .scope
                    .iter()
                    .rev()
                    .find(|(n, _)| n == name)
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| EvalError::UnknownName(name.clone()))?;
                self.charge(weight(&value))?;
                Ok(value)
            }
            Expr::List(elements) => {
                self.charge(elements.len())?;
                let items = elements
                    .iter()
                    .map(|e| self.eval(e))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::List(items))
            }
            Expr::ListComp {
                element,
                var,
                iter,
                condition,
            } => self.eval_list_comp(element, var, iter, condition.as_deref()),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                eval_unary(*op, value)
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                self.eval_binary(*op, l, r)
            }
            Expr::BoolOp { op, left, right } => {
                let l = self.eval(left)?;
                match (op, l.truthy()) {
                    (BoolOp::And, false) | (BoolOp::Or, true) => Ok(l),
                    _ => self.eval(right),
                }
            }
            Expr::Compare { first, rest } => {
                let mut left = self.eval(first)?;
                for (op, right_expr) in rest {
                    let right = self.eval(right_expr)?;
                    if !self.compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfElse {
                condition,
                then,
                otherwise,
            } => {
                if self.eval(condition)?.truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Call { func, args } => {
                let args = self.eval_args(args)?;
                self.call_builtin(func, args)
            }
            Expr::Method {
                receiver,
                method,
                args,
            } => {
                let receiver = self.eval(receiver)?;
                let args = self.eval_args(args)?;
                self.call_method(receiver, method, args)
            }
            Expr::Attribute { receiver, name } => {
                let receiver = self.eval(receiver)?;
                Err(no_attribute(&receiver, name))
            }
            Expr::Index { target, index } => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                eval_index(target, index)
            }
            Expr::Slice {
                target,
                start,
                stop,
            } => {
                let target = self.eval(target)?;
                let start = match start {
                    Some(e) => Some(self.eval(e)?),
                    None => None,
                };
                let stop = match stop {
                    Some(e) => Some(self.eval(e)?),
                    None => None,
                };
                eval_slice(target, start, stop)
            }
        }
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>, EvalError> {
        args.iter().map(|a| self.eval(a)).collect()
    }

    fn eval_list_comp(
        &mut self,
        element: &Expr,
        var: &str,
        iter: &Expr,
        condition: Option<&Expr>,
    ) -> Result<Value, EvalError> {
        let iterable = self.eval(iter)?;
        let items = self.iterate(iterable)?;
        let mut result = Vec::new();
        for item in items {
            self.iterations += 1;
            if self.iterations > self.limits.max_iterations {
                return Err(EvalError::Budget(format!(
                    "more than {} comprehension steps",
                    self.limits.max_iterations
                )));
            }
            self.scope.push((var.to_string(), item));
            let keep = match condition {
                Some(c) => self.eval(c).map(|v| v.truthy()),
                None => Ok(true),
            };
            let produced = match keep {
                Ok(true) => self.eval(element).map(Some),
                Ok(false) => Ok(None),
                Err(e) => Err(e),
            };
            self.scope.pop();
            if let Some(value) = produced? {
                self.charge(1)?;
                result.push(value);
            }
        }
        Ok(Value::List(result))
    }

    /// Count `amount` new elements or bytes against the evaluation budget.
    fn charge(&mut self, amount: usize) -> Result<(), EvalError> {
        self.materialized = self.materialized.saturating_add(amount);
        if self.materialized > self.limits.max_sequence_len {
            return Err(EvalError::Budget(format!(
                "more than {} sequence elements built",
                self.limits.max_sequence_len
            )));
        }
        Ok(())
    }

    /// Items of a list, or the characters of a string.
    fn iterate(&mut self, v: Value) -> Result<Vec<Value>, EvalError> {
        if let Value::Str(s) = &v {
            self.charge(s.len())?;
        }
        iterate(v)
    }

    // ── Operators ───────────────────────────────────────────────────

    fn eval_binary(&mut self, op: BinaryOp, l: Value, r: Value) -> Result<Value, EvalError> {
        match (op, &l, &r) {
            (BinaryOp::Add, Value::Str(a), Value::Str(b)) => {
                self.charge(a.len() + b.len())?;
                return Ok(Value::Str(format!("{}{}", a, b)));
            }
            (BinaryOp::Add, Value::List(a), Value::List(b)) => {
                self.charge(weight(&l).saturating_add(weight(&r)))?;
                let mut joined = a.clone();
                joined.extend(b.iter().cloned());
                return Ok(Value::List(joined));
            }
            _ => {}
        }

        let is_sequence = |v: &Value| matches!(v, Value::Str(_) | Value::List(_));
        if op == BinaryOp::Mul && (is_sequence(&l) || is_sequence(&r)) {
            return self.repeat(l, r);
        }

        let (a, b) = match (number(&l), number(&r)) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                return Err(EvalError::Type(format!(
                    "unsupported operand type(s) for {}: '{}' and '{}'",
                    binary_symbol(op),
                    l.type_name(),
                    r.type_name()
                )))
            }
        };

        match (a, b) {
            (Num::Int(a), Num::Int(b)) => int_binary(op, a, b),
            (a, b) => float_binary(op, a.as_f64(), b.as_f64()),
        }
    }

    /// `"ab" * 3`, `[0] * 4`
    fn repeat(&mut self, l: Value, r: Value) -> Result<Value, EvalError> {
        let (seq, count) = match (l, r) {
            (seq @ (Value::Str(_) | Value::List(_)), Value::Int(n))
            | (Value::Int(n), seq @ (Value::Str(_) | Value::List(_))) => (seq, n),
            (seq @ (Value::Str(_) | Value::List(_)), Value::Bool(b))
            | (Value::Bool(b), seq @ (Value::Str(_) | Value::List(_))) => (seq, b as i64),
            (l, r) => {
                return Err(EvalError::Type(format!(
                    "can't multiply sequence by non-int of type '{}'",
                    if matches!(l, Value::Str(_) | Value::List(_)) {
                        r.type_name()
                    } else {
                        l.type_name()
                    }
                )))
            }
        };
        let count = usize::try_from(count).unwrap_or(0);
        match seq {
            Value::Str(s) => {
                self.charge(s.len().saturating_mul(count))?;
                Ok(Value::Str(s.repeat(count)))
            }
            Value::List(items) => {
                let copies = items
                    .iter()
                    .fold(items.len(), |acc, item| acc.saturating_add(weight(item)));
                self.charge(copies.saturating_mul(count))?;
                let mut out = Vec::with_capacity(items.len() * count);
                for _ in 0..count {
                    out.extend(items.iter().cloned());
                }
                Ok(Value::List(out))
            }
            other => Err(bad_operand("*", &other)),
        }
    }

    fn compare(&self, op: CompareOp, l: &Value, r: &Value) -> Result<bool, EvalError> {
        match op {
            CompareOp::Eq | CompareOp::NotEq => {
                if self.mode == Mode::Strict {
                    order(l, r, op)?;
                }
                let eq = equal(l, r);
                Ok(if op == CompareOp::Eq { eq } else { !eq })
            }
            CompareOp::Lt | CompareOp::LtE | CompareOp::Gt | CompareOp::GtE => {
                let ordering = match order(l, r, op)? {
                    Some(o) => o,
                    // NaN compares false with everything
                    None => return Ok(false),
                };
                Ok(match op {
                    CompareOp::Lt => ordering == Ordering::Less,
                    CompareOp::LtE => ordering != Ordering::Greater,
                    CompareOp::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                })
            }
            CompareOp::In => contains(r, l),
            CompareOp::NotIn => contains(r, l).map(|b| !b),
            CompareOp::Is => Ok(identical(l, r)),
            CompareOp::IsNot => Ok(!identical(l, r)),
        }
    }

    // ── Builtins ────────────────────────────────────────────────────

    fn call_builtin(&mut self, func: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        match func {
            "range" => {
                let ints = args
                    .iter()
                    .map(|a| as_int(a, "range"))
                    .collect::<Result<Vec<_>, _>>()?;
                let (start, stop, step) = match ints.as_slice() {
                    [stop] => (0, *stop, 1),
                    [start, stop] => (*start, *stop, 1),
                    [start, stop, step] => (*start, *stop, *step),
                    _ => return Err(arity_error("range", "1 to 3", args.len())),
                };
                if step == 0 {
                    return Err(EvalError::Value(
                        "range() arg 3 must not be zero".to_string(),
                    ));
                }
                let span = if step > 0 {
                    (stop as i128 - start as i128 + step as i128 - 1) / step as i128
                } else {
                    (start as i128 - stop as i128 - step as i128 - 1) / (-(step as i128))
                };
                let len = span.max(0) as u128;
                if len > self.limits.max_sequence_len as u128 {
                    return Err(EvalError::Budget(format!(
                        "range of {} elements exceeds {}",
                        len, self.limits.max_sequence_len
                    )));
                }
                self.charge(len as usize)?;
                let items = (0..len as i64).map(|i| Value::Int(start + i * step)).collect();
                Ok(Value::List(items))
            }
            "len" => match one_arg("len", args)? {
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::List(items) => Ok(Value::Int(items.len() as i64)),
                other => Err(EvalError::Type(format!(
                    "object of type '{}' has no len()",
                    other.type_name()
                ))),
            },
            "abs" => match one_arg("abs", args)? {
                Value::Bool(b) => Ok(Value::Int(b as i64)),
                Value::Int(n) => n
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| overflow("abs")),
                Value::Float(x) => Ok(Value::Float(x.abs())),
                other => Err(bad_operand("abs()", &other)),
            },
            "min" | "max" => {
                let items = match args.len() {
                    0 => return Err(arity_error(func, "at least 1", 0)),
                    1 => self.iterate(args.into_iter().next().unwrap_or(Value::None))?,
                    _ => args,
                };
                let mut best: Option<Value> = None;
                for item in items {
                    best = Some(match best {
                        None => item,
                        Some(current) => {
                            let op = if func == "min" { CompareOp::Lt } else { CompareOp::Gt };
                            if self.compare(op, &item, &current)? {
                                item
                            } else {
                                current
                            }
                        }
                    });
                }
                best.ok_or_else(|| EvalError::Value(format!("{}() arg is an empty sequence", func)))
            }
            "sum" => {
                let (items, start) = match args.len() {
                    1 | 2 => {
                        let mut it = args.into_iter();
                        let items = self.iterate(it.next().unwrap_or(Value::None))?;
                        (items, it.next().unwrap_or(Value::Int(0)))
                    }
                    n => return Err(arity_error("sum", "1 or 2", n)),
                };
                items
                    .into_iter()
                    .try_fold(start, |acc, item| self.eval_binary(BinaryOp::Add, acc, item))
            }
            "int" => match one_arg("int", args)? {
                Value::Bool(b) => Ok(Value::Int(b as i64)),
                Value::Int(n) => Ok(Value::Int(n)),
                Value::Float(x) => float_to_int(x.trunc(), "int()").map(Value::Int),
                Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                    EvalError::Value(format!("invalid literal for int() with base 10: '{}'", s))
                }),
                other => Err(bad_operand("int()", &other)),
            },
            "float" => match one_arg("float", args)? {
                Value::Bool(b) => Ok(Value::Float(b as i64 as f64)),
                Value::Int(n) => Ok(Value::Float(n as f64)),
                Value::Float(x) => Ok(Value::Float(x)),
                Value::Str(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                    EvalError::Value(format!("could not convert string to float: '{}'", s))
                }),
                other => Err(bad_operand("float()", &other)),
            },
            "str" => Ok(Value::Str(one_arg("str", args)?.to_string())),
            "bool" => Ok(Value::Bool(one_arg("bool", args)?.truthy())),
            "round" => {
                let mut it = args.into_iter();
                let (value, digits) = match (it.next(), it.next(), it.next()) {
                    (Some(v), None, None) => (v, None),
                    (Some(v), Some(d), None) => (v, Some(as_int(&d, "round")?)),
                    (v, d, extra) => {
                        let given = [v, d, extra].iter().filter(|a| a.is_some()).count();
                        return Err(arity_error("round", "1 or 2", given));
                    }
                };
                let x = match number(&value) {
                    Some(n) => n,
                    None => return Err(bad_operand("round()", &value)),
                };
                match (x, digits) {
                    (Num::Int(n), _) => Ok(Value::Int(n)),
                    (Num::Float(x), None) => {
                        float_to_int(x.round_ties_even(), "round()").map(Value::Int)
                    }
                    (Num::Float(x), Some(d)) => {
                        let factor = 10f64.powi(d.clamp(-308, 308) as i32);
                        Ok(Value::Float((x * factor).round_ties_even() / factor))
                    }
                }
            }
            "list" => {
                let items = self.iterate(one_arg("list", args)?)?;
                Ok(Value::List(items))
            }
            "sorted" => {
                let mut items = self.iterate(one_arg("sorted", args)?)?;
                let mut failure = None;
                items.sort_by(|a, b| match order(a, b, CompareOp::Lt) {
                    Ok(o) => o.unwrap_or(Ordering::Equal),
                    Err(e) => {
                        failure.get_or_insert(e);
                        Ordering::Equal
                    }
                });
                match failure {
                    Some(e) => Err(e),
                    None => Ok(Value::List(items)),
                }
            }
            _ => Err(EvalError::UnknownName(func.to_string())),
        }
    }

    fn call_method(
        &mut self,
        receiver: Value,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, EvalError> {
        match (&receiver, method) {
            (Value::Str(s), "startswith" | "endswith") => {
                let affix = match one_arg(method, args)? {
                    Value::Str(a) => a,
                    other => {
                        return Err(EvalError::Type(format!(
                            "{} first arg must be str, not {}",
                            method,
                            other.type_name()
                        )))
                    }
                };
                Ok(Value::Bool(if method == "startswith" {
                    s.starts_with(&affix)
                } else {
                    s.ends_with(&affix)
                }))
            }
            (Value::Str(s), "lower") => no_args(method, args).map(|_| Value::Str(s.to_lowercase())),
            (Value::Str(s), "upper") => no_args(method, args).map(|_| Value::Str(s.to_uppercase())),
            (Value::Str(s), "strip" | "lstrip" | "rstrip") => {
                let chars: Option<Vec<char>> = match args.len() {
                    0 => None,
                    1 => Some(as_str(&args[0], method)?.chars().collect()),
                    n => return Err(arity_error(method, "at most 1", n)),
                };
                let matches = |c: char| match &chars {
                    Some(set) => set.contains(&c),
                    None => c.is_whitespace(),
                };
                let out = match method {
                    "strip" => s.trim_matches(matches),
                    "lstrip" => s.trim_start_matches(matches),
                    _ => s.trim_end_matches(matches),
                };
                Ok(Value::Str(out.to_string()))
            }
            (Value::Str(s), "replace") => match args.as_slice() {
                [old, new] => {
                    let (old, new) = (as_str(old, method)?, as_str(new, method)?);
                    let grown = s.matches(old).count().saturating_mul(new.len());
                    self.charge(s.len().saturating_add(grown))?;
                    Ok(Value::Str(s.replace(old, new)))
                }
                _ => Err(arity_error(method, "2", args.len())),
            },
            (Value::Str(s), "split") => {
                let parts: Vec<Value> = match args.len() {
                    0 => s.split_whitespace().map(|p| Value::Str(p.to_string())).collect(),
                    1 => {
                        let sep = as_str(&args[0], method)?;
                        if sep.is_empty() {
                            return Err(EvalError::Value("empty separator".to_string()));
                        }
                        s.split(sep).map(|p| Value::Str(p.to_string())).collect()
                    }
                    n => return Err(arity_error(method, "at most 1", n)),
                };
                Ok(Value::List(parts))
            }
            (Value::Str(sep), "join") => {
                let items = self.iterate(one_arg(method, args)?)?;
                let parts = items
                    .iter()
                    .map(|item| match item {
                        Value::Str(p) => Ok(p.as_str()),
                        other => Err(EvalError::Type(format!(
                            "sequence item: expected str instance, {} found",
                            other.type_name()
                        ))),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let seps = sep.len().saturating_mul(parts.len().saturating_sub(1));
                self.charge(parts.iter().map(|p| p.len()).sum::<usize>().saturating_add(seps))?;
                Ok(Value::Str(parts.join(sep.as_str())))
            }
            (Value::Str(s), "count") => {
                let sub = one_arg(method, args)?;
                let sub = as_str(&sub, method)?;
                let n = if sub.is_empty() {
                    s.chars().count() + 1
                } else {
                    s.matches(sub).count()
                };
                Ok(Value::Int(n as i64))
            }
            (Value::List(items), "count") => {
                let needle = one_arg(method, args)?;
                Ok(Value::Int(
                    items.iter().filter(|i| equal(i, &needle)).count() as i64,
                ))
            }
            (Value::List(items), "index") => {
                let needle = one_arg(method, args)?;
                items
                    .iter()
                    .position(|i| equal(i, &needle))
                    .map(|p| Value::Int(p as i64))
                    .ok_or_else(|| EvalError::Value(format!("{} is not in list", needle.repr())))
            }
            _ => Err(no_attribute(&receiver, method)),
        }
    }
}

// ── Value helpers ───────────────────────────────────────────────────

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
        }
    }

    /// Literal form: strings quoted, everything else as `Display`.
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => f.write_str(&format_float(*x)),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str(&item.repr())?;
                }
                f.write_str("]")
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Float(x) => x,
        }
    }
}

/// Numeric view of a value; booleans count as 0/1.
fn number(v: &Value) -> Option<Num> {
    match v {
        Value::Bool(b) => Some(Num::Int(*b as i64)),
        Value::Int(n) => Some(Num::Int(*n)),
        Value::Float(x) => Some(Num::Float(*x)),
        _ => None,
    }
}

fn equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::None, Value::None) => true,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| equal(x, y))
        }
        _ => match (number(l), number(r)) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => a == b,
            (Some(a), Some(b)) => a.as_f64() == b.as_f64(),
            _ => false,
        },
    }
}

/// Ordering between two values, `None` when a NaN is involved.
fn order(l: &Value, r: &Value, op: CompareOp) -> Result<Option<Ordering>, EvalError> {
    match (l, r) {
        (Value::Str(a), Value::Str(b)) => Ok(Some(a.cmp(b))),
        (Value::List(a), Value::List(b)) => {
            for (x, y) in a.iter().zip(b) {
                if !equal(x, y) {
                    return order(x, y, op);
                }
            }
            Ok(Some(a.len().cmp(&b.len())))
        }
        _ => match (number(l), number(r)) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => Ok(Some(a.cmp(&b))),
            (Some(a), Some(b)) => Ok(a.as_f64().partial_cmp(&b.as_f64())),
            _ => Err(EvalError::IncomparableTypes {
                op: op.symbol(),
                left: l.type_name(),
                right: r.type_name(),
            }),
        },
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool, EvalError> {
    match container {
        Value::Str(s) => match item {
            Value::Str(sub) => Ok(s.contains(sub.as_str())),
            other => Err(EvalError::Type(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.iter().any(|i| equal(i, item))),
        other => Err(EvalError::Type(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

/// `is`: values have no identity of their own, so scalars of the same type
/// and value are the same object. Lists never are.
fn identical(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
        (Value::Str(a), Value::Str(b)) => a == b,
        _ => false,
    }
}

/// Elements and string bytes held by a value, nested lists included.
fn weight(value: &Value) -> usize {
    match value {
        Value::Str(s) => s.len(),
        Value::List(items) => items
            .iter()
            .fold(items.len(), |acc, item| acc.saturating_add(weight(item))),
        _ => 0,
    }
}

fn iterate(v: Value) -> Result<Vec<Value>, EvalError> {
    match v {
        Value::List(items) => Ok(items),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        other => Err(EvalError::Type(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

fn eval_unary(op: UnaryOp, value: Value) -> Result<Value, EvalError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
        UnaryOp::Pos => match number(&value) {
            Some(Num::Int(n)) => Ok(Value::Int(n)),
            Some(Num::Float(x)) => Ok(Value::Float(x)),
            None => Err(bad_operand("unary +", &value)),
        },
        UnaryOp::Neg => match number(&value) {
            Some(Num::Int(n)) => n.checked_neg().map(Value::Int).ok_or_else(|| overflow("-")),
            Some(Num::Float(x)) => Ok(Value::Float(-x)),
            None => Err(bad_operand("unary -", &value)),
        },
    }
}

fn int_binary(op: BinaryOp, a: i64, b: i64) -> Result<Value, EvalError> {
    let sym = binary_symbol(op);
    match op {
        BinaryOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(|| overflow(sym)),
        BinaryOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(|| overflow(sym)),
        BinaryOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(|| overflow(sym)),
        BinaryOp::Div => float_binary(op, a as f64, b as f64),
        BinaryOp::FloorDiv | BinaryOp::Mod => {
            if b == 0 {
                return Err(EvalError::ZeroDivision);
            }
            let q = a.checked_div(b).ok_or_else(|| overflow(sym))?;
            let r = a - q * b;
            // Python rounds the quotient towards negative infinity
            let (q, r) = if r != 0 && ((r < 0) != (b < 0)) {
                (q - 1, r + b)
            } else {
                (q, r)
            };
            Ok(Value::Int(if op == BinaryOp::FloorDiv { q } else { r }))
        }
        BinaryOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err(EvalError::ZeroDivision);
                }
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            u32::try_from(b)
                .ok()
                .and_then(|e| a.checked_pow(e))
                .map(Value::Int)
                .ok_or_else(|| overflow(sym))
        }
    }
}

fn float_binary(op: BinaryOp, a: f64, b: f64) -> Result<Value, EvalError> {
    let x = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(EvalError::ZeroDivision);
            }
            a / b
        }
        BinaryOp::FloorDiv => {
            if b == 0.0 {
                return Err(EvalError::ZeroDivision);
            }
            (a / b).floor()
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return Err(EvalError::ZeroDivision);
            }
            a - b * (a / b).floor()
        }
        BinaryOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(EvalError::ZeroDivision);
            }
            a.powf(b)
        }
    };
    Ok(Value::Float(x))
}

fn eval_index(target: Value, index: Value) -> Result<Value, EvalError> {
    let i = match number(&index) {
        Some(Num::Int(i)) => i,
        _ => {
            return Err(EvalError::Type(format!(
                "{} indices must be integers, not {}",
                target.type_name(),
                index.type_name()
            )))
        }
    };
    match target {
        Value::List(items) => {
            let pos = normalize_index(i, items.len())
                .ok_or_else(|| EvalError::Index("list index out of range".to_string()))?;
            Ok(items[pos].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let pos = normalize_index(i, chars.len())
                .ok_or_else(|| EvalError::Index("string index out of range".to_string()))?;
            Ok(Value::Str(chars[pos].to_string()))
        }
        other => Err(EvalError::Type(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn normalize_index(i: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let pos = if i < 0 { i + len } else { i };
    if (0..len).contains(&pos) {
        Some(pos as usize)
    } else {
        None
    }
}

fn eval_slice(
    target: Value,
    start: Option<Value>,
    stop: Option<Value>,
) -> Result<Value, EvalError> {
    let bound = |v: Option<Value>, len: usize, default: usize| -> Result<usize, EvalError> {
        match v {
            None | Some(Value::None) => Ok(default),
            Some(v) => match number(&v) {
                Some(Num::Int(i)) => {
                    let len = len as i64;
                    let pos = if i < 0 { (i + len).max(0) } else { i.min(len) };
                    Ok(pos as usize)
                }
                _ => Err(EvalError::Type(
                    "slice indices must be integers or None".to_string(),
                )),
            },
        }
    };
    match target {
        Value::List(items) => {
            let a = bound(start, items.len(), 0)?;
            let b = bound(stop, items.len(), items.len())?;
            Ok(Value::List(if a < b { items[a..b].to_vec() } else { Vec::new() }))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let a = bound(start, chars.len(), 0)?;
            let b = bound(stop, chars.len(), chars.len())?;
            Ok(Value::Str(if a < b {
                chars[a..b].iter().collect()
            } else {
                String::new()
            }))
        }
        other => Err(EvalError::Type(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

// ── Error constructors ──────────────────────────────────────────────

fn binary_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::FloorDiv => "//",
        BinaryOp::Mod => "%",
        BinaryOp::Pow => "**",
    }
}

fn overflow(op: &str) -> EvalError {
    EvalError::Value(format!("integer overflow in '{}'", op))
}

/// An integral float as `i64`; NaN, infinities and out-of-range values fail.
fn float_to_int(x: f64, op: &str) -> Result<i64, EvalError> {
    if x.is_nan() {
        return Err(EvalError::Value(
            "cannot convert float NaN to integer".to_string(),
        ));
    }
    // 2^63 is exact as a float; i64::MAX is not
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if !(-LIMIT..LIMIT).contains(&x) {
        return Err(overflow(op));
    }
    Ok(x as i64)
}

fn bad_operand(what: &str, value: &Value) -> EvalError {
    EvalError::Type(format!("bad operand type for {}: '{}'", what, value.type_name()))
}

fn no_attribute(receiver: &Value, name: &str) -> EvalError {
    EvalError::Type(format!(
        "'{}' object has no attribute '{}'",
        receiver.type_name(),
        name
    ))
}

fn arity_error(func: &str, expected: &str, given: usize) -> EvalError {
    EvalError::Type(format!(
        "{}() takes {} argument(s) ({} given)",
        func, expected, given
    ))
}

fn one_arg(func: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    let given = args.len();
    let mut it = args.into_iter();
    match (it.next(), it.next()) {
        (Some(v), None) => Ok(v),
        _ => Err(arity_error(func, "exactly 1", given)),
    }
}

fn no_args(func: &str, args: Vec<Value>) -> Result<(), EvalError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(arity_error(func, "no", args.len()))
    }
}

fn as_int(v: &Value, func: &str) -> Result<i64, EvalError> {
    match number(v) {
        Some(Num::Int(n)) => Ok(n),
        _ => Err(EvalError::Type(format!(
            "{}() expects an integer, got '{}'",
            func,
            v.type_name()
        ))),
    }
}

fn as_str<'v>(v: &'v Value, func: &str) -> Result<&'v str, EvalError> {
    match v {
        Value::Str(s) => Ok(s),
        other => Err(EvalError::Type(format!(
            "{}() expects a str, got '{}'",
            func,
            other.type_name()
        ))),
    }
}
