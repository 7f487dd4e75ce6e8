use crate::ast::*;
use crate::error::{EvalError, Position};
use crate::interpreter::EvalLimits;

/// Words that can never be used as names.
const RESERVED: &[&str] = &[
    "and", "or", "not", "in", "is", "if", "else", "for", "True", "False", "None",
];

/// Parser state: tracks position in the input string and nesting depth.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
    depth: usize,
    max_depth: usize,
}

/// Parse a guard or formula expression. Source longer than
/// `max_source_len`, or a tree deeper than `max_depth`, is rejected with
/// `EvalError::Budget`. Every operator of a left-associative chain such as
/// `a + b + c` adds a level, as do brackets and prefix operators.
pub fn parse(input: &str, limits: &EvalLimits) -> Result<Expr, EvalError> {
    if input.len() > limits.max_source_len {
        return Err(EvalError::Budget(format!(
            "expression longer than {} bytes",
            limits.max_source_len
        )));
    }
    let mut parser = Parser {
        input,
        pos: 0,
        depth: 0,
        max_depth: limits.max_depth,
    };

    let expr = parser.parse_expr()?;
    parser.skip_ws();
    if let Some(ch) = parser.peek_char() {
        return Err(parser.error_point(format!("Unexpected '{}'", ch)));
    }
    Ok(expr)
}

impl<'a> Parser<'a> {
    // ── Helpers ──────────────────────────────────────────────────────

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek_char(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    fn starts_with(&self, s: &str) -> bool {
        self.remaining().starts_with(s)
    }

    /// Skip whitespace, then consume `s` if it comes next.
    fn eat(&mut self, s: &str) -> bool {
        self.skip_ws();
        if self.starts_with(s) {
            self.advance(s.len());
            true
        } else {
            false
        }
    }

    fn expect(&mut self, s: &str) -> Result<(), EvalError> {
        if self.eat(s) {
            Ok(())
        } else {
            Err(self.error_point(format!("Expected '{}'", s)))
        }
    }

    /// Consume `kw` only when it is a whole word.
    fn eat_keyword(&mut self, kw: &str) -> bool {
        self.skip_ws();
        if self.starts_with(kw) && !self.is_name_char_at(kw.len()) {
            self.advance(kw.len());
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), EvalError> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.error_point(format!("Expected '{}'", kw)))
        }
    }

    fn is_name_char_at(&self, offset: usize) -> bool {
        self.remaining()[offset..]
            .chars()
            .next()
            .map_or(false, is_name_char)
    }

    /// Current position in the source.
    fn position(&self) -> Position {
        let consumed = &self.input[..self.pos];
        let line = consumed.matches('\n').count();
        let last_newline = consumed.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let column = self.pos - last_newline;
        Position {
            line,
            column,
            offset: self.pos,
        }
    }

    /// Create an error at a single point (current position).
    fn error_point(&self, message: String) -> EvalError {
        let pos = self.position();
        EvalError::syntax_error(message, pos, pos)
    }

    /// Create an error spanning from `begin` to the current position.
    fn error_span(&self, message: String, begin: Position) -> EvalError {
        EvalError::syntax_error(message, begin, self.position())
    }

    fn skip_ws(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() {
                self.advance(ch.len_utf8());
            } else {
                break;
            }
        }
    }

    /// Run `f` one nesting level deeper, enforcing the depth budget.
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, EvalError>,
    ) -> Result<T, EvalError> {
        self.deepen()?;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Add one level to the current depth. Callers building a chain undo
    /// their levels once the chain ends.
    fn deepen(&mut self) -> Result<(), EvalError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(EvalError::Budget(format!(
                "expression nesting deeper than {} levels",
                self.max_depth
            )));
        }
        Ok(())
    }

    // ── Expressions (lowest to highest precedence) ──────────────────

    fn parse_expr(&mut self) -> Result<Expr, EvalError> {
        self.nested(|p| p.parse_conditional())
    }

    /// `then if condition else otherwise`
    fn parse_conditional(&mut self) -> Result<Expr, EvalError> {
        let then = self.parse_or()?;
        if self.eat_keyword("if") {
            let condition = self.parse_or()?;
            self.expect_keyword("else")?;
            let otherwise = self.parse_expr()?;
            return Ok(Expr::IfElse {
                condition: Box::new(condition),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(then)
    }

    fn parse_or(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_and()?;
        let mut links = 0;
        while self.eat_keyword("or") {
            self.deepen()?;
            links += 1;
            let right = self.parse_and()?;
            left = Expr::BoolOp {
                op: BoolOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_not()?;
        let mut links = 0;
        while self.eat_keyword("and") {
            self.deepen()?;
            links += 1;
            let right = self.parse_not()?;
            left = Expr::BoolOp {
                op: BoolOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, EvalError> {
        if self.eat_keyword("not") {
            let operand = self.nested(|p| p.parse_not())?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, EvalError> {
        let first = self.parse_arith()?;
        let mut rest = Vec::new();
        while let Some(op) = self.parse_compare_op() {
            let right = self.parse_arith()?;
            rest.push((op, right));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare {
                first: Box::new(first),
                rest,
            })
        }
    }

    fn parse_compare_op(&mut self) -> Option<CompareOp> {
        self.skip_ws();
        let symbols: [(&str, CompareOp); 7] = [
            ("==", CompareOp::Eq),
            ("!=", CompareOp::NotEq),
            ("<>", CompareOp::NotEq),
            ("<=", CompareOp::LtE),
            (">=", CompareOp::GtE),
            ("<", CompareOp::Lt),
            (">", CompareOp::Gt),
        ];
        for (symbol, op) in symbols {
            if self.starts_with(symbol) {
                self.advance(symbol.len());
                return Some(op);
            }
        }

        let saved = self.pos;
        if self.eat_keyword("in") {
            return Some(CompareOp::In);
        }
        if self.eat_keyword("not") {
            if self.eat_keyword("in") {
                return Some(CompareOp::NotIn);
            }
            self.pos = saved;
            return None;
        }
        if self.eat_keyword("is") {
            if self.eat_keyword("not") {
                return Some(CompareOp::IsNot);
            }
            return Some(CompareOp::Is);
        }
        None
    }

    fn parse_arith(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_term()?;
        let mut links = 0;
        loop {
            let op = if self.eat("+") {
                BinaryOp::Add
            } else if self.eat("-") {
                BinaryOp::Sub
            } else {
                break;
            };
            self.deepen()?;
            links += 1;
            let right = self.parse_term()?;
            left = binary(op, left, right);
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_unary()?;
        let mut links = 0;
        loop {
            self.skip_ws();
            let op = if self.starts_with("**") {
                break;
            } else if self.eat("*") {
                BinaryOp::Mul
            } else if self.eat("//") {
                BinaryOp::FloorDiv
            } else if self.eat("/") {
                BinaryOp::Div
            } else if self.eat("%") {
                BinaryOp::Mod
            } else {
                break;
            };
            self.deepen()?;
            links += 1;
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        let op = if self.eat("-") {
            UnaryOp::Neg
        } else if self.eat("+") {
            UnaryOp::Pos
        } else {
            return self.parse_power();
        };
        let operand = self.nested(|p| p.parse_unary())?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    /// `base ** exponent`, right-associative; the exponent may carry a sign.
    fn parse_power(&mut self) -> Result<Expr, EvalError> {
        let base = self.parse_postfix()?;
        if self.eat("**") {
            let exponent = self.nested(|p| p.parse_unary())?;
            return Ok(binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.parse_atom()?;
        let mut links = 0;
        loop {
            self.skip_ws();
            if matches!(self.peek_char(), Some('[' | '(' | '.')) {
                self.deepen()?;
                links += 1;
            }
            match self.peek_char() {
                Some('[') => {
                    self.advance(1);
                    expr = self.parse_subscript(expr)?;
                }
                Some('(') => {
                    let func = match expr {
                        Expr::Name(name) => name,
                        _ => {
                            return Err(
                                self.error_point("Only named functions can be called".to_string())
                            )
                        }
                    };
                    self.advance(1);
                    let args = self.parse_arguments()?;
                    expr = Expr::Call { func, args };
                }
                Some('.') => {
                    self.advance(1);
                    self.skip_ws();
                    let name = self.parse_name()?;
                    self.skip_ws();
                    if self.peek_char() == Some('(') {
                        self.advance(1);
                        let args = self.parse_arguments()?;
                        expr = Expr::Method {
                            receiver: Box::new(expr),
                            method: name,
                            args,
                        };
                    } else {
                        expr = Expr::Attribute {
                            receiver: Box::new(expr),
                            name,
                        };
                    }
                }
                _ => {
                    self.depth -= links;
                    return Ok(expr);
                }
            }
        }
    }

    /// Parse the inside of `[...]` after a target; the `[` is consumed.
    fn parse_subscript(&mut self, target: Expr) -> Result<Expr, EvalError> {
        let start = if self.eat(":") {
            None
        } else {
            let index = self.parse_expr()?;
            if !self.eat(":") {
                self.expect("]")?;
                return Ok(Expr::Index {
                    target: Box::new(target),
                    index: Box::new(index),
                });
            }
            Some(Box::new(index))
        };
        let stop = if self.eat("]") {
            return Ok(Expr::Slice {
                target: Box::new(target),
                start,
                stop: None,
            });
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        self.expect("]")?;
        Ok(Expr::Slice {
            target: Box::new(target),
            start,
            stop,
        })
    }

    /// Parse a comma-separated argument list; the `(` is consumed.
    fn parse_arguments(&mut self) -> Result<Vec<Expr>, EvalError> {
        let begin = self.position();
        let mut args = Vec::new();
        if self.eat(")") {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if self.eat(")") {
                return Ok(args);
            }
            if !self.eat(",") {
                return Err(self.error_span("Expected ',' or ')' in argument list".to_string(), begin));
            }
            // Allow trailing comma
            if self.eat(")") {
                return Ok(args);
            }
        }
    }

    // ── Atoms ───────────────────────────────────────────────────────

    fn parse_atom(&mut self) -> Result<Expr, EvalError> {
        self.skip_ws();
        match self.peek_char() {
            Some('(') => {
                self.advance(1);
                let inner = self.parse_expr()?;
                self.expect(")")?;
                Ok(inner)
            }
            Some('[') => {
                self.advance(1);
                self.parse_list()
            }
            Some(quote @ ('"' | '\'')) => self
                .parse_string(quote)
                .map(|s| Expr::Constant(Constant::String(s))),
            Some(ch) if ch.is_ascii_digit() => self.parse_number(),
            Some('.') if self.remaining()[1..].starts_with(|c: char| c.is_ascii_digit()) => {
                self.parse_number()
            }
            Some(ch) if is_name_start(ch) => {
                let begin = self.position();
                let name = self.parse_name()?;
                match name.as_str() {
                    "True" => Ok(Expr::Constant(Constant::Boolean(true))),
                    "False" => Ok(Expr::Constant(Constant::Boolean(false))),
                    "None" => Ok(Expr::Constant(Constant::None)),
                    kw if RESERVED.contains(&kw) => {
                        Err(self.error_span(format!("Unexpected keyword '{}'", kw), begin))
                    }
                    _ => Ok(Expr::Name(name)),
                }
            }
            Some('$') => Err(self.error_point("Unexpanded variable".to_string())),
            Some(ch) => Err(self.error_point(format!("Unexpected '{}'", ch))),
            None => Err(self.error_point("Expected an expression".to_string())),
        }
    }

    /// Parse a list literal or comprehension; the `[` is consumed.
    fn parse_list(&mut self) -> Result<Expr, EvalError> {
        let begin = self.position();
        if self.eat("]") {
            return Ok(Expr::List(Vec::new()));
        }

        let first = self.parse_expr()?;

        if self.eat_keyword("for") {
            self.skip_ws();
            let var = self.parse_name()?;
            self.expect_keyword("in")?;
            let iter = self.parse_or()?;
            let condition = if self.eat_keyword("if") {
                Some(Box::new(self.parse_or()?))
            } else {
                None
            };
            self.expect("]")?;
            return Ok(Expr::ListComp {
                element: Box::new(first),
                var,
                iter: Box::new(iter),
                condition,
            });
        }

        let mut elements = vec![first];
        loop {
            if self.eat("]") {
                return Ok(Expr::List(elements));
            }
            if self.eat(",") {
                // Allow trailing comma
                if self.eat("]") {
                    return Ok(Expr::List(elements));
                }
                elements.push(self.parse_expr()?);
            } else if self.pos >= self.input.len() {
                return Err(self.error_span("Unclosed '['".to_string(), begin));
            } else {
                return Err(self.error_point("Expected ',' or ']' in list".to_string()));
            }
        }
    }

    fn parse_name(&mut self) -> Result<String, EvalError> {
        let start = self.pos;
        if let Some(ch) = self.peek_char() {
            if is_name_start(ch) {
                self.advance(ch.len_utf8());
                while let Some(ch) = self.peek_char() {
                    if is_name_char(ch) {
                        self.advance(ch.len_utf8());
                    } else {
                        break;
                    }
                }
            }
        }
        if self.pos == start {
            return Err(self.error_point("Expected a name".to_string()));
        }
        Ok(self.input[start..self.pos].to_string())
    }

    // ── Numbers ─────────────────────────────────────────────────────

    fn parse_number(&mut self) -> Result<Expr, EvalError> {
        let start = self.pos;
        let begin = self.position();
        let mut is_float = false;

        self.skip_digits();
        if self.peek_char() == Some('.') {
            is_float = true;
            self.advance(1);
            self.skip_digits();
        }

        if let Some('e' | 'E') = self.peek_char() {
            is_float = true;
            self.advance(1);
            if let Some('+' | '-') = self.peek_char() {
                self.advance(1);
            }
            let exp_start = self.pos;
            self.skip_digits();
            if self.pos == exp_start {
                return Err(self.error_span("Expected exponent digits".to_string(), begin));
            }
        }

        if self.peek_char().map_or(false, is_name_start) {
            return Err(self.error_span("Invalid number literal".to_string(), begin));
        }

        let text = &self.input[start..self.pos];
        if is_float {
            let x: f64 = text
                .parse()
                .map_err(|_| self.error_span(format!("Invalid number: {}", text), begin))?;
            Ok(Expr::Constant(Constant::Float(x)))
        } else {
            let n: i64 = text
                .parse()
                .map_err(|_| self.error_span(format!("Integer too large: {}", text), begin))?;
            Ok(Expr::Constant(Constant::Integer(n)))
        }
    }

    fn skip_digits(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_digit() {
                self.advance(1);
            } else {
                break;
            }
        }
    }

    // ── Strings ─────────────────────────────────────────────────────

    /// Parse a single- or double-quoted string with backslash escapes.
    fn parse_string(&mut self, quote: char) -> Result<String, EvalError> {
        let begin = self.position();
        self.advance(1);
        let mut result = String::new();
        loop {
            match self.peek_char() {
                None | Some('\r') | Some('\n') => {
                    return Err(self.error_span("Unterminated string".to_string(), begin));
                }
                Some(ch) if ch == quote => {
                    self.advance(1);
                    return Ok(result);
                }
                Some('\\') => {
                    self.advance(1);
                    let esc = self.parse_escape_char()?;
                    result.push(esc);
                }
                Some(ch) => {
                    self.advance(ch.len_utf8());
                    result.push(ch);
                }
            }
        }
    }

    fn parse_escape_char(&mut self) -> Result<char, EvalError> {
        let ch = match self.peek_char() {
            None => return Err(self.error_point("Unterminated escape sequence".to_string())),
            Some(ch) => ch,
        };
        self.advance(ch.len_utf8());
        Ok(match ch {
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            '0' => '\0',
            // Passthrough: \x -> x
            other => other,
        })
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn is_name_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}

fn is_name_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}
