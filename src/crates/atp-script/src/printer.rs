//! Deterministic code generation
//!
//! The printer is a pure function of the AST: identical trees produce
//! byte-identical text. Output is normalized (always-braced bodies,
//! always-parenthesized arrow parameters, double-quoted strings), so
//! printing its own parse is stable - the property the transform cache
//! and the idempotence guarantee rest on.

use crate::ast::*;

/// JavaScript-style number formatting: integral values print without a
/// fractional part, non-finite values by name.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == n.trunc() && n.abs() <= 9_007_199_254_740_992.0 {
        return format!("{}", n as i64);
    }
    format!("{}", n)
}

/// Print a whole program.
pub fn print_program(program: &Program) -> String {
    let mut printer = Printer::new();
    for stmt in &program.body {
        printer.stmt(stmt);
    }
    printer.out
}

struct Printer {
    out: String,
    indent: usize,
}

// Precedence levels used to decide where parentheses are required.
const PREC_ASSIGN: u8 = 2;
const PREC_COND: u8 = 3;
const PREC_OR: u8 = 4;
const PREC_AND: u8 = 5;
const PREC_EQ: u8 = 8;
const PREC_REL: u8 = 9;
const PREC_ADD: u8 = 11;
const PREC_MUL: u8 = 12;
const PREC_UNARY: u8 = 14;
const PREC_POSTFIX: u8 = 15;
const PREC_CALL: u8 = 17;
const PREC_PRIMARY: u8 = 20;

fn prec(expr: &Expr) -> u8 {
    match expr {
        Expr::Assign { .. } | Expr::Function(_) => PREC_ASSIGN,
        Expr::Conditional { .. } => PREC_COND,
        Expr::Logical { op, .. } => match op {
            LogicalOp::And => PREC_AND,
            LogicalOp::Or | LogicalOp::Nullish => PREC_OR,
        },
        Expr::Binary { op, .. } => match op {
            BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::StrictEq | BinaryOp::StrictNotEq => PREC_EQ,
            BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => PREC_REL,
            BinaryOp::Add | BinaryOp::Sub => PREC_ADD,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => PREC_MUL,
        },
        Expr::Unary { .. } | Expr::Await(_) => PREC_UNARY,
        Expr::Update { prefix, .. } => {
            if *prefix {
                PREC_UNARY
            } else {
                PREC_POSTFIX
            }
        }
        Expr::Member { .. } | Expr::Call { .. } | Expr::New { .. } => PREC_CALL,
        _ => PREC_PRIMARY,
    }
}

/// Whether an expression begins with `{` or `function`, which would be
/// misparsed at statement (or concise arrow body) position.
fn starts_ambiguously(expr: &Expr) -> bool {
    match expr {
        Expr::Object(_) => true,
        Expr::Function(func) => !func.is_arrow,
        Expr::Member { object, .. } => starts_ambiguously(object),
        Expr::Call { callee, .. } => starts_ambiguously(callee),
        Expr::Binary { left, .. } | Expr::Logical { left, .. } => starts_ambiguously(left),
        Expr::Conditional { cond, .. } => starts_ambiguously(cond),
        Expr::Assign { target, .. } => starts_ambiguously(target),
        Expr::Update {
            prefix: false,
            target,
            ..
        } => starts_ambiguously(target),
        _ => false,
    }
}

impl Printer {
    fn new() -> Self {
        Self {
            out: String::new(),
            indent: 0,
        }
    }

    fn push(&mut self, text: &str) {
        self.out.push_str(text);
    }

    fn newline(&mut self) {
        self.out.push('\n');
    }

    fn pad(&mut self) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
    }

    // ----- statements -------------------------------------------------

    fn stmt(&mut self, stmt: &Stmt) {
        self.pad();
        self.stmt_inner(stmt);
        self.newline();
    }

    fn stmt_inner(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::VarDecl { kind, decls } => {
                self.push(kind.keyword());
                self.push(" ");
                for (i, decl) in decls.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.push(&decl.name);
                    if let Some(init) = &decl.init {
                        self.push(" = ");
                        self.expr_prec(init, PREC_ASSIGN);
                    }
                }
                self.push(";");
            }
            Stmt::FunctionDecl { name, func } => {
                if func.is_async {
                    self.push("async ");
                }
                self.push("function ");
                self.push(name);
                self.params(&func.params);
                self.push(" ");
                self.braced_body(&func.body);
            }
            Stmt::Expr(expr) => {
                if starts_ambiguously(expr) {
                    self.push("(");
                    self.expr(expr);
                    self.push(")");
                } else {
                    self.expr(expr);
                }
                self.push(";");
            }
            Stmt::Return(value) => {
                self.push("return");
                if let Some(value) = value {
                    self.push(" ");
                    if starts_ambiguously(value) {
                        self.push("(");
                        self.expr(value);
                        self.push(")");
                    } else {
                        self.expr(value);
                    }
                }
                self.push(";");
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.push("if (");
                self.expr(cond);
                self.push(") ");
                self.body_as_block(then_branch);
                if let Some(else_branch) = else_branch {
                    self.push(" else ");
                    if matches!(else_branch.as_ref(), Stmt::If { .. }) {
                        self.stmt_inner(else_branch);
                    } else {
                        self.body_as_block(else_branch);
                    }
                }
            }
            Stmt::While { cond, body } => {
                self.push("while (");
                self.expr(cond);
                self.push(") ");
                self.body_as_block(body);
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                self.push("for (");
                match init {
                    Some(init) => match init.as_ref() {
                        Stmt::VarDecl { .. } | Stmt::Expr(_) => {
                            // re-use statement printing minus the newline; both end with ';'
                            let mut inner = Printer::new();
                            inner.stmt_inner(init);
                            self.push(&inner.out);
                        }
                        _ => self.push(";"),
                    },
                    None => self.push(";"),
                }
                self.push(" ");
                if let Some(cond) = cond {
                    self.expr(cond);
                }
                self.push("; ");
                if let Some(step) = step {
                    self.expr(step);
                }
                self.push(") ");
                self.body_as_block(body);
            }
            Stmt::ForOf {
                decl,
                name,
                iterable,
                body,
            } => {
                self.push("for (");
                self.push(decl.keyword());
                self.push(" ");
                self.push(name);
                self.push(" of ");
                self.expr(iterable);
                self.push(") ");
                self.body_as_block(body);
            }
            Stmt::Block(body) => self.braced_body(body),
            Stmt::Break => self.push("break;"),
            Stmt::Continue => self.push("continue;"),
            Stmt::Throw(value) => {
                self.push("throw ");
                self.expr(value);
                self.push(";");
            }
            Stmt::Try {
                block,
                catch,
                finally,
            } => {
                self.push("try ");
                self.braced_body(block);
                if let Some(catch) = catch {
                    self.push(" catch ");
                    if let Some(param) = &catch.param {
                        self.push("(");
                        self.push(param);
                        self.push(") ");
                    }
                    self.braced_body(&catch.body);
                }
                if let Some(finally) = finally {
                    self.push(" finally ");
                    self.braced_body(finally);
                }
            }
            Stmt::Empty => self.push(";"),
        }
    }

    /// Print a loop/if body as a braced block regardless of its shape.
    fn body_as_block(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Block(body) => self.braced_body(body),
            other => {
                let single = [other.clone()];
                self.braced_body(&single);
            }
        }
    }

    fn braced_body(&mut self, body: &[Stmt]) {
        if body.is_empty() {
            self.push("{}");
            return;
        }
        self.push("{");
        self.newline();
        self.indent += 1;
        for stmt in body {
            self.stmt(stmt);
        }
        self.indent -= 1;
        self.pad();
        self.push("}");
    }

    fn params(&mut self, params: &[String]) {
        self.push("(");
        for (i, param) in params.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.push(param);
        }
        self.push(")");
    }

    // ----- expressions ------------------------------------------------

    fn expr(&mut self, expr: &Expr) {
        self.expr_prec(expr, 0);
    }

    /// Print `expr`, parenthesizing when its precedence is below `min`.
    fn expr_prec(&mut self, expr: &Expr, min: u8) {
        if prec(expr) < min {
            self.push("(");
            self.expr_bare(expr);
            self.push(")");
        } else {
            self.expr_bare(expr);
        }
    }

    fn expr_bare(&mut self, expr: &Expr) {
        match expr {
            Expr::Number(n) => self.push(&format_number(*n)),
            Expr::Str(text) => self.string_literal(text),
            Expr::Template(parts) => self.template(parts),
            Expr::Bool(b) => self.push(if *b { "true" } else { "false" }),
            Expr::Null => self.push("null"),
            Expr::Undefined => self.push("undefined"),
            Expr::Ident(name) => self.push(name),
            Expr::Array(elements) => {
                self.push("[");
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.expr_prec(element, PREC_ASSIGN);
                }
                self.push("]");
            }
            Expr::Object(props) => {
                if props.is_empty() {
                    self.push("{}");
                    return;
                }
                self.push("{");
                for (i, (key, value)) in props.iter().enumerate() {
                    if i > 0 {
                        self.push(",");
                    }
                    self.push(" ");
                    match key {
                        PropKey::Ident(name) => self.push(name),
                        PropKey::Str(text) => self.string_literal(text),
                    }
                    self.push(": ");
                    self.expr_prec(value, PREC_ASSIGN);
                }
                self.push(" }");
            }
            Expr::Function(func) => self.function(func),
            Expr::Unary { op, expr } => {
                match op {
                    UnaryOp::Not => self.push("!"),
                    UnaryOp::Neg => self.push("-"),
                    UnaryOp::Plus => self.push("+"),
                    UnaryOp::TypeOf => self.push("typeof "),
                }
                // operand at <= unary level keeps '--x' from re-lexing
                self.expr_prec(expr, PREC_UNARY + 1);
            }
            Expr::Binary { op, left, right } => {
                let my = prec(expr);
                self.expr_prec(left, my);
                self.push(match op {
                    BinaryOp::Add => " + ",
                    BinaryOp::Sub => " - ",
                    BinaryOp::Mul => " * ",
                    BinaryOp::Div => " / ",
                    BinaryOp::Mod => " % ",
                    BinaryOp::Eq => " == ",
                    BinaryOp::NotEq => " != ",
                    BinaryOp::StrictEq => " === ",
                    BinaryOp::StrictNotEq => " !== ",
                    BinaryOp::Lt => " < ",
                    BinaryOp::LtEq => " <= ",
                    BinaryOp::Gt => " > ",
                    BinaryOp::GtEq => " >= ",
                });
                self.expr_prec(right, my + 1);
            }
            Expr::Logical { op, left, right } => {
                let my = prec(expr);
                self.expr_prec(left, my);
                self.push(match op {
                    LogicalOp::And => " && ",
                    LogicalOp::Or => " || ",
                    LogicalOp::Nullish => " ?? ",
                });
                self.expr_prec(right, my + 1);
            }
            Expr::Conditional {
                cond,
                then_expr,
                else_expr,
            } => {
                self.expr_prec(cond, PREC_COND + 1);
                self.push(" ? ");
                self.expr_prec(then_expr, PREC_ASSIGN);
                self.push(" : ");
                self.expr_prec(else_expr, PREC_ASSIGN);
            }
            Expr::Assign { op, target, value } => {
                self.expr_prec(target, PREC_CALL);
                self.push(match op {
                    AssignOp::Assign => " = ",
                    AssignOp::Add => " += ",
                    AssignOp::Sub => " -= ",
                    AssignOp::Mul => " *= ",
                    AssignOp::Div => " /= ",
                    AssignOp::Mod => " %= ",
                });
                self.expr_prec(value, PREC_ASSIGN);
            }
            Expr::Update { op, prefix, target } => {
                let text = match op {
                    UpdateOp::Inc => "++",
                    UpdateOp::Dec => "--",
                };
                if *prefix {
                    self.push(text);
                    self.expr_prec(target, PREC_UNARY);
                } else {
                    self.expr_prec(target, PREC_POSTFIX);
                    self.push(text);
                }
            }
            Expr::Member { object, property } => {
                self.expr_prec(object, PREC_CALL);
                match property {
                    MemberProp::Static(name) => {
                        self.push(".");
                        self.push(name);
                    }
                    MemberProp::Computed(index) => {
                        self.push("[");
                        self.expr(index);
                        self.push("]");
                    }
                }
            }
            Expr::Call { callee, args } => {
                self.expr_prec(callee, PREC_CALL);
                self.arguments(args);
            }
            Expr::New { callee, args } => {
                self.push("new ");
                self.expr_prec(callee, PREC_CALL);
                self.arguments(args);
            }
            Expr::Await(inner) => {
                self.push("await ");
                self.expr_prec(inner, PREC_UNARY);
            }
        }
    }

    fn arguments(&mut self, args: &[Expr]) {
        self.push("(");
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.expr_prec(arg, PREC_ASSIGN);
        }
        self.push(")");
    }

    fn function(&mut self, func: &Function) {
        if func.is_arrow {
            if func.is_async {
                self.push("async ");
            }
            self.params(&func.params);
            self.push(" => ");
            if let Some(body) = &func.concise_body {
                if starts_ambiguously(body) {
                    self.push("(");
                    self.expr(body);
                    self.push(")");
                } else {
                    self.expr_prec(body, PREC_ASSIGN);
                }
            } else {
                self.braced_body(&func.body);
            }
        } else {
            if func.is_async {
                self.push("async ");
            }
            self.push("function");
            if let Some(name) = &func.name {
                self.push(" ");
                self.push(name);
            }
            self.params(&func.params);
            self.push(" ");
            self.braced_body(&func.body);
        }
    }

    fn string_literal(&mut self, text: &str) {
        self.push("\"");
        for c in text.chars() {
            match c {
                '"' => self.push("\\\""),
                '\\' => self.push("\\\\"),
                '\n' => self.push("\\n"),
                '\r' => self.push("\\r"),
                '\t' => self.push("\\t"),
                '\0' => self.push("\\0"),
                other => self.out.push(other),
            }
        }
        self.push("\"");
    }

    fn template(&mut self, parts: &[TemplatePart]) {
        self.push("`");
        for part in parts {
            match part {
                TemplatePart::Chunk(text) => {
                    let mut chars = text.chars().peekable();
                    while let Some(c) = chars.next() {
                        match c {
                            '`' => self.push("\\`"),
                            '\\' => self.push("\\\\"),
                            '$' if chars.peek() == Some(&'{') => self.push("\\$"),
                            other => self.out.push(other),
                        }
                    }
                }
                TemplatePart::Expr(expr) => {
                    self.push("${");
                    self.expr(expr);
                    self.push("}");
                }
            }
        }
        self.push("`");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn roundtrip(source: &str) -> String {
        print_program(&parse_program(source).unwrap())
    }

    #[test]
    fn printing_is_stable_under_reparse() {
        let sources = [
            "return 1 + 2;",
            r#"return await atp.llm.complete({ prompt: "hi" });"#,
            "let s = 0;\nfor (const x of [10, 20, 30]) {\n  s += Number(x);\n}\nreturn s;",
            "const f = async (x) => await g(x, 1);",
            "if (a < b) { c(); } else { d(); }",
            "while (true) { tick(); }",
            "try { risky(); } catch (e) { return e.message; } finally { done(); }",
            "const t = `a${x + 1}b`;",
            "const o = { a: 1, \"b c\": 2 };",
            "return -(-x) + !flag;",
            "for (let i = 0, j = 10; i < j; i++) { use(i); }",
        ];
        for source in sources {
            let once = roundtrip(source);
            let twice = roundtrip(&once);
            assert_eq!(once, twice, "printing not stable for: {}", source);
        }
    }

    #[test]
    fn identical_asts_print_identically() {
        let a = print_program(&parse_program("return f(1) + 2;").unwrap());
        let b = print_program(&parse_program("return f(1) + 2;").unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn object_expression_statement_is_parenthesized() {
        let printed = roundtrip("({ a: 1 });");
        assert!(printed.starts_with('('), "got: {}", printed);
        // and it must stay parseable
        parse_program(&printed).unwrap();
    }

    #[test]
    fn precedence_parens_are_emitted() {
        let printed = roundtrip("return (a + b) * c;");
        assert!(printed.contains("(a + b) * c"), "got: {}", printed);
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(-7.0), "-7");
        assert_eq!(format_number(f64::NAN), "NaN");
    }

    #[test]
    fn concise_arrow_with_object_body() {
        let printed = roundtrip("const f = (x) => ({ v: x });");
        parse_program(&printed).unwrap();
        let again = roundtrip(&printed);
        assert_eq!(printed, again);
    }
}
