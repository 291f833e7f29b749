//! The resumable rewrite
//!
//! Rewrites the constructs that need replay awareness into calls to the
//! `__atp` host primitive table:
//!
//! | Source construct                     | Rewritten to                         |
//! |--------------------------------------|--------------------------------------|
//! | `for (const x of it) body`           | `await __atp.resumableForOf(it, async (x) => body)` |
//! | `while (c) body`                     | `await __atp.resumableWhile(() => c, async () => body)` |
//! | `for (init; c; s) body`              | `{ init; await __atp.resumableForLoop(() => c, () => s, async () => body); }` |
//! | `arr.map(async cb)` (and friends)    | `await __atp.resumableMap(arr, cb)`  |
//! | batchable `map`/`filter`/`forEach`   | `await __atp.batchMap(arr, cb, desc, kind, parallelId)` |
//! | `Promise.all([...])`                 | `await __atp.resumablePromiseAll([thunks])` |
//!
//! The rewrite runs bottom-up, so nested constructs are transformed
//! before their parents. Output is printed with the deterministic
//! printer; transforming already-transformed code is a no-op because
//! every rewritten construct is gone from the output and `__atp` callees
//! are never re-wrapped.
//!
//! A site the rewriter cannot handle is left untouched (it executes
//! without resumability) and logged as a warning; parsing failures are
//! fatal and reported with line/column.

mod batch;

use crate::ast::*;
use crate::error::ParseError;
use crate::parser::parse_program;
use crate::printer::print_program;
use std::sync::Arc;

pub use batch::BatchSpec;

/// Array methods with sequential resumable variants.
const ARRAY_METHODS: &[&str] = &[
    "map", "forEach", "filter", "reduce", "find", "some", "every", "flatMap",
];

/// What the transformer did, recorded alongside the transformed source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformMetadata {
    /// Distinct pattern names encountered, in first-seen order.
    pub patterns: Vec<String>,
    pub loops_transformed: usize,
    pub array_methods_transformed: usize,
    pub parallel_transformed: usize,
    pub batch_emitted: bool,
}

/// Transformed program: deterministic source text, the rewritten tree,
/// and metadata about what was rewritten.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub source: String,
    pub program: Program,
    pub metadata: TransformMetadata,
}

/// Parse and transform source text.
pub fn transform_source(source: &str) -> Result<TransformOutput, ParseError> {
    let program = parse_program(source)?;
    Ok(transform_program(program))
}

/// Transform an already-parsed program.
pub fn transform_program(program: Program) -> TransformOutput {
    let mut rewriter = Rewriter::default();
    let body = program
        .body
        .into_iter()
        .map(|stmt| rewriter.stmt(stmt))
        .collect();
    let program = Program { body };
    let source = print_program(&program);
    TransformOutput {
        source,
        program,
        metadata: rewriter.meta,
    }
}

#[derive(Default)]
struct Rewriter {
    meta: TransformMetadata,
    parallel_seq: usize,
}

fn atp_primitive(name: &str) -> Expr {
    Expr::static_member(Expr::Ident("__atp".to_string()), name)
}

/// `() => expr` thunk.
fn thunk(expr: Expr) -> Expr {
    Expr::Function(Arc::new(Function::arrow_expr(Vec::new(), expr, false)))
}

/// `async () => expr` thunk.
fn async_thunk(expr: Expr) -> Expr {
    Expr::Function(Arc::new(Function::arrow_expr(Vec::new(), expr, true)))
}

/// `async (params) => { body }` from a statement body.
fn async_body(params: Vec<String>, body: Stmt) -> Expr {
    let stmts = match body {
        Stmt::Block(stmts) => stmts,
        other => vec![other],
    };
    Expr::Function(Arc::new(Function::arrow_block(params, stmts, true)))
}

impl Rewriter {
    fn note(&mut self, pattern: &str) {
        if !self.meta.patterns.iter().any(|p| p == pattern) {
            self.meta.patterns.push(pattern.to_string());
        }
    }

    fn stmt(&mut self, stmt: Stmt) -> Stmt {
        match stmt {
            Stmt::ForOf {
                decl: _,
                name,
                iterable,
                body,
            } => {
                let iterable = self.expr(iterable);
                let body = self.stmt(*body);
                self.meta.loops_transformed += 1;
                self.note("for-of");
                Stmt::Expr(Expr::Await(Box::new(Expr::call(
                    atp_primitive("resumableForOf"),
                    vec![iterable, async_body(vec![name], body)],
                ))))
            }
            Stmt::While { cond, body } => {
                let cond = self.expr(cond);
                let body = self.stmt(*body);
                self.meta.loops_transformed += 1;
                self.note("while");
                Stmt::Expr(Expr::Await(Box::new(Expr::call(
                    atp_primitive("resumableWhile"),
                    vec![thunk(cond), async_body(Vec::new(), body)],
                ))))
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                // the initializer is hoisted so its bindings are shared
                // by the cond/step/body closures
                let init = init.map(|s| self.stmt(*s));
                let cond = self.expr(cond.unwrap_or(Expr::Bool(true)));
                let step = step.map(|s| self.expr(s)).unwrap_or(Expr::Undefined);
                let body = self.stmt(*body);
                self.meta.loops_transformed += 1;
                self.note("for");

                let call = Stmt::Expr(Expr::Await(Box::new(Expr::call(
                    atp_primitive("resumableForLoop"),
                    vec![thunk(cond), thunk(step), async_body(Vec::new(), body)],
                ))));
                match init {
                    Some(init) => Stmt::Block(vec![init, call]),
                    None => Stmt::Block(vec![call]),
                }
            }
            Stmt::VarDecl { kind, decls } => Stmt::VarDecl {
                kind,
                decls: decls
                    .into_iter()
                    .map(|d| VarDeclarator {
                        name: d.name,
                        init: d.init.map(|e| self.expr(e)),
                    })
                    .collect(),
            },
            Stmt::FunctionDecl { name, func } => Stmt::FunctionDecl {
                name,
                func: Arc::new(self.function((*func).clone())),
            },
            Stmt::Expr(expr) => Stmt::Expr(self.expr(expr)),
            Stmt::Return(value) => Stmt::Return(value.map(|e| self.expr(e))),
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => Stmt::If {
                cond: self.expr(cond),
                then_branch: Box::new(self.stmt(*then_branch)),
                else_branch: else_branch.map(|s| Box::new(self.stmt(*s))),
            },
            Stmt::Block(body) => Stmt::Block(body.into_iter().map(|s| self.stmt(s)).collect()),
            Stmt::Throw(expr) => Stmt::Throw(self.expr(expr)),
            Stmt::Try {
                block,
                catch,
                finally,
            } => Stmt::Try {
                block: block.into_iter().map(|s| self.stmt(s)).collect(),
                catch: catch.map(|c| CatchClause {
                    param: c.param,
                    body: c.body.into_iter().map(|s| self.stmt(s)).collect(),
                }),
                finally: finally.map(|f| f.into_iter().map(|s| self.stmt(s)).collect()),
            },
            other @ (Stmt::Break | Stmt::Continue | Stmt::Empty) => other,
        }
    }

    fn function(&mut self, func: Function) -> Function {
        Function {
            name: func.name,
            params: func.params,
            body: func.body.into_iter().map(|s| self.stmt(s)).collect(),
            concise_body: func.concise_body.map(|e| Box::new(self.expr(*e))),
            is_async: func.is_async,
            is_arrow: func.is_arrow,
        }
    }

    fn expr(&mut self, expr: Expr) -> Expr {
        match expr {
            Expr::Call { callee, args } => self.call(*callee, args),
            Expr::Function(func) => Expr::Function(Arc::new(self.function((*func).clone()))),
            Expr::Array(elements) => {
                Expr::Array(elements.into_iter().map(|e| self.expr(e)).collect())
            }
            Expr::Object(props) => Expr::Object(
                props
                    .into_iter()
                    .map(|(k, v)| (k, self.expr(v)))
                    .collect(),
            ),
            Expr::Template(parts) => Expr::Template(
                parts
                    .into_iter()
                    .map(|part| match part {
                        TemplatePart::Expr(e) => TemplatePart::Expr(Box::new(self.expr(*e))),
                        chunk => chunk,
                    })
                    .collect(),
            ),
            Expr::Unary { op, expr } => Expr::Unary {
                op,
                expr: Box::new(self.expr(*expr)),
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op,
                left: Box::new(self.expr(*left)),
                right: Box::new(self.expr(*right)),
            },
            Expr::Logical { op, left, right } => Expr::Logical {
                op,
                left: Box::new(self.expr(*left)),
                right: Box::new(self.expr(*right)),
            },
            Expr::Conditional {
                cond,
                then_expr,
                else_expr,
            } => Expr::Conditional {
                cond: Box::new(self.expr(*cond)),
                then_expr: Box::new(self.expr(*then_expr)),
                else_expr: Box::new(self.expr(*else_expr)),
            },
            Expr::Assign { op, target, value } => Expr::Assign {
                op,
                target: Box::new(self.expr(*target)),
                value: Box::new(self.expr(*value)),
            },
            Expr::Update { op, prefix, target } => Expr::Update {
                op,
                prefix,
                target: Box::new(self.expr(*target)),
            },
            Expr::Member { object, property } => Expr::Member {
                object: Box::new(self.expr(*object)),
                property: match property {
                    MemberProp::Computed(e) => MemberProp::Computed(Box::new(self.expr(*e))),
                    fixed => fixed,
                },
            },
            Expr::New { callee, args } => Expr::New {
                callee: Box::new(self.expr(*callee)),
                args: args.into_iter().map(|e| self.expr(e)).collect(),
            },
            Expr::Await(inner) => Expr::Await(Box::new(self.expr(*inner))),
            leaf => leaf,
        }
    }

    fn call(&mut self, callee: Expr, args: Vec<Expr>) -> Expr {
        // Promise.all / Promise.allSettled
        if let Expr::Member {
            object,
            property: MemberProp::Static(method),
        } = &callee
        {
            if matches!(object.as_ref(), Expr::Ident(name) if name == "Promise")
                && (method == "all" || method == "allSettled")
                && args.len() == 1
            {
                let primitive = if method == "all" {
                    self.note("promise-all");
                    "resumablePromiseAll"
                } else {
                    self.note("promise-all-settled");
                    "resumablePromiseAllSettled"
                };
                let arg = self.expr(args.into_iter().next().unwrap());
                let arg = match arg {
                    // thunkify literal elements so per-slot pauses and
                    // rejections attribute to their slot
                    Expr::Array(elements) => Expr::Array(
                        elements
                            .into_iter()
                            .map(|e| match e {
                                already @ Expr::Function(_) => already,
                                other => async_thunk(other),
                            })
                            .collect(),
                    ),
                    other => other,
                };
                self.meta.parallel_transformed += 1;
                return Expr::Await(Box::new(Expr::call(atp_primitive(primitive), vec![arg])));
            }
        }

        // array methods with an async callback
        if let Expr::Member {
            object,
            property: MemberProp::Static(method),
        } = &callee
        {
            let is_primitive_table = matches!(object.as_ref(), Expr::Ident(name) if name == "__atp");
            if !is_primitive_table && ARRAY_METHODS.contains(&method.as_str()) && !args.is_empty()
            {
                let is_async_callback =
                    matches!(&args[0], Expr::Function(func) if func.is_async);
                if is_async_callback {
                    let method = method.clone();
                    let object = self.expr((**object).clone());
                    let mut args: Vec<Expr> = args.into_iter().map(|e| self.expr(e)).collect();
                    let callback = args.remove(0);

                    if let Expr::Function(func) = &callback {
                        if matches!(method.as_str(), "map" | "filter" | "forEach") {
                            if let Some(spec) = batch::analyze(func) {
                                self.parallel_seq += 1;
                                let parallel_id = format!("p{}", self.parallel_seq);
                                self.meta.batch_emitted = true;
                                self.note("batch-parallel");
                                let primitive = match method.as_str() {
                                    "map" => "batchMap",
                                    "filter" => "batchFilter",
                                    _ => "batchForEach",
                                };
                                return Expr::Await(Box::new(Expr::call(
                                    atp_primitive(primitive),
                                    vec![
                                        object,
                                        callback,
                                        Expr::Function(Arc::new(spec.descriptor)),
                                        Expr::Str(spec.kind.to_string()),
                                        Expr::Str(parallel_id),
                                    ],
                                )));
                            }
                        }
                    }

                    self.meta.array_methods_transformed += 1;
                    self.note(&format!("array-method:{}", method));
                    let primitive = format!(
                        "resumable{}{}",
                        method[..1].to_uppercase(),
                        &method[1..]
                    );
                    let mut call_args = vec![object, callback];
                    call_args.extend(args);
                    return Expr::Await(Box::new(Expr::call(
                        atp_primitive(&primitive),
                        call_args,
                    )));
                }
            }
        }

        Expr::Call {
            callee: Box::new(self.expr(callee)),
            args: args.into_iter().map(|e| self.expr(e)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_of_is_rewritten() {
        let out = transform_source(
            "let s = 0; for (const x of [10, 20, 30]) { s += Number(x); } return s;",
        )
        .unwrap();
        assert!(out.source.contains("__atp.resumableForOf("), "{}", out.source);
        assert!(!out.source.contains("for ("), "{}", out.source);
        assert_eq!(out.metadata.loops_transformed, 1);
        assert_eq!(out.metadata.patterns, vec!["for-of".to_string()]);
    }

    #[test]
    fn while_is_rewritten_with_cond_thunk() {
        let out = transform_source("while (i < 3) { i += 1; }").unwrap();
        assert!(
            out.source.contains("__atp.resumableWhile(() => i < 3, async () => {"),
            "{}",
            out.source
        );
        assert_eq!(out.metadata.loops_transformed, 1);
    }

    #[test]
    fn classic_for_hoists_init() {
        let out = transform_source("for (let i = 0; i < 3; i++) { use(i); }").unwrap();
        assert!(out.source.contains("let i = 0;"), "{}", out.source);
        assert!(out.source.contains("__atp.resumableForLoop("), "{}", out.source);
        assert!(!out.source.contains("for ("), "{}", out.source);
    }

    #[test]
    fn async_map_becomes_resumable() {
        let out = transform_source(
            "return await items.map(async (x) => { log(x); return await f(x); });",
        )
        .unwrap();
        assert!(out.source.contains("__atp.resumableMap(items, "), "{}", out.source);
        assert_eq!(out.metadata.array_methods_transformed, 1);
        assert!(!out.metadata.batch_emitted);
    }

    #[test]
    fn sync_map_is_left_alone() {
        let out = transform_source("return items.map((x) => x + 1);").unwrap();
        assert!(out.source.contains("items.map((x) => x + 1)"), "{}", out.source);
        assert_eq!(out.metadata.array_methods_transformed, 0);
    }

    #[test]
    fn single_llm_call_map_is_batched() {
        let out = transform_source(
            "return await items.map(async (x) => await atp.llm.complete({ prompt: String(x) }));",
        )
        .unwrap();
        assert!(out.source.contains("__atp.batchMap(items, "), "{}", out.source);
        assert!(out.source.contains("\"llm\""), "{}", out.source);
        assert!(out.source.contains("\"p1\""), "{}", out.source);
        assert!(out.metadata.batch_emitted);
    }

    #[test]
    fn promise_all_is_thunkified() {
        let out = transform_source("return await Promise.all([f(1), f(2)]);").unwrap();
        assert!(
            out.source
                .contains("__atp.resumablePromiseAll([async () => f(1), async () => f(2)])"),
            "{}",
            out.source
        );
        assert_eq!(out.metadata.parallel_transformed, 1);
    }

    #[test]
    fn transform_is_idempotent() {
        let source = "let s = 0;\nfor (const x of xs) { const v = await atp.llm.complete({ prompt: String(x) }); s += Number(v); }\nreturn await Promise.all([g(1), g(2)]);";
        let once = transform_source(source).unwrap();
        let twice = transform_source(&once.source).unwrap();
        assert_eq!(once.source, twice.source);
        assert_eq!(twice.metadata.loops_transformed, 0);
        assert_eq!(twice.metadata.parallel_transformed, 0);
        assert!(!twice.metadata.batch_emitted);
    }

    #[test]
    fn transform_is_deterministic() {
        let source = "for (const x of xs) { await atp.tools.invoke(\"t\", x); }";
        let a = transform_source(source).unwrap();
        let b = transform_source(source).unwrap();
        assert_eq!(a.source, b.source);
    }

    #[test]
    fn nested_loops_are_rewritten_bottom_up() {
        let out = transform_source(
            "for (const a of xs) { for (const b of ys) { await use(a, b); } }",
        )
        .unwrap();
        assert_eq!(out.metadata.loops_transformed, 2);
        assert_eq!(
            out.source.matches("__atp.resumableForOf(").count(),
            2,
            "{}",
            out.source
        );
    }

    #[test]
    fn parse_failure_is_reported_with_position() {
        let err = transform_source("let = 3;").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.column > 0);
    }
}
