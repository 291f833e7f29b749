//! Batch analyzer
//!
//! Decides whether an async array-method callback is *batchable*: its
//! body must resolve, modulo a trivial `return` or single-binding
//! wrapper, to exactly one awaited `atp.llm.complete(...)` or
//! `atp.tools.invoke(...)` per element, and the call's argument
//! expressions must be free of side effects and further `atp` calls.
//! For a batchable site the analyzer synthesizes a *descriptor* closure
//! that evaluates the per-element payload without performing the call;
//! the batch primitive uses it to assemble one fused pause.

use crate::ast::*;

/// Result of a successful batch analysis.
#[derive(Debug, Clone)]
pub struct BatchSpec {
    /// Pause kind of the fused calls: `"llm"` or `"tool"`.
    pub kind: &'static str,
    /// Per-element payload builder, same parameters as the callback.
    pub descriptor: Function,
}

/// Analyze a callback; `None` means the site stays sequential.
pub fn analyze(callback: &Function) -> Option<BatchSpec> {
    if callback.params.is_empty() || callback.params.len() > 2 {
        return None;
    }

    let result = result_expr(callback)?;
    let inner = match result {
        Expr::Await(inner) => inner.as_ref(),
        _ => return None,
    };
    let (callee, args) = match inner {
        Expr::Call { callee, args } => (callee.as_ref(), args),
        _ => return None,
    };

    let (kind, payload) = if is_path(callee, &["atp", "llm", "complete"]) {
        let options = args.first().cloned().unwrap_or(Expr::Object(Vec::new()));
        ("llm", options)
    } else if is_path(callee, &["atp", "tools", "invoke"]) {
        if args.is_empty() {
            return None;
        }
        let tool_name = args[0].clone();
        let input = args.get(1).cloned().unwrap_or(Expr::Null);
        (
            "tool",
            Expr::Object(vec![
                (PropKey::Ident("toolName".to_string()), tool_name),
                (PropKey::Ident("input".to_string()), input),
            ]),
        )
    } else {
        return None;
    };

    if !is_pure_payload(&payload) {
        return None;
    }

    Some(BatchSpec {
        kind,
        descriptor: Function::arrow_expr(callback.params.clone(), payload, false),
    })
}

/// The single expression a trivially-wrapped callback body resolves to.
fn result_expr(callback: &Function) -> Option<&Expr> {
    if let Some(expr) = &callback.concise_body {
        return Some(expr);
    }
    match callback.body.as_slice() {
        [Stmt::Return(Some(expr))] => Some(expr),
        [Stmt::VarDecl { decls, .. }, Stmt::Return(Some(Expr::Ident(returned)))] => {
            match decls.as_slice() {
                [VarDeclarator {
                    name,
                    init: Some(init),
                }] if name == returned => Some(init),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Whether `expr` is the member path `root.a.b`.
fn is_path(expr: &Expr, path: &[&str]) -> bool {
    let (last, rest) = match path.split_last() {
        Some(split) => split,
        None => return false,
    };
    match expr {
        Expr::Member {
            object,
            property: MemberProp::Static(name),
        } => {
            if name != last {
                return false;
            }
            if rest.len() == 1 {
                matches!(object.as_ref(), Expr::Ident(root) if root == rest[0])
            } else {
                is_path(object, rest)
            }
        }
        _ => false,
    }
}

/// Payload expressions must be side-effect free and must not reach back
/// into the runtime APIs; anything else keeps the site sequential.
fn is_pure_payload(expr: &Expr) -> bool {
    match expr {
        Expr::Await(_) | Expr::Assign { .. } | Expr::Update { .. } => false,
        Expr::Ident(name) => name != "atp" && name != "__atp",
        Expr::Number(_) | Expr::Str(_) | Expr::Bool(_) | Expr::Null | Expr::Undefined => true,
        Expr::Template(parts) => parts.iter().all(|part| match part {
            TemplatePart::Chunk(_) => true,
            TemplatePart::Expr(e) => is_pure_payload(e),
        }),
        Expr::Array(elements) => elements.iter().all(is_pure_payload),
        Expr::Object(props) => props.iter().all(|(_, v)| is_pure_payload(v)),
        Expr::Function(_) => false,
        Expr::Unary { expr, .. } => is_pure_payload(expr),
        Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
            is_pure_payload(left) && is_pure_payload(right)
        }
        Expr::Conditional {
            cond,
            then_expr,
            else_expr,
        } => is_pure_payload(cond) && is_pure_payload(then_expr) && is_pure_payload(else_expr),
        Expr::Member { object, property } => {
            is_pure_payload(object)
                && match property {
                    MemberProp::Static(_) => true,
                    MemberProp::Computed(index) => is_pure_payload(index),
                }
        }
        Expr::Call { callee, args } => {
            is_pure_payload(callee) && args.iter().all(is_pure_payload)
        }
        Expr::New { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn callback_of(source: &str) -> Function {
        let program = parse_program(source).unwrap();
        match &program.body[0] {
            Stmt::Expr(Expr::Call { args, .. }) => match &args[0] {
                Expr::Function(func) => (**func).clone(),
                other => panic!("expected function argument, got {:?}", other),
            },
            other => panic!("expected call statement, got {:?}", other),
        }
    }

    #[test]
    fn concise_llm_body_is_batchable() {
        let cb = callback_of("run(async (x) => await atp.llm.complete({ prompt: String(x) }));");
        let spec = analyze(&cb).unwrap();
        assert_eq!(spec.kind, "llm");
        assert_eq!(spec.descriptor.params, vec!["x".to_string()]);
    }

    #[test]
    fn return_wrapped_body_is_batchable() {
        let cb = callback_of(
            "run(async (x) => { return await atp.llm.complete({ prompt: x }); });",
        );
        assert!(analyze(&cb).is_some());
    }

    #[test]
    fn binding_wrapped_body_is_batchable() {
        let cb = callback_of(
            "run(async (x) => { const r = await atp.llm.complete({ prompt: x }); return r; });",
        );
        assert!(analyze(&cb).is_some());
    }

    #[test]
    fn tool_invoke_is_batchable() {
        let cb = callback_of("run(async (doc) => await atp.tools.invoke(\"summarize\", doc));");
        let spec = analyze(&cb).unwrap();
        assert_eq!(spec.kind, "tool");
    }

    #[test]
    fn extra_statements_stay_sequential() {
        let cb = callback_of(
            "run(async (x) => { log(x); return await atp.llm.complete({ prompt: x }); });",
        );
        assert!(analyze(&cb).is_none());
    }

    #[test]
    fn unawaited_call_stays_sequential() {
        let cb = callback_of("run(async (x) => atp.llm.complete({ prompt: x }));");
        assert!(analyze(&cb).is_none());
    }

    #[test]
    fn nested_atp_call_stays_sequential() {
        let cb = callback_of(
            "run(async (x) => await atp.llm.complete({ prompt: await atp.llm.complete(x) }));",
        );
        assert!(analyze(&cb).is_none());
    }

    #[test]
    fn non_atp_call_stays_sequential() {
        let cb = callback_of("run(async (x) => await somewhere.complete(x));");
        assert!(analyze(&cb).is_none());
    }
}
