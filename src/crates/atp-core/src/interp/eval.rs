//! Statement and expression evaluation
//!
//! The transformed program mostly drives the resumable primitives, but
//! the evaluator also executes plain loops and synchronous array
//! methods directly so that untransformed fallback code still runs
//! (without resumability, per the transform-error contract).

use atp_script::ast::*;

use crate::error::EngineError;

use super::env::{assign, define, lookup, new_env, EnvRef};
use super::value::{Closure, Value};
use super::{Flow, Interpreter};

enum LoopSignal {
    Normal,
    Break,
}

impl Interpreter {
    pub(crate) fn exec_stmts(&mut self, stmts: &[Stmt], env: &EnvRef) -> Result<(), Flow> {
        for stmt in stmts {
            self.exec_stmt(stmt, env)?;
        }
        Ok(())
    }

    fn exec_stmt(&mut self, stmt: &Stmt, env: &EnvRef) -> Result<(), Flow> {
        self.tick()?;
        match stmt {
            Stmt::VarDecl { decls, .. } => {
                for decl in decls {
                    let value = match &decl.init {
                        Some(init) => self.eval(init, env)?,
                        None => Value::Undefined,
                    };
                    define(env, &decl.name, value);
                }
                Ok(())
            }
            Stmt::FunctionDecl { name, func } => {
                let closure = Value::Closure(std::sync::Arc::new(Closure {
                    func: func.clone(),
                    env: env.clone(),
                }));
                define(env, name, closure);
                Ok(())
            }
            Stmt::Expr(expr) => {
                self.eval(expr, env)?;
                Ok(())
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::Undefined,
                };
                Err(Flow::Return(value))
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if self.eval(cond, env)?.truthy() {
                    self.exec_stmt(then_branch, env)
                } else if let Some(else_branch) = else_branch {
                    self.exec_stmt(else_branch, env)
                } else {
                    Ok(())
                }
            }
            Stmt::While { cond, body } => {
                let mut iterations = 0u64;
                loop {
                    self.tick()?;
                    iterations += 1;
                    if iterations > self.limits.max_loop_iterations {
                        return Err(Flow::Fatal(EngineError::InfiniteLoop {
                            cap: self.limits.max_loop_iterations,
                        }));
                    }
                    if !self.eval(cond, env)?.truthy() {
                        break;
                    }
                    if let LoopSignal::Break = self.exec_loop_body(body, env)? {
                        break;
                    }
                }
                Ok(())
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                let scope = new_env(Some(env.clone()));
                if let Some(init) = init {
                    self.exec_stmt(init, &scope)?;
                }
                let mut iterations = 0u64;
                loop {
                    self.tick()?;
                    iterations += 1;
                    if iterations > self.limits.max_loop_iterations {
                        return Err(Flow::Fatal(EngineError::InfiniteLoop {
                            cap: self.limits.max_loop_iterations,
                        }));
                    }
                    if let Some(cond) = cond {
                        if !self.eval(cond, &scope)?.truthy() {
                            break;
                        }
                    }
                    if let LoopSignal::Break = self.exec_loop_body(body, &scope)? {
                        break;
                    }
                    if let Some(step) = step {
                        self.eval(step, &scope)?;
                    }
                }
                Ok(())
            }
            Stmt::ForOf {
                name, iterable, body, ..
            } => {
                let iterable = self.eval(iterable, env)?;
                let items = self.as_array_items(&iterable)?;
                for item in items {
                    let scope = new_env(Some(env.clone()));
                    define(&scope, name, item);
                    if let LoopSignal::Break = self.exec_loop_body(body, &scope)? {
                        break;
                    }
                }
                Ok(())
            }
            Stmt::Block(stmts) => {
                let scope = new_env(Some(env.clone()));
                self.exec_stmts(stmts, &scope)
            }
            Stmt::Break => Err(Flow::Break),
            Stmt::Continue => Err(Flow::Continue),
            Stmt::Throw(expr) => {
                let value = self.eval(expr, env)?;
                Err(Flow::Throw(value))
            }
            Stmt::Try {
                block,
                catch,
                finally,
            } => {
                let scope = new_env(Some(env.clone()));
                let mut result = self.exec_stmts(block, &scope);
                if matches!(&result, Err(Flow::Throw(_))) {
                    if let Some(clause) = catch {
                        let exception = match result {
                            Err(Flow::Throw(value)) => value,
                            _ => unreachable!("guarded by the matches! above"),
                        };
                        let scope = new_env(Some(env.clone()));
                        if let Some(param) = &clause.param {
                            define(&scope, param, exception);
                        }
                        result = self.exec_stmts(&clause.body, &scope);
                    }
                }
                if let Some(finally) = finally {
                    let scope = new_env(Some(env.clone()));
                    // a throwing finally clause wins over the try result
                    self.exec_stmts(finally, &scope)?;
                }
                result
            }
            Stmt::Empty => Ok(()),
        }
    }

    fn exec_loop_body(&mut self, body: &Stmt, env: &EnvRef) -> Result<LoopSignal, Flow> {
        match self.exec_stmt(body, env) {
            Ok(()) | Err(Flow::Continue) => Ok(LoopSignal::Normal),
            Err(Flow::Break) => Ok(LoopSignal::Break),
            Err(other) => Err(other),
        }
    }

    // ----- expressions ------------------------------------------------

    pub(crate) fn eval(&mut self, expr: &Expr, env: &EnvRef) -> Result<Value, Flow> {
        self.tick()?;
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(text) => {
                self.charge(text.len())?;
                Ok(Value::str(text.clone()))
            }
            Expr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Chunk(text) => out.push_str(text),
                        TemplatePart::Expr(inner) => {
                            let value = self.eval(inner, env)?;
                            out.push_str(&value.js_string());
                        }
                    }
                }
                self.charge(out.len())?;
                Ok(Value::Str(out))
            }
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::Ident(name) => match lookup(env, name) {
                Some(value) => Ok(value),
                None => Err(self.throw_error(
                    "ReferenceError",
                    format!("{} is not defined", name),
                )),
            },
            Expr::Array(elements) => {
                self.charge(32 + elements.len() * 16)?;
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    items.push(self.eval(element, env)?);
                }
                Ok(Value::array(items))
            }
            Expr::Object(props) => {
                self.charge(32 + props.len() * 32)?;
                let mut map = std::collections::BTreeMap::new();
                for (key, value) in props {
                    let value = self.eval(value, env)?;
                    map.insert(key.name().to_string(), value);
                }
                Ok(Value::object(map))
            }
            Expr::Function(func) => Ok(Value::Closure(std::sync::Arc::new(Closure {
                func: func.clone(),
                env: env.clone(),
            }))),
            Expr::Unary { op, expr } => {
                let value = self.eval(expr, env)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.truthy()),
                    UnaryOp::Neg => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                    UnaryOp::TypeOf => Value::str(value.type_of()),
                })
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                self.binary(*op, left, right)
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left, env)?;
                match op {
                    LogicalOp::And => {
                        if left.truthy() {
                            self.eval(right, env)
                        } else {
                            Ok(left)
                        }
                    }
                    LogicalOp::Or => {
                        if left.truthy() {
                            Ok(left)
                        } else {
                            self.eval(right, env)
                        }
                    }
                    LogicalOp::Nullish => match left {
                        Value::Null | Value::Undefined => self.eval(right, env),
                        other => Ok(other),
                    },
                }
            }
            Expr::Conditional {
                cond,
                then_expr,
                else_expr,
            } => {
                if self.eval(cond, env)?.truthy() {
                    self.eval(then_expr, env)
                } else {
                    self.eval(else_expr, env)
                }
            }
            Expr::Assign { op, target, value } => self.assign_expr(*op, target, value, env),
            Expr::Update { op, prefix, target } => {
                let old = self.read_target(target, env)?.to_number();
                let new = match op {
                    UpdateOp::Inc => old + 1.0,
                    UpdateOp::Dec => old - 1.0,
                };
                self.write_target(target, Value::Number(new), env)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Member { object, property } => {
                let object = self.eval(object, env)?;
                let key = self.member_key(property, env)?;
                self.get_property(&object, &key)
            }
            Expr::Call { callee, args } => {
                if let Expr::Member { object, property } = callee.as_ref() {
                    let object = self.eval(object, env)?;
                    let key = self.member_key(property, env)?;
                    let args = self.eval_args(args, env)?;
                    return self.call_method(object, &key, args);
                }
                let callee = self.eval(callee, env)?;
                let args = self.eval_args(args, env)?;
                self.call_value(&callee, args)
            }
            Expr::New { callee, args } => {
                let callee = self.eval(callee, env)?;
                let args = self.eval_args(args, env)?;
                self.construct(&callee, args)
            }
            // the sandbox is cooperatively scheduled: awaiting resolves
            // to the value itself, suspension happens via Flow::Pause
            Expr::Await(inner) => self.eval(inner, env),
        }
    }

    fn eval_args(&mut self, args: &[Expr], env: &EnvRef) -> Result<Vec<Value>, Flow> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            out.push(self.eval(arg, env)?);
        }
        Ok(out)
    }

    fn binary(&mut self, op: BinaryOp, left: Value, right: Value) -> Result<Value, Flow> {
        Ok(match op {
            BinaryOp::Add => match (&left, &right) {
                (Value::Str(_), _) | (_, Value::Str(_)) => {
                    let out = format!("{}{}", left.js_string(), right.js_string());
                    self.charge(out.len())?;
                    Value::Str(out)
                }
                (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
                    let out = format!("{}{}", left.js_string(), right.js_string());
                    self.charge(out.len())?;
                    Value::Str(out)
                }
                _ => Value::Number(left.to_number() + right.to_number()),
            },
            BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
            BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
            BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
            BinaryOp::Mod => Value::Number(left.to_number() % right.to_number()),
            BinaryOp::Eq => Value::Bool(left.loose_eq(&right)),
            BinaryOp::NotEq => Value::Bool(!left.loose_eq(&right)),
            BinaryOp::StrictEq => Value::Bool(left.strict_eq(&right)),
            BinaryOp::StrictNotEq => Value::Bool(!left.strict_eq(&right)),
            BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
                let result = match (&left, &right) {
                    (Value::Str(a), Value::Str(b)) => match op {
                        BinaryOp::Lt => a < b,
                        BinaryOp::LtEq => a <= b,
                        BinaryOp::Gt => a > b,
                        _ => a >= b,
                    },
                    _ => {
                        let a = left.to_number();
                        let b = right.to_number();
                        match op {
                            BinaryOp::Lt => a < b,
                            BinaryOp::LtEq => a <= b,
                            BinaryOp::Gt => a > b,
                            _ => a >= b,
                        }
                    }
                };
                Value::Bool(result)
            }
        })
    }

    fn assign_expr(
        &mut self,
        op: AssignOp,
        target: &Expr,
        value: &Expr,
        env: &EnvRef,
    ) -> Result<Value, Flow> {
        let rhs = self.eval(value, env)?;
        let new = match op {
            AssignOp::Assign => rhs,
            compound => {
                let old = self.read_target(target, env)?;
                let op = match compound {
                    AssignOp::Add => BinaryOp::Add,
                    AssignOp::Sub => BinaryOp::Sub,
                    AssignOp::Mul => BinaryOp::Mul,
                    AssignOp::Div => BinaryOp::Div,
                    _ => BinaryOp::Mod,
                };
                self.binary(op, old, rhs)?
            }
        };
        self.write_target(target, new.clone(), env)?;
        Ok(new)
    }

    fn read_target(&mut self, target: &Expr, env: &EnvRef) -> Result<Value, Flow> {
        match target {
            Expr::Ident(name) => match lookup(env, name) {
                Some(value) => Ok(value),
                None => Err(self.throw_error(
                    "ReferenceError",
                    format!("{} is not defined", name),
                )),
            },
            Expr::Member { object, property } => {
                let object = self.eval(object, env)?;
                let key = self.member_key(property, env)?;
                self.get_property(&object, &key)
            }
            _ => Err(self.throw_error("SyntaxError", "invalid assignment target")),
        }
    }

    fn write_target(&mut self, target: &Expr, value: Value, env: &EnvRef) -> Result<(), Flow> {
        match target {
            Expr::Ident(name) => {
                if assign(env, name, value) {
                    Ok(())
                } else {
                    Err(self.throw_error(
                        "ReferenceError",
                        format!("{} is not defined", name),
                    ))
                }
            }
            Expr::Member { object, property } => {
                let object = self.eval(object, env)?;
                let key = self.member_key(property, env)?;
                self.set_property(&object, &key, value)
            }
            _ => Err(self.throw_error("SyntaxError", "invalid assignment target")),
        }
    }

    fn member_key(&mut self, property: &MemberProp, env: &EnvRef) -> Result<String, Flow> {
        match property {
            MemberProp::Static(name) => Ok(name.clone()),
            MemberProp::Computed(expr) => {
                let env = env.clone();
                let value = self.eval(expr, &env)?;
                Ok(value.js_string())
            }
        }
    }
}
