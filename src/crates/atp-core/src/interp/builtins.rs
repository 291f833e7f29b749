//! Sandbox globals and built-in methods
//!
//! Installs the `atp` runtime API object, the `__atp` primitive table
//! the transformer targets, and the usual language globals (`String`,
//! `JSON`, `Math`, `console`, ...). Array and string methods are
//! dispatched structurally at call sites; the synchronous array methods
//! here are the non-resumable fallback path.

use std::collections::BTreeMap;

use super::env::{define, new_env, EnvRef};
use super::value::{value_from_json, value_to_json, JsonConvError, NativeFn, Value};
use super::{Flow, Interpreter};
use crate::batch::BatchMode;

fn object(entries: Vec<(&str, Value)>) -> Value {
    let mut map = BTreeMap::new();
    for (key, value) in entries {
        map.insert(key.to_string(), value);
    }
    Value::object(map)
}

/// Build a standard error object (`name`, `message`, `stack`).
pub(crate) fn error_object(name: &str, message: impl Into<String>) -> Value {
    let message = message.into();
    let mut map = BTreeMap::new();
    map.insert("name".to_string(), Value::str(name));
    map.insert(
        "stack".to_string(),
        Value::str(format!("{}: {}", name, message)),
    );
    map.insert("message".to_string(), Value::Str(message));
    Value::object(map)
}

pub(crate) fn build_globals() -> EnvRef {
    use NativeFn::*;
    let globals = new_env(None);

    define(
        &globals,
        "atp",
        object(vec![
            ("llm", object(vec![("complete", Value::Native(LlmComplete))])),
            (
                "approval",
                object(vec![("request", Value::Native(ApprovalRequest))]),
            ),
            (
                "embedding",
                object(vec![("embed", Value::Native(EmbeddingEmbed))]),
            ),
            ("tools", object(vec![("invoke", Value::Native(ToolsInvoke))])),
            (
                "cache",
                object(vec![
                    ("get", Value::Native(CacheGet)),
                    ("set", Value::Native(CacheSet)),
                ]),
            ),
            (
                "progress",
                object(vec![("report", Value::Native(ProgressReport))]),
            ),
        ]),
    );

    define(
        &globals,
        "__atp",
        object(vec![
            ("resumableForOf", Value::Native(ResumableForOf)),
            ("resumableWhile", Value::Native(ResumableWhile)),
            ("resumableForLoop", Value::Native(ResumableForLoop)),
            ("resumableMap", Value::Native(ResumableMap)),
            ("resumableForEach", Value::Native(ResumableForEach)),
            ("resumableFilter", Value::Native(ResumableFilter)),
            ("resumableReduce", Value::Native(ResumableReduce)),
            ("resumableFind", Value::Native(ResumableFind)),
            ("resumableSome", Value::Native(ResumableSome)),
            ("resumableEvery", Value::Native(ResumableEvery)),
            ("resumableFlatMap", Value::Native(ResumableFlatMap)),
            ("resumablePromiseAll", Value::Native(ResumablePromiseAll)),
            (
                "resumablePromiseAllSettled",
                Value::Native(ResumablePromiseAllSettled),
            ),
            ("batchMap", Value::Native(BatchMap)),
            ("batchFilter", Value::Native(BatchFilter)),
            ("batchForEach", Value::Native(BatchForEach)),
        ]),
    );

    define(&globals, "String", Value::Native(StringCast));
    define(&globals, "Number", Value::Native(NumberCast));
    define(&globals, "Boolean", Value::Native(BooleanCast));
    define(&globals, "Error", Value::Native(ErrorCtor));
    define(&globals, "parseInt", Value::Native(ParseInt));
    define(&globals, "parseFloat", Value::Native(ParseFloat));
    define(&globals, "isNaN", Value::Native(IsNaN));
    define(&globals, "NaN", Value::Number(f64::NAN));
    define(&globals, "Infinity", Value::Number(f64::INFINITY));
    define(
        &globals,
        "JSON",
        object(vec![
            ("stringify", Value::Native(JsonStringify)),
            ("parse", Value::Native(JsonParse)),
        ]),
    );
    define(
        &globals,
        "Math",
        object(vec![
            ("floor", Value::Native(MathFloor)),
            ("ceil", Value::Native(MathCeil)),
            ("round", Value::Native(MathRound)),
            ("trunc", Value::Native(MathTrunc)),
            ("abs", Value::Native(MathAbs)),
            ("min", Value::Native(MathMin)),
            ("max", Value::Native(MathMax)),
            ("pow", Value::Native(MathPow)),
            ("sqrt", Value::Native(MathSqrt)),
            ("PI", Value::Number(std::f64::consts::PI)),
            ("E", Value::Number(std::f64::consts::E)),
        ]),
    );
    define(
        &globals,
        "Object",
        object(vec![
            ("keys", Value::Native(ObjectKeys)),
            ("values", Value::Native(ObjectValues)),
            ("entries", Value::Native(ObjectEntries)),
        ]),
    );
    define(
        &globals,
        "Array",
        object(vec![("isArray", Value::Native(ArrayIsArray))]),
    );
    define(
        &globals,
        "console",
        object(vec![
            ("log", Value::Native(ConsoleLog)),
            ("warn", Value::Native(ConsoleWarn)),
            ("error", Value::Native(ConsoleError)),
        ]),
    );
    define(
        &globals,
        "Promise",
        object(vec![
            ("all", Value::Native(PromiseAll)),
            ("allSettled", Value::Native(PromiseAllSettled)),
        ]),
    );

    globals
}

impl Interpreter {
    pub(crate) fn call_native(&mut self, native: NativeFn, args: Vec<Value>) -> Result<Value, Flow> {
        use NativeFn::*;
        match native {
            // runtime APIs
            LlmComplete => self.native_llm_complete(args),
            ApprovalRequest => self.native_approval_request(args),
            EmbeddingEmbed => self.native_embedding_embed(args),
            ToolsInvoke => self.native_tools_invoke(args),
            CacheGet => self.native_cache_get(args),
            CacheSet => self.native_cache_set(args),
            ProgressReport => self.native_progress_report(args),
            // resumable primitives
            ResumableForOf => self.prim_for_of(args),
            ResumableWhile => self.prim_while(args),
            ResumableForLoop => self.prim_for_loop(args),
            ResumableMap => self.prim_map(args),
            ResumableForEach => self.prim_for_each(args),
            ResumableFilter => self.prim_filter(args),
            ResumableReduce => self.prim_reduce(args),
            ResumableFind => self.prim_find(args),
            ResumableSome => self.prim_some(args),
            ResumableEvery => self.prim_every(args),
            ResumableFlatMap => self.prim_flat_map(args),
            ResumablePromiseAll => self.prim_promise_all(args),
            ResumablePromiseAllSettled => self.prim_promise_all_settled(args),
            // batch parallel
            BatchMap => self.prim_batch(BatchMode::Map, args),
            BatchFilter => self.prim_batch(BatchMode::Filter, args),
            BatchForEach => self.prim_batch(BatchMode::ForEach, args),
            // language globals
            StringCast => Ok(Value::Str(
                args.first().map(|v| v.js_string()).unwrap_or_default(),
            )),
            NumberCast => Ok(Value::Number(
                args.first().map(|v| v.to_number()).unwrap_or(0.0),
            )),
            BooleanCast => Ok(Value::Bool(
                args.first().map(|v| v.truthy()).unwrap_or(false),
            )),
            JsonStringify => self.native_json_stringify(args),
            JsonParse => self.native_json_parse(args),
            MathFloor => Ok(Value::Number(first_number(&args).floor())),
            MathCeil => Ok(Value::Number(first_number(&args).ceil())),
            MathRound => Ok(Value::Number(first_number(&args).round())),
            MathTrunc => Ok(Value::Number(first_number(&args).trunc())),
            MathAbs => Ok(Value::Number(first_number(&args).abs())),
            MathSqrt => Ok(Value::Number(first_number(&args).sqrt())),
            MathPow => Ok(Value::Number(
                first_number(&args).powf(args.get(1).map(|v| v.to_number()).unwrap_or(f64::NAN)),
            )),
            MathMin => Ok(Value::Number(
                args.iter()
                    .map(|v| v.to_number())
                    .fold(f64::INFINITY, f64::min),
            )),
            MathMax => Ok(Value::Number(
                args.iter()
                    .map(|v| v.to_number())
                    .fold(f64::NEG_INFINITY, f64::max),
            )),
            ObjectKeys => self.native_object_parts(args, |k, _| Value::Str(k)),
            ObjectValues => self.native_object_parts(args, |_, v| v),
            ObjectEntries => {
                self.native_object_parts(args, |k, v| Value::array(vec![Value::Str(k), v]))
            }
            ArrayIsArray => Ok(Value::Bool(matches!(args.first(), Some(Value::Array(_))))),
            ConsoleLog | ConsoleWarn | ConsoleError => {
                let line = args
                    .iter()
                    .map(|v| v.js_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                match native {
                    ConsoleError => tracing::warn!(target: "atp_core::sandbox", "{}", line),
                    _ => tracing::debug!(target: "atp_core::sandbox", "{}", line),
                }
                Ok(Value::Undefined)
            }
            ParseInt => {
                let text = args.first().map(|v| v.js_string()).unwrap_or_default();
                Ok(Value::Number(parse_int_prefix(&text)))
            }
            ParseFloat => {
                let text = args.first().map(|v| v.js_string()).unwrap_or_default();
                Ok(Value::Number(parse_float_prefix(&text)))
            }
            IsNaN => Ok(Value::Bool(first_number(&args).is_nan())),
            // non-resumable fallback: elements were evaluated eagerly,
            // so "joining" is the identity on the array
            PromiseAll => {
                let items = self.as_array_items(args.first().unwrap_or(&Value::Undefined))?;
                Ok(Value::array(items))
            }
            PromiseAllSettled => {
                let items = self.as_array_items(args.first().unwrap_or(&Value::Undefined))?;
                Ok(Value::array(
                    items
                        .into_iter()
                        .map(|value| {
                            let mut map = BTreeMap::new();
                            map.insert("status".to_string(), Value::str("fulfilled"));
                            map.insert("value".to_string(), value);
                            Value::object(map)
                        })
                        .collect(),
                ))
            }
            ErrorCtor => {
                let message = args.first().map(|v| v.js_string()).unwrap_or_default();
                Ok(error_object("Error", message))
            }
        }
    }

    pub(crate) fn construct(&mut self, callee: &Value, args: Vec<Value>) -> Result<Value, Flow> {
        match callee {
            Value::Native(NativeFn::ErrorCtor) => self.call_native(NativeFn::ErrorCtor, args),
            Value::Closure(_) => Err(self.throw_error(
                "TypeError",
                "class construction is not supported in the sandbox",
            )),
            other => Err(self.throw_error(
                "TypeError",
                format!("{} is not a constructor", other.js_string()),
            )),
        }
    }

    fn native_json_stringify(&mut self, args: Vec<Value>) -> Result<Value, Flow> {
        let value = match args.first() {
            Some(value) => value,
            None => return Ok(Value::Undefined),
        };
        match value_to_json(value) {
            Ok(json) => {
                let pretty = matches!(args.get(2), Some(v) if v.truthy());
                let text = if pretty {
                    serde_json::to_string_pretty(&json)
                } else {
                    serde_json::to_string(&json)
                }
                .map_err(|e| self.throw_error("TypeError", e.to_string()))?;
                self.charge(text.len())?;
                Ok(Value::Str(text))
            }
            Err(JsonConvError::Unserializable) => Ok(Value::Undefined),
            Err(JsonConvError::TooDeep) => Err(self.throw_error(
                "TypeError",
                "converting circular structure to JSON",
            )),
        }
    }

    fn native_json_parse(&mut self, args: Vec<Value>) -> Result<Value, Flow> {
        let text = args.first().map(|v| v.js_string()).unwrap_or_default();
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(json) => Ok(value_from_json(&json)),
            Err(e) => Err(self.throw_error("SyntaxError", format!("invalid JSON: {}", e))),
        }
    }

    fn native_object_parts(
        &mut self,
        args: Vec<Value>,
        f: impl Fn(String, Value) -> Value,
    ) -> Result<Value, Flow> {
        match args.first() {
            Some(Value::Object(map)) => {
                let map = map.lock().clone();
                Ok(Value::array(
                    map.into_iter().map(|(k, v)| f(k, v)).collect(),
                ))
            }
            Some(Value::Array(items)) => {
                let items = items.lock().clone();
                Ok(Value::array(
                    items
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| f(i.to_string(), v))
                        .collect(),
                ))
            }
            _ => Ok(Value::array(Vec::new())),
        }
    }

    // ----- property access --------------------------------------------

    pub(crate) fn get_property(&mut self, object: &Value, key: &str) -> Result<Value, Flow> {
        match object {
            Value::Object(map) => Ok(map.lock().get(key).cloned().unwrap_or(Value::Undefined)),
            Value::Array(items) => {
                if key == "length" {
                    return Ok(Value::Number(items.lock().len() as f64));
                }
                match key.parse::<usize>() {
                    Ok(index) => Ok(items.lock().get(index).cloned().unwrap_or(Value::Undefined)),
                    Err(_) => Ok(Value::Undefined),
                }
            }
            Value::Str(text) => {
                if key == "length" {
                    return Ok(Value::Number(text.chars().count() as f64));
                }
                match key.parse::<usize>() {
                    Ok(index) => Ok(text
                        .chars()
                        .nth(index)
                        .map(|c| Value::Str(c.to_string()))
                        .unwrap_or(Value::Undefined)),
                    Err(_) => Ok(Value::Undefined),
                }
            }
            Value::Null | Value::Undefined => Err(self.throw_error(
                "TypeError",
                format!(
                    "cannot read properties of {} (reading '{}')",
                    object.js_string(),
                    key
                ),
            )),
            _ => Ok(Value::Undefined),
        }
    }

    pub(crate) fn set_property(
        &mut self,
        object: &Value,
        key: &str,
        value: Value,
    ) -> Result<(), Flow> {
        match object {
            Value::Object(map) => {
                map.lock().insert(key.to_string(), value);
                Ok(())
            }
            Value::Array(items) => match key.parse::<usize>() {
                Ok(index) => {
                    let mut items = items.lock();
                    if index >= items.len() {
                        items.resize(index + 1, Value::Undefined);
                    }
                    items[index] = value;
                    Ok(())
                }
                Err(_) => Err(self.throw_error(
                    "TypeError",
                    format!("cannot set property '{}' of an array", key),
                )),
            },
            other => Err(self.throw_error(
                "TypeError",
                format!("cannot set properties of {}", other.js_string()),
            )),
        }
    }

    // ----- method dispatch --------------------------------------------

    pub(crate) fn call_method(
        &mut self,
        object: Value,
        key: &str,
        args: Vec<Value>,
    ) -> Result<Value, Flow> {
        match &object {
            Value::Object(map) => {
                let member = map.lock().get(key).cloned();
                match member {
                    Some(callee) => self.call_value(&callee, args),
                    None => Err(self.throw_error(
                        "TypeError",
                        format!("{} is not a function", key),
                    )),
                }
            }
            Value::Array(_) => self.array_method(&object, key, args),
            Value::Str(text) => {
                let text = text.clone();
                self.string_method(&text, key, args)
            }
            Value::Number(n) => match key {
                "toString" => Ok(Value::Str(atp_script::format_number(*n))),
                "toFixed" => {
                    let digits = args.first().map(|v| v.to_number()).unwrap_or(0.0) as usize;
                    Ok(Value::Str(format!("{:.*}", digits.min(100), n)))
                }
                _ => Err(self.throw_error(
                    "TypeError",
                    format!("{} is not a function on numbers", key),
                )),
            },
            Value::Null | Value::Undefined => Err(self.throw_error(
                "TypeError",
                format!(
                    "cannot read properties of {} (reading '{}')",
                    object.js_string(),
                    key
                ),
            )),
            other => Err(self.throw_error(
                "TypeError",
                format!("{} has no method '{}'", other.js_string(), key),
            )),
        }
    }

    fn array_method(&mut self, object: &Value, key: &str, args: Vec<Value>) -> Result<Value, Flow> {
        let arr = match object {
            Value::Array(arr) => arr.clone(),
            _ => unreachable!("array_method on non-array"),
        };
        match key {
            "push" => {
                let mut items = arr.lock();
                for arg in args {
                    items.push(arg);
                }
                Ok(Value::Number(items.len() as f64))
            }
            "pop" => Ok(arr.lock().pop().unwrap_or(Value::Undefined)),
            "shift" => {
                let mut items = arr.lock();
                if items.is_empty() {
                    Ok(Value::Undefined)
                } else {
                    Ok(items.remove(0))
                }
            }
            "unshift" => {
                let mut items = arr.lock();
                for (i, arg) in args.into_iter().enumerate() {
                    items.insert(i, arg);
                }
                Ok(Value::Number(items.len() as f64))
            }
            "join" => {
                let sep = args.first().map(|v| v.js_string()).unwrap_or_else(|| ",".to_string());
                let items = arr.lock().clone();
                let out = items
                    .iter()
                    .map(|v| match v {
                        Value::Undefined | Value::Null => String::new(),
                        other => other.js_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(&sep);
                self.charge(out.len())?;
                Ok(Value::Str(out))
            }
            "slice" => {
                let items = arr.lock().clone();
                let (start, end) = slice_bounds(items.len(), args.first(), args.get(1));
                Ok(Value::array(items[start..end].to_vec()))
            }
            "concat" => {
                let mut items = arr.lock().clone();
                for arg in args {
                    match arg {
                        Value::Array(more) => items.extend(more.lock().clone()),
                        other => items.push(other),
                    }
                }
                Ok(Value::array(items))
            }
            "indexOf" => {
                let needle = args.first().cloned().unwrap_or(Value::Undefined);
                let items = arr.lock().clone();
                Ok(Value::Number(
                    items
                        .iter()
                        .position(|v| v.strict_eq(&needle))
                        .map(|i| i as f64)
                        .unwrap_or(-1.0),
                ))
            }
            "includes" => {
                let needle = args.first().cloned().unwrap_or(Value::Undefined);
                let items = arr.lock().clone();
                Ok(Value::Bool(items.iter().any(|v| v.strict_eq(&needle))))
            }
            // synchronous callback methods (the resumable variants are
            // reached through the transform)
            "map" | "filter" | "forEach" | "find" | "some" | "every" | "flatMap" => {
                let callback = args
                    .first()
                    .cloned()
                    .ok_or_else(|| self.throw_error("TypeError", "callback required"))?;
                let items = arr.lock().clone();
                let mut out = Vec::new();
                for (i, item) in items.iter().enumerate() {
                    let result = self.call_value(
                        &callback,
                        vec![item.clone(), Value::Number(i as f64), object.clone()],
                    )?;
                    match key {
                        "map" => out.push(result),
                        "filter" => {
                            if result.truthy() {
                                out.push(item.clone());
                            }
                        }
                        "forEach" => {}
                        "find" => {
                            if result.truthy() {
                                return Ok(item.clone());
                            }
                        }
                        "some" => {
                            if result.truthy() {
                                return Ok(Value::Bool(true));
                            }
                        }
                        "every" => {
                            if !result.truthy() {
                                return Ok(Value::Bool(false));
                            }
                        }
                        _ => match result {
                            Value::Array(nested) => out.extend(nested.lock().clone()),
                            other => out.push(other),
                        },
                    }
                }
                Ok(match key {
                    "find" => Value::Undefined,
                    "some" => Value::Bool(false),
                    "every" => Value::Bool(true),
                    "forEach" => Value::Undefined,
                    _ => Value::array(out),
                })
            }
            "reduce" => {
                let callback = args
                    .first()
                    .cloned()
                    .ok_or_else(|| self.throw_error("TypeError", "callback required"))?;
                let items = arr.lock().clone();
                let (mut acc, start) = match args.get(1) {
                    Some(init) => (init.clone(), 0),
                    None => match items.first() {
                        Some(first) => (first.clone(), 1),
                        None => {
                            return Err(self.throw_error(
                                "TypeError",
                                "reduce of empty array with no initial value",
                            ))
                        }
                    },
                };
                for (i, item) in items.iter().enumerate().skip(start) {
                    acc = self.call_value(
                        &callback,
                        vec![acc, item.clone(), Value::Number(i as f64)],
                    )?;
                }
                Ok(acc)
            }
            _ => Err(self.throw_error(
                "TypeError",
                format!("arrays have no method '{}'", key),
            )),
        }
    }

    fn string_method(&mut self, text: &str, key: &str, args: Vec<Value>) -> Result<Value, Flow> {
        let arg0 = || args.first().map(|v| v.js_string()).unwrap_or_default();
        Ok(match key {
            "toUpperCase" => Value::Str(text.to_uppercase()),
            "toLowerCase" => Value::Str(text.to_lowercase()),
            "trim" => Value::Str(text.trim().to_string()),
            "includes" => Value::Bool(text.contains(&arg0())),
            "startsWith" => Value::Bool(text.starts_with(&arg0())),
            "endsWith" => Value::Bool(text.ends_with(&arg0())),
            "indexOf" => {
                let needle = arg0();
                Value::Number(
                    text.find(&needle)
                        .map(|byte| text[..byte].chars().count() as f64)
                        .unwrap_or(-1.0),
                )
            }
            "split" => {
                let sep = arg0();
                let parts: Vec<Value> = if sep.is_empty() {
                    text.chars().map(|c| Value::Str(c.to_string())).collect()
                } else {
                    text.split(&sep as &str)
                        .map(|p| Value::str(p.to_string()))
                        .collect()
                };
                Value::array(parts)
            }
            "slice" | "substring" => {
                let chars: Vec<char> = text.chars().collect();
                let (start, end) = slice_bounds(chars.len(), args.first(), args.get(1));
                Value::Str(chars[start..end].iter().collect())
            }
            "charAt" => {
                let index = args.first().map(|v| v.to_number()).unwrap_or(0.0) as usize;
                Value::Str(
                    text.chars()
                        .nth(index)
                        .map(|c| c.to_string())
                        .unwrap_or_default(),
                )
            }
            "repeat" => {
                let count = args.first().map(|v| v.to_number()).unwrap_or(0.0);
                if count < 0.0 || count > 10_000.0 {
                    return Err(self.throw_error("RangeError", "invalid repeat count"));
                }
                let out = text.repeat(count as usize);
                self.charge(out.len())?;
                Value::Str(out)
            }
            "replace" => {
                let needle = arg0();
                let replacement = args.get(1).map(|v| v.js_string()).unwrap_or_default();
                Value::Str(text.replacen(&needle as &str, &replacement, 1))
            }
            "replaceAll" => {
                let needle = arg0();
                let replacement = args.get(1).map(|v| v.js_string()).unwrap_or_default();
                Value::Str(text.replace(&needle as &str, &replacement))
            }
            "toString" => Value::str(text.to_string()),
            _ => {
                return Err(self.throw_error(
                    "TypeError",
                    format!("strings have no method '{}'", key),
                ))
            }
        })
    }
}

fn first_number(args: &[Value]) -> f64 {
    args.first().map(|v| v.to_number()).unwrap_or(f64::NAN)
}

/// Normalize slice arguments (negative indices count from the end).
fn slice_bounds(len: usize, start: Option<&Value>, end: Option<&Value>) -> (usize, usize) {
    let resolve = |v: Option<&Value>, default: usize| -> usize {
        match v {
            Some(v) => {
                let n = v.to_number();
                if n.is_nan() {
                    0
                } else if n < 0.0 {
                    len.saturating_sub((-n) as usize)
                } else {
                    (n as usize).min(len)
                }
            }
            None => default,
        }
    };
    let start = resolve(start, 0);
    let end = resolve(end, len);
    (start, end.max(start))
}

fn parse_int_prefix(text: &str) -> f64 {
    let trimmed = text.trim_start();
    let mut chars = trimmed.chars();
    let mut out = String::new();
    match chars.next() {
        Some(c @ ('+' | '-')) => out.push(c),
        Some(c) if c.is_ascii_digit() => out.push(c),
        _ => return f64::NAN,
    }
    for c in chars {
        if c.is_ascii_digit() {
            out.push(c);
        } else {
            break;
        }
    }
    out.parse::<f64>().unwrap_or(f64::NAN)
}

fn parse_float_prefix(text: &str) -> f64 {
    let trimmed = text.trim_start();
    let mut out = String::new();
    let mut seen_dot = false;
    for (i, c) in trimmed.chars().enumerate() {
        match c {
            '+' | '-' if i == 0 => out.push(c),
            '.' if !seen_dot => {
                seen_dot = true;
                out.push(c);
            }
            c if c.is_ascii_digit() => out.push(c),
            _ => break,
        }
    }
    out.parse::<f64>().unwrap_or(f64::NAN)
}
