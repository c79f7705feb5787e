//! Evaluation of compiled hook scripts.
//!
//! Each run gets a fresh JSON environment built from the invocation
//! context. Only `arguments`, `response` and `metadata` are copied back.
//! Runs happen on the blocking pool under a wall-clock timeout, a step
//! budget and a memory budget.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use conflux_core::InvocationContext;

use super::script::{
    CmpOp, Expr, Path, Script, ScriptError, Segment, StrOp, Stmt, number_value,
};

/// Default block reason when a script says `block;`.
const DEFAULT_BLOCK_REASON: &str = "blocked by hook";

/// Bytes one run may produce through `set` and string concatenation.
pub const MEMORY_BUDGET: usize = 16 * 1024 * 1024;

/// Result of one script run.
#[derive(Debug, Clone)]
pub struct ScriptOutcome {
    /// Context after the script's writes.
    pub context: InvocationContext,
    /// Set when the script executed `block`.
    pub blocked: Option<String>,
}

/// Limits applied to every script run.
#[derive(Debug, Clone, Copy)]
pub struct Sandbox {
    timeout: Duration,
    step_limit: usize,
}

impl Sandbox {
    pub const fn new(timeout: Duration, step_limit: usize) -> Self {
        Self {
            timeout,
            step_limit,
        }
    }

    /// Run `script` against a copy of `context`.
    ///
    /// `hook` names the script in log output.
    pub async fn run(
        &self,
        hook: &str,
        script: Arc<Script>,
        context: &InvocationContext,
    ) -> Result<ScriptOutcome, ScriptError> {
        let env = Env::from_context(context)?;
        let deadline = Instant::now() + self.timeout;
        let step_limit = self.step_limit;
        let hook_name = hook.to_string();

        let task = tokio::task::spawn_blocking(move || {
            let mut machine = Machine {
                env,
                hook: hook_name,
                steps: 0,
                step_limit,
                allocated: 0,
                deadline,
                blocked: None,
            };
            machine.exec_all(&script.body)?;
            Ok::<_, ScriptError>((machine.env, machine.blocked))
        });

        let (env, blocked) = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => return Err(ScriptError::Timeout),
            Ok(Err(join)) => return Err(ScriptError::Runtime(format!("script panicked: {join}"))),
            Ok(Ok(result)) => result?,
        };

        Ok(ScriptOutcome {
            context: env.write_back(context)?,
            blocked,
        })
    }
}

/// Fresh per-run variables.
#[derive(Debug)]
struct Env {
    vars: Map<String, Value>,
}

impl Env {
    fn from_context(context: &InvocationContext) -> Result<Self, ScriptError> {
        let Value::Object(mut vars) = serde_json::to_value(context)
            .map_err(|e| ScriptError::Runtime(format!("context not serializable: {e}")))?
        else {
            return Err(ScriptError::Runtime("context is not an object".into()));
        };
        vars.entry("response").or_insert(Value::Null);
        vars.entry("error").or_insert(Value::Null);
        Ok(Self { vars })
    }

    fn write_back(mut self, original: &InvocationContext) -> Result<InvocationContext, ScriptError> {
        let mut context = original.clone();
        context.arguments = self.vars.remove("arguments").unwrap_or(Value::Null);
        context.response = match self.vars.remove("response") {
            None | Some(Value::Null) => None,
            Some(value) => Some(value),
        };
        context.metadata = match self.vars.remove("metadata") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(ScriptError::Runtime(format!(
                    "metadata must be an object, got {}",
                    type_name(&other)
                )));
            }
        };
        Ok(context)
    }

    fn read(&self, path: &Path) -> Value {
        let mut current = self.vars.get(&path.root).unwrap_or(&Value::Null);
        for segment in &path.segments {
            let next = match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map.get(key),
                (Segment::Index(i), Value::Array(items)) => items.get(*i),
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None => return Value::Null,
            }
        }
        current.clone()
    }

    fn write(&mut self, path: &Path, value: Value) -> Result<(), ScriptError> {
        let mut slot = self.vars.entry(path.root.clone()).or_insert(Value::Null);
        for segment in &path.segments {
            if slot.is_null() && matches!(segment, Segment::Key(_)) {
                *slot = Value::Object(Map::new());
            }
            slot = match (segment, slot) {
                (Segment::Key(key), Value::Object(map)) => {
                    map.entry(key.clone()).or_insert(Value::Null)
                }
                (Segment::Index(i), Value::Array(items)) => {
                    let len = items.len();
                    items.get_mut(*i).ok_or_else(|| {
                        ScriptError::Runtime(format!(
                            "index {i} out of bounds (len {len}) in {path}"
                        ))
                    })?
                }
                (_, other) => {
                    return Err(ScriptError::Runtime(format!(
                        "cannot write {path} through {}",
                        type_name(other)
                    )));
                }
            };
        }
        *slot = value;
        Ok(())
    }

    fn remove(&mut self, path: &Path) {
        let Some((last, parents)) = path.segments.split_last() else {
            let cleared = if path.root == "metadata" {
                Value::Object(Map::new())
            } else {
                Value::Null
            };
            self.vars.insert(path.root.clone(), cleared);
            return;
        };

        let mut current = self.vars.get_mut(&path.root);
        for segment in parents {
            current = match (segment, current) {
                (Segment::Key(key), Some(Value::Object(map))) => map.get_mut(key),
                (Segment::Index(i), Some(Value::Array(items))) => items.get_mut(*i),
                _ => None,
            };
        }
        match (last, current) {
            (Segment::Key(key), Some(Value::Object(map))) => {
                map.remove(key);
            }
            (Segment::Index(i), Some(Value::Array(items))) if *i < items.len() => {
                items.remove(*i);
            }
            _ => {}
        }
    }
}

struct Machine {
    env: Env,
    hook: String,
    steps: usize,
    step_limit: usize,
    allocated: usize,
    deadline: Instant,
    blocked: Option<String>,
}

impl Machine {
    fn tick(&mut self) -> Result<(), ScriptError> {
        self.steps += 1;
        if self.steps > self.step_limit {
            return Err(ScriptError::StepLimit);
        }
        if Instant::now() >= self.deadline {
            return Err(ScriptError::Timeout);
        }
        Ok(())
    }

    /// Count `value` against the run's memory budget.
    fn charge(&mut self, value: &Value) -> Result<(), ScriptError> {
        let remaining = MEMORY_BUDGET.saturating_sub(self.allocated);
        self.allocated = self.allocated.saturating_add(value_size(value, remaining));
        if self.allocated > MEMORY_BUDGET {
            return Err(ScriptError::Runtime(format!(
                "memory budget of {MEMORY_BUDGET} bytes exceeded"
            )));
        }
        Ok(())
    }

    /// Execute statements until the end or a `block`.
    fn exec_all(&mut self, body: &[Stmt]) -> Result<(), ScriptError> {
        for stmt in body {
            if self.blocked.is_some() {
                break;
            }
            self.exec(stmt)?;
        }
        Ok(())
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<(), ScriptError> {
        self.tick()?;
        match stmt {
            Stmt::Block(reason) => {
                let reason = match reason {
                    Some(expr) => render(&self.eval(expr)?),
                    None => DEFAULT_BLOCK_REASON.to_string(),
                };
                self.blocked = Some(reason);
            }
            Stmt::Set(path, expr) => {
                let value = self.eval(expr)?;
                self.charge(&value)?;
                self.env.write(path, value)?;
            }
            Stmt::Unset(path) => self.env.remove(path),
            Stmt::Log(expr) => {
                let message = render(&self.eval(expr)?);
                tracing::info!(hook = %self.hook, "{message}");
            }
            Stmt::If {
                branches,
                otherwise,
            } => {
                for (condition, body) in branches {
                    if truthy(&self.eval(condition)?) {
                        return self.exec_all(body);
                    }
                }
                if let Some(body) = otherwise {
                    self.exec_all(body)?;
                }
            }
        }
        Ok(())
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        self.tick()?;
        Ok(match expr {
            Expr::Literal(value) => value.clone(),
            Expr::Path(path) => self.env.read(path),
            Expr::Not(inner) => Value::Bool(!truthy(&self.eval(inner)?)),
            Expr::And(lhs, rhs) => {
                Value::Bool(truthy(&self.eval(lhs)?) && truthy(&self.eval(rhs)?))
            }
            Expr::Or(lhs, rhs) => {
                Value::Bool(truthy(&self.eval(lhs)?) || truthy(&self.eval(rhs)?))
            }
            Expr::Compare(op, lhs, rhs) => {
                let (lhs, rhs) = (self.eval(lhs)?, self.eval(rhs)?);
                Value::Bool(compare(*op, &lhs, &rhs)?)
            }
            Expr::Str(op, lhs, rhs) => {
                let (lhs, rhs) = (self.eval(lhs)?, self.eval(rhs)?);
                Value::Bool(string_op(*op, &lhs, &rhs))
            }
            Expr::Matches(lhs, regex) => {
                let lhs = self.eval(lhs)?;
                Value::Bool(lhs.as_str().is_some_and(|s| regex.is_match(s)))
            }
            Expr::Add(lhs, rhs) => {
                let (lhs, rhs) = (self.eval(lhs)?, self.eval(rhs)?);
                if lhs.is_string() || rhs.is_string() {
                    self.charge(&lhs)?;
                    self.charge(&rhs)?;
                }
                add(&lhs, &rhs)?
            }
        })
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Approximate JSON size of `value`; stops counting once past `cap`.
fn value_size(value: &Value, cap: usize) -> usize {
    let mut total = 0usize;
    let mut stack = vec![value];
    while let Some(current) = stack.pop() {
        let own = match current {
            Value::String(s) => s.len() + 2,
            Value::Array(items) => {
                stack.extend(items.iter());
                2
            }
            Value::Object(map) => {
                stack.extend(map.values());
                map.keys().map(|key| key.len() + 3).sum::<usize>() + 2
            }
            Value::Null | Value::Bool(_) | Value::Number(_) => 8,
        };
        total = total.saturating_add(own);
        if total > cap {
            break;
        }
    }
    total
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Strings render bare, everything else as JSON.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => lhs == rhs,
    }
}

fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> Result<bool, ScriptError> {
    use std::cmp::Ordering;

    let ordering = || {
        match (lhs, rhs) {
            (Value::Number(a), Value::Number(b)) => a
                .as_f64()
                .zip(b.as_f64())
                .and_then(|(a, b)| a.partial_cmp(&b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
        .ok_or_else(|| {
            ScriptError::Runtime(format!(
                "cannot order {} and {}",
                type_name(lhs),
                type_name(rhs)
            ))
        })
    };

    Ok(match op {
        CmpOp::Eq => equal(lhs, rhs),
        CmpOp::Ne => !equal(lhs, rhs),
        CmpOp::Lt => ordering()? == Ordering::Less,
        CmpOp::Le => ordering()? != Ordering::Greater,
        CmpOp::Gt => ordering()? == Ordering::Greater,
        CmpOp::Ge => ordering()? != Ordering::Less,
    })
}

fn string_op(op: StrOp, lhs: &Value, rhs: &Value) -> bool {
    match (op, lhs) {
        (StrOp::Contains, Value::String(s)) => rhs.as_str().is_some_and(|n| s.contains(n)),
        (StrOp::Contains, Value::Array(items)) => items.iter().any(|item| equal(item, rhs)),
        (StrOp::Contains, Value::Object(map)) => rhs.as_str().is_some_and(|k| map.contains_key(k)),
        (StrOp::StartsWith, Value::String(s)) => rhs.as_str().is_some_and(|p| s.starts_with(p)),
        (StrOp::EndsWith, Value::String(s)) => rhs.as_str().is_some_and(|p| s.ends_with(p)),
        _ => false,
    }
}

fn add(lhs: &Value, rhs: &Value) -> Result<Value, ScriptError> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => {
            if let Some(sum) = a.as_i64().zip(b.as_i64()).and_then(|(a, b)| a.checked_add(b)) {
                return Ok(Value::from(sum));
            }
            a.as_f64()
                .zip(b.as_f64())
                .and_then(|(a, b)| number_value(a + b))
                .ok_or_else(|| ScriptError::Runtime("numeric overflow".into()))
        }
        (Value::String(_), _) | (_, Value::String(_)) => {
            Ok(Value::String(render(lhs) + &render(rhs)))
        }
        _ => Err(ScriptError::Runtime(format!(
            "cannot add {} and {}",
            type_name(lhs),
            type_name(rhs)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_core::RequestType;
    use serde_json::json;

    fn context(tool: &str, arguments: Value) -> InvocationContext {
        InvocationContext::new(
            RequestType::ToolsCall,
            "alpha",
            "alpha",
            "client-1",
            tool,
            arguments.clone(),
            json!({ "name": tool, "arguments": arguments }),
        )
    }

    async fn run(source: &str, ctx: &InvocationContext) -> Result<ScriptOutcome, ScriptError> {
        let script = Arc::new(Script::compile(source).unwrap());
        Sandbox::new(Duration::from_secs(5), 10_000)
            .run("test", script, ctx)
            .await
    }

    #[tokio::test]
    async fn test_block_on_tool_name() {
        let source = r#"if toolName == "delete" { block "deletes disabled"; }"#;

        let outcome = run(source, &context("delete", json!({}))).await.unwrap();
        assert_eq!(outcome.blocked.as_deref(), Some("deletes disabled"));

        let outcome = run(source, &context("search", json!({}))).await.unwrap();
        assert!(outcome.blocked.is_none());
    }

    #[tokio::test]
    async fn test_block_stops_later_statements() {
        let ctx = context("x", json!({}));
        let outcome = run("block; set metadata.after = true;", &ctx).await.unwrap();
        assert_eq!(outcome.blocked.as_deref(), Some(DEFAULT_BLOCK_REASON));
        assert!(outcome.context.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_mutates_arguments_and_metadata() {
        let ctx = context("search", json!({"query": "rust", "limit": 50, "force": true}));
        let source = r#"
            if arguments.limit > 20 { set arguments.limit = 20; }
            unset arguments.force;
            set arguments.filters.lang = "en";
            set metadata.note = "clamped " + toolName;
        "#;
        let outcome = run(source, &ctx).await.unwrap();
        assert_eq!(
            outcome.context.arguments,
            json!({"query": "rust", "limit": 20, "filters": {"lang": "en"}})
        );
        assert_eq!(outcome.context.metadata["note"], "clamped search");
        // Read-only fields are untouched.
        assert_eq!(outcome.context.tool_name, "search");
        assert_eq!(outcome.context.request, ctx.request);
    }

    #[tokio::test]
    async fn test_post_hook_rewrites_response() {
        let mut ctx = context("search", json!({}));
        ctx.response = Some(json!({"content": [{"type": "text", "text": "secret"}]}));
        let source = r#"
            if response.content[0].text contains "secret" {
                set response.content[0].text = "[filtered]";
            }
        "#;
        let outcome = run(source, &ctx).await.unwrap();
        assert_eq!(
            outcome.context.response,
            Some(json!({"content": [{"type": "text", "text": "[filtered]"}]}))
        );
    }

    #[tokio::test]
    async fn test_missing_paths_read_as_null() {
        let ctx = context("x", json!({}));
        let outcome = run(
            "if arguments.a.b == null && !error { set metadata.ok = true; }",
            &ctx,
        )
        .await
        .unwrap();
        assert_eq!(outcome.context.metadata["ok"], true);
    }

    #[tokio::test]
    async fn test_ordering_mismatched_types_is_runtime_error() {
        let ctx = context("x", json!({"n": "five"}));
        let err = run("if arguments.n > 3 { block; }", &ctx).await.unwrap_err();
        assert!(matches!(err, ScriptError::Runtime(msg) if msg.contains("cannot order")));
    }

    #[tokio::test]
    async fn test_metadata_must_stay_an_object() {
        let ctx = context("x", json!({}));
        let err = run("set metadata = 1;", &ctx).await.unwrap_err();
        assert!(matches!(err, ScriptError::Runtime(_)));
    }

    #[tokio::test]
    async fn test_step_limit() {
        let ctx = context("x", json!({}));
        let script = Arc::new(Script::compile("log 1; log 2; log 3;").unwrap());
        let err = Sandbox::new(Duration::from_secs(5), 4)
            .run("tiny", script, &ctx)
            .await
            .unwrap_err();
        assert_eq!(err, ScriptError::StepLimit);
    }

    #[tokio::test]
    async fn test_zero_timeout_times_out() {
        let ctx = context("x", json!({}));
        let script = Arc::new(Script::compile("log toolName;").unwrap());
        let err = Sandbox::new(Duration::ZERO, 10_000)
            .run("slow", script, &ctx)
            .await
            .unwrap_err();
        assert_eq!(err, ScriptError::Timeout);
    }

    #[tokio::test]
    async fn test_string_doubling_hits_memory_budget() {
        let ctx = context("x", json!({}));
        let mut source = String::from(r#"set metadata.s = "x";"#);
        for _ in 0..26 {
            source.push_str("set metadata.s = metadata.s + metadata.s;");
        }
        let err = run(&source, &ctx).await.unwrap_err();
        assert!(matches!(err, ScriptError::Runtime(msg) if msg.contains("memory budget")));
    }

    #[tokio::test]
    async fn test_repeated_copies_hit_memory_budget() {
        let blob = "b".repeat(MEMORY_BUDGET / 8);
        let ctx = context("x", json!({ "blob": blob.clone() }));
        let source: String = (0..10)
            .map(|i| format!("set metadata.copy{i} = arguments.blob;"))
            .collect();
        let err = run(&source, &ctx).await.unwrap_err();
        assert!(matches!(err, ScriptError::Runtime(msg) if msg.contains("memory budget")));

        // A single copy stays well inside the budget.
        let outcome = run("set metadata.copy = arguments.blob;", &ctx).await.unwrap();
        assert_eq!(outcome.context.metadata["copy"].as_str().map(str::len), Some(blob.len()));
    }

    #[test]
    fn test_value_size_stops_at_cap() {
        assert_eq!(value_size(&json!("abc"), 100), 5);
        assert_eq!(value_size(&json!({"k": [1, 2]}), 100), 2 + 4 + 2 + 8 + 8);
        assert!(value_size(&json!(["a", "b", "c", "d"]), 3) < 20);
    }

    #[tokio::test]
    async fn test_runs_do_not_share_state() {
        let script = Arc::new(Script::compile("set metadata.count = 1;").unwrap());
        let sandbox = Sandbox::new(Duration::from_secs(5), 100);
        let ctx = context("x", json!({}));

        let first = sandbox.run("h", script.clone(), &ctx).await.unwrap();
        let second = sandbox.run("h", script, &ctx).await.unwrap();
        assert_eq!(first.context.metadata, second.context.metadata);
        assert!(ctx.metadata.is_empty());
    }

    #[test]
    fn test_value_semantics() {
        assert!(equal(&json!(1), &json!(1.0)));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!([0])));
        assert!(string_op(StrOp::Contains, &json!(["a", 2]), &json!(2.0)));
        assert!(string_op(StrOp::Contains, &json!({"k": 1}), &json!("k")));
        assert!(!string_op(StrOp::StartsWith, &Value::Null, &json!("a")));
        assert_eq!(add(&json!(1), &json!(2)).unwrap(), json!(3));
        assert_eq!(add(&json!(1.5), &json!(2)).unwrap(), json!(3.5));
        assert_eq!(add(&json!("n="), &json!(2)).unwrap(), json!("n=2"));
    }
}
