use std::sync::{Arc, Mutex};

use minijinja::value::{Object, Rest, from_args};
use minijinja::{Environment, Error, ErrorKind, State, UndefinedBehavior, Value};
use tracing::debug;

use crate::context::EvalContext;
use crate::error::EvaluationError;

/// Evaluate a single snippet against `ctx`.
///
/// A snippet containing `{{` or `{%` is rendered as a template and always
/// yields a string. Anything else is compiled as an expression and yields the
/// value it computes. Referencing a name that is not bound fails with a
/// `ReferenceError`.
pub fn evaluate(snippet: &str, ctx: &EvalContext<'_>) -> Result<serde_json::Value, EvaluationError> {
  let sandbox = Sandbox::new();
  sandbox.eval(snippet, ctx)
}

/// HTML fragment produced by `fmt.param(value, variant)`.
pub fn format_param(value: &str, variant: Option<&str>) -> String {
  match variant {
    Some(variant) if !variant.is_empty() => {
      format!("<div class=\"param {}\">{}</div>", variant, value)
    }
    _ => format!("<div class=\"param\">{}</div>", value),
  }
}

fn is_template(snippet: &str) -> bool {
  snippet.contains("{{") || snippet.contains("{%")
}

/// Isolated evaluation environment, alive for exactly one [`evaluate`] call.
///
/// Lines written through `log(...)` are buffered and flushed to the debug log
/// when the sandbox is dropped.
struct Sandbox {
  env: Environment<'static>,
  console: Arc<Mutex<Vec<String>>>,
}

impl Sandbox {
  fn new() -> Self {
    let console = Arc::new(Mutex::new(Vec::new()));
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.add_global("fmt", Value::from_object(Fmt));

    let sink = Arc::clone(&console);
    env.add_function("log", move |args: Rest<Value>| -> String {
      let line = args
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ");
      sink.lock().unwrap_or_else(|e| e.into_inner()).push(line);
      String::new()
    });

    Self { env, console }
  }

  fn eval(&self, snippet: &str, ctx: &EvalContext<'_>) -> Result<serde_json::Value, EvaluationError> {
    let bindings = ctx.to_value();

    if is_template(snippet) {
      let rendered = self.env.render_str(snippet, bindings)?;
      return Ok(serde_json::Value::String(rendered));
    }

    let expr = self.env.compile_expression(snippet)?;
    let value = expr.eval(bindings)?;
    if value.is_undefined() {
      return Err(EvaluationError::reference(format!(
        "`{}` is not defined",
        snippet.trim()
      )));
    }
    serde_json::to_value(&value).map_err(|e| EvaluationError::new("TypeError", e.to_string()))
  }
}

impl Drop for Sandbox {
  fn drop(&mut self) {
    let lines = std::mem::take(&mut *self.console.lock().unwrap_or_else(|e| e.into_inner()));
    for line in lines {
      debug!(target: "pipewright::console", "{}", line);
    }
  }
}

/// The `fmt` helper namespace.
#[derive(Debug)]
struct Fmt;

impl Object for Fmt {
  fn call_method(
    self: &Arc<Self>,
    _state: &State<'_, '_>,
    method: &str,
    args: &[Value],
  ) -> Result<Value, Error> {
    match method {
      "param" => {
        let (value, variant): (Value, Option<String>) = from_args(args)?;
        Ok(Value::from(format_param(&value.to_string(), variant.as_deref())))
      }
      _ => Err(Error::new(
        ErrorKind::UnknownMethod,
        format!("fmt has no method named {}", method),
      )),
    }
  }
}

#[cfg(test)]
mod tests {
  use serde_json::{Map, json};

  use super::*;
  use crate::context::{LoopContext, StepTable};

  fn steps_with(uid: &str, key: &str, value: serde_json::Value) -> StepTable {
    let mut steps = StepTable::new();
    steps.record(uid, Map::from_iter([(key.to_string(), value)]));
    steps
  }

  #[test]
  fn test_literal_and_arithmetic() {
    let steps = StepTable::new();
    let vars = Map::new();
    let loops = LoopContext::new();
    let ctx = EvalContext::new(&steps, &vars, &loops);

    assert_eq!(evaluate("'hello'", &ctx).unwrap(), json!("hello"));
    assert_eq!(evaluate("1 + 2", &ctx).unwrap(), json!(3));
    assert_eq!(evaluate("true", &ctx).unwrap(), json!(true));
    assert_eq!(evaluate("[1, 2, 3]", &ctx).unwrap(), json!([1, 2, 3]));
  }

  #[test]
  fn test_reads_previous_step_output() {
    let steps = steps_with("A", "x", json!("1"));
    let vars = Map::new();
    let loops = LoopContext::new();
    let ctx = EvalContext::new(&steps, &vars, &loops);

    assert_eq!(evaluate("steps.A.outputs.x", &ctx).unwrap(), json!("1"));
    assert_eq!(evaluate("steps.A.outputs.x ~ '2'", &ctx).unwrap(), json!("12"));
  }

  #[test]
  fn test_variables_and_loop_context() {
    let steps = StepTable::new();
    let vars = Map::from_iter([("channel".to_string(), json!("beta"))]);
    let loops = LoopContext::new().enter("L", 3, json!("item"));
    let ctx = EvalContext::new(&steps, &vars, &loops);

    assert_eq!(evaluate("variables.channel", &ctx).unwrap(), json!("beta"));
    assert_eq!(evaluate("context.loopindex", &ctx).unwrap(), json!(3));
    assert_eq!(evaluate("context.loops.L.value", &ctx).unwrap(), json!("item"));
    assert_eq!(evaluate("Build {{ context.loopindex }}", &ctx).unwrap(), json!("Build 3"));
  }

  #[test]
  fn test_template_renders_string() {
    let steps = steps_with("A", "n", json!(7));
    let vars = Map::new();
    let loops = LoopContext::new();
    let ctx = EvalContext::new(&steps, &vars, &loops);

    assert_eq!(evaluate("count={{ steps.A.outputs.n }}", &ctx).unwrap(), json!("count=7"));
  }

  #[test]
  fn test_undefined_reference_is_reference_error() {
    let steps = StepTable::new();
    let vars = Map::new();
    let loops = LoopContext::new();
    let ctx = EvalContext::new(&steps, &vars, &loops);

    let err = evaluate("{{ bogus.reference }}", &ctx).unwrap_err();
    assert_eq!(err.name, "ReferenceError");

    let err = evaluate("bogus", &ctx).unwrap_err();
    assert_eq!(err.name, "ReferenceError");

    let err = evaluate("steps.missing.outputs.x", &ctx).unwrap_err();
    assert_eq!(err.name, "ReferenceError");
  }

  #[test]
  fn test_syntax_error() {
    let steps = StepTable::new();
    let vars = Map::new();
    let loops = LoopContext::new();
    let ctx = EvalContext::new(&steps, &vars, &loops);

    let err = evaluate("1 +", &ctx).unwrap_err();
    assert_eq!(err.name, "SyntaxError");
    assert!(!err.description.is_empty());
  }

  #[test]
  fn test_fmt_param() {
    let steps = StepTable::new();
    let vars = Map::new();
    let loops = LoopContext::new();
    let ctx = EvalContext::new(&steps, &vars, &loops);

    assert_eq!(
      evaluate("fmt.param('v1.2', 'primary')", &ctx).unwrap(),
      json!("<div class=\"param primary\">v1.2</div>")
    );
    assert_eq!(evaluate("fmt.param('x')", &ctx).unwrap(), json!("<div class=\"param\">x</div>"));
  }

  #[test]
  fn test_log_does_not_affect_result() {
    let steps = StepTable::new();
    let vars = Map::new();
    let loops = LoopContext::new();
    let ctx = EvalContext::new(&steps, &vars, &loops);

    assert_eq!(evaluate("log('debugging', 1) ~ 'done'", &ctx).unwrap(), json!("done"));
  }

  #[test]
  fn test_deterministic() {
    let steps = steps_with("A", "x", json!([1, 2]));
    let vars = Map::new();
    let loops = LoopContext::new();
    let ctx = EvalContext::new(&steps, &vars, &loops);

    let first = evaluate("steps.A.outputs.x | length", &ctx).unwrap();
    let second = evaluate("steps.A.outputs.x | length", &ctx).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, json!(2));
  }
}
