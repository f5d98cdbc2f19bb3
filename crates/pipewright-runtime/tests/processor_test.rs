use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pipewright_config::{
  Block, BlockKind, NodeDefinition, NodeKind, Origin, ParamDefinition, PluginDefinition, Variable,
};
use pipewright_protocol::{
  ACTION_EXECUTE, CONDITION_EXECUTE, Event, InvocationResult, Invoke, LogLevel, LogLine,
};
use pipewright_runtime::{
  ChannelObserver, ExecutionEvent, NodeStatus, Processor, RunOutcome, RunRequest, RuntimeError,
};
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type Script = Box<dyn Fn(&str, &Value, &mpsc::UnboundedSender<Event>) -> InvocationResult + Send + Sync>;

/// Answers invocations from a script and records every call.
struct FakeInvoker {
  script: Script,
  calls: Mutex<Vec<(String, Value)>>,
}

impl FakeInvoker {
  fn new<F>(script: F) -> Arc<Self>
  where
    F: Fn(&str, &Value, &mpsc::UnboundedSender<Event>) -> InvocationResult + Send + Sync + 'static,
  {
    Arc::new(Self {
      script: Box::new(script),
      calls: Mutex::new(Vec::new()),
    })
  }

  /// Every action echoes its params back as outputs.
  fn echo() -> Arc<Self> {
    Self::new(|_, data, _| InvocationResult::success(params_of(data)))
  }

  fn calls(&self) -> Vec<(String, Value)> {
    self.calls.lock().unwrap().clone()
  }

  fn called_nodes(&self) -> Vec<String> {
    self
      .calls()
      .iter()
      .map(|(_, data)| data["nodeId"].as_str().unwrap().to_string())
      .collect()
  }
}

#[async_trait]
impl Invoke for FakeInvoker {
  async fn invoke(
    &self,
    channel: &str,
    data: Value,
    cancel: &CancellationToken,
    events: mpsc::UnboundedSender<Event>,
  ) -> InvocationResult {
    self.calls.lock().unwrap().push((channel.to_string(), data.clone()));
    if cancel.is_cancelled() {
      return InvocationResult::aborted();
    }
    (self.script)(channel, &data, &events)
  }
}

/// Waits until cancelled.
struct HangingInvoker;

#[async_trait]
impl Invoke for HangingInvoker {
  async fn invoke(
    &self,
    _channel: &str,
    _data: Value,
    cancel: &CancellationToken,
    _events: mpsc::UnboundedSender<Event>,
  ) -> InvocationResult {
    cancel.cancelled().await;
    InvocationResult::aborted()
  }
}

fn params_of(data: &Value) -> Map<String, Value> {
  data["params"].as_object().cloned().unwrap_or_default()
}

fn outputs(pairs: &[(&str, Value)]) -> Map<String, Value> {
  pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

/// Action block whose node id is its lowercased uid.
fn action(uid: &str) -> Block {
  Block::action(uid, Origin::new("test", uid.to_lowercase())).with_name(format!("Step {}", uid))
}

fn request(blocks: Vec<Block>) -> RunRequest {
  RunRequest {
    pipeline_id: "pipeline-1".to_string(),
    name: "Test pipeline".to_string(),
    blocks,
    variables: Vec::new(),
  }
}

fn observed(processor: Processor) -> (Processor, mpsc::UnboundedReceiver<ExecutionEvent>) {
  let (tx, rx) = mpsc::unbounded_channel();
  (processor.with_observer(Arc::new(ChannelObserver::new(tx))), rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
  let mut events = Vec::new();
  while let Ok(event) = rx.try_recv() {
    events.push(event);
  }
  events
}

fn entered(events: &[ExecutionEvent]) -> Vec<String> {
  events
    .iter()
    .filter_map(|e| match e {
      ExecutionEvent::NodeEntered { node_id } => Some(node_id.clone()),
      _ => None,
    })
    .collect()
}

fn exit_status(events: &[ExecutionEvent], uid: &str) -> Option<NodeStatus> {
  events.iter().find_map(|e| match e {
    ExecutionEvent::NodeExited { node_id, status, .. } if node_id == uid => Some(*status),
    _ => None,
  })
}

fn outcome(events: &[ExecutionEvent]) -> Option<RunOutcome> {
  events.iter().find_map(|e| match e {
    ExecutionEvent::RunFinished { outcome, .. } => Some(outcome.clone()),
    _ => None,
  })
}

#[tokio::test]
async fn test_single_action_records_outputs() {
  let invoker = FakeInvoker::new(|_, _, _| InvocationResult::success(outputs(&[("x", json!("1"))])));
  let (processor, mut rx) = observed(Processor::new(invoker.clone()));

  let result = processor
    .run(request(vec![action("A")]), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(
    serde_json::to_value(&result.steps).unwrap(),
    json!({ "A": { "outputs": { "x": "1" } } })
  );

  let events = drain(&mut rx);
  assert!(matches!(events.first(), Some(ExecutionEvent::RunStarted { pipeline_id, .. }) if pipeline_id == "pipeline-1"));
  assert_eq!(entered(&events), vec!["A"]);
  assert_eq!(exit_status(&events, "A"), Some(NodeStatus::Completed));
  assert_eq!(outcome(&events), Some(RunOutcome::Completed));
  assert_eq!(invoker.calls()[0].0, ACTION_EXECUTE);
}

#[tokio::test]
async fn test_outputs_flow_into_later_params() {
  let invoker = FakeInvoker::new(|_, data, _| match data["nodeId"].as_str() {
    Some("a") => InvocationResult::success(outputs(&[("x", json!("5"))])),
    _ => InvocationResult::success(params_of(data)),
  });
  let processor = Processor::new(invoker.clone());

  let blocks = vec![action("A"), action("B").with_param("p", "steps.A.outputs.x")];
  let result = processor.run(request(blocks), CancellationToken::new()).await.unwrap();

  let calls = invoker.calls();
  assert_eq!(calls[1].1["params"]["p"], json!("5"));
  assert_eq!(result.steps.output("B", "p"), Some(&json!("5")));
}

#[tokio::test]
async fn test_nodes_run_in_document_order() {
  let invoker = FakeInvoker::echo();
  let processor = Processor::new(invoker.clone());

  let blocks = vec![action("A"), action("B"), action("C")];
  processor.run(request(blocks), CancellationToken::new()).await.unwrap();

  assert_eq!(invoker.called_nodes(), vec!["a", "b", "c"]);

  // each node sees exactly the outputs of the nodes before it
  let calls = invoker.calls();
  let visible: Vec<Vec<String>> = calls
    .iter()
    .map(|(_, data)| data["steps"].as_object().unwrap().keys().cloned().collect())
    .collect();
  assert_eq!(visible[0], Vec::<String>::new());
  assert_eq!(visible[1], vec!["A"]);
  assert_eq!(visible[2], vec!["A", "B"]);
}

#[tokio::test]
async fn test_cancelled_before_start_never_invokes() {
  let invoker = FakeInvoker::echo();
  let (processor, mut rx) = observed(Processor::new(invoker.clone()));

  let cancel = CancellationToken::new();
  cancel.cancel();
  let err = processor.run(request(vec![action("A")]), cancel).await.unwrap_err();

  assert!(err.is_cancelled());
  assert!(invoker.calls().is_empty());
  let events = drain(&mut rx);
  assert!(entered(&events).is_empty());
  assert_eq!(outcome(&events), Some(RunOutcome::Cancelled));
}

#[tokio::test]
async fn test_runner_error_fails_run_and_stops_walk() {
  let invoker = FakeInvoker::new(|_, data, _| match data["nodeId"].as_str() {
    Some("a") => InvocationResult::error("boom"),
    _ => InvocationResult::success(Map::new()),
  });
  let (processor, mut rx) = observed(Processor::new(invoker.clone()));

  let err = processor
    .run(request(vec![action("A"), action("B")]), CancellationToken::new())
    .await
    .unwrap_err();

  assert_eq!(err.to_string(), "\"Step A\" action error: boom");
  assert_eq!(err.node_id(), Some("A"));
  assert_eq!(invoker.called_nodes(), vec!["a"]);

  let events = drain(&mut rx);
  assert_eq!(exit_status(&events, "A"), Some(NodeStatus::Failed));
  assert!(matches!(outcome(&events), Some(RunOutcome::Failed { node_id: Some(id), .. }) if id == "A"));
}

#[tokio::test]
async fn test_bad_param_is_omitted_and_node_still_runs() {
  let invoker = FakeInvoker::echo();
  let processor = Processor::new(invoker.clone());

  let block = action("A")
    .with_param("good", "'ok'")
    .with_param("bad", "{{ bogus.reference }}");
  processor.run(request(vec![block]), CancellationToken::new()).await.unwrap();

  let params = params_of(&invoker.calls()[0].1);
  assert_eq!(params.get("good"), Some(&json!("ok")));
  assert!(!params.contains_key("bad"));
}

#[tokio::test]
async fn test_disabled_nodes_are_skipped() {
  let invoker = FakeInvoker::echo();
  let (processor, mut rx) = observed(Processor::new(invoker.clone()));

  let blocks = vec![
    action("A"),
    action("B").with_param("p", "{{ bogus }}").disabled(),
    Block::new(
      "L",
      Origin::new("test", "loop"),
      BlockKind::Loop {
        children: vec![action("D")],
      },
    )
    .with_param("value", "[1]")
    .disabled(),
    action("C"),
  ];
  let result = processor.run(request(blocks), CancellationToken::new()).await.unwrap();

  assert_eq!(invoker.called_nodes(), vec!["a", "c"]);
  assert!(!result.steps.contains("B"));
  let events = drain(&mut rx);
  assert_eq!(entered(&events), vec!["A", "C"]);
  assert!(events.iter().any(|e| matches!(
    e,
    ExecutionEvent::Log { node_id: None, level: LogLevel::Warn, message } if message.contains("Step B")
  )));
}

#[tokio::test]
async fn test_events_fire_hooks_and_comments_are_silent() {
  let invoker = FakeInvoker::echo();
  let (processor, mut rx) = observed(Processor::new(invoker.clone()));

  let blocks = vec![
    Block::new("T", Origin::new("system", "manual"), BlockKind::Event),
    Block::new(
      "N",
      Origin::new("system", "comment"),
      BlockKind::Comment {
        comment: "remember to bump the version".to_string(),
      },
    ),
    action("A"),
  ];
  processor.run(request(blocks), CancellationToken::new()).await.unwrap();

  assert_eq!(invoker.called_nodes(), vec!["a"]);
  let events = drain(&mut rx);
  assert_eq!(entered(&events), vec!["T", "A"]);
  assert_eq!(exit_status(&events, "T"), Some(NodeStatus::Completed));
}

#[tokio::test]
async fn test_cancel_during_invocation() {
  let (processor, mut rx) = observed(Processor::new(Arc::new(HangingInvoker)));
  let cancel = CancellationToken::new();

  let trigger = cancel.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(20)).await;
    trigger.cancel();
  });

  let err = processor
    .run(request(vec![action("A"), action("B")]), cancel)
    .await
    .unwrap_err();

  assert_eq!(err, RuntimeError::Cancelled);
  let events = drain(&mut rx);
  assert_eq!(entered(&events), vec!["A"]);
  assert_eq!(exit_status(&events, "A"), Some(NodeStatus::Cancelled));
  assert_eq!(outcome(&events), Some(RunOutcome::Cancelled));
}

#[tokio::test]
async fn test_abort_marker_is_cancellation_not_failure() {
  let invoker = FakeInvoker::new(|_, _, _| InvocationResult::aborted());
  let processor = Processor::new(invoker);

  let err = processor
    .run(request(vec![action("A")]), CancellationToken::new())
    .await
    .unwrap_err();
  assert!(err.is_cancelled());
}

#[tokio::test]
async fn test_condition_runs_one_branch() {
  let invoker = FakeInvoker::new(|channel, data, _| {
    if channel == CONDITION_EXECUTE {
      let go = data["params"]["go"].as_bool().unwrap_or(false);
      InvocationResult::condition(go, outputs(&[("result", json!(go))]))
    } else {
      InvocationResult::success(Map::new())
    }
  });
  let processor = Processor::new(invoker.clone());

  let condition = |go: &str| {
    Block::new(
      "C",
      Origin::new("test", "cond"),
      BlockKind::Condition {
        branch_true: vec![action("T")],
        branch_false: vec![action("F")],
      },
    )
    .with_param("go", go)
  };

  let result = processor
    .run(request(vec![condition("true"), action("After")]), CancellationToken::new())
    .await
    .unwrap();
  assert_eq!(invoker.called_nodes(), vec!["cond", "t", "after"]);
  assert_eq!(result.steps.output("C", "result"), Some(&json!(true)));

  let invoker = FakeInvoker::new(|channel, _, _| {
    if channel == CONDITION_EXECUTE {
      InvocationResult::condition(false, Map::new())
    } else {
      InvocationResult::success(Map::new())
    }
  });
  let processor = Processor::new(invoker.clone());
  processor
    .run(request(vec![condition("false")]), CancellationToken::new())
    .await
    .unwrap();
  assert_eq!(invoker.called_nodes(), vec!["cond", "f"]);
}

#[tokio::test]
async fn test_condition_without_boolean_fails() {
  let invoker = FakeInvoker::new(|_, _, _| InvocationResult::success(Map::new()));
  let processor = Processor::new(invoker);

  let block = Block::new(
    "C",
    Origin::new("test", "cond"),
    BlockKind::Condition {
      branch_true: Vec::new(),
      branch_false: Vec::new(),
    },
  );
  let err = processor
    .run(request(vec![block]), CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(err, RuntimeError::InvalidCondition { .. }));
}

#[tokio::test]
async fn test_loop_iterates_children_with_loop_context() {
  let invoker = FakeInvoker::echo();
  let processor = Processor::new(invoker.clone());

  let block = Block::new(
    "L",
    Origin::new("system", "loop"),
    BlockKind::Loop {
      children: vec![
        action("Body")
          .with_param("value", "context.loopvalue")
          .with_param("index", "context.loopindex"),
      ],
    },
  )
  .with_param("value", "['a', 'b', 'c']");

  let result = processor
    .run(request(vec![block, action("After")]), CancellationToken::new())
    .await
    .unwrap();

  let bodies: Vec<(Value, Value)> = invoker
    .calls()
    .iter()
    .filter(|(_, data)| data["nodeId"] == "body")
    .map(|(_, data)| (data["params"]["index"].clone(), data["params"]["value"].clone()))
    .collect();
  assert_eq!(
    bodies,
    vec![(json!(0), json!("a")), (json!(1), json!("b")), (json!(2), json!("c"))]
  );

  // last iteration wins
  assert_eq!(result.steps.output("Body", "value"), Some(&json!("c")));
  assert_eq!(result.steps.output("L", "iterations"), Some(&json!(3)));
  assert_eq!(invoker.called_nodes().last().map(String::as_str), Some("after"));
}

#[tokio::test]
async fn test_loop_stops_on_child_failure() {
  let invoker = FakeInvoker::new(|_, data, _| {
    if data["params"]["value"] == json!(2) {
      InvocationResult::error("bad item")
    } else {
      InvocationResult::success(Map::new())
    }
  });
  let (processor, mut rx) = observed(Processor::new(invoker.clone()));

  let block = Block::new(
    "L",
    Origin::new("system", "loop"),
    BlockKind::Loop {
      children: vec![action("Body").with_param("value", "context.loopvalue")],
    },
  )
  .with_param("value", "[1, 2, 3]");

  let err = processor
    .run(request(vec![block]), CancellationToken::new())
    .await
    .unwrap_err();

  assert_eq!(err.node_id(), Some("Body"));
  assert_eq!(invoker.calls().len(), 2);
  let events = drain(&mut rx);
  assert_eq!(exit_status(&events, "L"), Some(NodeStatus::Failed));
}

#[tokio::test]
async fn test_loop_requires_an_array() {
  let processor = Processor::new(FakeInvoker::echo());

  let block = Block::new(
    "L",
    Origin::new("system", "loop"),
    BlockKind::Loop {
      children: Vec::new(),
    },
  )
  .with_param("value", "'not a list'");

  let err = processor
    .run(request(vec![block]), CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(err, RuntimeError::InvalidLoop { .. }));
}

#[tokio::test]
async fn test_missing_required_param_aborts_before_invocation() {
  let invoker = FakeInvoker::echo();
  let definitions = vec![PluginDefinition {
    id: "test".to_string(),
    name: "Test".to_string(),
    description: String::new(),
    nodes: vec![
      NodeDefinition::new("a", "A", NodeKind::Action)
        .with_param("message", ParamDefinition::required("Message")),
    ],
  }];
  let (processor, mut rx) = observed(Processor::new(invoker.clone()).with_definitions(definitions));

  // the expression fails, so the required param ends up missing
  let block = action("A").with_param("message", "{{ nope.nope }}");
  let err = processor
    .run(request(vec![block]), CancellationToken::new())
    .await
    .unwrap_err();

  assert!(matches!(err, RuntimeError::MissingParam { ref param, .. } if param == "message"));
  assert!(invoker.calls().is_empty());
  assert_eq!(exit_status(&drain(&mut rx), "A"), Some(NodeStatus::Failed));
}

#[tokio::test]
async fn test_runner_logs_are_attributed_to_the_node() {
  let invoker = FakeInvoker::new(|_, _, events| {
    let _ = events.send(Event::Log(LogLine::new(LogLevel::Info, "compressing")));
    let _ = events.send(Event::Progress(json!({ "mode": "indeterminate" })));
    InvocationResult::success(Map::new())
  });
  let (processor, mut rx) = observed(Processor::new(invoker));

  processor.run(request(vec![action("A")]), CancellationToken::new()).await.unwrap();

  let events = drain(&mut rx);
  let log_pos = events
    .iter()
    .position(|e| matches!(e, ExecutionEvent::Log { node_id: Some(id), message, .. } if id == "A" && message == "compressing"))
    .unwrap();
  let exit_pos = events
    .iter()
    .position(|e| matches!(e, ExecutionEvent::NodeExited { node_id, .. } if node_id == "A"))
    .unwrap();
  assert!(log_pos < exit_pos);
}

#[tokio::test]
async fn test_variables_are_visible() {
  let invoker = FakeInvoker::echo();
  let processor = Processor::new(invoker.clone());

  let mut req = request(vec![action("A").with_param("channel", "variables.channel ~ '-beta'")]);
  req.variables = vec![Variable::string("channel", "release")];
  processor.run(req, CancellationToken::new()).await.unwrap();

  assert_eq!(invoker.calls()[0].1["params"]["channel"], json!("release-beta"));
}

#[tokio::test]
async fn test_runs_are_independent() {
  let invoker = FakeInvoker::echo();
  let processor = Processor::new(invoker.clone());

  let first = processor
    .run(request(vec![action("A").with_param("n", "1")]), CancellationToken::new())
    .await
    .unwrap();

  let cancelled = CancellationToken::new();
  cancelled.cancel();
  assert!(processor.run(request(vec![action("A")]), cancelled).await.is_err());

  let second = processor
    .run(request(vec![action("B")]), CancellationToken::new())
    .await
    .unwrap();

  assert_ne!(first.execution_id, second.execution_id);
  assert!(!second.steps.contains("A"));
}
