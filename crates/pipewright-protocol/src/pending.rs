use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::debug;

use crate::message::{Event, RequestId, Response};

/// Requests awaiting their terminal event.
///
/// An entry is removed exactly once: by the `end` event that resolves it, or
/// by the waiting side giving up (cancellation, dropped future). Responses for
/// ids that are no longer pending are discarded, which covers duplicate `end`
/// events as well as results arriving after a local cancellation.
#[derive(Debug, Default)]
pub struct PendingTable {
  entries: Mutex<HashMap<RequestId, mpsc::UnboundedSender<Event>>>,
}

impl PendingTable {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<RequestId, mpsc::UnboundedSender<Event>>> {
    self.entries.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Register `id` and return the stream its events will arrive on.
  pub fn register(&self, id: RequestId) -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    self.lock().insert(id, tx);
    rx
  }

  /// Forget `id`. Returns whether it was still pending.
  pub fn remove(&self, id: &RequestId) -> bool {
    self.lock().remove(id).is_some()
  }

  pub fn contains(&self, id: &RequestId) -> bool {
    self.lock().contains_key(id)
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  /// Route a response to its waiter. Returns `false` if it was discarded.
  pub fn dispatch(&self, response: Response) -> bool {
    let Response {
      request_id, events, ..
    } = response;

    let sender = if matches!(events, Event::End(_)) {
      self.lock().remove(&request_id)
    } else {
      self.lock().get(&request_id).cloned()
    };

    match sender {
      Some(tx) => tx.send(events).is_ok(),
      None => {
        debug!(request_id = %request_id, "response_discarded");
        false
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::message::{InvocationResult, LogLine};

  #[tokio::test]
  async fn test_events_then_end() {
    let table = PendingTable::new();
    let id = RequestId::new();
    let mut rx = table.register(id.clone());

    assert!(table.dispatch(Response::new(id.clone(), Event::Log(LogLine::info("hi")))));
    assert!(table.contains(&id));
    assert!(table.dispatch(Response::new(id.clone(), Event::End(InvocationResult::error("x")))));
    assert!(!table.contains(&id));

    assert_eq!(rx.recv().await, Some(Event::Log(LogLine::info("hi"))));
    assert_eq!(rx.recv().await, Some(Event::End(InvocationResult::error("x"))));
    // sender was dropped with the entry
    assert_eq!(rx.recv().await, None);
  }

  #[test]
  fn test_duplicate_end_is_discarded() {
    let table = PendingTable::new();
    let id = RequestId::new();
    let _rx = table.register(id.clone());

    let end = Response::new(id.clone(), Event::End(InvocationResult::error("first")));
    assert!(table.dispatch(end.clone()));
    assert!(!table.dispatch(end));
    assert!(table.is_empty());
  }

  #[test]
  fn test_unknown_id_is_discarded() {
    let table = PendingTable::new();
    let end = Response::new(RequestId::new(), Event::End(InvocationResult::error("late")));
    assert!(!table.dispatch(end));
  }

  #[test]
  fn test_removed_entry_discards_late_end() {
    let table = PendingTable::new();
    let id = RequestId::new();
    let _rx = table.register(id.clone());
    assert!(table.remove(&id));
    assert!(!table.remove(&id));
    assert!(!table.dispatch(Response::new(id, Event::End(InvocationResult::aborted()))));
  }
}
