use pipewright_eval::StepTable;
use serde::{Deserialize, Serialize};

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
  pub execution_id: String,
  /// Outputs of every block that produced any, keyed by uid.
  pub steps: StepTable,
}
