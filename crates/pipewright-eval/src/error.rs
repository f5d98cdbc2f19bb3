use minijinja::ErrorKind;

/// Failure to evaluate a snippet.
///
/// `name` classifies the failure (`SyntaxError`, `ReferenceError`, `TypeError`
/// or `EvaluationError`) and `description` carries the engine message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{name}: {description}")]
pub struct EvaluationError {
  pub name: String,
  pub description: String,
}

impl EvaluationError {
  pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      description: description.into(),
    }
  }

  pub fn reference(description: impl Into<String>) -> Self {
    Self::new("ReferenceError", description)
  }
}

impl From<minijinja::Error> for EvaluationError {
  fn from(err: minijinja::Error) -> Self {
    let name = match err.kind() {
      ErrorKind::SyntaxError => "SyntaxError",
      ErrorKind::UndefinedError
      | ErrorKind::UnknownFunction
      | ErrorKind::UnknownFilter
      | ErrorKind::UnknownTest
      | ErrorKind::UnknownMethod => "ReferenceError",
      ErrorKind::InvalidOperation
      | ErrorKind::NonPrimitive
      | ErrorKind::NonKey
      | ErrorKind::CannotUnpack
      | ErrorKind::MissingArgument
      | ErrorKind::TooManyArguments => "TypeError",
      _ => "EvaluationError",
    };
    let description = err
      .detail()
      .map(str::to_string)
      .unwrap_or_else(|| err.to_string());
    Self::new(name, description)
  }
}
