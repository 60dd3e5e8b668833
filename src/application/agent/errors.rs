use thiserror::Error;

use crate::application::toolkit::UnknownTool;
use crate::domain::HistoryError;
use crate::model::ModelError;

/// Faults that abort an in-flight `invoke`. Tool execution faults are not
/// among them: the loop converts those into tool-result messages and lets
/// the model retry within its iteration budget.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    UnknownTool(#[from] UnknownTool),
    #[error(transparent)]
    History(#[from] HistoryError),
}
