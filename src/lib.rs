pub mod constants;
pub mod error;
pub mod geometry;
pub mod graph;
pub mod queue;
pub mod link;
pub mod ranging;
pub mod trilateration;
pub mod orchestrator;
pub mod net;
pub mod output;
pub mod config;

pub use error::{SurveyError, SurveyResult};
pub use orchestrator::{SurveyHandle, SurveyOrchestrator, SurveyPhase};
