//! Client core for the task desk: a race-safe controller for user-triggered
//! backend calls, the backend HTTP client, and the bindings that connect them.

pub mod action;
pub mod backend;
pub mod bindings;
pub mod config;
pub mod controller;
pub mod error;
pub mod state;

pub use action::{Action, RenderHooks, SilentHooks};
pub use backend::BackendClient;
pub use bindings::{
    AnalysisRequest, AnalyzeAction, ArchiveAction, ArchiveRequest, ArchiveResponse,
    CategorizeAction, CategorizeInput, ChatAction, ChatExchange, ChatMessage, InputError,
    TabularUpload,
};
pub use config::{ConcurrencyPolicy, ControllerConfig};
pub use controller::{ActionController, Snapshot, Ticket};
pub use error::{ActionError, ErrorKind};
pub use state::{ActionPhase, ActionState, ControllerEvent, RequestToken, Settlement};
