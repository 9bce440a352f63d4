pub mod discovery;
pub mod service;

pub use service::{
    CycleOutcome, MonitorError, MonitorSettings, MonitorState, MonitorStatus, MonitoringService, SPL_TOKEN_PROGRAM_ID,
};
