/// Execution requests and their validation
mod request;
pub use request::{ArtifactRef, ExecutionRequest, Params, ResourceLimits, ValidationError};

/// The normalized outcome of one execution
mod result;
pub use result::{error_type, ExecutionResult};

/// Log events and the line-oriented streaming protocol
mod event;
pub use event::{ExecutionId, LogEvent, LogLevel, StreamError, StreamMessage};

/// Sentinel-delimited result extraction from job logs
mod extract;
pub use extract::{
    excerpt, extract_result, find_payload, progress_lines, ExtractError, PROGRESS_PREFIX,
    RESULT_END, RESULT_START,
};
