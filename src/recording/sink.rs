use crate::error_handling::types::RecorderError;
use crate::traffic::types::Record;

/// Destination of the records produced by a traffic client.
///
/// Implementations must not block: `submit` is called from the client's
/// cycle loop between pings.
pub trait RecordSink: Send + Sync {
    fn submit(&self, record: Record) -> Result<(), RecorderError>;
}
