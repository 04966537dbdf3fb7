use thiserror::Error;

/// Failures raised by a zone device (simulator handle or register bus).
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device answered but refused the request (Modbus exception response).
    #[error("device rejected request: {0}")]
    Rejected(String),
    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("device did not answer within {0:?}")]
    Timeout(std::time::Duration),
    #[error("device unavailable: {0}")]
    Unavailable(String),
}

/// Error taxonomy shared by the arbiter, decision loop, simulator and replay.
///
/// Every variant is scoped to a single zone; callers that iterate zones log the
/// error and move on to the next zone.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error(transparent)]
    DeviceIo(#[from] DeviceError),

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

impl ControlError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::DataUnavailable(msg.into())
    }
}

impl From<validator::ValidationErrors> for ControlError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Config(errors.to_string())
    }
}

impl From<figment::Error> for ControlError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

pub type ControlResult<T> = Result<T, ControlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_errors_convert_into_control_errors() {
        let err: ControlError = DeviceError::Rejected("illegal data address".into()).into();
        assert!(matches!(err, ControlError::DeviceIo(DeviceError::Rejected(_))));
        assert_eq!(err.to_string(), "device rejected request: illegal data address");
    }

    #[test]
    fn helper_constructors_keep_message() {
        assert_eq!(
            ControlError::config("bad schedule").to_string(),
            "configuration error: bad schedule"
        );
        assert_eq!(
            ControlError::unavailable("no weather").to_string(),
            "data unavailable: no weather"
        );
    }
}
