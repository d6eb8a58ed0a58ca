use std::{borrow::Cow, fmt};

use crate::handle::Dim3;

/// A status code reported by the underlying driver, passed through
/// unchanged so callers see exactly what the driver said
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Status {
    code: i32,
    name: Cow<'static, str>,
}

impl Status {
    pub fn new(code: i32, name: impl Into<Cow<'static, str>>) -> Self {
        Self { code, name: name.into() }
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#x})", self.name, self.code)
    }
}

/// Errors raised by the binding layer
///
/// Every variant except `InvalidRequest` wraps a non-success driver
/// status. Nothing is retried or recovered locally.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    /// The driver rejected a device binary. No module handle was created.
    #[error("failed to load module: {status}")]
    Load { status: Status },

    /// An occupancy, group-size or kernel lookup query failed. The
    /// queried handle remains valid.
    #[error("driver query failed: {status}")]
    Query { status: Status },

    /// The driver rejected a group size. The previously configured
    /// group size stays in effect.
    #[error("group size {group} rejected: {status}")]
    Config { group: Dim3, status: Status },

    /// The driver rejected an argument binding. Earlier bindings of
    /// the same index stay in effect.
    #[error("failed to bind argument {index}: {status}")]
    Bind { index: u32, status: Status },

    /// A fill, copy or read of device memory failed.
    ///
    /// For sticky driver errors (illegal address, device lost) every
    /// handle created on the same context must be treated as invalid.
    #[error("device memory operation failed: {status}")]
    DeviceMemory { status: Status },

    /// The request was malformed before reaching the driver.
    #[error("{0}")]
    InvalidRequest(String),
}

impl BindError {
    /// The driver status, if the driver was involved
    pub fn status(&self) -> Option<&Status> {
        match self {
            Self::Load { status }
            | Self::Query { status }
            | Self::Config { status, .. }
            | Self::Bind { status, .. }
            | Self::DeviceMemory { status } => Some(status),
            Self::InvalidRequest(_) => None,
        }
    }

    /// Raw driver status code, falling back to `invalid` for errors
    /// detected before any driver call
    pub fn code_or(&self, invalid: i32) -> i32 {
        self.status().map_or(invalid, Status::code)
    }
}

impl From<String> for BindError {
    fn from(value: String) -> Self {
        Self::InvalidRequest(value)
    }
}

impl From<&str> for BindError {
    fn from(value: &str) -> Self {
        Self::InvalidRequest(value.to_string())
    }
}

pub type Result<T, E = BindError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_passes_through() {
        let status = Status::new(0x78000015, "ZE_RESULT_ERROR_INVALID_KERNEL_ARGUMENT_INDEX");
        let err = BindError::Bind { index: 5, status: status.clone() };

        assert_eq!(err.status(), Some(&status));
        assert_eq!(err.code_or(-1), 0x78000015);
        assert_eq!(
            err.to_string(),
            "failed to bind argument 5: ZE_RESULT_ERROR_INVALID_KERNEL_ARGUMENT_INDEX (0x78000015)"
        );
    }

    #[test]
    fn invalid_request_has_no_status() {
        let err = BindError::from("byte count overflows");
        assert!(err.status().is_none());
        assert_eq!(err.code_or(7), 7);
    }
}
