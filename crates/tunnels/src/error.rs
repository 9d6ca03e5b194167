//! Error types for adapter, session and reflector operations.

use std::io;

use crate::AdapterState;

/// Result type for tunnel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing tunnel adapters.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from a descriptor or socket.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization error.
    #[cfg(feature = "serde")]
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The native driver library could not be loaded.
    #[error("unable to load library {library}: {source}")]
    LibraryLoad {
        /// Path or name of the library.
        library: String,
        /// The loader error.
        source: io::Error,
    },

    /// The native driver library does not export a required entry point.
    #[error("symbol {symbol} not found in {library}")]
    SymbolNotFound {
        /// Path or name of the library.
        library: String,
        /// The missing entry point.
        symbol: String,
    },

    /// Ring capacity the driver does not accept.
    #[error("invalid ring capacity: {capacity} (must be within {min}..={max})", min = crate::ring::RING_CAPACITY_MIN, max = crate::ring::RING_CAPACITY_MAX)]
    InvalidRingCapacity {
        /// The rejected capacity in bytes.
        capacity: u32,
    },

    /// Packet size of zero or above the driver maximum.
    #[error("invalid packet size: {size} (must be within 1..={max})", max = crate::ring::PACKET_SIZE_MAX)]
    InvalidPacketSize {
        /// The rejected size in bytes.
        size: usize,
    },

    /// Invalid adapter name.
    #[error("invalid adapter name: {0}")]
    InvalidName(String),

    /// Adapter name longer than the platform allows.
    #[error("adapter name too long: {name} ({len} > {max} characters)")]
    NameTooLong {
        /// The name that was too long.
        name: String,
        /// Its length.
        len: usize,
        /// The platform maximum.
        max: usize,
    },

    /// Invalid address string.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Invalid adapter identity token.
    #[error("invalid GUID: {0}")]
    InvalidGuid(String),

    /// No ring space for another send packet right now.
    #[error("send ring exhausted")]
    RingExhausted,

    /// The receive ring is empty.
    #[error("no packet available")]
    NoPacketAvailable,

    /// Neither opening nor creating the adapter succeeded.
    #[error("adapter {name} unavailable: {source}")]
    AdapterUnavailable {
        /// The adapter name.
        name: String,
        /// The driver error from the create attempt.
        source: io::Error,
    },

    /// A driver entry point reported failure.
    #[error("{operation} failed: {source}")]
    Driver {
        /// The driver operation.
        operation: &'static str,
        /// The OS error reported by the driver.
        source: io::Error,
    },

    /// ioctl failed.
    #[error("ioctl {name} failed: {source}")]
    Ioctl {
        /// The ioctl name.
        name: &'static str,
        /// The underlying error.
        source: io::Error,
    },

    /// External configuration command failed.
    #[error("command `{command}` failed (status {status:?}): {output}")]
    Command {
        /// The command line that was run.
        command: String,
        /// Exit code, if the process exited normally.
        status: Option<i32>,
        /// Combined stdout and stderr.
        output: String,
    },

    /// Numeric link setting the kernel cannot represent.
    #[error("invalid {what}: {value} (must be at most {max})", max = i32::MAX)]
    InvalidArgument {
        /// The setting, e.g. `mtu`.
        what: &'static str,
        /// The rejected value.
        value: u32,
    },

    /// Operation not supported by this adapter variant.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// Operation called in a lifecycle state that does not allow it.
    #[error("{operation} not allowed in state {state:?}")]
    InvalidState {
        /// The attempted operation.
        operation: &'static str,
        /// The adapter state at the time of the call.
        state: AdapterState,
    },

    /// Raw socket could not be created or configured.
    #[error("raw socket unavailable ({operation}): {source}")]
    SocketUnavailable {
        /// The failing step.
        operation: &'static str,
        /// The underlying error.
        source: io::Error,
    },

    /// Frame too short to locate the fields the reflector rewrites.
    #[error("malformed frame: {len} bytes, need at least {needed}")]
    MalformedFrame {
        /// Frame length.
        len: usize,
        /// Bytes required to reach the destination port.
        needed: usize,
    },
}

impl Error {
    /// Create an ioctl error.
    pub fn ioctl(name: &'static str, source: io::Error) -> Self {
        Error::Ioctl { name, source }
    }

    /// Create a driver error from the calling thread's last OS error.
    pub(crate) fn driver(operation: &'static str, source: io::Error) -> Self {
        Error::Driver { operation, source }
    }

    /// Check if this is an expected "try again later" condition.
    ///
    /// True for a full send ring, an empty receive ring and non-blocking
    /// descriptors without data. Callers back off and retry.
    pub fn is_would_block(&self) -> bool {
        match self {
            Self::RingExhausted | Self::NoPacketAvailable => true,
            Self::Io(e) => e.kind() == io::ErrorKind::WouldBlock,
            _ => false,
        }
    }

    /// Check if the adapter variant has no primitive for this operation.
    pub fn is_not_supported(&self) -> bool {
        matches!(self, Self::NotSupported(_))
    }

    /// Check if this is a permission error (EPERM, EACCES).
    pub fn is_permission_denied(&self) -> bool {
        self.raw_os_error()
            .is_some_and(|errno| matches!(errno, 1 | 13)) // EPERM=1, EACCES=13
    }

    /// Get the underlying OS error code, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Io(source)
            | Self::LibraryLoad { source, .. }
            | Self::AdapterUnavailable { source, .. }
            | Self::Driver { source, .. }
            | Self::Ioctl { source, .. }
            | Self::SocketUnavailable { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_would_block() {
        assert!(Error::RingExhausted.is_would_block());
        assert!(Error::NoPacketAvailable.is_would_block());
        assert!(Error::Io(io::Error::from(io::ErrorKind::WouldBlock)).is_would_block());
        assert!(!Error::InvalidRingCapacity { capacity: 1 }.is_would_block());
        assert!(!Error::Io(io::Error::from(io::ErrorKind::NotFound)).is_would_block());
    }

    #[test]
    fn test_permission_denied() {
        let err = Error::ioctl("TUNSETIFF", io::Error::from_raw_os_error(1));
        assert!(err.is_permission_denied());
        assert_eq!(err.raw_os_error(), Some(1));

        let err = Error::ioctl("TUNSETIFF", io::Error::from_raw_os_error(16));
        assert!(!err.is_permission_denied());
    }

    #[test]
    fn test_error_messages() {
        let err = Error::InvalidRingCapacity { capacity: 4096 };
        assert_eq!(
            err.to_string(),
            "invalid ring capacity: 4096 (must be within 131072..=67108864)"
        );

        let err = Error::InvalidArgument {
            what: "mtu",
            value: u32::MAX,
        };
        assert_eq!(err.to_string(), "invalid mtu: 4294967295 (must be at most 2147483647)");

        let err = Error::SymbolNotFound {
            library: "wintun.dll".into(),
            symbol: "WintunStartSession".into(),
        };
        assert_eq!(
            err.to_string(),
            "symbol WintunStartSession not found in wintun.dll"
        );

        let err = Error::InvalidState {
            operation: "receive_packet",
            state: AdapterState::Bound,
        };
        assert_eq!(err.to_string(), "receive_packet not allowed in state Bound");

        let err = Error::MalformedFrame { len: 12, needed: 20 };
        assert_eq!(
            err.to_string(),
            "malformed frame: 12 bytes, need at least 20"
        );
    }
}
