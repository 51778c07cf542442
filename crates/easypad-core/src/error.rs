use easypad_protocol::DeviceId;

pub type Result<T> = std::result::Result<T, Error>;

/// Which index space an out-of-range index belonged to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
    Button,
    Axis,
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexKind::Button => f.write_str("button"),
            IndexKind::Axis => f.write_str("axis"),
        }
    }
}

/// Failures of the virtual gamepad subsystem.
///
/// None of these are fatal to the host; the control API turns every one of
/// them into a `false`/`None` sentinel.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The platform probe failed (OS too old, driver missing, no backend).
    #[error("virtual gamepads are not supported on this platform")]
    UnsupportedPlatform,

    /// The backend refused to construct a device on a supported platform.
    #[error("backend failed to construct device: {0:#}")]
    Creation(#[source] anyhow::Error),

    /// Bring-up failed after construction. Only observed through lifecycle
    /// polling, never returned from `create`.
    #[error("device activation failed: {0}")]
    Activation(String),

    #[error("no device with handle {0}")]
    InvalidHandle(DeviceId),

    #[error("{kind} index {index} out of range")]
    InvalidIndex { kind: IndexKind, index: usize },

    #[error("device already destroyed")]
    AlreadyDestroyed,

    #[error("driver installation failed: {0:#}")]
    Install(#[source] anyhow::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}
