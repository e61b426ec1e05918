/// Result alias that carries the custom [`ChoreoError`] type.
pub type Result<T> = std::result::Result<T, ChoreoError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum ChoreoError {
    /// Every category of the catalog is empty after exclusions were applied.
    /// Planning cannot produce a closing segment from nothing.
    #[error("catalog for profile `{profile}` has no usable primitives")]
    EmptyCatalog { profile: String },
    /// No action primitive fits within the music. Only surfaced when the
    /// planner runs with strict closing enabled; otherwise the plan degrades.
    #[error("no action primitive fits within {music_duration:.2}s of music")]
    InsufficientCatalog { music_duration: f64 },
    #[error("unknown device profile `{0}`")]
    UnknownProfile(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A plan breaks one of its ordering, overlap, coverage or closing rules.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
    #[error("configuration error: {0}")]
    Config(String),
    /// The shared actuator handle is already driven by another performance.
    #[error("actuator is busy with another performance")]
    ActuatorBusy,
    #[error("actuator error: {0}")]
    Actuator(#[from] crate::actuator::ActuatorError),
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Toml(#[from] toml::de::Error),
    /// An exclusion glob that could not be compiled.
    #[error("invalid exclusion pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl ChoreoError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn invalid<T: Into<String>>(msg: T) -> Self {
        Self::InvalidInput(msg.into())
    }
}

impl From<&str> for ChoreoError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for ChoreoError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
