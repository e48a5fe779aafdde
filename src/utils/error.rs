use thiserror::Error;

#[derive(Error, Debug)]
pub enum TapError {
    /// Token endpoint unreachable, rejected the credentials, or returned no usable token.
    #[error("Authentication failed: {message}")]
    Auth {
        message: String,
        body: Option<String>,
    },

    #[error("Request to {endpoint} failed: {message}")]
    Transport {
        endpoint: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Malformed response from {endpoint}: {message}")]
    MalformedResponse { endpoint: String, message: String },

    #[error("{stream} [{partition}]: {source}")]
    InPartition {
        stream: String,
        partition: String,
        #[source]
        source: Box<TapError>,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value for '{field}' ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authentication,
    Network,
    Data,
    Configuration,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    /// 依嚴重程度決定的程序退出碼
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorSeverity::Medium => 2, // 可重試
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }
}

impl TapError {
    pub fn auth(message: impl Into<String>, body: Option<String>) -> Self {
        TapError::Auth {
            message: message.into(),
            body,
        }
    }

    pub fn malformed(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        TapError::MalformedResponse {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// 附加 stream / partition 資訊，方便定位出錯的分區
    pub fn in_partition(self, stream: &str, partition: impl Into<String>) -> Self {
        TapError::InPartition {
            stream: stream.to_string(),
            partition: partition.into(),
            source: Box::new(self),
        }
    }

    /// 取得最內層的錯誤（略過 partition 包裝）
    pub fn root(&self) -> &TapError {
        match self {
            TapError::InPartition { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self.root() {
            TapError::Auth { .. } => ErrorCategory::Authentication,
            TapError::Transport { .. } => ErrorCategory::Network,
            TapError::MalformedResponse { .. } | TapError::SerializationError(_) => {
                ErrorCategory::Data
            }
            TapError::ConfigError { .. }
            | TapError::MissingConfigError { .. }
            | TapError::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            TapError::IoError(_) | TapError::InPartition { .. } => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Network => ErrorSeverity::Medium,
            ErrorCategory::Data | ErrorCategory::Configuration => ErrorSeverity::High,
            ErrorCategory::Authentication | ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Authentication => {
                "Check client_id / client_secret and that the app has access to the podcasts"
            }
            ErrorCategory::Network => "Check connectivity to the API and re-run the sync",
            ErrorCategory::Data => {
                "The provider returned unexpected data; inspect the response and report it"
            }
            ErrorCategory::Configuration => "Fix the configuration file and try again",
            ErrorCategory::System => "Check file permissions and available disk space",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Authentication => format!("Could not authenticate: {}", self),
            ErrorCategory::Network => format!("Network problem: {}", self),
            ErrorCategory::Data => format!("Unexpected API data: {}", self),
            ErrorCategory::Configuration => format!("Invalid configuration: {}", self),
            ErrorCategory::System => format!("System error: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, TapError>;
