use thiserror::Error;

#[derive(Error, Debug)]
pub enum PostexError {
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("PostEx rejected the request (HTTP {code}): {message}")]
    CarrierRejection {
        code: u16,
        message: String,
        technical: String,
    },

    #[error("City '{city}' has failed {failure_count} time(s) in PostEx API")]
    CityBlocked { city: String, failure_count: u32 },

    #[error("Validation error on '{field}': {message}")]
    ValidationError { field: String, message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Carrier,
    City,
    Validation,
    Configuration,
    Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl PostexError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        PostexError::ValidationError {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            PostexError::NetworkError(_) => ErrorCategory::Network,
            PostexError::CarrierRejection { .. } => ErrorCategory::Carrier,
            PostexError::CityBlocked { .. } => ErrorCategory::City,
            PostexError::ValidationError { .. } => ErrorCategory::Validation,
            PostexError::ConfigError { .. }
            | PostexError::InvalidConfigValueError { .. }
            | PostexError::MissingConfigError { .. } => ErrorCategory::Configuration,
            PostexError::IoError(_)
            | PostexError::SerializationError(_)
            | PostexError::CsvError(_) => ErrorCategory::Storage,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            // 可重試
            PostexError::NetworkError(_) => ErrorSeverity::Medium,
            PostexError::CarrierRejection { code, .. } if *code == 429 || *code >= 500 => {
                ErrorSeverity::Medium
            }
            PostexError::CarrierRejection { .. }
            | PostexError::CityBlocked { .. }
            | PostexError::ValidationError { .. } => ErrorSeverity::High,
            PostexError::ConfigError { .. }
            | PostexError::InvalidConfigValueError { .. }
            | PostexError::MissingConfigError { .. }
            | PostexError::IoError(_)
            | PostexError::SerializationError(_)
            | PostexError::CsvError(_) => ErrorSeverity::Critical,
        }
    }

    /// True when the carrier's own error text points at the destination city.
    pub fn is_city_related(&self) -> bool {
        match self {
            PostexError::CarrierRejection {
                message, technical, ..
            } => mentions_city(message) || mentions_city(technical),
            _ => false,
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            PostexError::NetworkError(e) if e.is_timeout() => {
                "Network error: PostEx did not answer in time, try again later".to_string()
            }
            PostexError::NetworkError(_) => {
                "Network error: Unable to connect to PostEx service, try again later".to_string()
            }
            PostexError::CarrierRejection { message, .. } => message.clone(),
            PostexError::CityBlocked {
                city,
                failure_count,
            } => format!(
                "City '{}' has failed {} time(s) in PostEx API. Please verify the city name or contact PostEx support.",
                city, failure_count
            ),
            PostexError::ValidationError { field, message } => {
                format!("Invalid booking data ({}): {}", field, message)
            }
            PostexError::ConfigError { message } => format!("Configuration problem: {}", message),
            PostexError::InvalidConfigValueError { field, reason, .. } => {
                format!("Configuration value '{}' is invalid: {}", field, reason)
            }
            PostexError::MissingConfigError { field } => {
                format!("Configuration value '{}' is not set", field)
            }
            PostexError::IoError(e) => format!("Could not access local data: {}", e),
            PostexError::SerializationError(e) => format!("Corrupted local data: {}", e),
            PostexError::CsvError(e) => format!("Could not read CSV input: {}", e),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Network => "Check connectivity to api.postex.pk and try again later",
            ErrorCategory::Carrier => "Review the order data against the PostEx message and resubmit",
            ErrorCategory::City => {
                "Correct the city name, or verify the mapping with `cities verify` after confirming it with PostEx"
            }
            ErrorCategory::Validation => "Fill in the missing booking fields and retry",
            ErrorCategory::Configuration => {
                "Check the configuration file, the POSTEX_API_KEY variable and the command-line flags"
            }
            ErrorCategory::Storage => "Check the data directory permissions and the snapshot files",
        }
    }
}

fn mentions_city(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("city") || lower.contains("delivery")
}

pub type Result<T> = std::result::Result<T, PostexError>;
