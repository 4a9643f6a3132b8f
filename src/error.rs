use thiserror::Error;

/// Client input rejected before anything touches the store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("The \"year\" parameter [{year}] is invalid for this scenario. Must be one of [{}]", join_years(.allowed))]
    InvalidYear { year: f64, allowed: Vec<i32> },

    #[error("Malformed filters: {reason}")]
    MalformedFilters { reason: String },

    #[error("Unknown filter key [{key}]")]
    UnknownFilterKey { key: String },

    #[error("Filter [{key}] must include a valid value parameter name: \"min\", \"max\" or \"options\"")]
    MissingFilterValue { key: String },

    #[error("Filter [{key}] has a non-numeric \"{param}\" value [{value}]")]
    InvalidFilterValue {
        key: String,
        param: &'static str,
        value: String,
    },

    #[error("Filter [{key}] cannot combine \"options\" with \"min\"/\"max\"")]
    ConflictingFilterValue { key: String },

    #[error("Country code [{id}] must be two characters")]
    InvalidCountryCode { id: String },
}

impl ValidationError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        ValidationError::MalformedFilters {
            reason: reason.into(),
        }
    }
}

fn join_years(years: &[i32]) -> String {
    years
        .iter()
        .map(|y| y.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failure of the record store itself.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store unavailable: {message}")]
    Unavailable { message: String },
    #[error("record store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        StoreError::Unavailable {
            message: message.into(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Everything a scenario request can fail with.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Model not found.")]
    ModelNotFound { model_id: String },

    #[error("Feature not found.")]
    FeatureNotFound { scenario_id: String, feature_id: u64 },

    #[error("Country code not found.")]
    CountryNotFound { country_id: String },

    /// Display stays generic; the store detail is only reachable via `source()`.
    #[error("An internal server error occurred")]
    StoreUnavailable(#[source] StoreError),
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        log::error!("store failure: {value}");
        EngineError::StoreUnavailable(value)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Transport-neutral fault class of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    ClientFault,
    NotFound,
    ServerFault,
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::Validation(_) => ErrorClass::ClientFault,
            EngineError::ModelNotFound { .. }
            | EngineError::FeatureNotFound { .. }
            | EngineError::CountryNotFound { .. } => ErrorClass::NotFound,
            EngineError::StoreUnavailable(_) => ErrorClass::ServerFault,
        }
    }
}
