/// Errors from the provider integration layer.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider could not be reached after all retries (connect,
    /// timeout, reset).
    #[error("Provider unreachable after {attempts} attempts: {message}")]
    Network { attempts: u32, message: String },

    /// The provider answered with a non-2xx HTTP status. Never retried.
    #[error("Provider HTTP error ({status}): {body}")]
    Http { status: u16, body: String },

    /// The provider answered 2xx but its envelope reported an error code.
    #[error("Provider API error ({code}): {message}")]
    Api { code: i64, message: String },

    /// The response could not be understood.
    #[error("Malformed provider response: {0}")]
    Malformed(String),

    /// Any other client-side failure (request building, body decoding).
    #[error("HTTP client error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unknown model '{0}'")]
    UnknownModel(String),

    #[error("Model '{model}' does not accept reference inputs")]
    UnsupportedReferenceInputs { model: String },

    #[error("Model '{model}' accepts at most {max} reference inputs (got {got})")]
    TooManyReferenceInputs { model: String, max: usize, got: usize },

    #[error("Model '{model}' requires at least one reference input")]
    MissingReferenceInputs { model: String },

    #[error("Model '{model}' produces at most {max} outputs per request (got {got})")]
    TooManyOutputs { model: String, max: u32, got: u32 },
}

impl ProviderError {
    /// Whether the failure happened at the network layer.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Whether the failure is a synchronous capability or model-selection
    /// rejection, i.e. a problem with the request rather than the provider.
    pub fn is_request_rejection(&self) -> bool {
        matches!(
            self,
            Self::UnknownModel(_)
                | Self::UnsupportedReferenceInputs { .. }
                | Self::TooManyReferenceInputs { .. }
                | Self::MissingReferenceInputs { .. }
                | Self::TooManyOutputs { .. }
        )
    }
}
