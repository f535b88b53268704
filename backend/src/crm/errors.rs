use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrmError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("crm returned {status}: {detail}")]
    Api { status: u16, detail: String },

    #[error("malformed crm payload: {0}")]
    InvalidPayload(String),
}

impl CrmError {
    pub fn api(status: u16, detail: impl Into<String>) -> Self {
        Self::Api {
            status,
            detail: detail.into(),
        }
    }
}
