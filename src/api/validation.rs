use thiserror::Error;

pub const MAX_URL_LENGTH: usize = 2048;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlValidationError {
    #[error("url must not be empty")]
    Empty,
    #[error("url exceeds {MAX_URL_LENGTH} bytes")]
    TooLong,
    #[error("url must be an absolute http/https url")]
    InvalidScheme,
}

/// Accepts absolute http(s) urls up to [`MAX_URL_LENGTH`] bytes
pub fn validate_url(url: &str) -> Result<(), UrlValidationError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(UrlValidationError::Empty);
    }
    if url.len() > MAX_URL_LENGTH {
        return Err(UrlValidationError::TooLong);
    }

    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or(UrlValidationError::InvalidScheme)?;

    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(UrlValidationError::InvalidScheme);
    }

    Ok(())
}
