//! Errors shared across the workspace
//!
//! Covers configuration loading only; the request pipeline has its own
//! richer taxonomy in the client crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("config file unreadable: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file invalid: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Shorthand for a `Config` error from anything displayable.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = Error::config("no credentials configured");
        assert_eq!(
            err.to_string(),
            "configuration error: no credentials configured"
        );

        let io_err = Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "oanda.toml not found",
        ));
        assert!(
            io_err.to_string().starts_with("config file unreadable:"),
            "got: {io_err}"
        );
    }

    #[test]
    fn toml_errors_convert() {
        let parse_err = toml::from_str::<toml::Value>("not = = toml").unwrap_err();
        let err: Error = parse_err.into();
        assert!(matches!(err, Error::Toml(_)));
    }
}
