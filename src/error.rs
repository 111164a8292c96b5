//! Defines the custom error types for the leadmine application.

use thiserror::Error;

/// The primary error type for scraping, persistence and dispatch.
#[derive(Error, Debug)]
pub(crate) enum AppError {
    /// A required request field was missing or malformed. Maps to HTTP 400.
    #[error("{0}")]
    Validation(String),

    /// Error making HTTP requests via reqwest.
    #[error("HTTP Request Error: {0}")]
    Request(#[from] reqwest::Error),

    /// The search engine answered with a non-success status for a page.
    #[error("Search page returned HTTP {0}")]
    UpstreamStatus(reqwest::StatusCode),

    /// Error talking to the contact database.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Error during SMTP communication or submission.
    #[error("SMTP Error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    /// A sender or recipient address could not be parsed.
    #[error("Address Error: {0}")]
    MailAddress(#[from] lettre::address::AddressError),

    /// The outgoing message could not be assembled.
    #[error("Message Build Error: {0}")]
    MailCompose(#[from] lettre::error::Error),

    /// Error related to concurrency or task execution.
    #[error("Task Execution Error: {0}")]
    Task(String),

    /// An underlying error that doesn't fit other categories, using anyhow.
    #[error("Generic Error: {0}")]
    Generic(#[from] anyhow::Error),
}

pub(crate) type Result<T> = std::result::Result<T, AppError>;
