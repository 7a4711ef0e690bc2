use jsonwebtoken::errors::{Error as JwtError, ErrorKind as JwtErrorKind};
use mongodb::error::Error as DbError;
use rocket::{http::Status, response::Responder};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure an endpoint can produce. All variants except `Db` and
/// `Jwt` are expected, user-facing outcomes; only those two are server
/// faults. Validation failures always abort before any write.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error(transparent)]
    OidParse(#[from] mongodb::bson::oid::Error),
    /// The (question, respondent) pair already has an answer.
    #[error("Already answered: {0}")]
    AlreadyAnswered(String),
    /// The question's `active_till` has passed.
    #[error("Question expired: {0}")]
    QuestionExpired(String),
    /// The respondent's profile fails the question's demographic filter.
    #[error("Demographic mismatch: {0}")]
    DemographicMismatch(String),
    /// The question does not accept user-created options.
    #[error("Custom options not allowed: {0}")]
    CustomOptionsNotAllowed(String),
    /// Empty selection, over-limit selection, or an option position conflict.
    #[error("Invalid option selection: {0}")]
    TooManyOptions(String),
    /// A selected option does not belong to the question.
    #[error("Option mismatch: {0}")]
    OptionMismatch(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Not found: {0}")]
    NotFound(String),
    /// The entity to create already exists (e.g. a duplicate subscription).
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl Error {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{what} not found"))
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, _: &'r rocket::Request<'_>) -> rocket::response::Result<'o> {
        Err(match self {
            Self::Db(ref err) => {
                // The only unexpected failure: surface a generic internal
                // error after rollback and log it as a fault.
                error!("Database failure: {err}");
                Status::InternalServerError
            }
            Self::Jwt(err) => match err.into_kind() {
                JwtErrorKind::ExpiredSignature | JwtErrorKind::ImmatureSignature => {
                    Status::Unauthorized
                }
                _ => Status::BadRequest,
            },
            Self::OidParse(_) | Self::BadRequest(_) => Status::BadRequest,
            Self::AlreadyAnswered(_) | Self::Conflict(_) => Status::Conflict,
            Self::QuestionExpired(_) | Self::DemographicMismatch(_) | Self::PermissionDenied(_) => {
                Status::Forbidden
            }
            Self::CustomOptionsNotAllowed(_) | Self::TooManyOptions(_) | Self::OptionMismatch(_) => {
                Status::BadRequest
            }
            Self::Unauthorized(_) => Status::Unauthorized,
            Self::NotFound(_) => Status::NotFound,
        })
    }
}
