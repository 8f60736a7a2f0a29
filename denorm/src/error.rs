//! Error types and result definitions for merge runs.
//!
//! A [`MergeError`] carries an [`ErrorKind`], a static description, optional dynamic detail,
//! an optional source and the call site where it was created. Several errors can be aggregated
//! into one, which is how bulk writes report every failed item at once.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use denorm_config::LoadConfigError;
use denorm_config::shared::ValidationError;

/// Result type for merge operations.
pub type MergeResult<T> = Result<T, MergeError>;

/// Payload stored for single [`MergeError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Error type for every fallible merge operation.
#[derive(Debug, Clone)]
pub struct MergeError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Multiple aggregated errors, e.g. every item that failed in one bulk write.
    Many {
        errors: Vec<MergeError>,
        location: &'static Location<'static>,
    },
}

/// Classification of merge failures.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Input errors
    InvalidSpec,
    UnresolvedForeignKey,
    InvalidForeignKey,

    // Store errors
    WriteBatchFailed,
    StoreQueryFailed,
    StoreConnectionFailed,

    // Configuration errors
    ConfigError,

    // IO & serialization errors
    SerializationError,
    DeserializationError,
    IoError,

    Unknown,
}

impl ErrorKind {
    /// Returns the kind as a static string, used as a metrics label.
    pub fn as_static_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidSpec => "invalid_spec",
            ErrorKind::UnresolvedForeignKey => "unresolved_foreign_key",
            ErrorKind::InvalidForeignKey => "invalid_foreign_key",
            ErrorKind::WriteBatchFailed => "write_batch_failed",
            ErrorKind::StoreQueryFailed => "store_query_failed",
            ErrorKind::StoreConnectionFailed => "store_connection_failed",
            ErrorKind::ConfigError => "config_error",
            ErrorKind::SerializationError => "serialization_error",
            ErrorKind::DeserializationError => "deserialization_error",
            ErrorKind::IoError => "io_error",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl MergeError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// Aggregated errors report the kind of their first error.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s contained in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => errors.iter().flat_map(|err| err.kinds()).collect(),
        }
    }

    /// Returns the static description of this error.
    pub fn description(&self) -> &str {
        match self.repr {
            ErrorRepr::Single(ref payload) => &payload.description,
            ErrorRepr::Many { .. } => "multiple errors",
        }
    }

    /// Returns the dynamic detail, if any.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches an originating error and returns the modified instance.
    ///
    /// Has no effect on aggregated errors, which forward their first error as source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        MergeError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for MergeError {
    fn eq(&self, other: &MergeError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write_indented(f, "Detail:", detail)?;
                }

                let backtrace = payload.backtrace.to_string();
                if !backtrace.trim().is_empty() {
                    write_indented(f, "Backtrace:", &backtrace)?;
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    write!(f, "\n  {}. {}", index + 1, lines.next().unwrap_or_default())?;
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

fn write_indented(f: &mut fmt::Formatter<'_>, header: &str, body: &str) -> fmt::Result {
    if body.trim().is_empty() {
        return write!(f, "\n  {header} <empty>");
    }

    write!(f, "\n  {header}")?;
    for line in body.lines() {
        if line.trim().is_empty() {
            write!(f, "\n    ")?;
        } else {
            write!(f, "\n    {line}")?;
        }
    }

    Ok(())
}

impl error::Error for MergeError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

impl From<(ErrorKind, &'static str)> for MergeError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> MergeError {
        MergeError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for MergeError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> MergeError {
        MergeError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates errors. A single error is returned unwrapped.
impl<E> From<Vec<E>> for MergeError
where
    E: Into<MergeError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> MergeError {
        let location = Location::caller();
        let mut errors: Vec<MergeError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        MergeError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for MergeError {
    #[track_caller]
    fn from(err: std::io::Error) -> MergeError {
        let detail = err.to_string();
        MergeError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<serde_json::Error> for MergeError {
    #[track_caller]
    fn from(err: serde_json::Error) -> MergeError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        let detail = err.to_string();
        MergeError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<sqlx::Error> for MergeError {
    #[track_caller]
    fn from(err: sqlx::Error) -> MergeError {
        let kind = match &err {
            sqlx::Error::Io(_) => ErrorKind::IoError,
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Tls(_) => {
                ErrorKind::StoreConnectionFailed
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                ErrorKind::DeserializationError
            }
            _ => ErrorKind::StoreQueryFailed,
        };

        let detail = err.to_string();
        MergeError::from_components(
            kind,
            Cow::Borrowed("Database operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<ValidationError> for MergeError {
    #[track_caller]
    fn from(err: ValidationError) -> MergeError {
        let detail = err.to_string();
        MergeError::from_components(
            ErrorKind::ConfigError,
            Cow::Borrowed("Invalid configuration"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<LoadConfigError> for MergeError {
    #[track_caller]
    fn from(err: LoadConfigError) -> MergeError {
        let detail = err.to_string();
        MergeError::from_components(
            ErrorKind::ConfigError,
            Cow::Borrowed("Failed to load configuration"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}
