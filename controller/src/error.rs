use crate::updater::UpdateError;
use snafu::Snafu;
use std::fmt::{self, Display, Formatter};

pub type Result<T> = std::result::Result<T, Error>;

/// The error type returned by a composition pass over one `ServiceDescriptor`. Conflicting
/// concurrent writes are not represented here; a pass that loses a write race ends early
/// with `Ok(())` and relies on the next delivery of the object.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("descriptor is not valid: {}", source))]
    Validation { source: ErrorList },

    #[snafu(display("{}", source))]
    ObjectWrite { source: UpdateError },

    #[snafu(display(
        "unable to write status for ServiceDescriptor '{}': {}",
        name,
        source
    ))]
    StatusWrite { name: String, source: UpdateError },
}

impl Error {
    /// Whether retrying the pass without any other change could succeed. Validation failures
    /// and rejected writes are terminal until the descriptor itself changes.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Validation { .. } => false,
            Error::ObjectWrite { source } => source.is_retriable(),
            Error::StatusWrite { source, .. } => source.is_retriable(),
        }
    }
}

/// A problem found while transforming or expanding a descriptor. These surface to the service
/// owner through the descriptor's `Error` condition, so the messages name the offending piece
/// of the spec.
#[derive(Clone, Debug, Eq, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ValidationError {
    #[snafu(display("variable not defined: \"{}\"{}", var_name, suggestion(similar)))]
    VariableNotFound {
        var_name: String,
        similar: Option<String>,
    },

    #[snafu(display("invalid variable name: {}", var_name))]
    InvalidVariableName { var_name: String },

    #[snafu(display("missing closing bracket in \"{}\"", value))]
    MissingClosingBracket { value: String },

    #[snafu(display("{} was not one of the expected prefixes: {}", value, expected))]
    UnexpectedPrefix { value: String, expected: String },

    #[snafu(display("required prefix \"{}\" not found in \"{}\"", prefix, var_name))]
    RequiredPrefixMissing { prefix: String, var_name: String },

    #[snafu(display("key \"{}\" must refer to a map", key))]
    NotAMap { key: String },

    #[snafu(display("only maps can be inlined"))]
    InlineNotAMap,

    #[snafu(display("location \"{}\" not known for resourceGroup \"{}\"", location, group))]
    UnknownLocation {
        #[snafu(implicit(false))]
        location: String,
        group: String,
    },

    #[snafu(display("at least 1 location must be defined for resourceGroup \"{}\"", group))]
    LocationRequired { group: String },

    #[snafu(display("resource \"{}\" appears multiple times for the same location", name))]
    DuplicateResource { name: String },

    #[snafu(display("dependency \"{}\" does not exist in this location", dependency))]
    MissingDependency { dependency: String },

    #[snafu(display("resource \"{}\" depends on itself", name))]
    SelfDependency { name: String },
}

impl ValidationError {
    /// Whether spec expansion may keep going after this error to collect further problems in
    /// the same pass. Structural errors abort immediately.
    pub fn can_recover(&self) -> bool {
        matches!(
            self,
            ValidationError::VariableNotFound { .. }
                | ValidationError::InvalidVariableName { .. }
                | ValidationError::UnexpectedPrefix { .. }
        )
    }
}

fn suggestion(similar: &Option<String>) -> String {
    match similar {
        Some(similar) => format!(", did you mean \"{}\"", similar),
        None => String::new(),
    }
}

/// An accumulator for validation errors. A pass either succeeds completely or reports every
/// problem it found, so the service owner fixes them in one round trip.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ErrorList {
    errors: Vec<ValidationError>,
}

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn extend(&mut self, other: ErrorList) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Whether every accumulated error allows the expansion to keep going.
    pub fn can_recover(&self) -> bool {
        self.errors.iter().all(ValidationError::can_recover)
    }

    /// `Ok(value)` if nothing has been accumulated, otherwise `Err(self)`.
    pub fn into_result<T>(self, value: T) -> std::result::Result<T, ErrorList> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl From<ValidationError> for ErrorList {
    fn from(error: ValidationError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl Display for ErrorList {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for error in &self.errors {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorList {}
