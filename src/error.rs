//! Structured error types for tab/task operations.

use crate::store::StoreError;
use serde::Serialize;
use std::fmt;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (caught before any write)
    MissingRequiredField,
    InvalidFieldValue,
    DateRangeInverted,
    SelfInvite,

    // Not found errors
    UserNotFound,
    TabNotFound,
    TaskNotFound,

    // Conflict errors
    AlreadyMember,

    // Forbidden errors
    CannotRemoveOwner,
    OwnerCannotLeave,

    // Remote errors
    StoreUnavailable,
}

/// Coarse error family, matching how the presentation layer groups failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Forbidden,
    Remote,
}

impl ErrorCode {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ErrorCode::MissingRequiredField
            | ErrorCode::InvalidFieldValue
            | ErrorCode::DateRangeInverted
            | ErrorCode::SelfInvite => ErrorKind::Validation,
            ErrorCode::UserNotFound | ErrorCode::TabNotFound | ErrorCode::TaskNotFound => {
                ErrorKind::NotFound
            }
            ErrorCode::AlreadyMember => ErrorKind::Conflict,
            ErrorCode::CannotRemoveOwner | ErrorCode::OwnerCannotLeave => ErrorKind::Forbidden,
            ErrorCode::StoreUnavailable => ErrorKind::Remote,
        }
    }
}

/// Structured error returned by directory and collection operations.
#[derive(Debug, Serialize)]
pub struct OpError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl OpError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
            details: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    // Convenience constructors

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingRequiredField,
            format!("{} is required", field),
        )
        .with_field(field)
    }

    pub fn invalid_value(field: &str, reason: &str) -> Self {
        Self::new(ErrorCode::InvalidFieldValue, reason).with_field(field)
    }

    pub fn date_range_inverted() -> Self {
        Self::new(
            ErrorCode::DateRangeInverted,
            "end date cannot be before start date",
        )
        .with_field("endDate")
    }

    pub fn self_invite() -> Self {
        Self::new(
            ErrorCode::SelfInvite,
            "you cannot add yourself as a collaborator",
        )
        .with_field("email")
    }

    pub fn user_not_found(email: &str) -> Self {
        Self::new(
            ErrorCode::UserNotFound,
            format!("no user found with email {}", email),
        )
    }

    pub fn tab_not_found(tab_id: &str) -> Self {
        Self::new(ErrorCode::TabNotFound, format!("tab not found: {}", tab_id))
    }

    pub fn task_not_found(task_id: &str) -> Self {
        Self::new(
            ErrorCode::TaskNotFound,
            format!("task not found: {}", task_id),
        )
    }

    pub fn already_member(email: &str) -> Self {
        Self::new(
            ErrorCode::AlreadyMember,
            format!("{} is already a member of this tab", email),
        )
    }

    pub fn cannot_remove_owner() -> Self {
        Self::new(
            ErrorCode::CannotRemoveOwner,
            "the owner cannot be removed from a tab",
        )
    }

    pub fn owner_cannot_leave() -> Self {
        Self::new(
            ErrorCode::OwnerCannotLeave,
            "the owner cannot leave their own tab",
        )
    }

    pub fn store(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::StoreUnavailable, "store operation failed")
            .with_details(err.to_string())
    }
}

impl fmt::Display for OpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for OpError {}

impl From<StoreError> for OpError {
    fn from(err: StoreError) -> Self {
        OpError::store(err)
    }
}

/// Result type for tab/task operations.
pub type OpResult<T> = std::result::Result<T, OpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_error_families() {
        assert_eq!(OpError::self_invite().kind(), ErrorKind::Validation);
        assert_eq!(OpError::user_not_found("x@y.z").kind(), ErrorKind::NotFound);
        assert_eq!(OpError::already_member("x@y.z").kind(), ErrorKind::Conflict);
        assert_eq!(OpError::cannot_remove_owner().kind(), ErrorKind::Forbidden);
        assert_eq!(OpError::store("boom").kind(), ErrorKind::Remote);
    }

    #[test]
    fn codes_serialize_screaming_snake() {
        let err = OpError::date_range_inverted();
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["code"], "DATE_RANGE_INVERTED");
        assert_eq!(value["field"], "endDate");
    }
}
