//! Structured `rpc-error` payloads.
//!
//! Every failure reported to a client is an [`RpcError`] carrying the layer
//! that failed ([`ErrorType`]), a machine-readable [`ErrorTag`], a severity,
//! and optional human-readable and element-level detail.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Protocol layer at which an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorType {
    /// Secure transport layer.
    Transport,
    /// Message framing and RPC envelope layer.
    Rpc,
    /// Protocol operations layer.
    Protocol,
    /// Content and data-model layer.
    Application,
}

impl ErrorType {
    /// Returns the wire name of the error type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Rpc => "rpc",
            Self::Protocol => "protocol",
            Self::Application => "application",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable error condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorTag {
    /// The resource is already in use.
    InUse,
    /// A parameter carried an unacceptable value.
    InvalidValue,
    /// The request or response is too large.
    TooBig,
    /// An expected element is missing.
    MissingElement,
    /// An element value is not correct.
    BadElement,
    /// An unexpected element is present.
    UnknownElement,
    /// An unexpected namespace is present.
    UnknownNamespace,
    /// Access to the operation or data was denied.
    AccessDenied,
    /// The datastore is locked by another session.
    LockDenied,
    /// The request could not be completed for lack of resources.
    ResourceDenied,
    /// Restoring the pre-request state failed.
    RollbackFailed,
    /// The targeted data already exists.
    DataExists,
    /// The targeted data does not exist.
    DataMissing,
    /// The operation is not supported.
    OperationNotSupported,
    /// The operation failed for a reason not covered by another tag.
    OperationFailed,
    /// The message could not be parsed.
    MalformedMessage,
}

impl ErrorTag {
    /// Returns the wire name of the tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InUse => "in-use",
            Self::InvalidValue => "invalid-value",
            Self::TooBig => "too-big",
            Self::MissingElement => "missing-element",
            Self::BadElement => "bad-element",
            Self::UnknownElement => "unknown-element",
            Self::UnknownNamespace => "unknown-namespace",
            Self::AccessDenied => "access-denied",
            Self::LockDenied => "lock-denied",
            Self::ResourceDenied => "resource-denied",
            Self::RollbackFailed => "rollback-failed",
            Self::DataExists => "data-exists",
            Self::DataMissing => "data-missing",
            Self::OperationNotSupported => "operation-not-supported",
            Self::OperationFailed => "operation-failed",
            Self::MalformedMessage => "malformed-message",
        }
    }

    /// Layer reported for the tag unless overridden.
    #[must_use]
    pub const fn default_type(self) -> ErrorType {
        match self {
            Self::MalformedMessage => ErrorType::Rpc,
            Self::ResourceDenied
            | Self::RollbackFailed
            | Self::DataExists
            | Self::DataMissing
            | Self::OperationFailed => ErrorType::Application,
            _ => ErrorType::Protocol,
        }
    }
}

impl fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    /// The request failed.
    #[default]
    Error,
    /// The request succeeded with a caveat.
    Warning,
}

/// Element-level detail attached to an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ErrorInfo {
    /// Element that is missing or incorrect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bad_element: Option<String>,
    /// Namespace that was not expected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bad_namespace: Option<String>,
    /// Session related to the failure, such as a lock holder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Server module that reported the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

impl ErrorInfo {
    /// Reports whether no detail is present.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bad_element.is_none()
            && self.bad_namespace.is_none()
            && self.session_id.is_none()
            && self.module.is_none()
    }
}

/// A single `rpc-error` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RpcError {
    /// Layer at which the error occurred.
    pub error_type: ErrorType,
    /// Error condition.
    pub error_tag: ErrorTag,
    /// Error severity.
    #[serde(default)]
    pub error_severity: Severity,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Element-level detail.
    #[serde(default, skip_serializing_if = "ErrorInfo::is_empty")]
    pub error_info: ErrorInfo,
}

impl RpcError {
    /// Builds an error with the tag's default layer and `error` severity.
    #[must_use]
    pub fn new(tag: ErrorTag) -> Self {
        Self {
            error_type: tag.default_type(),
            error_tag: tag,
            error_severity: Severity::Error,
            error_message: None,
            error_info: ErrorInfo::default(),
        }
    }

    /// `operation-failed` without detail.
    #[must_use]
    pub fn operation_failed() -> Self {
        Self::new(ErrorTag::OperationFailed)
    }

    /// `operation-not-supported` without detail.
    #[must_use]
    pub fn operation_not_supported() -> Self {
        Self::new(ErrorTag::OperationNotSupported)
    }

    /// `missing-element` naming the absent element.
    #[must_use]
    pub fn missing_element(element: impl Into<String>) -> Self {
        Self::new(ErrorTag::MissingElement).with_bad_element(element)
    }

    /// `bad-element` naming the offending element.
    #[must_use]
    pub fn bad_element(element: impl Into<String>) -> Self {
        Self::new(ErrorTag::BadElement).with_bad_element(element)
    }

    /// `invalid-value` naming the element carrying the value.
    #[must_use]
    pub fn invalid_value(element: impl Into<String>) -> Self {
        Self::new(ErrorTag::InvalidValue).with_bad_element(element)
    }

    /// `unknown-namespace` naming the namespace.
    #[must_use]
    pub fn unknown_namespace(namespace: impl Into<String>) -> Self {
        let mut error = Self::new(ErrorTag::UnknownNamespace);
        error.error_info.bad_namespace = Some(namespace.into());
        error
    }

    /// `malformed-message` with a parser description.
    #[must_use]
    pub fn malformed_message(detail: impl Into<String>) -> Self {
        Self::new(ErrorTag::MalformedMessage).with_message(detail)
    }

    /// Overrides the error layer.
    #[must_use]
    pub const fn with_type(mut self, error_type: ErrorType) -> Self {
        self.error_type = error_type;
        self
    }

    /// Attaches a human-readable message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Names the element responsible for the error.
    #[must_use]
    pub fn with_bad_element(mut self, element: impl Into<String>) -> Self {
        self.error_info.bad_element = Some(element.into());
        self
    }

    /// Names the session related to the error.
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.error_info.session_id = Some(session_id.into());
        self
    }

    /// Names the server module that reported the error.
    #[must_use]
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.error_info.module = Some(module.into());
        self
    }

    /// Returns the bad element, if any.
    #[must_use]
    pub fn bad_element_name(&self) -> Option<&str> {
        self.error_info.bad_element.as_deref()
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error_tag, self.error_type)?;
        if let Some(element) = &self.error_info.bad_element {
            write!(f, " [{element}]")?;
        }
        if let Some(message) = &self.error_message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}
