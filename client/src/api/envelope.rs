//! The backend response envelope.

use crate::error::{Error, Result};
use serde::Deserialize;

/// Every backend response: `{ status, message, data }`.
///
/// `status` is a string like `"200 OK"` or `"404 NOT_FOUND"`; anything that
/// does not read as 2xx is an application error whose `message` is shown to
/// the user verbatim.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiEnvelope<T> {
    /// Status string, e.g. `200 OK`
    pub status: String,
    /// Server-authored, user-displayable message
    pub message: String,
    /// Payload; absent on errors and on unit endpoints
    #[serde(default)]
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// Whether the status string reads as success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.starts_with('2')
    }

    /// Success with a required payload.
    ///
    /// # Errors
    ///
    /// [`Error::Api`] on a non-success status, or when a success envelope
    /// unexpectedly carries no data.
    pub fn into_data(self) -> Result<T> {
        if !self.is_success() {
            return Err(Error::Api {
                status: self.status,
                message: self.message,
            });
        }
        self.data.ok_or(Error::Api {
            status: self.status,
            message: "response carried no data".to_string(),
        })
    }

    /// Success where the payload is optional (unit endpoints).
    ///
    /// # Errors
    ///
    /// [`Error::Api`] on a non-success status.
    pub fn into_result(self) -> Result<Option<T>> {
        if self.is_success() {
            Ok(self.data)
        } else {
            Err(Error::Api {
                status: self.status,
                message: self.message,
            })
        }
    }
}

impl<T: Default> ApiEnvelope<T> {
    /// Like [`ApiEnvelope::into_data`], but a `404` envelope yields the
    /// default value: on list/statistics endpoints, absence is a valid
    /// steady state (no pre-registrations yet), not an error.
    ///
    /// # Errors
    ///
    /// [`Error::Api`] on any other non-success status.
    pub fn data_or_default(self) -> Result<T> {
        if self.status.starts_with("404") {
            return Ok(T::default());
        }
        if !self.is_success() {
            return Err(Error::Api {
                status: self.status,
                message: self.message,
            });
        }
        Ok(self.data.unwrap_or_default())
    }
}
