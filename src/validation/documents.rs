use chrono::{DateTime, NaiveDateTime, Utc};
use garde::Validate;

use crate::error::{AppError, Result};
use crate::watermark::ContentFamily;

/// Longest accepted client session id.
pub const MAX_SESSION_ID_LEN: usize = 128;
/// Largest dwell delta a single heartbeat may report.
pub const MAX_DELTA_SECONDS: f64 = 60.0;

/// Trims a client-supplied session id; `None` when empty or oversized.
pub fn normalize_session_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty() && trimmed.len() <= MAX_SESSION_ID_LEN).then(|| trimmed.to_string())
}

/// Validates a heartbeat delta.
///
/// # Arguments
///
/// * `delta` - The reported seconds, if the body carried a number.
///
/// # Returns
///
/// The whole seconds to add (`floor(delta)`).
pub fn validate_delta(delta: Option<f64>) -> Result<i64> {
    match delta {
        Some(d) if d.is_finite() && d > 0.0 && d <= MAX_DELTA_SECONDS => Ok(d.floor() as i64),
        _ => Err(AppError::InvalidDelta),
    }
}

/// Validates a heartbeat session id.
pub fn validate_session_id(session_id: Option<&str>) -> Result<String> {
    let trimmed = session_id.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return Err(AppError::MissingSession);
    }
    if trimmed.len() > MAX_SESSION_ID_LEN {
        return Err(AppError::Validation(format!(
            "sessionId must be at most {} characters",
            MAX_SESSION_ID_LEN
        )));
    }
    Ok(trimmed.to_string())
}

/// Limits an upload is checked against.
#[derive(Debug, Clone)]
pub struct UploadLimits {
    pub max_bytes: usize,
    pub now: DateTime<Utc>,
}

/// An upload after multipart parsing, before anything is written.
#[derive(Debug, Validate)]
#[garde(context(UploadLimits))]
pub struct UploadForm {
    #[garde(length(min = 1, max = 255))]
    pub title: String,
    #[garde(length(min = 1, max = 255))]
    pub watermark_text: String,
    #[garde(range(min = 1))]
    pub max_views: Option<i32>,
    #[garde(skip)]
    pub expires_at: Option<DateTime<Utc>>,
    #[garde(custom(supported_extension))]
    pub extension: String,
    #[garde(custom(within_size_limit))]
    pub size: usize,
}

impl UploadForm {
    /// Runs the field rules and the expiry check.
    pub fn check(&self, limits: &UploadLimits) -> Result<()> {
        self.validate_with(limits)
            .map_err(|report| AppError::Validation(report.to_string()))?;

        if let Some(expires_at) = self.expires_at {
            if expires_at <= limits.now {
                return Err(AppError::Validation(
                    "expiresAt must be in the future".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn supported_extension(value: &str, _ctx: &UploadLimits) -> garde::Result {
    ContentFamily::from_extension(value)
        .map(|_| ())
        .map_err(|_| garde::Error::new("Invalid file type. Only PDF and images (jpg, png, webp) are allowed"))
}

fn within_size_limit(value: &usize, ctx: &UploadLimits) -> garde::Result {
    if *value == 0 {
        return Err(garde::Error::new("file is empty"));
    }
    if *value > ctx.max_bytes {
        return Err(garde::Error::new(format!(
            "file exceeds the {} byte limit",
            ctx.max_bytes
        )));
    }
    Ok(())
}

/// Rejects files whose leading bytes disagree with their extension.
pub fn check_magic_bytes(extension: &str, bytes: &[u8]) -> Result<()> {
    let expected = match extension.to_ascii_lowercase().as_str() {
        "jpeg" => "jpg".to_string(),
        other => other.to_string(),
    };

    match infer::get(bytes) {
        Some(kind) if kind.extension() == expected => Ok(()),
        Some(kind) => Err(AppError::Validation(format!(
            "File content ({}) does not match its .{} extension",
            kind.mime_type(),
            extension
        ))),
        None => Err(AppError::Validation(
            "Could not determine the file type from its content".to_string(),
        )),
    }
}

/// Parses the optional `maxViews` form field.
pub fn parse_max_views(raw: &str) -> Result<Option<i32>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<i32>()
        .map(Some)
        .map_err(|_| AppError::Validation("maxViews must be a positive integer".to_string()))
}

/// Parses the optional `expiresAt` form field: RFC 3339, or a
/// `datetime-local` value taken as UTC.
pub fn parse_expires_at(raw: &str) -> Result<Option<DateTime<Utc>>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(at.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
        .map(|naive| Some(naive.and_utc()))
        .map_err(|_| AppError::Validation("expiresAt must be an RFC 3339 timestamp".to_string()))
}
