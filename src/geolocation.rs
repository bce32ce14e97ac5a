//! Device geolocation failures mapped to user-facing messages.
//!
//! Codes follow the browser Geolocation API (1 = permission denied,
//! 2 = position unavailable, 3 = timeout). These errors stay at the edge;
//! they never reach the report pipeline.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeolocationError {
    PermissionDenied,
    PositionUnavailable,
    Timeout,
    Unknown,
}

impl GeolocationError {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => GeolocationError::PermissionDenied,
            2 => GeolocationError::PositionUnavailable,
            3 => GeolocationError::Timeout,
            _ => GeolocationError::Unknown,
        }
    }

    /// Message shown to the user (Vietnamese UI).
    pub fn user_message(&self) -> &'static str {
        match self {
            GeolocationError::PermissionDenied => {
                "Bạn đã từ chối quyền truy cập vị trí. Hãy bật quyền vị trí trong cài đặt trình duyệt."
            }
            GeolocationError::PositionUnavailable => "Không xác định được vị trí hiện tại.",
            GeolocationError::Timeout => "Hết thời gian chờ lấy vị trí. Vui lòng thử lại.",
            GeolocationError::Unknown => "Đã xảy ra lỗi không xác định khi lấy vị trí.",
        }
    }
}

impl std::fmt::Display for GeolocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.user_message())
    }
}

impl std::error::Error for GeolocationError {}

/// A device position or the reason it is unavailable.
pub type PositionResult = Result<(f64, f64), GeolocationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_distinct_messages() {
        let all: Vec<_> = [1, 2, 3, 42].into_iter().map(GeolocationError::from_code).collect();
        assert_eq!(
            all,
            vec![
                GeolocationError::PermissionDenied,
                GeolocationError::PositionUnavailable,
                GeolocationError::Timeout,
                GeolocationError::Unknown,
            ]
        );
        let mut msgs: Vec<&str> = all.iter().map(|e| e.user_message()).collect();
        msgs.dedup();
        assert_eq!(msgs.len(), 4);
        assert_eq!(GeolocationError::Timeout.to_string(), GeolocationError::Timeout.user_message());
    }
}
