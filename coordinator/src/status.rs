use serde::{Deserialize, Serialize};
use std::fmt;

/// Códigos de estado que viajan en los reportes y en el estado del job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    Ok,
    Cancelled,
    InternalError,
    TimedOut,
    MemLimitExceeded,
    RuntimeError,
    ServiceUnavailable,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::InternalError => "INTERNAL_ERROR",
            StatusCode::TimedOut => "TIMED_OUT",
            StatusCode::MemLimitExceeded => "MEM_LIMIT_EXCEEDED",
            StatusCode::RuntimeError => "RUNTIME_ERROR",
            StatusCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Estado de ejecución: código + mensaje opcional.
///
/// Se usa tanto para el estado que reporta cada instancia como para el
/// estado agregado del job. La regla "el primer terminal gana" la aplica el
/// `Coordinator`, no este tipo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecStatus {
    pub code: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}

impl ExecStatus {
    pub fn new(code: StatusCode, error_msg: Option<String>) -> Self {
        Self { code, error_msg }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::Ok, None)
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::Cancelled, Some(reason.into()))
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::InternalError, Some(msg.into()))
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == StatusCode::Cancelled
    }

    pub fn error_code(&self) -> StatusCode {
        self.code
    }

    pub fn error_msg(&self) -> Option<&str> {
        self.error_msg.as_deref()
    }
}

impl Default for ExecStatus {
    fn default() -> Self {
        Self::ok()
    }
}

impl fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_msg {
            Some(msg) => write!(f, "{}: {}", self.code, msg),
            None => write!(f, "{}", self.code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_status_se_muestra_con_codigo_y_mensaje() {
        let st = ExecStatus::internal_error("backend be1 is down");
        assert_eq!(st.to_string(), "INTERNAL_ERROR: backend be1 is down");
        assert_eq!(ExecStatus::ok().to_string(), "OK");
    }

    #[test]
    fn status_code_se_serializa_en_mayusculas() {
        let json = serde_json::to_string(&ExecStatus::cancelled("x")).unwrap();
        assert_eq!(json, r#"{"code":"CANCELLED","error_msg":"x"}"#);

        let back: ExecStatus = serde_json::from_str(r#"{"code":"OK"}"#).unwrap();
        assert!(back.is_ok());
        assert_eq!(back.error_msg(), None);
    }
}
