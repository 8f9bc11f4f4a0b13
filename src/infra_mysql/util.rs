use crate::domain_port::SessionStoreError;

pub fn store_err(err: sqlx::Error) -> SessionStoreError {
    SessionStoreError::Store(err.to_string())
}

pub fn to_json_text(value: &serde_json::Value) -> Result<String, SessionStoreError> {
    serde_json::to_string(value).map_err(|e| SessionStoreError::InternalError(e.into()))
}

pub fn from_json_text(text: &str) -> Result<serde_json::Value, SessionStoreError> {
    serde_json::from_str(text).map_err(|e| SessionStoreError::InternalError(e.into()))
}
