use service_core::error::AppError;

/// File uploads are refused; only live camera streams are accepted.
pub async fn upload_disabled() -> AppError {
    AppError::Forbidden(anyhow::anyhow!(
        "File uploads are not allowed. This service accepts live camera streams only."
    ))
}
