use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};

use crate::error::ApiError;

/// `Json` whose rejections use the API error envelope
pub struct AppJson<T>(pub T);

impl<T, S> FromRequest<S> for AppJson<T>
where
    T: serde::de::DeserializeOwned + 'static,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        Json::<T>::from_request(req, state)
            .await
            .map(|Json(value)| AppJson(value))
            .map_err(|rejection| {
                let message = rejection_message(&rejection);
                tracing::warn!(status = %rejection.status(), "{}", message);
                ApiError::BadRequest(message)
            })
    }
}

fn rejection_message(rejection: &JsonRejection) -> String {
    match rejection {
        JsonRejection::MissingJsonContentType(_) => {
            "Expected request with `Content-Type: application/json`".to_string()
        }
        JsonRejection::JsonDataError(e) => format!("Invalid request body: {}", e.body_text()),
        JsonRejection::JsonSyntaxError(e) => format!("Malformed JSON: {}", e.body_text()),
        other => format!("Failed to read request body: {}", other.body_text()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Payload {
        code: String,
    }

    async fn extract(content_type: Option<&str>, body: &str) -> Result<AppJson<Payload>, ApiError> {
        let mut builder = Request::builder().method("POST").uri("/");
        if let Some(content_type) = content_type {
            builder = builder.header("content-type", content_type);
        }
        let request = builder.body(Body::from(body.to_string())).unwrap();
        AppJson::<Payload>::from_request(request, &()).await
    }

    #[tokio::test]
    async fn valid_body_is_extracted() {
        let AppJson(body) = extract(Some("application/json"), r#"{"code":"print(1)"}"#)
            .await
            .unwrap();
        assert_eq!(body.code, "print(1)");
    }

    #[tokio::test]
    async fn rejections_are_bad_requests() {
        for (content_type, body) in [
            (None, r#"{"code":"x"}"#),
            (Some("application/json"), "{not json"),
            (Some("application/json"), r#"{"language":"python"}"#),
        ] {
            let err = extract(content_type, body).await.err().unwrap();
            assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        }
    }
}
