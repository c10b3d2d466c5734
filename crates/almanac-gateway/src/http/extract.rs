use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};

use super::error::ApiError;

/// `Json<T>` whose rejections render as the API error envelope instead of
/// axum's plain-text body.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::validation("body", rejection.body_text())),
        }
    }
}
