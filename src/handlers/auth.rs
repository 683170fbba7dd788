//! Caller identity as forwarded by the upstream authentication layer.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::services::{Actor, ActorRole};

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(ACTOR_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or_else(|| ServiceError::Unauthorized("missing or invalid actor id".to_string()))?;

        let role = match parts
            .headers
            .get(ACTOR_ROLE_HEADER)
            .map(|v| v.to_str().map(|s| s.trim().to_ascii_lowercase()))
        {
            None => ActorRole::Customer,
            Some(Ok(role)) if role == "customer" => ActorRole::Customer,
            Some(Ok(role)) if role == "admin" => ActorRole::Admin,
            Some(_) => {
                return Err(ServiceError::Unauthorized(
                    "unknown actor role".to_string(),
                ))
            }
        };

        Ok(Actor { user_id, role })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Result<Actor, ServiceError> {
        let (mut parts, _) = request.into_parts();
        Actor::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn defaults_to_customer_role() {
        let id = Uuid::new_v4();
        let request = Request::builder()
            .header(ACTOR_ID_HEADER, id.to_string())
            .body(())
            .unwrap();
        let actor = extract(request).await.unwrap();
        assert_eq!(actor, Actor::customer(id));
    }

    #[tokio::test]
    async fn reads_admin_role() {
        let id = Uuid::new_v4();
        let request = Request::builder()
            .header(ACTOR_ID_HEADER, id.to_string())
            .header(ACTOR_ROLE_HEADER, "Admin")
            .body(())
            .unwrap();
        assert!(extract(request).await.unwrap().is_admin());
    }

    #[tokio::test]
    async fn rejects_missing_or_garbled_identity() {
        let missing = Request::builder().body(()).unwrap();
        assert!(matches!(
            extract(missing).await,
            Err(ServiceError::Unauthorized(_))
        ));

        let garbled = Request::builder()
            .header(ACTOR_ID_HEADER, "not-a-uuid")
            .body(())
            .unwrap();
        assert!(matches!(
            extract(garbled).await,
            Err(ServiceError::Unauthorized(_))
        ));

        let bad_role = Request::builder()
            .header(ACTOR_ID_HEADER, Uuid::new_v4().to_string())
            .header(ACTOR_ROLE_HEADER, "root")
            .body(())
            .unwrap();
        assert!(matches!(
            extract(bad_role).await,
            Err(ServiceError::Unauthorized(_))
        ));
    }
}
