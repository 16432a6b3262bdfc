use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    Router,
    body::Bytes,
    extract::{RawQuery, State},
    http::{HeaderMap, StatusCode, header},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
};
use cookie::Cookie;
use futures_util::Stream;
use shared::config::server::HubConfig;
use shared::topics::any_selector_matches;
use tokio_stream::StreamExt;
use tracing::{info, instrument};
use url::form_urlencoded;

use super::{HUB_PATH, TopicHub};
use crate::http::error::{ApiError, AppResult};
use crate::tokens::{TokenAudience, TokenIssuer};

/// Cookie Mercure clients use to carry the subscription token.
pub const AUTHORIZATION_COOKIE: &str = "mercureAuthorization";

#[derive(Clone, Debug)]
pub struct HubState {
    hub: Arc<TopicHub>,
    tokens: Arc<TokenIssuer>,
    heartbeat: Duration,
}

impl HubState {
    pub fn new(hub: Arc<TopicHub>, tokens: Arc<TokenIssuer>, config: &HubConfig) -> Self {
        Self {
            hub,
            tokens,
            heartbeat: Duration::from_secs(config.heartbeat_seconds.max(1)),
        }
    }
}

/// Subscribe (`GET`) and publish (`POST`) endpoints at [`HUB_PATH`].
pub fn hub_router<S>(state: HubState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route(HUB_PATH, get(subscribe).post(publish))
        .with_state(state)
}

#[derive(Debug, Default)]
struct SubscribeQuery {
    topics: Vec<String>,
    authorization: Option<String>,
    last_event_id: Option<String>,
}

fn parse_subscribe_query(raw: Option<&str>) -> SubscribeQuery {
    let mut query = SubscribeQuery::default();
    for (key, value) in form_urlencoded::parse(raw.unwrap_or_default().as_bytes()) {
        match key.as_ref() {
            "topic" => query.topics.push(value.into_owned()),
            "authorization" => query.authorization = Some(value.into_owned()),
            "lastEventID" => query.last_event_id = Some(value.into_owned()),
            _ => {}
        }
    }
    query
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::COOKIE)?.to_str().ok()?;
    Cookie::split_parse(value)
        .flatten()
        .find(|cookie| cookie.name() == AUTHORIZATION_COOKIE)
        .map(|cookie| cookie.value().to_string())
}

fn require_topics(topics: &[String]) -> AppResult<()> {
    if topics.is_empty() {
        return Err(ApiError::validation("at least one topic is required"));
    }
    Ok(())
}

fn authorize_topics(granted: &[String], requested: &[String]) -> AppResult<()> {
    match requested
        .iter()
        .find(|topic| !any_selector_matches(granted, topic))
    {
        Some(topic) => Err(ApiError::forbidden(format!(
            "token does not grant topic '{topic}'"
        ))),
        None => Ok(()),
    }
}

#[instrument(name = "hub.subscribe", skip_all, err)]
async fn subscribe(
    State(state): State<HubState>,
    RawQuery(raw): RawQuery,
    headers: HeaderMap,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let query = parse_subscribe_query(raw.as_deref());
    let token = query
        .authorization
        .or_else(|| bearer_token(&headers))
        .or_else(|| cookie_token(&headers))
        .ok_or_else(|| ApiError::unauthorized("subscription token required"))?;
    let claims = state.tokens.verify(&token, TokenAudience::Subscriber)?;

    require_topics(&query.topics)?;
    authorize_topics(&claims.mercure.subscribe, &query.topics)?;

    let last_event_id = headers
        .get("last-event-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or(query.last_event_id);

    let topics = query.topics.clone();
    let subscription = state
        .hub
        .subscribe(query.topics, last_event_id.as_deref())
        .await;
    let stale_cursor = subscription.stale_cursor();
    if stale_cursor {
        metrics::counter!("lodgeline_hub_stale_cursors_total").increment(1);
    }
    info!(
        subscriber = %claims.sub,
        topics = ?topics,
        replayed = subscription.backlog_len(),
        stale_cursor,
        "hub subscription opened"
    );

    let stream = subscription.into_stream().map(|event| {
        Ok::<_, Infallible>(
            Event::default()
                .id(event.id.clone())
                .event("message")
                .data(event.data.clone()),
        )
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(state.heartbeat)))
}

#[derive(Debug, Default)]
struct PublishForm {
    topics: Vec<String>,
    data: String,
}

fn parse_publish_form(body: &[u8]) -> PublishForm {
    let mut form = PublishForm::default();
    for (key, value) in form_urlencoded::parse(body) {
        match key.as_ref() {
            "topic" => form.topics.push(value.into_owned()),
            "data" => form.data = value.into_owned(),
            // Every subscription is authorized, so private and public
            // updates are delivered alike.
            _ => {}
        }
    }
    form
}

#[instrument(name = "hub.publish", skip_all, err)]
async fn publish(
    State(state): State<HubState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<(StatusCode, String)> {
    let token = bearer_token(&headers)
        .or_else(|| cookie_token(&headers))
        .ok_or_else(|| ApiError::unauthorized("publisher token required"))?;
    let claims = state.tokens.verify(&token, TokenAudience::Publisher)?;

    let form = parse_publish_form(&body);
    require_topics(&form.topics)?;
    authorize_topics(&claims.mercure.publish, &form.topics)?;

    let id = state.hub.publish(form.topics, form.data).await;
    Ok((StatusCode::OK, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::ConversationGrant;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use shared::models::{Principal, Role};
    use tower::ServiceExt;

    fn setup() -> (Router, Arc<TopicHub>, Arc<TokenIssuer>) {
        let hub = Arc::new(TopicHub::new(16, 16));
        let tokens = Arc::new(TokenIssuer::new("sub-secret", "pub-secret", 3600));
        let state = HubState::new(Arc::clone(&hub), Arc::clone(&tokens), &HubConfig::default());
        (hub_router(state), hub, tokens)
    }

    fn subscriber_token(tokens: &TokenIssuer, grant: &ConversationGrant) -> String {
        let principal = Principal {
            id: 2,
            display_name: "Bruno".into(),
            roles: vec![Role::Owner],
        };
        tokens
            .issue_subscription_token(Some(&principal), grant)
            .unwrap()
            .token
    }

    #[test]
    fn parses_repeated_topics_and_authorization() {
        let query = parse_subscribe_query(Some(
            "topic=conversation%2F5&topic=user%2F2%2Fmessages&authorization=abc&lastEventID=x",
        ));
        assert_eq!(query.topics, vec!["conversation/5", "user/2/messages"]);
        assert_eq!(query.authorization.as_deref(), Some("abc"));
        assert_eq!(query.last_event_id.as_deref(), Some("x"));
    }

    #[test]
    fn token_from_header_or_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc"));

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            "theme=dark; mercureAuthorization=xyz".parse().unwrap(),
        );
        assert_eq!(cookie_token(&headers).as_deref(), Some("xyz"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[tokio::test]
    async fn subscribe_without_token_is_unauthorized() {
        let (router, _, _) = setup();
        let response = router
            .oneshot(
                Request::get("/.well-known/mercure?topic=user%2F2%2Fmessages")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn subscribe_to_ungranted_topic_is_forbidden() {
        let (router, _, tokens) = setup();
        let token = subscriber_token(&tokens, &ConversationGrant::Explicit(vec![5]));

        let response = router
            .oneshot(
                Request::get(format!(
                    "/.well-known/mercure?topic=conversation%2F6&authorization={token}"
                ))
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn subscriber_receives_published_frame() {
        let (router, hub, tokens) = setup();
        let token = subscriber_token(&tokens, &ConversationGrant::Explicit(vec![5]));

        let response = router
            .oneshot(
                Request::get("/.well-known/mercure?topic=conversation%2F5")
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );

        let id = hub
            .publish(vec!["conversation/5".into()], r#"{"id":1}"#.into())
            .await;

        let mut body = response.into_body().into_data_stream();
        let chunk = tokio::time::timeout(Duration::from_secs(1), body.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let text = String::from_utf8(chunk.to_vec()).unwrap();
        assert!(text.contains(&format!("id: {id}")));
        assert!(text.contains("event: message"));
        assert!(text.contains(r#"data: {"id":1}"#));
    }

    #[tokio::test]
    async fn evicted_resume_id_still_streams_live_updates() {
        let hub = Arc::new(TopicHub::new(16, 1));
        let tokens = Arc::new(TokenIssuer::new("sub-secret", "pub-secret", 3600));
        let router = hub_router(HubState::new(
            Arc::clone(&hub),
            Arc::clone(&tokens),
            &HubConfig::default(),
        ));
        let token = subscriber_token(&tokens, &ConversationGrant::Explicit(vec![5]));
        let evicted = hub.publish(vec!["conversation/5".into()], "old".into()).await;
        hub.publish(vec!["conversation/5".into()], "newer".into()).await;
        assert!(
            hub.subscribe(vec!["conversation/5".into()], Some(&evicted))
                .await
                .stale_cursor()
        );

        let response = router
            .oneshot(
                Request::get("/.well-known/mercure?topic=conversation%2F5")
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .header("last-event-id", evicted)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        hub.publish(vec!["conversation/5".into()], "live".into()).await;
        let mut body = response.into_body().into_data_stream();
        let chunk = tokio::time::timeout(Duration::from_secs(1), body.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let text = String::from_utf8(chunk.to_vec()).unwrap();
        assert!(text.contains("data: live"));
        assert!(!text.contains("data: newer"));
    }

    #[tokio::test]
    async fn publish_requires_publisher_token() {
        let (router, hub, tokens) = setup();
        let subscriber = subscriber_token(&tokens, &ConversationGrant::Wildcard);

        let rejected = router
            .clone()
            .oneshot(
                Request::post("/.well-known/mercure")
                    .header(header::AUTHORIZATION, format!("Bearer {subscriber}"))
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("topic=conversation%2F5&data=hi"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);

        let publisher = tokens.issue_publisher_token().unwrap().token;
        let accepted = router
            .oneshot(
                Request::post("/.well-known/mercure")
                    .header(header::AUTHORIZATION, format!("Bearer {publisher}"))
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("topic=conversation%2F5&data=hi&private=on"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(accepted.status(), StatusCode::OK);

        let id = to_bytes(accepted.into_body(), usize::MAX).await.unwrap();
        let replay = hub
            .subscribe(vec!["conversation/5".into()], Some(super::super::EARLIEST))
            .await;
        assert_eq!(replay.backlog_len(), 1);
        assert!(String::from_utf8_lossy(&id).starts_with("urn:uuid:"));
    }
}
