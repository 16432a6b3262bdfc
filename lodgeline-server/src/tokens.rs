//! Hub credentials.
//!
//! Subscription and publisher tokens are HS256 compact JWS strings carrying
//! Mercure claims. Subscribers and publishers are signed with separate keys so
//! a leaked subscription token can never publish.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, instrument};

use shared::config::server::{GrantPolicy, HubConfig};
use shared::models::{ConversationId, Principal};
use shared::topics::{ALL_CONVERSATIONS, ANY_TOPIC, conversation_topic, user_topic};

use crate::store::{MessageStore, StoreError};

type HmacSha256 = Hmac<Sha256>;

const JWT_ALGORITHM: &str = "HS256";
const PUBLISHER_SUBJECT: &str = "lodgeline-server";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("authentication required")]
    Unauthorized,
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("token signature does not match")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("failed to encode token: {0}")]
    Encoding(String),
}

/// Which key a token is signed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAudience {
    Subscriber,
    Publisher,
}

impl TokenAudience {
    fn label(self) -> &'static str {
        match self {
            TokenAudience::Subscriber => "subscriber",
            TokenAudience::Publisher => "publisher",
        }
    }
}

/// The `mercure` claim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MercureClaim {
    #[serde(default)]
    pub subscribe: Vec<String>,
    #[serde(default)]
    pub publish: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubClaims {
    pub mercure: MercureClaim,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct JwtHeader {
    alg: String,
    typ: String,
}

/// A minted token together with its expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Conversation topics a subscription token grants beyond the principal's
/// personal topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationGrant {
    None,
    /// `conversation/*`.
    Wildcard,
    /// One `conversation/{id}` per listed conversation.
    Explicit(Vec<ConversationId>),
}

impl ConversationGrant {
    fn selectors(&self) -> Vec<String> {
        match self {
            ConversationGrant::None => Vec::new(),
            ConversationGrant::Wildcard => vec![ALL_CONVERSATIONS.to_string()],
            ConversationGrant::Explicit(ids) => {
                ids.iter().copied().map(conversation_topic).collect()
            }
        }
    }
}

/// Resolves the conversation grant for `principal` under `policy`.
///
/// Admins never receive conversation topics. Under the membership policy the
/// grant lists the conversations the principal takes part in right now;
/// conversations created later need a fresh token.
pub async fn grant_for(
    principal: &Principal,
    policy: GrantPolicy,
    store: &dyn MessageStore,
) -> Result<ConversationGrant, StoreError> {
    if !principal.is_participant_role() {
        return Ok(ConversationGrant::None);
    }
    match policy {
        GrantPolicy::Wildcard => Ok(ConversationGrant::Wildcard),
        GrantPolicy::Membership => {
            let ids = store.conversation_ids_for_participant(principal.id).await?;
            Ok(ConversationGrant::Explicit(ids))
        }
    }
}

/// Mints and verifies hub tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    subscriber_key: Vec<u8>,
    publisher_key: Vec<u8>,
    ttl: Duration,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("ttl_seconds", &self.ttl.num_seconds())
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    #[must_use]
    pub fn new(subscriber_secret: &str, publisher_secret: &str, ttl_seconds: i64) -> Self {
        Self {
            subscriber_key: subscriber_secret.as_bytes().to_vec(),
            publisher_key: publisher_secret.as_bytes().to_vec(),
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    #[must_use]
    pub fn from_config(config: &HubConfig) -> Self {
        Self::new(
            &config.subscriber_secret,
            &config.publisher_secret,
            config.token_ttl_seconds,
        )
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mints a subscription token for `principal`.
    ///
    /// The subscribe list always starts with the principal's own
    /// `user/{id}/messages` topic, followed by the `grant` selectors.
    ///
    /// # Errors
    /// `Unauthorized` when no principal is present.
    #[instrument(name = "tokens.issue_subscription", skip_all, err)]
    pub fn issue_subscription_token(
        &self,
        principal: Option<&Principal>,
        grant: &ConversationGrant,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_subscription_token_at(principal, grant, Utc::now())
    }

    pub fn issue_subscription_token_at(
        &self,
        principal: Option<&Principal>,
        grant: &ConversationGrant,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let principal = principal.ok_or(TokenError::Unauthorized)?;

        let mut subscribe = vec![user_topic(principal.id)];
        subscribe.extend(grant.selectors());
        let claims = self.claims(
            principal.id.to_string(),
            MercureClaim {
                subscribe,
                publish: Vec::new(),
            },
            now,
        );

        debug!(
            principal = principal.id,
            topics = claims.mercure.subscribe.len(),
            "issuing subscription token"
        );
        self.sign(&claims, TokenAudience::Subscriber)
    }

    /// Mints the server's own token for publishing to the hub.
    pub fn issue_publisher_token(&self) -> Result<IssuedToken, TokenError> {
        self.issue_publisher_token_at(Utc::now())
    }

    pub fn issue_publisher_token_at(&self, now: DateTime<Utc>) -> Result<IssuedToken, TokenError> {
        let claims = self.claims(
            PUBLISHER_SUBJECT.to_string(),
            MercureClaim {
                subscribe: Vec::new(),
                publish: vec![ANY_TOPIC.to_string()],
            },
            now,
        );
        self.sign(&claims, TokenAudience::Publisher)
    }

    /// Checks signature and expiry and returns the claims.
    pub fn verify(&self, token: &str, audience: TokenAudience) -> Result<HubClaims, TokenError> {
        self.verify_at(token, audience, Utc::now())
    }

    pub fn verify_at(
        &self,
        token: &str,
        audience: TokenAudience,
        now: DateTime<Utc>,
    ) -> Result<HubClaims, TokenError> {
        let malformed = || TokenError::Malformed("expected three dot-separated segments".to_string());
        let (signing_input, signature) = token.rsplit_once('.').ok_or_else(malformed)?;
        let (header, payload) = signing_input.split_once('.').ok_or_else(malformed)?;
        if payload.contains('.') {
            return Err(malformed());
        }

        let header: JwtHeader = decode_segment(header)?;
        if header.alg != JWT_ALGORITHM {
            return Err(TokenError::Malformed(format!(
                "unsupported algorithm '{}'",
                header.alg
            )));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|err| TokenError::Malformed(err.to_string()))?;
        let mut mac = self.mac(audience)?;
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let claims: HubClaims = decode_segment(payload)?;
        if claims.exp <= now.timestamp() {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    fn claims(&self, sub: String, mercure: MercureClaim, now: DateTime<Utc>) -> HubClaims {
        let iat = now.timestamp();
        HubClaims {
            mercure,
            sub,
            iat,
            exp: iat + self.ttl.num_seconds(),
        }
    }

    fn mac(&self, audience: TokenAudience) -> Result<HmacSha256, TokenError> {
        let key = match audience {
            TokenAudience::Subscriber => &self.subscriber_key,
            TokenAudience::Publisher => &self.publisher_key,
        };
        HmacSha256::new_from_slice(key).map_err(|err| TokenError::Encoding(err.to_string()))
    }

    fn sign(&self, claims: &HubClaims, audience: TokenAudience) -> Result<IssuedToken, TokenError> {
        let header = JwtHeader {
            alg: JWT_ALGORITHM.to_string(),
            typ: "JWT".to_string(),
        };
        let signing_input = format!("{}.{}", encode_segment(&header)?, encode_segment(claims)?);

        let mut mac = self.mac(audience)?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        metrics::counter!("lodgeline_tokens_issued_total", "audience" => audience.label())
            .increment(1);

        Ok(IssuedToken {
            token: format!("{signing_input}.{signature}"),
            expires_at: DateTime::from_timestamp(claims.exp, 0).unwrap_or(DateTime::<Utc>::MAX_UTC),
        })
    }
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value).map_err(|err| TokenError::Encoding(err.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|err| TokenError::Malformed(err.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|err| TokenError::Malformed(err.to_string()))
}
