//! REST commands acting as one user.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use client::ApiClient;
use client::api::DEFAULT_PRINCIPAL_HEADER;
use serde::Serialize;
use shared::models::{ConversationId, Role, UserId};

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Base URL of the Lodgeline server
    #[arg(long, short, default_value = "http://localhost:8080")]
    pub server: String,

    /// Id of the user to act as
    #[arg(long, short)]
    pub user: UserId,

    /// Header the server reads the acting user from
    #[arg(long, default_value = DEFAULT_PRINCIPAL_HEADER)]
    pub principal_header: String,
}

impl ClientArgs {
    pub fn api(&self) -> Result<ApiClient> {
        let api = ApiClient::new(&self.server, self.user)
            .with_context(|| format!("invalid server url '{}'", self.server))?;
        Ok(api.with_principal_header(self.principal_header.clone()))
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleArg {
    Client,
    Owner,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Client => Role::Client,
            RoleArg::Owner => Role::Owner,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn token(args: &ClientArgs) -> Result<()> {
    super::init_tracing();
    let credentials = args
        .api()?
        .hub_credentials()
        .await
        .context("failed to fetch hub credentials")?;
    print_json(&credentials)
}

pub async fn start(args: &ClientArgs, client_id: UserId, owner_id: UserId) -> Result<()> {
    super::init_tracing();
    let conversation = args
        .api()?
        .create_conversation(client_id, owner_id)
        .await
        .context("failed to start conversation")?;
    print_json(&conversation)
}

pub async fn conversations(args: &ClientArgs, role: Option<RoleArg>) -> Result<()> {
    super::init_tracing();
    let conversations = args
        .api()?
        .list_conversations(role.map(Role::from))
        .await
        .context("failed to list conversations")?;
    print_json(&conversations)
}

pub async fn open(args: &ClientArgs, conversation_id: ConversationId) -> Result<()> {
    super::init_tracing();
    let detail = args
        .api()?
        .open_conversation(conversation_id)
        .await
        .with_context(|| format!("failed to open conversation {conversation_id}"))?;
    print_json(&detail)
}

pub async fn send(args: &ClientArgs, conversation_id: ConversationId, content: &str) -> Result<()> {
    super::init_tracing();
    let payload = args
        .api()?
        .send_message(conversation_id, content)
        .await
        .with_context(|| format!("failed to send to conversation {conversation_id}"))?;
    print_json(&payload)
}
