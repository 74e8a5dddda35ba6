//! Command line and environment configuration

use std::path::PathBuf;

use chrono::Duration;
use clap::{Args, Parser, Subcommand};

use crate::error::AppError;
use crate::hub::DEFAULT_MAX_MESSAGE_LEN;
use crate::identity::TokenIdentity;
use crate::lifecycle::DEFAULT_PAGE_SIZE;
use crate::matcher::DEFAULT_CANDIDATE_POOL_SIZE;
use crate::types::UserId;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Channel buffer size for hub commands
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the WebSocket chat server
    Serve(ServeArgs),
    /// Print an access token for a user in the directory
    IssueToken(IssueTokenArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "ROULETTE_ADDR", default_value = DEFAULT_ADDR)]
    pub addr: String,

    #[command(flatten)]
    pub identity: IdentityArgs,

    #[command(flatten)]
    pub limits: ChatLimits,
}

#[derive(Args, Debug, Clone)]
pub struct IssueTokenArgs {
    /// User ID to issue the token for
    #[arg(long)]
    pub user: UserId,

    #[command(flatten)]
    pub identity: IdentityArgs,
}

#[derive(Args, Debug, Clone)]
pub struct IdentityArgs {
    /// JSON user directory: [{"id": "<uuid>", "display_name": "..."}]
    #[arg(long, env = "ROULETTE_USERS", default_value = "users.json")]
    pub users: PathBuf,

    /// HS256 secret used to sign and verify access tokens
    #[arg(long, env = "ROULETTE_TOKEN_SECRET", hide_env_values = true)]
    pub token_secret: String,

    /// Lifetime of issued tokens, in seconds
    #[arg(long, env = "ROULETTE_TOKEN_TTL_SECS", default_value = "86400")]
    pub token_ttl_secs: i64,
}

impl IdentityArgs {
    pub fn build(&self) -> Result<TokenIdentity, AppError> {
        if self.token_secret.is_empty() {
            return Err(AppError::Config("token secret must not be empty".to_string()));
        }
        if self.token_ttl_secs <= 0 {
            return Err(AppError::Config("token TTL must be positive".to_string()));
        }
        TokenIdentity::from_file(
            &self.token_secret,
            Duration::seconds(self.token_ttl_secs),
            &self.users,
        )
    }
}

/// Tunables of the matching and session layer
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ChatLimits {
    /// How many users the matcher samples from
    #[arg(long, default_value_t = DEFAULT_CANDIDATE_POOL_SIZE)]
    pub candidate_pool_size: usize,

    /// Rooms returned by list_rooms
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: usize,

    /// Longest accepted message, in characters
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_LEN)]
    pub max_message_len: usize,

    /// Hub command channel capacity
    #[arg(long, default_value_t = DEFAULT_CHANNEL_BUFFER)]
    pub channel_buffer: usize,
}

impl Default for ChatLimits {
    fn default() -> Self {
        Self {
            candidate_pool_size: DEFAULT_CANDIDATE_POOL_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            channel_buffer: DEFAULT_CHANNEL_BUFFER,
        }
    }
}

impl ChatLimits {
    pub fn validate(&self) -> Result<(), AppError> {
        let fields = [
            ("candidate_pool_size", self.candidate_pool_size),
            ("page_size", self.page_size),
            ("max_message_len", self.max_message_len),
            ("channel_buffer", self.channel_buffer),
        ];
        match fields.iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(AppError::Config(format!("{name} must be greater than zero"))),
            None => Ok(()),
        }
    }
}
