//! Operator commands behind the `bookctl tokens` and `bookctl users` subcommands.
//!
//! Each operation takes store trait objects, so the CLI runs them against PostgreSQL and the
//! tests run them against the in-memory stores.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::{
    api::models::users::Role,
    auth::api_tokens::Scopes,
    config::{Config, TokenCommand, UserCommand},
    crypto::{generate_api_token, hash_token},
    db::{
        handlers::{ApiTokenStore, PostgresApiTokenStore, PostgresUserStore, UserStore},
        models::{
            api_tokens::{ApiTokenCreateDBRequest, ApiTokenDBResponse},
            users::UserDBResponse,
        },
    },
    errors::{Error, Result},
    types::{ApiTokenId, abbrev_uuid},
};

/// A freshly minted token. `raw` is never stored and cannot be recovered later.
#[derive(Debug)]
pub struct CreatedToken {
    pub raw: String,
    pub record: ApiTokenDBResponse,
}

async fn user_by_email(users: &dyn UserStore, email: &str) -> Result<UserDBResponse> {
    users.get_by_email(email).await?.ok_or_else(|| Error::NotFound {
        resource: "User".to_string(),
        id: email.to_string(),
    })
}

/// Mint a token for the user with `email`.
pub async fn create_token(
    users: &dyn UserStore,
    tokens: &dyn ApiTokenStore,
    prefix: &str,
    email: &str,
    name: &str,
    scopes: &str,
    expires_at: Option<DateTime<Utc>>,
) -> Result<CreatedToken> {
    let owner = user_by_email(users, email).await?;

    let scopes = Scopes::parse(scopes);
    if scopes.is_empty() {
        return Err(Error::BadRequest {
            message: "At least one scope is required".to_string(),
        });
    }

    let raw = generate_api_token(prefix);
    let record = tokens
        .create(&ApiTokenCreateDBRequest {
            user_id: owner.id,
            name: name.to_string(),
            token_hash: hash_token(&raw),
            scopes: scopes.to_vec().join(","),
            expires_at,
        })
        .await?;

    info!(token_id = %abbrev_uuid(&record.id), user_id = %abbrev_uuid(&owner.id), "API token created");
    Ok(CreatedToken { raw, record })
}

pub async fn list_tokens(users: &dyn UserStore, tokens: &dyn ApiTokenStore, email: &str) -> Result<Vec<ApiTokenDBResponse>> {
    let owner = user_by_email(users, email).await?;
    Ok(tokens.list_for_user(owner.id).await?)
}

pub async fn deactivate_token(tokens: &dyn ApiTokenStore, id: ApiTokenId) -> Result<()> {
    if tokens.deactivate(id).await? {
        info!(token_id = %abbrev_uuid(&id), "API token deactivated");
        Ok(())
    } else {
        Err(Error::NotFound {
            resource: "API token".to_string(),
            id: id.to_string(),
        })
    }
}

/// Delete every inactive or expired token; returns how many were removed.
pub async fn cleanup_tokens(tokens: &dyn ApiTokenStore, now: DateTime<Utc>) -> Result<u64> {
    let removed = tokens.delete_unusable(now).await?;
    info!(removed, "Deleted unusable API tokens");
    Ok(removed)
}

pub async fn set_role(users: &dyn UserStore, email: &str, role: Role) -> Result<UserDBResponse> {
    let user = user_by_email(users, email).await?;
    let updated = users.update_role(user.id, role).await?;
    info!(user_id = %abbrev_uuid(&updated.id), previous = %user.role, role = %updated.role, "Role changed");
    Ok(updated)
}

fn describe(token: &ApiTokenDBResponse, now: DateTime<Utc>) -> String {
    let status = if !token.active {
        "inactive"
    } else if token.is_expired_at(now) {
        "expired"
    } else {
        "active"
    };
    let expires = token.expires_at.map(|e| e.to_rfc3339()).unwrap_or_else(|| "never".to_string());
    let last_used = token.last_used_at.map(|e| e.to_rfc3339()).unwrap_or_else(|| "never".to_string());

    format!(
        "{}  {:<8}  {:<24}  scopes={}  expires={}  last_used={}",
        token.id, status, token.name, token.scopes, expires, last_used
    )
}

/// Run a token subcommand against PostgreSQL, printing results to stdout.
pub async fn run_token_command(command: TokenCommand, config: &Config, pool: sqlx::PgPool) -> anyhow::Result<()> {
    let users = PostgresUserStore::new(pool.clone());
    let tokens = PostgresApiTokenStore::new(pool);
    let now = Utc::now();

    match command {
        TokenCommand::Create {
            email,
            name,
            scopes,
            expires_in,
        } => {
            let expires_at = expires_in.map(chrono::Duration::from_std).transpose()?.map(|d| now + d);
            let created = create_token(
                &users,
                &tokens,
                &config.auth.api_tokens.prefix,
                &email,
                &name,
                &scopes,
                expires_at,
            )
            .await?;
            println!("Token id: {}", created.record.id);
            println!("Token:    {}", created.raw);
            println!("Store this token now; it cannot be shown again.");
        }
        TokenCommand::List { email } => {
            for token in list_tokens(&users, &tokens, &email).await? {
                println!("{}", describe(&token, now));
            }
        }
        TokenCommand::Deactivate { id } => {
            deactivate_token(&tokens, id).await?;
            println!("Deactivated {id}");
        }
        TokenCommand::Cleanup => {
            let removed = cleanup_tokens(&tokens, now).await?;
            println!("Deleted {removed} token(s)");
        }
    }

    Ok(())
}

/// Run a user subcommand against PostgreSQL, printing results to stdout.
pub async fn run_user_command(command: UserCommand, pool: sqlx::PgPool) -> anyhow::Result<()> {
    let users = PostgresUserStore::new(pool);

    match command {
        UserCommand::SetRole { email, role } => {
            let updated = set_role(&users, &email, role).await?;
            println!("{} is now {}", updated.email, updated.role);
        }
    }

    Ok(())
}
