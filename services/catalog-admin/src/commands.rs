//! CLI subcommands and their execution
//!
//! Every command produces a JSON value; `main` prints it.

use anyhow::{Context, Result, bail};
use catalog_api::Catalog;
use catalog_resource::{
    CancellationToken, CreateOptions, ListParams, RemoveOptions, Resource, ResourceDescriptor,
    UpdateOptions,
};
use clap::Subcommand;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::info;

use crate::config::AuthConfig;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in and store the token pair
    Login {
        /// Defaults to `auth.username` from the config
        #[arg(long)]
        username: Option<String>,
    },
    /// End the session and forget stored tokens
    Logout,
    /// Show the logged-in admin
    Me,
    Brands {
        #[command(subcommand)]
        action: ResourceAction,
    },
    Categories {
        #[command(subcommand)]
        action: ResourceAction,
    },
    Products {
        #[command(subcommand)]
        action: ResourceAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum ResourceAction {
    /// List one page, or every page with --all
    List {
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        limit: Option<u32>,
        /// Search term
        #[arg(long)]
        q: Option<String>,
        /// Follow pagination to the last page
        #[arg(long, conflicts_with = "page")]
        all: bool,
    },
    Get {
        id: String,
    },
    Create {
        /// Payload as a JSON object
        #[arg(long)]
        json: String,
    },
    Update {
        id: String,
        /// Partial payload as a JSON object
        #[arg(long)]
        json: String,
    },
    Delete {
        id: String,
        /// Hide the item from cached lists before the server confirms
        #[arg(long)]
        optimistic: bool,
    },
}

pub async fn run(
    command: Command,
    catalog: &Catalog,
    auth: &AuthConfig,
    cancel: &CancellationToken,
) -> Result<Value> {
    match command {
        Command::Login { username } => {
            let username = username
                .or_else(|| auth.username.clone())
                .context("no username: pass --username or set auth.username")?;
            let Some(password) = auth.password.as_ref().filter(|p| !p.is_blank()) else {
                bail!("no password: set CATALOG_PASSWORD or auth.password_file");
            };
            let user = catalog.auth.login(&username, password.expose()).await?;
            Ok(match user {
                Some(user) => serde_json::to_value(user)?,
                None => json!({ "username": username }),
            })
        }
        Command::Logout => {
            catalog.auth.logout(cancel).await?;
            Ok(json!({ "logged_out": true }))
        }
        Command::Me => Ok(serde_json::to_value(catalog.auth.me(cancel).await?)?),
        Command::Brands { action } => run_resource(&catalog.brands, action, cancel).await,
        Command::Categories { action } => run_resource(&catalog.categories, action, cancel).await,
        Command::Products { action } => run_resource(&catalog.products, action, cancel).await,
    }
}

async fn run_resource<D>(
    resource: &Resource<D>,
    action: ResourceAction,
    cancel: &CancellationToken,
) -> Result<Value>
where
    D: ResourceDescriptor,
    D::Item: Serialize,
    D::Detail: Serialize,
    D::Create: DeserializeOwned,
    D::Update: DeserializeOwned,
{
    let namespace = resource.keys().all().namespace().to_string();
    match action {
        ResourceAction::List {
            page,
            limit,
            q,
            all,
        } => {
            let mut params = ListParams::new();
            params.page = page;
            params.limit = limit;
            params.q = q;
            if all {
                let items = resource.use_infinite_list(params).fetch_all(cancel).await?;
                return Ok(json!({ "items": items }));
            }
            let page = resource.use_list(params).fetch(cancel).await?;
            Ok(serde_json::to_value(&*page)?)
        }
        ResourceAction::Get { id } => {
            let detail = resource.use_detail(id).fetch(cancel).await?;
            Ok(serde_json::to_value(&*detail)?)
        }
        ResourceAction::Create { json } => {
            let payload: D::Create = parse_payload(&json)?;
            let created = resource
                .use_create(CreateOptions::default())
                .mutate(payload, cancel)
                .await?;
            info!(resource = %namespace, "created");
            Ok(serde_json::to_value(&*created)?)
        }
        ResourceAction::Update { id, json } => {
            let payload: D::Update = parse_payload(&json)?;
            let updated = resource
                .use_update(id, UpdateOptions::default())
                .mutate(payload, cancel)
                .await?;
            info!(resource = %namespace, "updated");
            Ok(serde_json::to_value(&*updated)?)
        }
        ResourceAction::Delete { id, optimistic } => {
            resource
                .use_remove(RemoveOptions {
                    optimistic,
                    invalidate: None,
                })
                .mutate(&id, cancel)
                .await?;
            info!(resource = %namespace, id = %id, "deleted");
            Ok(json!({ "deleted": id }))
        }
    }
}

fn parse_payload<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).context("invalid --json payload")
}
