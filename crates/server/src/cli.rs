use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "opencat", about = "OpenCat — Open-Source In-App Purchase Infrastructure")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the OpenCat server
    Serve,
    /// Run database migrations
    Migrate,
    /// Manage apps
    Apps {
        #[command(subcommand)]
        command: AppsCommands,
    },
    /// Look up a subscriber
    Subscribers {
        #[command(subcommand)]
        command: SubscribersCommands,
    },
    /// Stream events
    Events {
        #[command(subcommand)]
        command: EventsCommands,
    },
}

#[derive(Subcommand)]
pub enum AppsCommands {
    /// List all apps with credential status and event-log position
    List,
}

#[derive(Subcommand)]
pub enum SubscribersCommands {
    /// Resolve a subscriber's entitlements
    Get { app_user_id: String },
}

#[derive(Subcommand)]
pub enum EventsCommands {
    /// Tail events in real time
    Tail,
}

pub async fn handle_apps(command: AppsCommands) -> anyhow::Result<()> {
    let config = crate::config::AppConfig::load()?;
    let pool = crate::db::connect(&config.database.url).await?;

    match command {
        AppsCommands::List => {
            let apps = sqlx::query_as::<_, crate::models::app::App>(
                "SELECT * FROM apps ORDER BY created_at DESC",
            )
            .fetch_all(&pool)
            .await?;

            for app in apps {
                let credentials = if app.store_credentials_encrypted.is_some() {
                    "credentials"
                } else {
                    "no-credentials"
                };
                println!(
                    "{}\t{}\t{}\t{}\t{}\t{} events",
                    app.id,
                    app.name,
                    app.platform,
                    app.bundle_id,
                    credentials,
                    app.last_event_sequence
                );
            }
        }
    }

    Ok(())
}

pub async fn handle_subscribers(command: SubscribersCommands) -> anyhow::Result<()> {
    let config = crate::config::AppConfig::load()?;
    let pool = crate::db::connect(&config.database.url).await?;

    match command {
        SubscribersCommands::Get { app_user_id } => {
            // An app_user_id is only unique per app; show every match.
            let subscribers = sqlx::query_as::<_, crate::models::subscriber::Subscriber>(
                "SELECT * FROM subscribers WHERE app_user_id = ?",
            )
            .bind(&app_user_id)
            .fetch_all(&pool)
            .await?;

            if subscribers.is_empty() {
                println!("Subscriber not found");
                return Ok(());
            }

            for subscriber in subscribers {
                let app = sqlx::query_as::<_, crate::models::app::App>(
                    "SELECT * FROM apps WHERE id = ?",
                )
                .bind(&subscriber.app_id)
                .fetch_one(&pool)
                .await?;

                let info = crate::pipeline::customer_info(&pool, &app, &subscriber).await?;
                println!(
                    "{}\t{}\tapp:{}\tfirst_seen:{}\t{} transactions",
                    subscriber.id,
                    subscriber.app_user_id,
                    app.name,
                    info.first_seen_at,
                    info.all_transactions.len()
                );

                if info.active_entitlements.is_empty() {
                    println!("  no entitlements");
                }
                for (name, entitlement) in &info.active_entitlements {
                    println!(
                        "  {}\t{}\t{}\texpires:{}",
                        name,
                        if entitlement.is_active { "active" } else { "inactive" },
                        entitlement.product_id,
                        entitlement.expiration_date.as_deref().unwrap_or("never")
                    );
                }
            }
        }
    }

    Ok(())
}

pub async fn handle_events(command: EventsCommands) -> anyhow::Result<()> {
    let config = crate::config::AppConfig::load()?;
    let pool = crate::db::connect(&config.database.url).await?;

    match command {
        EventsCommands::Tail => {
            // (app_id, sequence) cursors, one per app seen so far.
            let mut cursors: std::collections::HashMap<String, i64> =
                std::collections::HashMap::new();
            loop {
                let apps: Vec<String> = sqlx::query_scalar("SELECT id FROM apps")
                    .fetch_all(&pool)
                    .await?;

                for app_id in apps {
                    let since = cursors.get(&app_id).copied().unwrap_or(0);
                    let events = crate::events::list_since(&pool, &app_id, since, 50).await?;
                    for event in &events {
                        println!(
                            "{}\t{}\t#{}\t{}",
                            event.created_at, event.event_type, event.sequence, event.app_id
                        );
                    }
                    if let Some(last) = events.last() {
                        cursors.insert(app_id, last.sequence);
                    }
                }

                tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
            }
        }
    }
}
