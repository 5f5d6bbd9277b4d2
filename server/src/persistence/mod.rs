//! Persistence layer for the realm server.
//!
//! All database and cache work happens on a background task. The tick loop
//! never blocks on I/O: saves are fire-and-forget and login lookups are
//! awaited by short-lived tasks that report back through the event channel.

mod cache;
mod database;

pub use cache::Cache;
pub use database::{
    AccountRecord, AuthError, Database, EquipmentRecord, LoadError, PlayerRecord, RegisterError, SlotRecord,
};

use log::{error, info, warn};
use tokio::sync::{mpsc, oneshot};

/// Commands sent to the persistence background task
#[derive(Debug)]
pub enum PersistenceCommand {
    Authenticate {
        username: String,
        password: String,
        response: oneshot::Sender<Result<i64, AuthError>>,
    },
    Register {
        password: String,
        record: Box<PlayerRecord>,
        response: oneshot::Sender<Result<i64, RegisterError>>,
    },
    LoadPlayer {
        username: String,
        response: oneshot::Sender<Result<PlayerRecord, LoadError>>,
    },
    /// Save to both cache and database
    Save(Box<PlayerRecord>),
    UpdateLastLogin {
        account_id: i64,
    },
    Shutdown,
}

/// Handle for sending commands to the persistence task
#[derive(Clone)]
pub struct PersistenceHandle {
    sender: mpsc::Sender<PersistenceCommand>,
}

impl PersistenceHandle {
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<i64, AuthError> {
        let (tx, rx) = oneshot::channel();
        let command = PersistenceCommand::Authenticate {
            username: username.to_string(),
            password: password.to_string(),
            response: tx,
        };
        if self.sender.send(command).await.is_err() {
            return Err(AuthError::Unavailable);
        }
        rx.await.unwrap_or(Err(AuthError::Unavailable))
    }

    pub async fn register(&self, password: &str, record: PlayerRecord) -> Result<i64, RegisterError> {
        let (tx, rx) = oneshot::channel();
        let command = PersistenceCommand::Register {
            password: password.to_string(),
            record: Box::new(record),
            response: tx,
        };
        if self.sender.send(command).await.is_err() {
            return Err(RegisterError::Unavailable);
        }
        rx.await.unwrap_or(Err(RegisterError::Unavailable))
    }

    pub async fn load_player(&self, username: &str) -> Result<PlayerRecord, LoadError> {
        let (tx, rx) = oneshot::channel();
        let command = PersistenceCommand::LoadPlayer {
            username: username.to_string(),
            response: tx,
        };
        if self.sender.send(command).await.is_err() {
            return Err(LoadError::Unavailable);
        }
        rx.await.unwrap_or(Err(LoadError::Unavailable))
    }

    /// Save a player record (fire and forget - non-blocking)
    pub fn save(&self, record: PlayerRecord) {
        let username = record.account.username.clone();
        if self.sender.try_send(PersistenceCommand::Save(Box::new(record))).is_err() {
            warn!("Persistence queue full, dropped save for {}", username);
        }
    }

    pub fn update_last_login(&self, account_id: i64) {
        let _ = self.sender.try_send(PersistenceCommand::UpdateLastLogin { account_id });
    }

    /// Shutdown the persistence task once queued saves are written
    pub async fn shutdown(&self) {
        let _ = self.sender.send(PersistenceCommand::Shutdown).await;
    }
}

/// Initialize the persistence system and spawn the background task.
/// Returns a handle for sending commands.
pub async fn init(
    database_url: &str,
    redis_url: &str,
) -> Result<PersistenceHandle, Box<dyn std::error::Error + Send + Sync>> {
    let db = Database::connect(database_url).await?;
    db.create_tables().await?;
    info!("Connected to PostgreSQL");

    let cache = Cache::connect(redis_url).await?;
    info!("Connected to Redis");

    let (tx, rx) = mpsc::channel(256);

    tokio::spawn(persistence_task(db, cache, rx));
    info!("Persistence background task started");

    Ok(PersistenceHandle { sender: tx })
}

/// Background task that handles all persistence operations
async fn persistence_task(db: Database, cache: Cache, mut rx: mpsc::Receiver<PersistenceCommand>) {
    info!("Persistence task running");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            PersistenceCommand::Authenticate { username, password, response } => {
                let _ = response.send(db.authenticate(&username, &password).await);
            }

            PersistenceCommand::Register { password, record, response } => {
                let result = db.register(&password, &record).await;
                if let Ok(account_id) = result {
                    info!("Registered account {} ({})", record.account.username, account_id);
                }
                let _ = response.send(result);
            }

            PersistenceCommand::LoadPlayer { username, response } => {
                let cached = match cache.load_player(&username).await {
                    Ok(record) => record,
                    Err(e) => {
                        warn!("Failed to read {} from cache: {}", username, e);
                        None
                    }
                };

                let result = if let Some(record) = cached {
                    info!("Loaded {} from cache", username);
                    Ok(record)
                } else {
                    match db.load_player(&username).await {
                        Ok(Some(record)) => {
                            info!("Loaded {} from database", username);
                            if let Err(e) = cache.save_player(&record).await {
                                warn!("Failed to cache {}: {}", username, e);
                            }
                            Ok(record)
                        }
                        Ok(None) => Err(LoadError::NotFound),
                        Err(e) => {
                            error!("Failed to load {} from database: {}", username, e);
                            Err(LoadError::Database(e.to_string()))
                        }
                    }
                };

                let _ = response.send(result);
            }

            PersistenceCommand::Save(record) => {
                let username = &record.account.username;
                if let Err(e) = cache.save_player(&record).await {
                    warn!("Failed to save {} to cache: {}", username, e);
                }
                if let Err(e) = db.save_player(&record).await {
                    error!("Failed to save {} to database: {}", username, e);
                }
            }

            PersistenceCommand::UpdateLastLogin { account_id } => {
                if let Err(e) = db.update_last_login(account_id).await {
                    warn!("Failed to update last login for account {}: {}", account_id, e);
                }
            }

            PersistenceCommand::Shutdown => {
                info!("Persistence task shutting down");
                break;
            }
        }
    }

    info!("Persistence task stopped");
}
