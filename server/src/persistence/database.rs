//! PostgreSQL database operations.

use std::collections::BTreeMap;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Row, Transaction};

/// Starting equipment handed to fresh characters
const STARTER_ARMOUR: &str = "clotharmor";
const STARTER_WEAPON: &str = "sword1";

/// One inventory or bank slot as stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub index: u32,
    pub key: String,
    pub count: u32,
    pub ability: u8,
    pub ability_level: u32,
}

/// One equipped item as stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentRecord {
    pub slot: u8,
    pub key: String,
    pub count: u32,
    pub ability: u8,
    pub ability_level: u32,
}

/// Account row plus everything stored alongside it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub rights: u8,
    pub x: u16,
    pub y: u16,
    pub experience: u64,
    pub hit_points: u32,
    pub mana: u32,
    /// Unix milliseconds until which the account is banned
    pub ban: i64,
    /// Unix milliseconds until which the account is muted
    pub mute: i64,
    pub pvp_kills: u32,
    pub pvp_deaths: u32,
    pub guild: Option<String>,
    pub equipment: Vec<EquipmentRecord>,
}

/// Full saved state of one player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub account: AccountRecord,
    pub inventory: Vec<SlotRecord>,
    pub bank: Vec<SlotRecord>,
    /// Quest id to stage
    pub quests: BTreeMap<u32, u32>,
    /// Opaque achievement progress, loaded and saved untouched
    pub achievements: BTreeMap<u32, u32>,
}

impl PlayerRecord {
    /// Fresh character standing on `spawn` with starter gear.
    ///
    /// Hit points and mana of 0 mean "full" and are resolved once the level
    /// is known.
    pub fn new(username: &str, spawn: (u16, u16)) -> Self {
        let starter = |slot: u8, key: &str| EquipmentRecord {
            slot,
            key: key.to_string(),
            count: 1,
            ability: 0,
            ability_level: 0,
        };

        Self {
            account: AccountRecord {
                id: 0,
                username: username.to_string(),
                email: None,
                rights: 0,
                x: spawn.0,
                y: spawn.1,
                experience: 0,
                hit_points: 0,
                mana: 0,
                ban: 0,
                mute: 0,
                pvp_kills: 0,
                pvp_deaths: 0,
                guild: None,
                equipment: vec![starter(0, STARTER_ARMOUR), starter(1, STARTER_WEAPON)],
            },
            inventory: Vec::new(),
            bank: Vec::new(),
            quests: BTreeMap::new(),
            achievements: BTreeMap::new(),
        }
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id            BIGSERIAL PRIMARY KEY,
    username      TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    email         TEXT,
    rights        SMALLINT NOT NULL DEFAULT 0,
    x             INTEGER NOT NULL DEFAULT 0,
    y             INTEGER NOT NULL DEFAULT 0,
    experience    BIGINT NOT NULL DEFAULT 0,
    hit_points    INTEGER NOT NULL DEFAULT 0,
    mana          INTEGER NOT NULL DEFAULT 0,
    ban           BIGINT NOT NULL DEFAULT 0,
    mute          BIGINT NOT NULL DEFAULT 0,
    pvp_kills     INTEGER NOT NULL DEFAULT 0,
    pvp_deaths    INTEGER NOT NULL DEFAULT 0,
    guild         TEXT,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    last_login    TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS equipment (
    account_id    BIGINT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    slot          SMALLINT NOT NULL,
    key           TEXT NOT NULL,
    count         INTEGER NOT NULL,
    ability       SMALLINT NOT NULL DEFAULT 0,
    ability_level INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (account_id, slot)
);

CREATE TABLE IF NOT EXISTS inventory (
    account_id    BIGINT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    slot_index    INTEGER NOT NULL,
    key           TEXT NOT NULL,
    count         INTEGER NOT NULL,
    ability       SMALLINT NOT NULL DEFAULT 0,
    ability_level INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (account_id, slot_index)
);

CREATE TABLE IF NOT EXISTS bank (
    account_id    BIGINT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    slot_index    INTEGER NOT NULL,
    key           TEXT NOT NULL,
    count         INTEGER NOT NULL,
    ability       SMALLINT NOT NULL DEFAULT 0,
    ability_level INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (account_id, slot_index)
);

CREATE TABLE IF NOT EXISTS quests (
    account_id    BIGINT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    quest_id      INTEGER NOT NULL,
    stage         INTEGER NOT NULL,
    PRIMARY KEY (account_id, quest_id)
);

CREATE TABLE IF NOT EXISTS achievements (
    account_id     BIGINT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    achievement_id INTEGER NOT NULL,
    progress       INTEGER NOT NULL,
    PRIMARY KEY (account_id, achievement_id)
);
";

/// Which slot table a container lives in
#[derive(Debug, Clone, Copy)]
enum SlotTable {
    Inventory,
    Bank,
}

impl SlotTable {
    fn name(&self) -> &'static str {
        match self {
            Self::Inventory => "inventory",
            Self::Bank => "bank",
        }
    }
}

/// Database connection wrapper
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to the database
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;

        Ok(Self { pool })
    }

    /// Create missing tables
    pub async fn create_tables(&self) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Register a new account holding `record`'s starting state
    pub async fn register(&self, password: &str, record: &PlayerRecord) -> Result<i64, RegisterError> {
        let username = &record.account.username;
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM accounts WHERE username = $1)")
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RegisterError::Database(e.to_string()))?;

        if exists {
            return Err(RegisterError::UsernameTaken);
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| RegisterError::PasswordHash(e.to_string()))?
            .to_string();

        let account_id: i64 = sqlx::query_scalar(
            "INSERT INTO accounts (username, password_hash, email, x, y) VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(username)
        .bind(&password_hash)
        .bind(&record.account.email)
        .bind(i32::from(record.account.x))
        .bind(i32::from(record.account.y))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RegisterError::Database(e.to_string()))?;

        let mut record = record.clone();
        record.account.id = account_id;
        self.save_player(&record)
            .await
            .map_err(|e| RegisterError::Database(e.to_string()))?;

        Ok(account_id)
    }

    /// Check credentials, returning the account id
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<i64, AuthError> {
        let row = sqlx::query("SELECT id, password_hash FROM accounts WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AuthError::Database(e.to_string()))?;

        let row = row.ok_or(AuthError::InvalidCredentials)?;

        let account_id: i64 = row.get("id");
        let stored_hash: String = row.get("password_hash");

        let parsed_hash = PasswordHash::new(&stored_hash).map_err(|e| AuthError::PasswordHash(e.to_string()))?;

        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .map_err(|_| AuthError::InvalidCredentials)?;

        Ok(account_id)
    }

    /// Update last login timestamp
    pub async fn update_last_login(&self, account_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE accounts SET last_login = NOW() WHERE id = $1")
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Player State Operations
    // =========================================================================

    /// Load everything stored for `username`
    pub async fn load_player(&self, username: &str) -> Result<Option<PlayerRecord>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, username, email, rights, x, y, experience, hit_points, mana,
                    ban, mute, pvp_kills, pvp_deaths, guild
             FROM accounts WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let account_id: i64 = row.get("id");
        let mut account = AccountRecord {
            id: account_id,
            username: row.get("username"),
            email: row.get("email"),
            rights: row.get::<i16, _>("rights").clamp(0, i16::from(u8::MAX)) as u8,
            x: row.get::<i32, _>("x").max(0) as u16,
            y: row.get::<i32, _>("y").max(0) as u16,
            experience: row.get::<i64, _>("experience").max(0) as u64,
            hit_points: row.get::<i32, _>("hit_points").max(0) as u32,
            mana: row.get::<i32, _>("mana").max(0) as u32,
            ban: row.get("ban"),
            mute: row.get("mute"),
            pvp_kills: row.get::<i32, _>("pvp_kills").max(0) as u32,
            pvp_deaths: row.get::<i32, _>("pvp_deaths").max(0) as u32,
            guild: row.get("guild"),
            equipment: Vec::new(),
        };

        let equipment = sqlx::query(
            "SELECT slot, key, count, ability, ability_level FROM equipment WHERE account_id = $1 ORDER BY slot",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        account.equipment = equipment
            .iter()
            .map(|r| EquipmentRecord {
                slot: r.get::<i16, _>("slot").max(0) as u8,
                key: r.get("key"),
                count: r.get::<i32, _>("count").max(0) as u32,
                ability: r.get::<i16, _>("ability").max(0) as u8,
                ability_level: r.get::<i32, _>("ability_level").max(0) as u32,
            })
            .collect();

        let inventory = self.load_slots(SlotTable::Inventory, account_id).await?;
        let bank = self.load_slots(SlotTable::Bank, account_id).await?;

        let quests = sqlx::query("SELECT quest_id, stage FROM quests WHERE account_id = $1")
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|r| (r.get::<i32, _>("quest_id") as u32, r.get::<i32, _>("stage").max(0) as u32))
            .collect();

        let achievements = sqlx::query("SELECT achievement_id, progress FROM achievements WHERE account_id = $1")
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|r| (r.get::<i32, _>("achievement_id") as u32, r.get::<i32, _>("progress").max(0) as u32))
            .collect();

        Ok(Some(PlayerRecord { account, inventory, bank, quests, achievements }))
    }

    async fn load_slots(&self, table: SlotTable, account_id: i64) -> Result<Vec<SlotRecord>, sqlx::Error> {
        let query = format!(
            "SELECT slot_index, key, count, ability, ability_level FROM {} WHERE account_id = $1 ORDER BY slot_index",
            table.name()
        );
        let rows = sqlx::query(&query).bind(account_id).fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(|r| SlotRecord {
                index: r.get::<i32, _>("slot_index").max(0) as u32,
                key: r.get("key"),
                count: r.get::<i32, _>("count").max(0) as u32,
                ability: r.get::<i16, _>("ability").max(0) as u8,
                ability_level: r.get::<i32, _>("ability_level").max(0) as u32,
            })
            .collect())
    }

    /// Save a full record inside one transaction
    pub async fn save_player(&self, record: &PlayerRecord) -> Result<(), sqlx::Error> {
        let account = &record.account;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE accounts SET rights = $2, x = $3, y = $4, experience = $5, hit_points = $6, mana = $7,
                    ban = $8, mute = $9, pvp_kills = $10, pvp_deaths = $11, guild = $12
             WHERE id = $1",
        )
        .bind(account.id)
        .bind(i16::from(account.rights))
        .bind(i32::from(account.x))
        .bind(i32::from(account.y))
        .bind(account.experience.min(i64::MAX as u64) as i64)
        .bind(account.hit_points as i32)
        .bind(account.mana as i32)
        .bind(account.ban)
        .bind(account.mute)
        .bind(account.pvp_kills as i32)
        .bind(account.pvp_deaths as i32)
        .bind(&account.guild)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM equipment WHERE account_id = $1")
            .bind(account.id)
            .execute(&mut *tx)
            .await?;
        for item in &account.equipment {
            sqlx::query(
                "INSERT INTO equipment (account_id, slot, key, count, ability, ability_level)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(account.id)
            .bind(i16::from(item.slot))
            .bind(&item.key)
            .bind(item.count as i32)
            .bind(i16::from(item.ability))
            .bind(item.ability_level as i32)
            .execute(&mut *tx)
            .await?;
        }

        save_slots(&mut tx, SlotTable::Inventory, account.id, &record.inventory).await?;
        save_slots(&mut tx, SlotTable::Bank, account.id, &record.bank).await?;

        sqlx::query("DELETE FROM quests WHERE account_id = $1")
            .bind(account.id)
            .execute(&mut *tx)
            .await?;
        for (quest_id, stage) in &record.quests {
            sqlx::query("INSERT INTO quests (account_id, quest_id, stage) VALUES ($1, $2, $3)")
                .bind(account.id)
                .bind(*quest_id as i32)
                .bind(*stage as i32)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("DELETE FROM achievements WHERE account_id = $1")
            .bind(account.id)
            .execute(&mut *tx)
            .await?;
        for (achievement_id, progress) in &record.achievements {
            sqlx::query("INSERT INTO achievements (account_id, achievement_id, progress) VALUES ($1, $2, $3)")
                .bind(account.id)
                .bind(*achievement_id as i32)
                .bind(*progress as i32)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await
    }
}

async fn save_slots(
    tx: &mut Transaction<'_, Postgres>,
    table: SlotTable,
    account_id: i64,
    slots: &[SlotRecord],
) -> Result<(), sqlx::Error> {
    sqlx::query(&format!("DELETE FROM {} WHERE account_id = $1", table.name()))
        .bind(account_id)
        .execute(&mut **tx)
        .await?;

    let insert = format!(
        "INSERT INTO {} (account_id, slot_index, key, count, ability, ability_level) VALUES ($1, $2, $3, $4, $5, $6)",
        table.name()
    );
    for slot in slots {
        sqlx::query(&insert)
            .bind(account_id)
            .bind(slot.index as i32)
            .bind(&slot.key)
            .bind(slot.count as i32)
            .bind(i16::from(slot.ability))
            .bind(slot.ability_level as i32)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

/// Registration errors
#[derive(Debug)]
pub enum RegisterError {
    UsernameTaken,
    PasswordHash(String),
    Database(String),
    Unavailable,
}

impl std::fmt::Display for RegisterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UsernameTaken => write!(f, "Username is already taken"),
            Self::PasswordHash(e) => write!(f, "Password hashing error: {}", e),
            Self::Database(e) => write!(f, "Database error: {}", e),
            Self::Unavailable => write!(f, "Persistence is unavailable"),
        }
    }
}

impl std::error::Error for RegisterError {}

/// Authentication errors
#[derive(Debug)]
pub enum AuthError {
    InvalidCredentials,
    PasswordHash(String),
    Database(String),
    Unavailable,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCredentials => write!(f, "Invalid username or password"),
            Self::PasswordHash(e) => write!(f, "Password hash error: {}", e),
            Self::Database(e) => write!(f, "Database error: {}", e),
            Self::Unavailable => write!(f, "Persistence is unavailable"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Player load errors
#[derive(Debug)]
pub enum LoadError {
    NotFound,
    Database(String),
    Unavailable,
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "No saved player"),
            Self::Database(e) => write!(f, "Database error: {}", e),
            Self::Unavailable => write!(f, "Persistence is unavailable"),
        }
    }
}

impl std::error::Error for LoadError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_starts_at_spawn_with_gear() {
        let record = PlayerRecord::new("alice", (10, 12));
        assert_eq!((record.account.x, record.account.y), (10, 12));
        assert_eq!(record.account.rights, 0);

        let keys: Vec<_> = record.account.equipment.iter().map(|e| (e.slot, e.key.as_str())).collect();
        assert_eq!(keys, vec![(0, STARTER_ARMOUR), (1, STARTER_WEAPON)]);
        assert!(record.inventory.is_empty());
    }

    #[test]
    fn test_record_survives_json() {
        let mut record = PlayerRecord::new("bob", (1, 2));
        record.quests.insert(0, 2);
        record.inventory.push(SlotRecord { index: 3, key: "gold".into(), count: 50, ability: 0, ability_level: 0 });

        let json = serde_json::to_string(&record).unwrap();
        let back: PlayerRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
