//! Redis cache operations for hot player records.

use redis::{aio::ConnectionManager, AsyncCommands, ErrorKind, RedisError};

use super::database::PlayerRecord;

/// Cache key prefix
const PLAYER_PREFIX: &str = "realm:player:";

/// TTL for cached data (1 hour)
const CACHE_TTL_SECONDS: u64 = 3600;

fn player_key(username: &str) -> String {
    format!("{}{}", PLAYER_PREFIX, username.to_lowercase())
}

/// Redis cache wrapper
#[derive(Clone)]
pub struct Cache {
    conn: ConnectionManager,
}

impl Cache {
    /// Connect to Redis
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Store a player record under its username
    pub async fn save_player(&self, record: &PlayerRecord) -> Result<(), RedisError> {
        let json = serde_json::to_string(record)
            .map_err(|e| RedisError::from((ErrorKind::TypeError, "player record encoding", e.to_string())))?;

        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(player_key(&record.account.username), json, CACHE_TTL_SECONDS)
            .await?;

        Ok(())
    }

    /// Cached record for `username`; unreadable entries count as a miss
    pub async fn load_player(&self, username: &str) -> Result<Option<PlayerRecord>, RedisError> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(player_key(username)).await?;

        Ok(json.and_then(|j| serde_json::from_str(&j).ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_ignore_case() {
        assert_eq!(player_key("Alice"), player_key("alice"));
        assert_eq!(player_key("bob"), "realm:player:bob");
    }
}
