//! Core types used throughout GameCheck.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Create a new user ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Kind of activity recorded in a user's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// A game was added to the user's progress list.
    AddGame,
    /// The status of a tracked game changed.
    UpdateStatus,
    /// The user followed another user.
    Follow,
}

impl ActivityKind {
    /// Get string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddGame => "add_game",
            Self::UpdateStatus => "update_status",
            Self::Follow => "follow",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Play status of a game on a user's progress list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    /// Currently playing.
    Playing,
    /// Finished.
    Completed,
    /// On the backlog.
    PlanToPlay,
    /// Abandoned.
    Dropped,
}

/// One entry of a user's activity history.
///
/// Records are immutable once written; they are removed only by trimming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    /// Unique record ID.
    pub id: String,
    /// User the record belongs to.
    pub owner: UserId,
    /// Activity kind.
    pub kind: ActivityKind,
    /// Game involved, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_name: Option<String>,
    /// New game status for status updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<GameStatus>,
    /// Followed user for follow activities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<UserId>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl HistoryRecord {
    /// Create a new record for `owner`, stamped with the current time.
    #[must_use]
    pub fn new(owner: UserId, kind: ActivityKind) -> Self {
        Self {
            id: new_record_id(),
            owner,
            kind,
            game_name: None,
            status: None,
            target_user_id: None,
            created_at: Utc::now(),
        }
    }

    /// Set the game name.
    #[must_use]
    pub fn with_game(mut self, name: impl Into<String>) -> Self {
        self.game_name = Some(name.into());
        self
    }

    /// Set the game status.
    #[must_use]
    pub fn with_status(mut self, status: GameStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the followed user.
    #[must_use]
    pub fn with_target(mut self, target: UserId) -> Self {
        self.target_user_id = Some(target);
        self
    }

    /// Override the creation timestamp.
    #[must_use]
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Generate a random UUID v4 string.
#[must_use]
pub fn new_record_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);

    // Set version (4) and variant bits
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    let hex = hex::encode(bytes);
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_format() {
        let id = new_record_id();
        assert_eq!(id.len(), 36);
        assert_eq!(id.chars().filter(|c| *c == '-').count(), 4);
        assert_eq!(&id[14..15], "4");
        assert_ne!(id, new_record_id());
    }

    #[test]
    fn test_record_serialization() {
        let record = HistoryRecord::new(UserId::new("u1"), ActivityKind::UpdateStatus)
            .with_game("Halo")
            .with_status(GameStatus::PlanToPlay);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["owner"], "u1");
        assert_eq!(json["kind"], "update_status");
        assert_eq!(json["status"], "plan_to_play");
        assert_eq!(json["gameName"], "Halo");
        assert!(json.get("targetUserId").is_none());

        let back: HistoryRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_activity_kind_display() {
        assert_eq!(ActivityKind::AddGame.to_string(), "add_game");
        assert_eq!(ActivityKind::Follow.as_str(), "follow");
    }
}
