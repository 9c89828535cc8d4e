//! Save-slot persistence.
//!
//! One JSON document per character, keyed by the character id. The engine
//! talks to storage through [`SaveStore`]; [`JsonFileStore`] keeps each save
//! in its own file under a directory.

use crate::character::{CharacterInfo, PlayerState};
use crate::provider::ProviderKind;
use crate::session::TranscriptEntry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid save format")]
    InvalidFormat,

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("No save for character {0}")]
    NotFound(Uuid),
}

/// Current save file version.
pub const SAVE_VERSION: u32 = 1;

/// Everything needed to resume a game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedGame {
    /// Save format version for compatibility checking.
    pub version: u32,

    /// RFC 3339 timestamp of the save.
    pub saved_at: String,

    pub character: CharacterInfo,
    pub player: PlayerState,
    pub transcript: Vec<TranscriptEntry>,

    #[serde(default)]
    pub story_hooks: Vec<String>,

    /// Back end the game was created with.
    pub provider: ProviderKind,
}

impl SavedGame {
    pub fn new(
        character: CharacterInfo,
        player: PlayerState,
        transcript: Vec<TranscriptEntry>,
        story_hooks: Vec<String>,
        provider: ProviderKind,
    ) -> Self {
        Self {
            version: SAVE_VERSION,
            saved_at: chrono::Utc::now().to_rfc3339(),
            character,
            player,
            transcript,
            story_hooks,
            provider,
        }
    }

    pub fn id(&self) -> Uuid {
        self.character.id
    }

    /// Parse a save document, rejecting other format versions.
    pub fn from_json(content: &str) -> Result<Self, PersistError> {
        #[derive(Deserialize)]
        struct Header {
            version: u32,
        }

        let header: Header =
            serde_json::from_str(content).map_err(|_| PersistError::InvalidFormat)?;
        if header.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: header.version,
            });
        }
        Ok(serde_json::from_str(content)?)
    }

    pub fn to_json(&self) -> Result<String, PersistError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Summary shown in a load menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveInfo {
    pub id: Uuid,
    pub character_name: String,
    pub level: u32,
    pub location: String,
    pub saved_at: String,
}

impl From<&SavedGame> for SaveInfo {
    fn from(saved: &SavedGame) -> Self {
        Self {
            id: saved.character.id,
            character_name: saved.character.name.clone(),
            level: saved.player.level,
            location: saved.player.location.clone(),
            saved_at: saved.saved_at.clone(),
        }
    }
}

/// Storage for save slots, keyed by character id.
#[async_trait]
pub trait SaveStore: Send + Sync {
    /// Create the slot for a new game.
    async fn save(&self, game: &SavedGame) -> Result<(), PersistError>;

    /// Overwrite an existing slot.
    async fn update(&self, game: &SavedGame) -> Result<(), PersistError>;

    async fn delete(&self, id: Uuid) -> Result<(), PersistError>;

    async fn load(&self, id: Uuid) -> Result<SavedGame, PersistError>;

    /// Every readable save, most recent first.
    async fn list(&self) -> Result<Vec<SaveInfo>, PersistError>;
}

/// One `<id>.json` file per character in a directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn write(&self, game: &SavedGame) -> Result<(), PersistError> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(game.id());
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, game.to_json()?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl SaveStore for JsonFileStore {
    async fn save(&self, game: &SavedGame) -> Result<(), PersistError> {
        self.write(game).await?;
        tracing::debug!(id = %game.id(), "save created");
        Ok(())
    }

    async fn update(&self, game: &SavedGame) -> Result<(), PersistError> {
        if !fs::try_exists(self.path_for(game.id())).await? {
            return Err(PersistError::NotFound(game.id()));
        }
        self.write(game).await
    }

    async fn delete(&self, id: Uuid) -> Result<(), PersistError> {
        match fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(PersistError::NotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn load(&self, id: Uuid) -> Result<SavedGame, PersistError> {
        let content = match fs::read_to_string(self.path_for(id)).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PersistError::NotFound(id))
            }
            Err(e) => return Err(e.into()),
        };
        SavedGame::from_json(&content)
    }

    async fn list(&self) -> Result<Vec<SaveInfo>, PersistError> {
        let mut saves = Vec::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(saves),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let content = fs::read_to_string(&path).await?;
                match SavedGame::from_json(&content) {
                    Ok(saved) => saves.push(SaveInfo::from(&saved)),
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable save"),
                }
            }
        }

        saves.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(saves)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TranscriptEntry;
    use tempfile::TempDir;

    fn sample() -> SavedGame {
        let character = CharacterInfo::new("Mira", "Half-Elf", "Rogue");
        let player = PlayerState {
            location: "Saltmarsh".into(),
            ..PlayerState::default()
        };
        SavedGame::new(
            character,
            player,
            vec![
                TranscriptEntry::user("I look around."),
                TranscriptEntry::model("Gulls wheel overhead."),
            ],
            vec!["A ship that never docks.".into()],
            ProviderKind::Hosted,
        )
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());
        let game = sample();

        store.save(&game).await.unwrap();
        let loaded = store.load(game.id()).await.unwrap();
        assert_eq!(loaded, game);
    }

    #[tokio::test]
    async fn test_update_requires_existing_slot() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());
        let mut game = sample();

        assert!(matches!(
            store.update(&game).await,
            Err(PersistError::NotFound(_))
        ));

        store.save(&game).await.unwrap();
        game.player.experience = 50;
        store.update(&game).await.unwrap();
        assert_eq!(store.load(game.id()).await.unwrap().player.experience, 50);
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("saves"));
        assert!(store.list().await.unwrap().is_empty());

        let game = sample();
        store.save(&game).await.unwrap();
        let saves = store.list().await.unwrap();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].character_name, "Mira");
        assert_eq!(saves[0].location, "Saltmarsh");

        store.delete(game.id()).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
        assert!(matches!(
            store.load(game.id()).await,
            Err(PersistError::NotFound(_))
        ));
    }

    #[test]
    fn test_version_mismatch() {
        let mut game = sample();
        game.version = SAVE_VERSION + 1;
        let json = serde_json::to_string(&game).unwrap();
        assert!(matches!(
            SavedGame::from_json(&json),
            Err(PersistError::VersionMismatch { found, .. }) if found == SAVE_VERSION + 1
        ));
        assert!(matches!(
            SavedGame::from_json("not json"),
            Err(PersistError::InvalidFormat)
        ));
    }
}
