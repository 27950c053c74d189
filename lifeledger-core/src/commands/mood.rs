//! Mood check-ins.

use serde::{Deserialize, Serialize};

use super::{new_id, optional_text, CommandOutcome, CommandProcessor, Recorded};
use crate::db::repo;
use crate::error::{Error, Result};
use crate::ledger::{EventType, NewEvent};
use crate::types::MoodCheckIn;

/// Arguments for [`CommandProcessor::check_in_mood`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewMoodCheckIn {
    /// 1 (low) to 5 (high)
    pub score: u8,
    pub note: Option<String>,
    pub tags: Vec<String>,
}

impl CommandProcessor {
    pub fn check_in_mood(
        &self,
        key: &str,
        args: NewMoodCheckIn,
    ) -> Result<CommandOutcome<MoodCheckIn>> {
        self.execute(key, "check_in_mood", |scope| {
            if !(1..=5).contains(&args.score) {
                return Err(Error::Validation(format!(
                    "mood score must be between 1 and 5, got {}",
                    args.score
                )));
            }

            let mut tags: Vec<String> = args
                .tags
                .iter()
                .filter_map(|t| optional_text(Some(t)))
                .map(|t| t.to_lowercase())
                .collect();
            tags.sort();
            tags.dedup();

            let entry = MoodCheckIn {
                id: new_id(),
                score: args.score,
                note: optional_text(args.note.as_deref()),
                tags,
                checked_in_at: scope.now,
            };
            repo::insert_mood(scope.conn, &entry)?;

            let event = NewEvent::new(EventType::MoodCheckedIn, &entry.id, &entry)?;
            Ok(Recorded::new(entry, event))
        })
    }
}
