use crate::error::{ServiceError, ServiceResult};
use crate::models::*;
use crate::saving;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Every table of the platform
///
/// Tables are ordered maps so listings come out in id order without an
/// extra sort. Ids come from a single counter shared by all tables.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Database {
    pub next_id: Id,
    pub users: BTreeMap<Id, User>,
    pub lessons: BTreeMap<Id, Lesson>,
    pub cards: BTreeMap<Id, Card>,
    pub questions: BTreeMap<Id, Question>,
    pub answers: BTreeMap<Id, Answer>,
    pub tasks: BTreeMap<Id, Task>,
    pub submissions: BTreeMap<Id, Submission>,
    pub attempts: Vec<Attempt>,
    /// (user_id, lesson_id) -> time spent
    pub trackers: BTreeMap<(Id, Id), Tracker>,
    /// (user_id, card_id)
    pub completions: BTreeSet<(Id, Id)>,
    pub profiles: BTreeMap<Id, Profile>,
    pub media: BTreeMap<Id, MediaFile>,
}

impl Database {
    pub fn next_id(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }

    pub fn user(&self, id: Id) -> ServiceResult<&User> {
        self.users.get(&id).ok_or(ServiceError::NotFound("user"))
    }

    pub fn lesson(&self, id: Id) -> ServiceResult<&Lesson> {
        self.lessons.get(&id).ok_or(ServiceError::NotFound("lesson"))
    }

    pub fn card(&self, id: Id) -> ServiceResult<&Card> {
        self.cards.get(&id).ok_or(ServiceError::NotFound("card"))
    }

    pub fn question(&self, id: Id) -> ServiceResult<&Question> {
        self.questions
            .get(&id)
            .ok_or(ServiceError::NotFound("question"))
    }

    pub fn task(&self, id: Id) -> ServiceResult<&Task> {
        self.tasks.get(&id).ok_or(ServiceError::NotFound("task"))
    }

    /// Cards of a lesson in position order
    pub fn cards_of(&self, lesson_id: Id) -> Vec<&Card> {
        let mut cards: Vec<&Card> = self
            .cards
            .values()
            .filter(|card| card.lesson_id == lesson_id)
            .collect();
        cards.sort_by_key(|card| card.position);
        cards
    }

    pub fn questions_of(&self, card_id: Id) -> Vec<&Question> {
        self.questions
            .values()
            .filter(|q| q.card_id == card_id)
            .collect()
    }

    pub fn answers_of(&self, question_id: Id) -> Vec<&Answer> {
        self.answers
            .values()
            .filter(|a| a.question_id == question_id)
            .collect()
    }

    pub fn tasks_of(&self, lesson_id: Id) -> Vec<&Task> {
        self.tasks
            .values()
            .filter(|t| t.lesson_id == lesson_id)
            .collect()
    }

    /// Best stored attempt of a user on a card
    pub fn best_attempt(&self, user_id: Id, card_id: Id) -> Option<&Attempt> {
        self.attempts
            .iter()
            .filter(|a| a.user_id == user_id && a.card_id == card_id)
            .max_by_key(|a| a.score)
    }

    pub fn remove_question(&mut self, question_id: Id) {
        self.questions.remove(&question_id);
        self.answers.retain(|_, a| a.question_id != question_id);
    }

    /// Remove a card and everything hanging off it
    ///
    /// Positions of the remaining cards in the lesson are re-compacted.
    ///
    /// # Returns
    /// * `Vec<MediaFile>` - Media records removed, whose stored bytes must be deleted
    pub fn remove_card(&mut self, card_id: Id) -> Vec<MediaFile> {
        let Some(card) = self.cards.remove(&card_id) else {
            return Vec::new();
        };

        let question_ids: Vec<Id> = self.questions_of(card_id).iter().map(|q| q.id).collect();
        for id in question_ids {
            self.remove_question(id);
        }
        self.attempts.retain(|a| a.card_id != card_id);
        self.completions.retain(|(_, c)| *c != card_id);

        let media_ids: Vec<Id> = self
            .media
            .values()
            .filter(|m| m.card_id == card_id)
            .map(|m| m.id)
            .collect();
        let removed = media_ids
            .iter()
            .filter_map(|id| self.media.remove(id))
            .collect();

        self.compact_positions(card.lesson_id);
        removed
    }

    /// Remove a lesson with its cards, tasks, submissions and trackers
    pub fn remove_lesson(&mut self, lesson_id: Id) -> Vec<MediaFile> {
        let card_ids: Vec<Id> = self.cards_of(lesson_id).iter().map(|c| c.id).collect();
        let mut removed = Vec::new();
        for id in card_ids {
            removed.extend(self.remove_card(id));
        }

        let task_ids: BTreeSet<Id> = self.tasks_of(lesson_id).iter().map(|t| t.id).collect();
        self.tasks.retain(|id, _| !task_ids.contains(id));
        self.submissions.retain(|_, s| !task_ids.contains(&s.task_id));
        self.trackers.retain(|(_, l), _| *l != lesson_id);
        self.lessons.remove(&lesson_id);
        removed
    }

    pub fn compact_positions(&mut self, lesson_id: Id) {
        let ordered: Vec<Id> = self.cards_of(lesson_id).iter().map(|c| c.id).collect();
        for (position, id) in ordered.into_iter().enumerate() {
            if let Some(card) = self.cards.get_mut(&id) {
                card.position = position as u32;
            }
        }
    }
}

/// Thread-safe handle to the database
///
/// A write runs on a copy of the database. The copy is persisted to the
/// snapshot file (when one is configured) and only then replaces the
/// live database, so a failed mutation or a failed save changes nothing.
/// Readers keep seeing the previous state while a write is in progress.
pub struct Store {
    db: RwLock<Database>,
    /// Serializes writers so no committed change is overwritten
    writer: Mutex<()>,
    snapshot: Option<PathBuf>,
}

impl Store {
    /// A store that lives only in memory
    pub fn in_memory() -> Self {
        Store {
            db: RwLock::new(Database::default()),
            writer: Mutex::new(()),
            snapshot: None,
        }
    }

    /// Open a store backed by a snapshot file, loading it if present
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = saving::load_database(&path)?;
        log::info!(
            "loaded snapshot {} ({} users, {} lessons)",
            path.display(),
            db.users.len(),
            db.lessons.len()
        );
        Ok(Store {
            db: RwLock::new(db),
            writer: Mutex::new(()),
            snapshot: Some(path),
        })
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, Database> {
        self.db.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, Database> {
        self.db.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn read<T>(&self, f: impl FnOnce(&Database) -> T) -> T {
        f(&self.read_guard())
    }

    /// Run a mutation, persist the result and publish it
    ///
    /// Nothing is published when the mutation returns an error or the
    /// snapshot cannot be written.
    pub fn write<T>(&self, f: impl FnOnce(&mut Database) -> ServiceResult<T>) -> ServiceResult<T> {
        let _writer = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut next = self.read_guard().clone();
        let value = f(&mut next)?;

        if let Some(path) = &self.snapshot {
            if let Err(e) = saving::save_database(&next, path) {
                log::error!("failed to write snapshot {}: {}", path.display(), e);
                return Err(ServiceError::Storage(e.to_string()));
            }
        }

        *self.write_guard() = next;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn failed_mutation_is_discarded() {
        let store = Store::in_memory();
        let result: ServiceResult<()> = store.write(|db| {
            db.next_id();
            Err(ServiceError::validation("nope"))
        });
        assert!(result.is_err());
        assert_eq!(store.read(|db| db.next_id), 0);
    }

    #[test]
    fn reads_proceed_while_a_write_is_running() {
        let store = &Store::in_memory();
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        thread::scope(|s| {
            s.spawn(move || {
                store
                    .write(|db| {
                        db.next_id = 10;
                        started_tx.send(()).unwrap();
                        release_rx.recv().unwrap();
                        Ok(())
                    })
                    .unwrap()
            });

            started_rx.recv().unwrap();
            assert_eq!(store.read(|db| db.next_id), 0);
            release_tx.send(()).unwrap();
        });

        assert_eq!(store.read(|db| db.next_id), 10);
    }
}
