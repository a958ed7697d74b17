//! Pull-based iteration over a cursor.
//!
//! Each pull either consumes the advance recorded since the previous pull or,
//! when none was recorded, issues a single-step `continue`. The sequence is
//! forward-only and ends at the first absent outcome; a fresh sequence needs
//! a fresh cursor.

use super::cursor::{Cursor, CursorPosition};
use crate::core::{DbError, Key, Result};
use crate::promise::Promised;
use futures::stream::{self, LocalBoxStream};
use futures::StreamExt;
use std::fmt;
use std::mem;

enum State {
    /// The open request has not settled yet.
    Opening(Promised<Option<Cursor>>),
    /// Positioned on an entry that has not been yielded.
    Fresh(Cursor),
    /// Positioned on the entry yielded last.
    Positioned(Cursor),
    Exhausted,
}

pub struct CursorIterator {
    state: State,
    planned: Option<Promised<Option<Cursor>>>,
}

impl CursorIterator {
    pub(crate) fn opening(open: Promised<Option<Cursor>>) -> Self {
        Self {
            state: State::Opening(open),
            planned: None,
        }
    }

    pub(crate) fn from_cursor(cursor: Cursor) -> Self {
        let state = if cursor.position().exhausted {
            State::Exhausted
        } else {
            State::Fresh(cursor)
        };
        Self {
            state,
            planned: None,
        }
    }

    /// Pull the next entry; `None` once the cursor is exhausted.
    pub async fn next(&mut self) -> Result<Option<Cursor>> {
        let step = match mem::replace(&mut self.state, State::Exhausted) {
            State::Opening(open) => open,
            State::Fresh(cursor) => {
                self.state = State::Positioned(cursor.clone());
                return Ok(Some(cursor));
            }
            State::Positioned(cursor) => match self.planned.take() {
                Some(planned) => planned,
                None => match cursor.continue_to(None) {
                    Ok(step) => step,
                    Err(error) => {
                        // still positioned; the next pull reports the misuse again
                        self.state = State::Positioned(cursor);
                        return Err(error);
                    }
                },
            },
            State::Exhausted => return Ok(None),
        };
        match step.await? {
            Some(cursor) => {
                self.state = State::Positioned(cursor.clone());
                Ok(Some(cursor))
            }
            None => Ok(None),
        }
    }

    /// Skip `count` entries on the next pull instead of one.
    pub fn advance(&mut self, count: u32) -> Result<()> {
        let step = self.current_for_advance()?.advance(count)?;
        self.planned = Some(step);
        Ok(())
    }

    /// Move to the first entry at or beyond `key` on the next pull.
    pub fn continue_to(&mut self, key: impl Into<Key>) -> Result<()> {
        let step = self.current_for_advance()?.continue_to(Some(key.into()))?;
        self.planned = Some(step);
        Ok(())
    }

    pub fn continue_primary_key(&mut self, key: impl Into<Key>, primary_key: impl Into<Key>) -> Result<()> {
        let step = self
            .current_for_advance()?
            .continue_primary_key(key, primary_key)?;
        self.planned = Some(step);
        Ok(())
    }

    /// Snapshot of the entry yielded last.
    pub fn position(&self) -> Option<CursorPosition> {
        match &self.state {
            State::Fresh(cursor) | State::Positioned(cursor) => Some(cursor.position()),
            State::Opening(_) | State::Exhausted => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, State::Exhausted)
    }

    /// The remaining entries as a stream; an error ends it.
    pub fn into_stream(self) -> LocalBoxStream<'static, Result<Cursor>> {
        stream::unfold(Some(self), |iterator| async move {
            let mut iterator = iterator?;
            match iterator.next().await {
                Ok(Some(cursor)) => Some((Ok(cursor), Some(iterator))),
                Ok(None) => None,
                Err(error) => Some((Err(error), None)),
            }
        })
        .boxed_local()
    }

    fn current_for_advance(&self) -> Result<Cursor> {
        if self.planned.is_some() {
            return Err(DbError::InvalidState(
                "an advance is already pending for this step".into(),
            ));
        }
        match &self.state {
            State::Positioned(cursor) => Ok(cursor.clone()),
            State::Fresh(_) | State::Opening(_) => Err(DbError::InvalidState(
                "no entry has been pulled yet".into(),
            )),
            State::Exhausted => Err(DbError::InvalidState("cursor is exhausted".into())),
        }
    }
}

impl fmt::Debug for CursorIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Opening(_) => "opening",
            State::Fresh(_) => "fresh",
            State::Positioned(_) => "positioned",
            State::Exhausted => "exhausted",
        };
        f.debug_struct("CursorIterator")
            .field("state", &state)
            .field("planned", &self.planned.is_some())
            .finish()
    }
}
