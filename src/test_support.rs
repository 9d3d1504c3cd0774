//! In-memory readers and writers for tests and demos.
//!
//! These are real [`ItemReader`]/[`ItemWriter`] implementations backed by
//! vectors, useful anywhere a job needs deterministic data without a
//! database.

use crate::job::{ItemError, ItemReader, ItemWriter};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Reads items from a vector in order, then signals end-of-data. Further
/// reads after exhaustion keep returning `None`.
pub struct VecReader<I> {
    items: VecDeque<I>,
}

impl<I> VecReader<I> {
    pub fn new(items: Vec<I>) -> Self {
        Self {
            items: items.into(),
        }
    }
}

#[async_trait]
impl<I: Send> ItemReader<I> for VecReader<I> {
    async fn read(&mut self) -> Result<Option<I>, ItemError> {
        Ok(self.items.pop_front())
    }
}

/// Appends written items to a shared vector. Clones share the same sink, so
/// a factory can hand out one writer per step while the test observes a
/// single output stream.
pub struct CollectingWriter<O> {
    sink: Arc<Mutex<Vec<O>>>,
}

impl<O> CollectingWriter<O> {
    /// Create a writer plus the sink it appends to.
    pub fn shared() -> (Arc<Mutex<Vec<O>>>, Self) {
        let sink = Arc::new(Mutex::new(Vec::new()));
        (sink.clone(), Self { sink })
    }
}

impl<O> Clone for CollectingWriter<O> {
    fn clone(&self) -> Self {
        Self {
            sink: self.sink.clone(),
        }
    }
}

#[async_trait]
impl<O: Clone + Send + Sync> ItemWriter<O> for CollectingWriter<O> {
    async fn write(&mut self, items: &[O]) -> Result<(), ItemError> {
        self.sink.lock().extend_from_slice(items);
        Ok(())
    }
}
