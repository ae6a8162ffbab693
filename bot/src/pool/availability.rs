//! Availability table of the worker pool.
//!
//! The table is the single writer for worker availability. Routing uses
//! [`AvailabilityTable::try_acquire`], which finds the first ready worker and
//! marks it busy under one lock.

use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::request::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Unregistered,
    Ready,
    Busy,
}

#[derive(Debug, Clone)]
struct Entry {
    name: String,
    availability: Availability,
    /// Last request routed to this worker, kept until it reports ready
    assignment: Option<Request>,
}

/// Snapshot row of the table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub name: String,
    pub availability: Availability,
}

#[derive(Debug, Default)]
pub struct AvailabilityTable {
    entries: Mutex<Vec<Entry>>,
}

impl AvailabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with every configured worker unregistered, in roster order
    pub fn with_roster<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = names
            .into_iter()
            .map(|name| Entry {
                name: name.into(),
                availability: Availability::Unregistered,
                assignment: None,
            })
            .collect();
        Self {
            entries: Mutex::new(entries),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        // A panic while holding the lock cannot leave an entry half-written
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn entry<'a>(entries: &'a mut Vec<Entry>, name: &str) -> &'a mut Entry {
        let index = match entries.iter().position(|e| e.name == name) {
            Some(index) => index,
            None => {
                // Workers not in the roster are appended when they show up
                entries.push(Entry {
                    name: name.to_string(),
                    availability: Availability::Unregistered,
                    assignment: None,
                });
                entries.len() - 1
            }
        };
        &mut entries[index]
    }

    fn set(&self, name: &str, availability: Availability) -> Option<Request> {
        let mut entries = self.lock();
        let entry = Self::entry(&mut entries, name);
        debug!("Worker {}: {:?} -> {:?}", name, entry.availability, availability);
        entry.availability = availability;
        if availability == Availability::Busy {
            None
        } else {
            entry.assignment.take()
        }
    }

    /// A worker process came up
    pub fn register(&self, name: &str) {
        self.set(name, Availability::Ready);
    }

    pub fn mark_busy(&self, name: &str) {
        self.set(name, Availability::Busy);
    }

    /// The worker finished; returns the request last routed to it
    pub fn mark_ready(&self, name: &str) -> Option<Request> {
        self.set(name, Availability::Ready)
    }

    /// The worker is idle without having finished a job.
    ///
    /// A claimed worker stays busy: the job routed to it is still on its way.
    pub fn mark_idle(&self, name: &str) {
        let mut entries = self.lock();
        let entry = Self::entry(&mut entries, name);
        if entry.availability == Availability::Busy && entry.assignment.is_some() {
            debug!("Worker {} is idle but holds a claimed job", name);
            return;
        }
        entry.availability = Availability::Ready;
    }

    /// The worker is gone; returns the request last routed to it
    pub fn mark_unregistered(&self, name: &str) -> Option<Request> {
        self.set(name, Availability::Unregistered)
    }

    /// Atomically claim the first ready worker for `request`
    pub fn try_acquire(&self, request: &Request) -> Option<String> {
        let mut entries = self.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.availability == Availability::Ready)?;
        entry.availability = Availability::Busy;
        entry.assignment = Some(request.clone());
        Some(entry.name.clone())
    }

    /// Undo a claim whose job never reached the worker
    pub fn release(&self, name: &str) {
        let mut entries = self.lock();
        if let Some(entry) = entries.iter_mut().find(|e| e.name == name) {
            if entry.availability == Availability::Busy {
                entry.availability = Availability::Ready;
            }
            entry.assignment = None;
        }
    }

    pub fn get(&self, name: &str) -> Option<Availability> {
        self.lock()
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.availability)
    }

    /// Request last routed to a worker that has not reported ready yet
    pub fn assignment(&self, name: &str) -> Option<Request> {
        self.lock()
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.assignment.clone())
    }

    pub fn snapshot(&self) -> Vec<WorkerStatus> {
        self.lock()
            .iter()
            .map(|e| WorkerStatus {
                name: e.name.clone(),
                availability: e.availability,
            })
            .collect()
    }

    pub fn count(&self, availability: Availability) -> usize {
        self.lock()
            .iter()
            .filter(|e| e.availability == availability)
            .count()
    }
}
