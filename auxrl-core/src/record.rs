//! Types for recording training metrics.
//!
//! [`Record`] is the container handed to logging collaborators: each call to
//! an agent's `opt()` produces a [`Record`] with the individual loss terms,
//! and episode loops typically add scores and step counts before passing it
//! to a [`Recorder`].
use crate::error::AuxrlError;
use chrono::prelude::{DateTime, Local};
use std::{
    collections::{
        hash_map::{IntoIter, Iter, Keys},
        HashMap,
    },
    convert::Into,
    iter::IntoIterator,
};

/// Possible types of values in a [`Record`].
#[derive(Debug, Clone)]
pub enum RecordValue {
    /// Scalar, used for loss values and scores.
    Scalar(f32),

    /// Date and time.
    DateTime(DateTime<Local>),

    /// A one-dimensional array.
    Array1(Vec<f32>),

    /// String.
    String(String),
}

/// Key-value pairs for logging.
#[derive(Debug, Clone)]
pub struct Record(HashMap<String, RecordValue>);

impl Record {
    /// Constructs an empty record.
    pub fn empty() -> Self {
        Self(HashMap::new())
    }

    /// Constructs a record from a slice of key-value pairs.
    pub fn from_slice<K: Into<String> + Clone>(s: &[(K, RecordValue)]) -> Self {
        Self(
            s.iter()
                .map(|(k, v)| (k.clone().into(), v.clone()))
                .collect(),
        )
    }

    /// Constructs a record containing a single scalar.
    pub fn from_scalar(name: impl Into<String>, value: f32) -> Self {
        Self(HashMap::from([(name.into(), RecordValue::Scalar(value))]))
    }

    /// Gets keys.
    pub fn keys(&self) -> Keys<String, RecordValue> {
        self.0.keys()
    }

    /// Inserts a key-value pair into the record.
    pub fn insert(&mut self, k: impl Into<String>, v: RecordValue) {
        self.0.insert(k.into(), v);
    }

    /// Returns an iterator over key-value pairs in the record.
    pub fn iter(&self) -> Iter<'_, String, RecordValue> {
        self.0.iter()
    }

    /// Returns an iterator over key-value pairs in the record.
    pub fn into_iter_in_record(self) -> IntoIter<String, RecordValue> {
        self.0.into_iter()
    }

    /// Gets the value of the given key.
    pub fn get(&self, k: &str) -> Option<&RecordValue> {
        self.0.get(k)
    }

    /// Merges records.
    pub fn merge(self, record: Record) -> Self {
        Record(self.0.into_iter().chain(record.0).collect())
    }

    /// Gets scalar value.
    pub fn get_scalar(&self, k: &str) -> Result<f32, AuxrlError> {
        if let Some(v) = self.0.get(k) {
            match v {
                RecordValue::Scalar(v) => Ok(*v),
                _ => Err(AuxrlError::RecordValueType(k.into())),
            }
        } else {
            Err(AuxrlError::RecordKeyNotFound(k.into()))
        }
    }

    /// Returns true if the record is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Writes records to some destination, e.g. a console logger or a file.
pub trait Recorder {
    /// Writes a record.
    fn write(&mut self, record: Record);
}

/// A recorder that discards any record. Used for evaluation runs.
pub struct NullRecorder;

impl Recorder for NullRecorder {
    fn write(&mut self, _record: Record) {}
}
