//! Event Types
//!
//! Events flow from the level monitor to whoever presents them.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::levels::Levels;

/// Events sent by the level monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    /// Levels accumulated since the previous reading
    Levels(Levels),

    /// A reading failed (typically a timeout)
    Error { message: String },

    /// The monitor thread has finished
    Stopped,
}

impl Event {
    /// Create an error event from anything displayable
    pub fn error(err: impl Display) -> Self {
        Event::Error {
            message: err.to_string(),
        }
    }
}
