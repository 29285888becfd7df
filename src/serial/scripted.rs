//! In-memory serial link driven by a closure.
//!
//! Used by tests and dry runs where no radio is attached.

use std::sync::{Arc, Mutex};

use crate::error::RemoteError;

use super::SerialLink;

type Responder = Box<dyn FnMut(&str) -> Result<Vec<String>, RemoteError> + Send>;

/// A serial link whose replies come from a closure. Every command it sees
/// is recorded in order.
pub struct ScriptedLink {
    responder: Responder,
    history: Arc<Mutex<Vec<String>>>,
}

impl ScriptedLink {
    pub fn new<F>(responder: F) -> Self
    where
        F: FnMut(&str) -> Result<Vec<String>, RemoteError> + Send + 'static,
    {
        Self {
            responder: Box::new(responder),
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answer every command with `-> <command> ok`.
    pub fn echo() -> Self {
        Self::new(|command| Ok(vec![format!("-> {} ok", command)]))
    }

    /// Shared handle to the commands seen so far.
    pub fn history(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.history)
    }
}

impl SerialLink for ScriptedLink {
    fn exchange(&mut self, command: &str) -> Result<Vec<String>, RemoteError> {
        match self.history.lock() {
            Ok(mut history) => history.push(command.to_string()),
            Err(poisoned) => poisoned.into_inner().push(command.to_string()),
        }
        (self.responder)(command)
    }
}
