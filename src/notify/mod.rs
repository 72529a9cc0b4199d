// src/notify/mod.rs
pub mod dispatch;
pub mod format;
pub mod retry;
pub mod telegram;

pub use dispatch::{DispatchReport, DispatchSettings, Dispatcher};
pub use retry::{send_with_retry, RetryPolicy, SendOutcome};
pub use telegram::TelegramChannel;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// Chat (or user) the relay delivers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Recipient(pub String);

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Acknowledgement of an accepted message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Ack {
    pub message_id: Option<i64>,
}

#[async_trait::async_trait]
pub trait MessageChannel: Send + Sync {
    /// One delivery attempt. Errors are `SendFailure`; retrying is the caller's job.
    async fn send(&self, recipient: &Recipient, text: &str) -> Result<Ack>;
    fn name(&self) -> &'static str;
}

// --- Test helper ---
/// Channel that records every attempt and fails according to a script.
#[derive(Default)]
pub struct ScriptedChannel {
    /// Every attempt, successful or not, as (recipient, text).
    pub attempts: Mutex<Vec<(Recipient, String)>>,
    /// Texts that were accepted.
    pub delivered: Mutex<Vec<String>>,
    script: Mutex<VecDeque<bool>>,
    always_fail: Mutex<bool>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` attempts fail.
    pub fn fail_next(&self, n: usize) {
        self.script.lock().unwrap().extend(std::iter::repeat(false).take(n));
    }

    pub fn set_always_fail(&self, on: bool) {
        *self.always_fail.lock().unwrap() = on;
    }

    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl MessageChannel for ScriptedChannel {
    async fn send(&self, recipient: &Recipient, text: &str) -> Result<Ack> {
        let n = {
            let mut attempts = self.attempts.lock().unwrap();
            attempts.push((recipient.clone(), text.to_string()));
            attempts.len()
        };
        let scripted_ok = self.script.lock().unwrap().pop_front().unwrap_or(true);
        if !scripted_ok || *self.always_fail.lock().unwrap() {
            return Err(RelayError::SendFailure(format!("scripted failure on attempt {n}")));
        }
        self.delivered.lock().unwrap().push(text.to_string());
        Ok(Ack {
            message_id: Some(n as i64),
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
