//! Scripted [`RemoteApi`] for engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::remote::{Method, Params, RemoteApi, RemoteError};

enum Step {
    Reply(Result<Value, RemoteError>),
    Gated {
        entered: oneshot::Sender<()>,
        release: oneshot::Receiver<()>,
        reply: Result<Value, RemoteError>,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub action: String,
    pub params: Params,
    pub method: Method,
}

/// Lets a test hold a call in flight.
pub(crate) struct Gate {
    entered: oneshot::Receiver<()>,
    release: oneshot::Sender<()>,
}

impl Gate {
    /// Wait until the gated call has been issued.
    pub async fn entered(&mut self) {
        let _ = (&mut self.entered).await;
    }

    /// Let the gated call return its reply.
    pub fn release(self) {
        let _ = self.release.send(());
    }
}

/// Replies to each action from a per-action queue, in order. Unscripted
/// calls fail with a network error.
#[derive(Default)]
pub(crate) struct ScriptedRemote {
    steps: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, action: &str, reply: Result<Value, RemoteError>) -> &Self {
        self.push(action, Step::Reply(reply));
        self
    }

    pub fn ok(&self, action: &str, body: Value) -> &Self {
        self.reply(action, Ok(body))
    }

    pub fn fail(&self, action: &str, err: RemoteError) -> &Self {
        self.reply(action, Err(err))
    }

    pub fn gated(&self, action: &str, reply: Result<Value, RemoteError>) -> Gate {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        self.push(
            action,
            Step::Gated {
                entered: entered_tx,
                release: release_rx,
                reply,
            },
        );
        Gate {
            entered: entered_rx,
            release: release_tx,
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, action: &str) -> usize {
        self.calls().iter().filter(|c| c.action == action).count()
    }

    fn push(&self, action: &str, step: Step) {
        self.steps
            .lock()
            .unwrap()
            .entry(action.to_string())
            .or_default()
            .push_back(step);
    }
}

#[async_trait]
impl RemoteApi for ScriptedRemote {
    async fn call(
        &self,
        action: &str,
        params: Params,
        method: Method,
    ) -> Result<Value, RemoteError> {
        self.calls.lock().unwrap().push(RecordedCall {
            action: action.to_string(),
            params,
            method,
        });

        let step = self
            .steps
            .lock()
            .unwrap()
            .get_mut(action)
            .and_then(VecDeque::pop_front);

        match step {
            Some(Step::Reply(reply)) => reply,
            Some(Step::Gated {
                entered,
                release,
                reply,
            }) => {
                let _ = entered.send(());
                let _ = release.await;
                reply
            }
            None => Err(RemoteError::Network(format!("no scripted reply for {action}"))),
        }
    }
}
