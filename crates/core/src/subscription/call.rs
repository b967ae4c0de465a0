use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::{Result, StarsError};

type Outcome = std::result::Result<Value, Value>;

/// In-flight method calls keyed by call id.
#[derive(Debug, Default)]
pub(crate) struct CallRegistry {
    pending: Mutex<HashMap<String, (String, oneshot::Sender<Outcome>)>>,
}

impl CallRegistry {
    pub(crate) fn register(&self, id: &str, method: &str) -> Result<PendingCall> {
        let (tx, rx) = oneshot::channel();
        self.lock()?
            .insert(id.to_string(), (method.to_string(), tx));
        Ok(PendingCall {
            id: id.to_string(),
            method: method.to_string(),
            rx,
        })
    }

    /// Forgets a call that could not be sent.
    pub(crate) fn cancel(&self, id: &str) {
        if let Ok(mut pending) = self.lock() {
            pending.remove(id);
        }
    }

    /// Completes the call with `id`. Each call resolves at most once; results
    /// for unknown or already resolved ids are dropped.
    pub(crate) fn resolve(&self, id: &str, result: Option<Value>, error: Option<Value>) {
        let entry = match self.lock() {
            Ok(mut pending) => pending.remove(id),
            Err(_) => None,
        };
        let Some((method, tx)) = entry else {
            debug!(id, "result for unknown call");
            return;
        };
        let outcome = match error {
            Some(error) => Err(error),
            None => Ok(result.unwrap_or(Value::Null)),
        };
        if tx.send(outcome).is_err() {
            debug!(id, method, "caller stopped waiting for result");
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().map(|pending| pending.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, (String, oneshot::Sender<Outcome>)>>> {
        self.pending
            .lock()
            .map_err(|_| StarsError::msg("pending call registry has been poisoned"))
    }
}

/// Handle to a remote method call awaiting its `result` message.
#[derive(Debug)]
pub struct PendingCall {
    id: String,
    method: String,
    rx: oneshot::Receiver<Outcome>,
}

impl PendingCall {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Waits for the server's answer. There is no timeout: if the server
    /// never answers, this never returns.
    pub async fn await_result(self) -> Result<Value> {
        match self.rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(StarsError::RemoteCall {
                method: self.method,
                error,
            }),
            Err(_) => Err(StarsError::CallAbandoned),
        }
    }

    /// Non-blocking check. Returns `None` while the call is still in flight.
    pub fn try_result(&mut self) -> Option<Result<Value>> {
        match self.rx.try_recv() {
            Ok(Ok(value)) => Some(Ok(value)),
            Ok(Err(error)) => Some(Err(StarsError::RemoteCall {
                method: self.method.clone(),
                error,
            })),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(StarsError::CallAbandoned)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn resolves_with_result() {
        let registry = CallRegistry::default();
        let call = registry.register("1", "presence.getConfig").unwrap();
        registry.resolve("1", Some(json!({"id": 4})), None);

        assert_eq!(call.await_result().await.unwrap(), json!({"id": 4}));
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn resolves_with_remote_error() {
        let registry = CallRegistry::default();
        let call = registry.register("2", "presence.getConfig").unwrap();
        registry.resolve("2", None, Some(json!({"error": "Invalid controller token"})));

        match call.await_result().await {
            Err(StarsError::RemoteCall { method, error }) => {
                assert_eq!(method, "presence.getConfig");
                assert_eq!(error["error"], "Invalid controller token");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn resolves_exactly_once() {
        let registry = CallRegistry::default();
        let mut call = registry.register("3", "blocks.updateState").unwrap();
        assert!(call.try_result().is_none());

        registry.resolve("3", Some(json!(1)), None);
        registry.resolve("3", Some(json!(2)), None);

        assert_eq!(call.try_result().unwrap().unwrap(), json!(1));
    }

    #[test]
    fn missing_result_field_resolves_to_null() {
        let registry = CallRegistry::default();
        let mut call = registry.register("4", "presence.sendPresence").unwrap();
        registry.resolve("4", None, None);
        assert_eq!(call.try_result().unwrap().unwrap(), Value::Null);
    }

    #[test]
    fn dropped_registry_abandons_calls() {
        let registry = CallRegistry::default();
        let mut call = registry.register("5", "presence.getConfig").unwrap();
        drop(registry);
        assert!(matches!(call.try_result(), Some(Err(StarsError::CallAbandoned))));
    }
}
