//! Shared publisher for [`SupervisionState`]

use tokio::sync::watch;

use robolaunch_core::prelude::*;
use robolaunch_core::SupervisionState;

pub(crate) type StateSender = watch::Sender<SupervisionState>;

/// Publish `next` unless the state is already terminal.
///
/// Returns `true` when the state changed.
pub(crate) fn transition(tx: &StateSender, next: SupervisionState) -> bool {
    tx.send_if_modified(|current| {
        if current.is_terminated() || *current == next {
            return false;
        }
        info!("State: {} -> {}", current, next);
        *current = next;
        true
    })
}
