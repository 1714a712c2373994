//! Applies `Notify` pushes to the registry and dispatches callbacks
//!
//! Registry updates happen with the client state locked. Callbacks run
//! after the lock is released.

use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::client::ClientState;
use crate::protocol::Notification;
use crate::registry::{AttributeUpdate, OutputSnapshot};
use crate::transport::lock;
use crate::types::{
    AttributeState, ConnectorType, NotifyCategory, OutputAttribute, OutputId, OutputMode,
    PhysicalSize, Resolution,
};
use crate::value::Value;

/// Handle one `Notify` push
///
/// Malformed payloads and notifications about unknown outputs are logged
/// and dropped.
pub(crate) fn reconcile(state: &Mutex<ClientState>, local_pid: u32, args: &[Value]) {
    let notification = match Notification::decode(args) {
        Ok(notification) => notification,
        Err(e) => {
            warn!("Dropping malformed Notify: {}", e);
            return;
        }
    };

    let Some(category) = NotifyCategory::from_wire(notification.category) else {
        info!("Ignoring Notify with unknown category {}", notification.category);
        return;
    };

    let Some(id) = OutputId::from_wire(notification.output_id) else {
        warn!(%category, "Dropping Notify with invalid output id {}", notification.output_id);
        return;
    };

    let mut lost = false;
    let batch = {
        let mut state = lock(state);

        match category {
            NotifyCategory::Added => {
                let Some(mode) = decode_mode(&notification) else {
                    return;
                };
                let snapshot = OutputSnapshot {
                    connector_type: ConnectorType::from_wire(notification.connector_type),
                    mode,
                    resolution: Resolution {
                        width: notification.width,
                        height: notification.height,
                    },
                    physical_size: PhysicalSize {
                        width_mm: notification.width_mm,
                        height_mm: notification.height_mm,
                    },
                };
                if state.registry.apply_add(id, snapshot) {
                    info!(output_id = %id, "Output {} added", snapshot.connector_type);
                }
            }
            NotifyCategory::Removed => {
                if !state.registry.apply_remove(id) {
                    debug!(output_id = %id, "Removal of unknown output, ignoring");
                    return;
                }
                info!(output_id = %id, "Output removed");
            }
            NotifyCategory::ModeChanged => {
                let Some(mode) = decode_mode(&notification) else {
                    return;
                };
                match state.registry.apply_mode_changed(id, mode) {
                    Some(previous) => info!(output_id = %id, "Mode changed {} -> {}", previous, mode),
                    None => {
                        debug!(output_id = %id, "Mode change for unknown output, ignoring");
                        return;
                    }
                }
            }
            NotifyCategory::AttributeChanged => {
                let (Some(attribute), Some(attribute_state)) = (
                    OutputAttribute::from_wire(notification.attribute),
                    AttributeState::from_wire(notification.attribute_state),
                ) else {
                    warn!(
                        output_id = %id,
                        "Dropping attribute change with invalid codes ({}, {})",
                        notification.attribute,
                        notification.attribute_state
                    );
                    return;
                };

                match state.registry.apply_attribute_changed(
                    id,
                    notification.pid,
                    local_pid,
                    attribute,
                    attribute_state,
                ) {
                    AttributeUpdate::Applied => {
                        info!(output_id = %id, "Attribute {} is {}", attribute, attribute_state);
                        lost = attribute_state == AttributeState::Lost;
                    }
                    AttributeUpdate::ForeignProcess => {
                        debug!(output_id = %id, pid = notification.pid, "Attribute change for another process");
                        return;
                    }
                    AttributeUpdate::UnknownOutput => {
                        debug!(output_id = %id, "Attribute change for unknown output, ignoring");
                        return;
                    }
                }
            }
        }

        state.dispatcher.batch(category)
    };

    batch.dispatch(id);

    // Subscribers observe the lost state before it is cleared
    if lost {
        lock(state).registry.reset_attribute(id);
    }
}

fn decode_mode(notification: &Notification) -> Option<OutputMode> {
    let mode = OutputMode::from_wire(notification.mode);
    if mode.is_none() {
        warn!(
            output_id = notification.output_id,
            "Dropping Notify with invalid mode {}", notification.mode
        );
    }
    mode
}
