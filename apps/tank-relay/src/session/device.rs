use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::connection::{Inbound, Outbound};
use crate::protocol::device_status_frame;
use crate::relay::Relay;

/// Drive one tank connection: register it, relay everything it says to its
/// watchers, and deregister once it goes away.
pub async fn run_device_session<I: Inbound>(
    relay: Relay,
    device_id: String,
    outbound: Arc<dyn Outbound>,
    mut inbound: I,
) {
    let connection = relay.connect_device(&device_id, outbound).await;

    loop {
        match inbound.recv().await {
            Ok(Some(text)) => {
                debug!(tank_id = %device_id, "frame from tank: {}", text);
                let frame = device_status_frame(&device_id, &text);
                relay.broadcast(&device_id, &frame).await;
            }
            Ok(None) => {
                debug!(tank_id = %device_id, "tank closed connection");
                break;
            }
            Err(e) => {
                warn!(tank_id = %device_id, "tank read failed: {}", e);
                break;
            }
        }
    }

    relay.disconnect_device(&connection).await;
    info!(
        tank_id = %device_id,
        connection = %connection.connection_id(),
        "tank session ended"
    );
}
