use crate::amqp::ManageConnections;
use lapin::Channel;

/// Open a short-lived channel on the administration connection.
///
/// A declaration rejected by the broker closes the channel it was issued on: using a fresh one
/// per operation keeps failures from leaking into other components.
pub(super) async fn open(connections: &dyn ManageConnections) -> Result<Channel, anyhow::Error> {
    let connection = connections.get_administration_connection().await?;
    Ok(connection.create_channel().await?)
}

pub(super) async fn close(channel: Channel) {
    if channel.status().connected() {
        if let Err(e) = channel.close(200, "Done").await {
            tracing::debug!("Failed to close administration channel: {}", e);
        }
    }
}
