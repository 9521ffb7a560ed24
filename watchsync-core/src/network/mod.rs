//! P2P Networking
//!
//! Uses libp2p gossipsub as a session [`Transport`](crate::external::Transport).

mod behaviour;
mod transport;

pub use behaviour::{
    session_topic, NetworkConfig, NetworkError, NetworkEvent, NetworkHandle, NetworkManager,
    TOPIC_PREFIX,
};
pub use transport::GossipTransport;
