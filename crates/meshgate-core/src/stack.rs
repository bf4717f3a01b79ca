//! The mesh stack seen from the gateway.
//!
//! The protocol engine itself (routing, attach, the joiner handshake) lives
//! outside this crate. [`MeshStack`] is the narrow set of calls the gateway
//! makes into it, and [`CommissionerHandler`] / [`StackEventHandler`] are the
//! notifications it delivers back, on its own thread.

use std::fmt;
use std::sync::Arc;

use meshgate_protocol::ExtAddress;
use serde::{Deserialize, Serialize};

use crate::error::StackError;

// ============================================================================
// Roles and States
// ============================================================================

/// Role of this device in the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceRole {
    /// Mesh interface disabled.
    Disabled,
    /// Enabled but not attached to any partition.
    Detached,
    /// Attached as an end device.
    Child,
    /// Attached as a router.
    Router,
    /// Attached as the partition leader.
    Leader,
}

impl DeviceRole {
    /// Whether the device is attached to a partition.
    pub fn is_attached(&self) -> bool {
        matches!(self, DeviceRole::Child | DeviceRole::Router | DeviceRole::Leader)
    }

    /// Whether the role is allowed to host the commissioner.
    pub fn can_commission(&self) -> bool {
        matches!(self, DeviceRole::Router | DeviceRole::Leader)
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceRole::Disabled => "disabled",
            DeviceRole::Detached => "detached",
            DeviceRole::Child => "child",
            DeviceRole::Router => "router",
            DeviceRole::Leader => "leader",
        };
        f.write_str(name)
    }
}

/// Commissioner role state, as reported by the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommissionerState {
    /// Not running.
    Disabled,
    /// Petitioning the leader for the commissioner role.
    Petitioning,
    /// Running and able to admit joiners.
    Active,
}

impl fmt::Display for CommissionerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommissionerState::Disabled => "DISABLED",
            CommissionerState::Petitioning => "PETITIONING",
            CommissionerState::Active => "ACTIVE",
        };
        f.write_str(name)
    }
}

/// Progress of a joiner through admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinerEvent {
    /// The joiner started its handshake.
    Start,
    /// The joiner's secure session was established.
    Connected,
    /// The joiner is finalizing.
    Finalize,
    /// The joiner completed admission.
    End,
    /// The joiner entry was removed from the commissioner.
    Removed,
    /// An event number this crate does not know.
    Unknown(u8),
}

impl JoinerEvent {
    /// Upper-case name used in log records, or `None` for unknown events.
    pub fn name(&self) -> Option<&'static str> {
        match self {
            JoinerEvent::Start => Some("START"),
            JoinerEvent::Connected => Some("CONNECTED"),
            JoinerEvent::Finalize => Some("FINALIZE"),
            JoinerEvent::End => Some("END"),
            JoinerEvent::Removed => Some("REMOVED"),
            JoinerEvent::Unknown(_) => None,
        }
    }
}

/// Attach-state notifications from the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEvent {
    /// The device attached to a partition.
    Attached,
    /// The device lost its partition.
    Detached,
}

// ============================================================================
// Network Dataset
// ============================================================================

/// Longest network name the stack accepts, in bytes.
pub const MAX_NETWORK_NAME_LEN: usize = 15;

/// Truncate a network name to [`MAX_NETWORK_NAME_LEN`] bytes, never
/// splitting a character.
pub fn truncate_network_name(name: &str) -> &str {
    if name.len() <= MAX_NETWORK_NAME_LEN {
        return name;
    }
    let mut end = MAX_NETWORK_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Parameters defining one mesh network instance.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDataset {
    /// Human-readable network name.
    pub network_name: String,
    /// Network master key.
    pub network_key: [u8; 16],
    /// Extended PAN identifier.
    pub extended_pan_id: [u8; 8],
    /// PAN identifier.
    pub pan_id: u16,
    /// Radio channel.
    pub channel: u8,
}

impl fmt::Debug for NetworkDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkDataset")
            .field("network_name", &self.network_name)
            .field("network_key", &"<redacted>")
            .field("extended_pan_id", &hex::encode(self.extended_pan_id))
            .field("pan_id", &format_args!("{:#06x}", self.pan_id))
            .field("channel", &self.channel)
            .finish()
    }
}

// ============================================================================
// Stack Interface
// ============================================================================

/// Receives commissioner notifications on the stack's thread.
pub trait CommissionerHandler: Send + Sync {
    /// The commissioner changed state.
    fn on_state_changed(&self, state: CommissionerState);

    /// A joiner made progress. `joiner` is `None` when the stack does not
    /// know the joiner's identity.
    fn on_joiner_event(&self, event: JoinerEvent, joiner: Option<ExtAddress>);
}

/// Receives attach-state notifications on the stack's thread.
pub trait StackEventHandler: Send + Sync {
    /// Called once per notification.
    fn on_stack_event(&self, event: StackEvent);
}

/// Calls the gateway makes into the mesh stack.
///
/// Every call must be made with the stack lock held; see
/// [`SharedStack`](crate::SharedStack).
pub trait MeshStack: Send {
    /// Current device role.
    fn device_role(&self) -> DeviceRole;

    /// Current commissioner state.
    fn commissioner_state(&self) -> CommissionerState;

    /// Start the commissioner, delivering its notifications to `handler`.
    fn commissioner_start(&mut self, handler: Arc<dyn CommissionerHandler>) -> Result<(), StackError>;

    /// Replace the commissioner notification handler without starting
    /// anything.
    fn set_commissioner_handler(&mut self, handler: Arc<dyn CommissionerHandler>);

    /// Stop the commissioner.
    fn commissioner_stop(&mut self) -> Result<(), StackError>;

    /// Register a joiner credential. `joiner` of `None` admits any device.
    fn add_joiner(
        &mut self,
        joiner: Option<&ExtAddress>,
        credential: &str,
        timeout_secs: u32,
    ) -> Result<(), StackError>;

    /// Wipe the active dataset and all persisted stack settings.
    fn factory_reset_dataset(&mut self) -> Result<(), StackError>;

    /// Install `dataset` as the active configuration.
    fn set_active_dataset(&mut self, dataset: &NetworkDataset) -> Result<(), StackError>;

    /// Whether an active dataset is installed.
    fn has_active_dataset(&self) -> bool;

    /// Bring up the network layer and the mesh interface.
    fn enable_interfaces(&mut self) -> Result<(), StackError>;

    /// Subscribe to attach-state notifications.
    fn subscribe(&mut self, handler: Arc<dyn StackEventHandler>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_network_name() {
        assert_eq!(truncate_network_name("home"), "home");
        assert_eq!(truncate_network_name("exactly-15-byte"), "exactly-15-byte");
        assert_eq!(truncate_network_name("a-much-longer-network-name"), "a-much-longer-n");
    }

    #[test]
    fn test_truncate_network_name_keeps_char_boundary() {
        // 14 ASCII bytes then a 2-byte character straddling the limit.
        let name = "fourteen-bytes\u{e9}x";
        assert_eq!(truncate_network_name(name), "fourteen-bytes");
    }

    #[test]
    fn test_dataset_debug_redacts_key() {
        let dataset = NetworkDataset {
            network_name: "lab".into(),
            network_key: [0xAB; 16],
            extended_pan_id: [1; 8],
            pan_id: 0x1234,
            channel: 15,
        };
        let text = format!("{:?}", dataset);
        assert!(text.contains("<redacted>"));
        assert!(!text.contains("abab"));
        assert!(text.contains("0x1234"));
    }

    #[test]
    fn test_role_capabilities() {
        assert!(DeviceRole::Leader.can_commission());
        assert!(DeviceRole::Router.can_commission());
        assert!(!DeviceRole::Child.can_commission());
        assert!(DeviceRole::Child.is_attached());
        assert!(!DeviceRole::Detached.is_attached());
    }
}
