use std::sync::Arc;

use cad_protocol::RegionLayout;
use tracing::{debug, info, warn};

use super::{Channel, ChannelMode, MessageChannel, SharedMemoryChannel};
use crate::config::{SessionConfig, TransportPreference};
use crate::error::ChannelError;

/// Environment variable that denies shared memory to every session
pub const DISABLE_SHARED_MEMORY_ENV: &str = "CAD_NO_SHARED_MEMORY";

/// Result of probing whether shared memory may be used
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SharedMemoryCapability {
    Granted,
    Denied(String),
}

impl SharedMemoryCapability {
    /// Check the host environment
    pub fn detect() -> Self {
        match std::env::var(DISABLE_SHARED_MEMORY_ENV) {
            Ok(value) if value == "1" || value.eq_ignore_ascii_case("true") => {
                SharedMemoryCapability::Denied(format!("{} is set", DISABLE_SHARED_MEMORY_ENV))
            }
            _ => SharedMemoryCapability::Granted,
        }
    }
}

/// Subset of the session configuration the factory needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSettings {
    pub transport: TransportPreference,
    pub max_commands: usize,
    pub input_slot_bytes: usize,
    pub draw_slot_bytes: usize,
}

impl From<&SessionConfig> for ChannelSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            transport: config.transport,
            max_commands: config.max_commands(),
            input_slot_bytes: config.input_slot_bytes.as_bytes(),
            draw_slot_bytes: config.draw_slot_bytes.as_bytes(),
        }
    }
}

/// Builds the channel for a session, falling back to messages when needed
pub struct ChannelFactory {
    settings: ChannelSettings,
    capability: SharedMemoryCapability,
}

impl ChannelFactory {
    pub fn new(settings: ChannelSettings) -> Self {
        Self {
            settings,
            capability: SharedMemoryCapability::detect(),
        }
    }

    /// Override the detected capability
    pub fn with_capability(mut self, capability: SharedMemoryCapability) -> Self {
        self.capability = capability;
        self
    }

    fn try_shared(&self) -> Result<SharedMemoryChannel, ChannelError> {
        if let SharedMemoryCapability::Denied(reason) = &self.capability {
            return Err(ChannelError::Unavailable(reason.clone()));
        }
        SharedMemoryChannel::new(
            self.settings.input_slot_bytes,
            self.settings.draw_slot_bytes,
            self.settings.max_commands,
        )
    }

    fn message(&self) -> MessageChannel {
        // Same byte budget as a shared draw slot so overflow is identical.
        let capacity = RegionLayout::new(self.settings.input_slot_bytes, self.settings.draw_slot_bytes).draw[0]
            .payload_capacity();
        MessageChannel::new(self.settings.max_commands, capacity)
    }

    /// Build the channel and report which transport was selected
    pub fn create(&self) -> (Arc<dyn Channel>, ChannelMode) {
        let channel: Arc<dyn Channel> = match self.settings.transport {
            TransportPreference::Message => {
                debug!("Message transport requested by configuration");
                Arc::new(self.message())
            }
            preference => match self.try_shared() {
                Ok(shared) => Arc::new(shared),
                Err(e) => {
                    if preference == TransportPreference::Shared {
                        warn!("Shared memory transport requested but unavailable ({}), falling back to messages", e);
                    } else {
                        debug!("Shared memory unavailable ({}), using message transport", e);
                    }
                    Arc::new(self.message())
                }
            },
        };

        let mode = channel.mode();
        info!("Channel transport: {}", mode);
        (channel, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(transport: TransportPreference) -> ChannelSettings {
        ChannelSettings {
            transport,
            max_commands: 128,
            input_slot_bytes: 8 * 1024,
            draw_slot_bytes: 16 * 1024,
        }
    }

    #[test]
    fn test_auto_prefers_shared_memory() {
        let factory = ChannelFactory::new(settings(TransportPreference::Auto))
            .with_capability(SharedMemoryCapability::Granted);
        let (channel, mode) = factory.create();
        assert_eq!(mode, ChannelMode::SharedMemory);
        assert_eq!(channel.mode(), mode);
    }

    #[test]
    fn test_denied_capability_falls_back() {
        for transport in [TransportPreference::Auto, TransportPreference::Shared] {
            let factory = ChannelFactory::new(settings(transport))
                .with_capability(SharedMemoryCapability::Denied("test".into()));
            let (_, mode) = factory.create();
            assert_eq!(mode, ChannelMode::Message);
        }
    }

    #[test]
    fn test_allocation_failure_falls_back() {
        let mut s = settings(TransportPreference::Shared);
        s.draw_slot_bytes = usize::MAX / 4;
        let factory = ChannelFactory::new(s).with_capability(SharedMemoryCapability::Granted);
        let (_, mode) = factory.create();
        assert_eq!(mode, ChannelMode::Message);
    }

    #[test]
    fn test_message_preference_is_honored() {
        let factory = ChannelFactory::new(settings(TransportPreference::Message))
            .with_capability(SharedMemoryCapability::Granted);
        assert_eq!(factory.create().1, ChannelMode::Message);
    }
}
