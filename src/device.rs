//! Identity this device presents to its peer
//!
//! The id is regenerated every session; only the name and class come from
//! configuration.

use uuid::Uuid;

/// Capabilities announced in `device_info`
pub const DEFAULT_CAPABILITIES: &[&str] = &[
    "clipboard_sync",
    "text",
    "url",
    "code",
    "file_reference",
    "image_reference",
];

/// Device class announced when none is configured
pub const DEFAULT_DEVICE_TYPE: &str = "desktop";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub device_name: String,
    pub device_type: String,
    pub capabilities: Vec<String>,
}

impl DeviceIdentity {
    /// Fresh identity with a new random id
    pub fn generate(device_name: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            device_id: Uuid::new_v4().to_string(),
            device_name: device_name.into(),
            device_type: device_type.into(),
            capabilities: DEFAULT_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn from_config(config: &crate::Config) -> Self {
        Self::generate(config.device_name.clone(), config.device_type.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_regenerated() {
        let a = DeviceIdentity::generate("laptop", "desktop");
        let b = DeviceIdentity::generate("laptop", "desktop");
        assert_ne!(a.device_id, b.device_id);
        assert_eq!(a.device_name, b.device_name);
        assert!(a.capabilities.contains(&"clipboard_sync".to_string()));
    }

    #[test]
    fn test_identity_from_config() {
        let mut config = crate::Config::default();
        config.device_name = "kitchen-pc".to_string();
        config.device_type = "tablet".to_string();

        let identity = DeviceIdentity::from_config(&config);
        assert_eq!(identity.device_name, "kitchen-pc");
        assert_eq!(identity.device_type, "tablet");
        assert!(Uuid::parse_str(&identity.device_id).is_ok());
    }
}
