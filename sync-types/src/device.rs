//! Paired device records.

use serde::{Deserialize, Serialize};

use crate::DeviceId;

/// Device description as reported by the sync service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// The device identifier.
    pub device_id: DeviceId,
    /// Human-readable device name.
    pub name: String,
}

/// A trusted device as shown in the local device list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// The device identifier.
    pub device_id: DeviceId,
    /// Human-readable device name.
    pub name: String,
    /// Whether this record describes the device we are running on.
    pub is_current: bool,
}

impl DeviceRecord {
    /// Build a record from service data, marking it current if it matches `current`.
    pub fn from_info(info: DeviceInfo, current: &DeviceId) -> Self {
        Self {
            is_current: info.device_id == *current,
            device_id: info.device_id,
            name: info.name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_marks_current_device() {
        let me = DeviceId::random();
        let other = DeviceId::random();

        let mine = DeviceRecord::from_info(
            DeviceInfo {
                device_id: me,
                name: "Laptop".into(),
            },
            &me,
        );
        let theirs = DeviceRecord::from_info(
            DeviceInfo {
                device_id: other,
                name: "Tablet".into(),
            },
            &me,
        );

        assert!(mine.is_current);
        assert!(!theirs.is_current);
        assert_eq!(theirs.name, "Tablet");
    }

    #[test]
    fn record_serializes_to_json() {
        let id = DeviceId::random();
        let record = DeviceRecord {
            device_id: id,
            name: "Desk".into(),
            is_current: true,
        };
        let json = serde_json::to_string(&record).unwrap();
        let restored: DeviceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, restored);
    }
}
