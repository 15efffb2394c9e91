use serde::{Deserialize, Serialize};

/// Number of elements in a face descriptor.
pub const DESCRIPTOR_DIM: usize = 128;

/// Bounding box for a detected face, in source frame pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;

        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Face descriptor produced by the recognition model.
///
/// The values are opaque to the rest of the system; descriptors are only
/// ever compared by Euclidean distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor(pub Vec<f32>);

impl Descriptor {
    pub fn values(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Euclidean distance between two descriptors.
    ///
    /// Descriptors of different lengths are compared over the shared prefix.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One face found in a frame.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub bounding_box: BoundingBox,
    /// Reserved for five-point landmarks. The bundled detectors do not
    /// emit them, so this is always `None` today.
    pub landmarks: Option<[(f32, f32); 5]>,
    pub descriptor: Descriptor,
}

/// A registered member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    pub role_label: String,
    pub descriptor: Descriptor,
    pub registered_at_epoch_millis: i64,
}

/// Check-in classification relative to the 09:00 cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceStatus {
    #[serde(rename = "On Time")]
    OnTime,
    #[serde(rename = "Late")]
    Late,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::OnTime => "On Time",
            AttendanceStatus::Late => "Late",
        }
    }
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logged check-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub identity_id: String,
    /// Copy of the identity's display name at check-in time.
    pub identity_name: String,
    pub timestamp_epoch_millis: i64,
    pub status: AttendanceStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Descriptor(vec![0.1, 0.2, 0.3]);
        assert!(a.euclidean_distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_known_value() {
        let a = Descriptor(vec![0.0, 0.0]);
        let b = Descriptor(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial_overlap() {
        let a = BoundingBox { x: 0.0, y: 0.0, width: 10.0, height: 10.0, confidence: 1.0 };
        let b = BoundingBox { x: 5.0, y: 0.0, width: 10.0, height: 10.0, confidence: 1.0 };
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = BoundingBox { x: 0.0, y: 0.0, width: 10.0, height: 10.0, confidence: 1.0 };
        let b = BoundingBox { x: 20.0, y: 20.0, width: 10.0, height: 10.0, confidence: 1.0 };
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_status_serializes_as_display_string() {
        assert_eq!(serde_json::to_string(&AttendanceStatus::OnTime).unwrap(), "\"On Time\"");
        assert_eq!(serde_json::to_string(&AttendanceStatus::Late).unwrap(), "\"Late\"");
    }

    #[test]
    fn test_record_json_field_names() {
        let record = AttendanceRecord {
            id: "r1".into(),
            identity_id: "u1".into(),
            identity_name: "Alice".into(),
            timestamp_epoch_millis: 42,
            status: AttendanceStatus::Late,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["identityId"], "u1");
        assert_eq!(value["identityName"], "Alice");
        assert_eq!(value["timestampEpochMillis"], 42);
        assert_eq!(value["status"], "Late");
    }

    #[test]
    fn test_identity_descriptor_is_plain_array() {
        let identity = Identity {
            id: "u1".into(),
            display_name: "Alice".into(),
            role_label: "Member".into(),
            descriptor: Descriptor(vec![0.5, -0.25]),
            registered_at_epoch_millis: 0,
        };
        let value = serde_json::to_value(&identity).unwrap();
        assert_eq!(value["descriptor"], serde_json::json!([0.5, -0.25]));
        assert_eq!(value["displayName"], "Alice");
        assert_eq!(value["registeredAtEpochMillis"], 0);
    }
}
