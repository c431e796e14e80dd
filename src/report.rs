//! Flat key/value report records
//!
//! A report is an ordered list of `(key, decimal string)` pairs. Framing it
//! (JSON, CSV, server-sent events, a display) is left to the transport.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use nalgebra::{UnitQuaternion, Vector3};

use crate::types::{MargSample, Orientation};

/// Ordered report record
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Report {
    fields: Vec<(&'static str, String)>,
}

impl Report {
    /// Rendered value for `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value.as_str())
    }

    /// Fields in encoding order
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.fields.iter().map(|(name, value)| (*name, value.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|(name, _)| *name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn push(&mut self, key: &'static str, value: f32) {
        self.fields.push((key, value.to_string()));
    }

    fn push_vector(&mut self, keys: [&'static str; 3], vector: Vector3<f32>) {
        for (key, value) in keys.into_iter().zip(vector.iter()) {
            self.push(key, *value);
        }
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Report {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Builds [`Report`]s from a sample and an estimate
///
/// Key order: `gyroX gyroY gyroZ acclX acclY acclZ [magnX magnY magnZ]
/// tiltY tiltR tiltP [quatX quatY quatZ]`. Bracketed groups appear only when
/// the input carries them. Angles are in radians. Values use the shortest
/// decimal form that parses back to the same `f32`.
///
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use tilt_fusion::{MargSample, Orientation, ReportEncoder};
///
/// let sample = MargSample::new(Vector3::zeros(), Vector3::new(0.0, 0.0, 9.8));
/// let report = ReportEncoder::encode(&sample, &Orientation::new(0.25, 0.0, 0.0), None);
///
/// assert_eq!(report.get("acclZ"), Some("9.8"));
/// assert_eq!(report.get("tiltR"), Some("0.25"));
/// assert_eq!(report.get("magnX"), None);
/// ```
pub struct ReportEncoder;

impl ReportEncoder {
    pub fn encode(
        sample: &MargSample,
        orientation: &Orientation,
        quaternion: Option<&UnitQuaternion<f32>>,
    ) -> Report {
        let mut report = Report {
            fields: Vec::with_capacity(15),
        };

        report.push_vector(["gyroX", "gyroY", "gyroZ"], sample.gyroscope);
        report.push_vector(["acclX", "acclY", "acclZ"], sample.accelerometer);
        if let Some(field) = sample.magnetometer {
            report.push_vector(["magnX", "magnY", "magnZ"], field);
        }

        report.push("tiltY", orientation.yaw);
        report.push("tiltR", orientation.roll);
        report.push("tiltP", orientation.pitch);

        if let Some(q) = quaternion {
            report.push_vector(["quatX", "quatY", "quatZ"], q.imag());
        }

        report
    }
}
