//! Fault classification seam
//!
//! The decision-tree inference itself lives outside this crate; nodes only
//! see it as a pure function from four readings to a class index. This module
//! names the classes, carries the feature scaler the exported models expect,
//! and defines the trait a model implements.

use std::fmt;

use crate::domain::ReadingRecord;

/// Operating states the exported models distinguish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultClass {
    Normal = 0,
    OpenCircuit = 1,
    PartialShading = 2,
    ShortCircuit = 3,
}

impl FaultClass {
    pub const ALL: [FaultClass; 4] = [
        FaultClass::Normal,
        FaultClass::OpenCircuit,
        FaultClass::PartialShading,
        FaultClass::ShortCircuit,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            FaultClass::Normal => "Normal",
            FaultClass::OpenCircuit => "Open_Circuit",
            FaultClass::PartialShading => "Partial_Shading",
            FaultClass::ShortCircuit => "Short_Circuit",
        }
    }

    pub fn is_fault(&self) -> bool {
        *self != FaultClass::Normal
    }
}

impl fmt::Display for FaultClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Model input order: voltage, current, temperature, light intensity
pub fn features(reading: &ReadingRecord) -> [f32; 4] {
    [
        reading.voltage,
        reading.current,
        reading.dht_temperature,
        reading.light_raw as f32,
    ]
}

/// Per-feature standardisation, `(x - mean) / std`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureScaler {
    pub mean: [f32; 4],
    pub std: [f32; 4],
}

impl FeatureScaler {
    /// Parameters the shipped random-forest export was trained with
    pub const TRAINED: FeatureScaler = FeatureScaler {
        mean: [13.530488, 3.746800, 43.080350, 900.020213],
        std: [8.256446, 3.049463, 14.431640, 169.050730],
    };

    pub fn scale(&self, raw: &[f32; 4]) -> [f32; 4] {
        let mut out = [0.0; 4];
        for i in 0..4 {
            out[i] = if self.std[i] == 0.0 {
                0.0
            } else {
                (raw[i] - self.mean[i]) / self.std[i]
            };
        }
        out
    }
}

/// A trained model: four standardised features in, one class index out.
pub trait FaultClassifier: Send + Sync {
    fn predict(&self, scaled: &[f32; 4]) -> usize;

    /// Scaler the model was trained behind
    fn scaler(&self) -> &FeatureScaler {
        &FeatureScaler::TRAINED
    }

    /// Class for a reading; `None` if the model returns an index it should not.
    fn classify(&self, reading: &ReadingRecord) -> Option<FaultClass> {
        let scaled = self.scaler().scale(&features(reading));
        FaultClass::from_index(self.predict(&scaled))
    }
}
