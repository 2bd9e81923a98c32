use log::debug;

/// Root-mean-square energy of a sample buffer, the loudness proxy used for
/// silence detection. An empty buffer reads as 0.0.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Verdict for one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateVerdict {
    pub is_silent: bool,
    /// True when the classification differs from the previous chunk's (or
    /// this is the first chunk assessed). Consumers emit their one
    /// state-changed notification off this bit.
    pub changed: bool,
}

/// Energy-threshold silence gate. Stateless per chunk apart from the one
/// bit of last-state used for change detection.
pub struct EnergyGate {
    threshold: f32,
    last_silent: Option<bool>,
}

impl EnergyGate {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            last_silent: None,
        }
    }

    pub fn assess(&mut self, samples: &[f32]) -> GateVerdict {
        let level = rms(samples);
        let is_silent = level < self.threshold;
        let changed = self.last_silent != Some(is_silent);
        self.last_silent = Some(is_silent);

        if changed {
            debug!(
                "Silence state changed: {} (rms {:.5})",
                if is_silent { "silent" } else { "active" },
                level
            );
        }

        GateVerdict { is_silent, changed }
    }

    /// Forgets the last classification so the next chunk re-announces the
    /// state. Called when a new recording cycle begins.
    pub fn reset(&mut self) {
        self.last_silent = None;
    }
}
