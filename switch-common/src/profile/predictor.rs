use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{ProfileError, NO_PREDICTION};

/// Forecasts one observable of one algorithm from its observed history.
pub trait Predictor: Send {
    /// Subfolder the predictor's files are stored under.
    fn kind(&self) -> &'static str;

    fn update(&mut self, time_secs: i64, value: f64);

    /// Forecast `steps` updates ahead. `NO_PREDICTION` until the predictor has been fed.
    fn predict(&self, steps: u32) -> f64;

    fn store(&self, path: &Path, identifier: &str) -> Result<(), ProfileError>;

    fn load(&mut self, path: &Path, identifier: &str) -> Result<(), ProfileError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SmoothingPayload {
    identifier: String,
    alpha: f64,
    beta: f64,
    level: Option<f64>,
    trend: f64,
    last_update: Option<i64>,
}

/// Double exponential smoothing of level and trend.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothingPredictor {
    alpha: f64,
    beta: f64,
    level: Option<f64>,
    trend: f64,
    last_update: Option<i64>,
}

impl Default for SmoothingPredictor {
    fn default() -> Self {
        Self::new(0.5, 0.3)
    }
}

impl SmoothingPredictor {
    pub const KIND: &'static str = "smoothing";

    pub fn new(alpha: f64, beta: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            beta: beta.clamp(0.0, 1.0),
            level: None,
            trend: 0.0,
            last_update: None,
        }
    }

    pub fn is_primed(&self) -> bool {
        self.level.is_some()
    }
}

impl Predictor for SmoothingPredictor {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn update(&mut self, time_secs: i64, value: f64) {
        if matches!(self.last_update, Some(last) if time_secs < last) {
            return;
        }
        self.level = Some(match self.level {
            None => value,
            Some(level) => {
                let next = self.alpha * value + (1.0 - self.alpha) * (level + self.trend);
                self.trend = self.beta * (next - level) + (1.0 - self.beta) * self.trend;
                next
            }
        });
        self.last_update = Some(time_secs);
    }

    fn predict(&self, steps: u32) -> f64 {
        match self.level {
            Some(level) => level + f64::from(steps) * self.trend,
            None => NO_PREDICTION,
        }
    }

    fn store(&self, path: &Path, identifier: &str) -> Result<(), ProfileError> {
        let payload = SmoothingPayload {
            identifier: identifier.to_owned(),
            alpha: self.alpha,
            beta: self.beta,
            level: self.level,
            trend: self.trend,
            last_update: self.last_update,
        };
        let bytes = serde_json::to_vec_pretty(&payload).map_err(|e| ProfileError::Format {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        std::fs::write(path, bytes).map_err(|e| ProfileError::io(path, e))
    }

    fn load(&mut self, path: &Path, identifier: &str) -> Result<(), ProfileError> {
        let bytes = std::fs::read(path).map_err(|e| ProfileError::io(path, e))?;
        let payload: SmoothingPayload =
            serde_json::from_slice(&bytes).map_err(|e| ProfileError::Format {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if payload.identifier != identifier {
            return Err(ProfileError::Format {
                path: path.to_path_buf(),
                reason: format!(
                    "stored for {} rather than {}",
                    payload.identifier, identifier
                ),
            });
        }

        self.alpha = payload.alpha;
        self.beta = payload.beta;
        self.level = payload.level;
        self.trend = payload.trend;
        self.last_update = payload.last_update;
        Ok(())
    }
}
