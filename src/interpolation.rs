// Piecewise-linear input shaping for joystick axes
//
// Points must be sorted by input value. Inputs outside the table clamp to the
// first / last output, so a table with a flat segment around zero acts as a
// dead band.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapPoint {
    pub input: f64,
    pub output: f64,
}

impl MapPoint {
    pub const fn new(input: f64, output: f64) -> Self {
        Self { input, output }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InterpolationError {
    #[error("Interpolation map needs at least one point")]
    Empty,

    #[error("Interpolation map inputs must be increasing (index {0})")]
    Unsorted(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<MapPoint>", into = "Vec<MapPoint>")]
pub struct InterpolationMap {
    points: Vec<MapPoint>,
}

impl InterpolationMap {
    pub fn new(points: Vec<MapPoint>) -> Result<Self, InterpolationError> {
        if points.is_empty() {
            return Err(InterpolationError::Empty);
        }
        if let Some(i) = points.windows(2).position(|w| w[1].input <= w[0].input) {
            return Err(InterpolationError::Unsorted(i + 1));
        }
        Ok(Self { points })
    }

    pub fn map(&self, input: f64) -> f64 {
        // Non-empty is checked at construction
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];

        if input.is_nan() {
            return 0.0;
        }
        if input <= first.input {
            return first.output;
        }
        if input >= last.input {
            return last.output;
        }

        for w in self.points.windows(2) {
            let (a, b) = (w[0], w[1]);
            if input <= b.input {
                let t = (input - a.input) / (b.input - a.input);
                return a.output + t * (b.output - a.output);
            }
        }
        last.output
    }
}

impl TryFrom<Vec<MapPoint>> for InterpolationMap {
    type Error = InterpolationError;

    fn try_from(points: Vec<MapPoint>) -> Result<Self, Self::Error> {
        Self::new(points)
    }
}

impl From<InterpolationMap> for Vec<MapPoint> {
    fn from(map: InterpolationMap) -> Self {
        map.points
    }
}
