use chrono::{DateTime, SubsecRound, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use super::sample::TelemetrySample;

const POSITION_JITTER_DEG: f64 = 0.00004;
const ALTITUDE_JITTER_M: f64 = 0.35;
const SPEED_JITTER_M_S: f64 = 0.1;
const HEADING_STEP_DEG: i32 = 2;
const BATTERY_DRAIN_PER_STEP: f64 = 0.03;

const START_ALTITUDE_M: f64 = 80.0;
const START_SPEED_M_S: f64 = 7.5;
const START_HEADING_DEG: f64 = 270.0;
const START_BATTERY: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl Default for GeoPoint {
    fn default() -> Self {
        Self {
            lat: 37.5665,
            lon: 126.9780,
        }
    }
}

/// Bounded random walk over the drone state.
pub struct Simulator<R = StdRng> {
    origin: GeoPoint,
    rng: R,
}

impl Simulator<StdRng> {
    pub fn new(origin: GeoPoint) -> Self {
        Self::with_rng(origin, StdRng::from_entropy())
    }

    pub fn seeded(origin: GeoPoint, seed: u64) -> Self {
        Self::with_rng(origin, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> Simulator<R> {
    pub fn with_rng(origin: GeoPoint, rng: R) -> Self {
        Self { origin, rng }
    }

    /// Fixed starting state at the configured origin.
    pub fn init(&self) -> TelemetrySample {
        TelemetrySample {
            id: 0,
            lat: self.origin.lat,
            lon: self.origin.lon,
            altitude: START_ALTITUDE_M,
            speed: START_SPEED_M_S,
            heading: START_HEADING_DEG,
            battery: START_BATTERY,
            fix: true,
            timestamp: Utc::now().trunc_subsecs(6),
        }
    }

    pub fn step(&mut self, previous: &TelemetrySample) -> TelemetrySample {
        self.step_at(previous, Utc::now())
    }

    pub fn step_at(&mut self, previous: &TelemetrySample, now: DateTime<Utc>) -> TelemetrySample {
        let heading_delta = self.rng.gen_range(-HEADING_STEP_DEG..=HEADING_STEP_DEG);

        TelemetrySample {
            id: previous.id,
            lat: previous.lat + self.noise(POSITION_JITTER_DEG),
            lon: previous.lon + self.noise(POSITION_JITTER_DEG),
            altitude: (previous.altitude + self.noise(ALTITUDE_JITTER_M)).max(0.0),
            speed: (previous.speed + self.noise(SPEED_JITTER_M_S)).max(0.0),
            heading: (previous.heading + f64::from(heading_delta)).rem_euclid(360.0),
            battery: (previous.battery - BATTERY_DRAIN_PER_STEP).max(0.0),
            fix: previous.fix,
            timestamp: now.trunc_subsecs(6),
        }
    }

    fn noise(&mut self, amplitude: f64) -> f64 {
        self.rng.gen_range(-amplitude..=amplitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_anchored_at_origin() {
        let origin = GeoPoint { lat: 1.5, lon: -2.5 };
        let start = Simulator::seeded(origin, 1).init();
        assert_eq!(start.lat, 1.5);
        assert_eq!(start.lon, -2.5);
        assert_eq!(start.altitude, 80.0);
        assert_eq!(start.speed, 7.5);
        assert_eq!(start.heading, 270.0);
        assert_eq!(start.battery, 100.0);
        assert!(start.fix);
    }

    #[test]
    fn ten_steps_drain_battery_to_99_7() {
        let mut sim = Simulator::seeded(GeoPoint::default(), 7);
        let mut state = sim.init();
        for _ in 0..10 {
            state = sim.step(&state);
        }
        assert!((state.battery - 99.7).abs() < 1e-9, "battery = {}", state.battery);
    }

    #[test]
    fn walk_stays_within_bounds() {
        let mut sim = Simulator::seeded(GeoPoint::default(), 42);
        let mut state = sim.init();
        for _ in 0..5_000 {
            let next = sim.step(&state);
            assert!(next.battery <= state.battery);
            assert!((0.0..=100.0).contains(&next.battery));
            assert!((0.0..360.0).contains(&next.heading), "heading = {}", next.heading);
            assert!(next.altitude >= 0.0);
            assert!(next.speed >= 0.0);
            assert!((next.lat - state.lat).abs() <= POSITION_JITTER_DEG);
            assert!((next.lon - state.lon).abs() <= POSITION_JITTER_DEG);
            assert!((next.altitude - state.altitude).abs() <= ALTITUDE_JITTER_M + 1e-12);
            let turn = (next.heading - state.heading).rem_euclid(360.0);
            assert!([0.0, 1.0, 2.0, 358.0, 359.0].contains(&turn), "turn = {}", turn);
            state = next;
        }
        // 5000 * 0.03 drains a full battery, which must floor at zero
        assert_eq!(state.battery, 0.0);
    }

    #[test]
    fn heading_wraps_below_zero() {
        let mut sim = Simulator::seeded(GeoPoint::default(), 3);
        let mut state = sim.init();
        state.heading = 0.0;
        for _ in 0..200 {
            state = sim.step(&state);
            assert!((0.0..360.0).contains(&state.heading));
        }
    }

    #[test]
    fn step_keeps_identifier_and_uses_given_clock() {
        let mut sim = Simulator::seeded(GeoPoint::default(), 9);
        let previous = sim.init().with_id(11);
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let next = sim.step_at(&previous, now);
        assert_eq!(next.id, 11);
        assert_eq!(next.timestamp, now);
    }
}
