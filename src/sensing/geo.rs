use crate::models::GeoFix;

const EARTH_RADIUS_KM: f64 = 6_371.0;
/// Consecutive fixes further apart than this are treated as a GPS jump.
pub const MAX_FIX_DELTA_KM: f64 = 0.1;

/// Great-circle distance in kilometres on a spherical Earth.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS_KM * c
}

/// Sums fix-to-fix distance while dropping implausible jumps.
#[derive(Debug, Clone, Default)]
pub struct GeoDistanceAccumulator {
    reference: Option<GeoFix>,
    total_km: f64,
    accepted: u32,
    rejected: u32,
}

impl GeoDistanceAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fix; returns the distance it added (0 when rejected).
    ///
    /// The reference moves to every valid fix, including rejected jumps.
    pub fn on_fix(&mut self, fix: GeoFix) -> f64 {
        if !fix.is_valid() {
            return 0.0;
        }

        let added = match self.reference {
            None => 0.0,
            Some(prev) => {
                let delta = haversine_km(prev.lat, prev.lon, fix.lat, fix.lon);
                if delta < MAX_FIX_DELTA_KM {
                    self.accepted += 1;
                    delta
                } else {
                    self.rejected += 1;
                    0.0
                }
            }
        };

        self.total_km += added;
        self.reference = Some(fix);
        added
    }

    pub fn cumulative_km(&self) -> f64 {
        self.total_km
    }

    pub fn rejected_jumps(&self) -> u32 {
        self.rejected
    }

    pub fn accepted_fixes(&self) -> u32 {
        self.accepted
    }

    /// Start a new day's total, keeping the reference position.
    pub fn reset_total(&mut self) {
        self.total_km = 0.0;
        self.accepted = 0;
        self.rejected = 0;
    }
}
