use rust_decimal::Decimal;

use crate::domain::quote::{Bound, UsdRange};
use crate::domain::session::ShippingProfile;

pub const FREIGHT_PCT_MIN: Decimal = Decimal::from_parts(18, 0, 0, false, 0);
pub const FREIGHT_PCT_MAX: Decimal = Decimal::from_parts(42, 0, 0, false, 0);

/// Absolute clamp applied to the lower freight bound.
pub const FREIGHT_MIN_BOUND_FLOOR: Decimal = Decimal::from_parts(250, 0, 0, false, 0);
pub const FREIGHT_MIN_BOUND_CEILING: Decimal = Decimal::from_parts(25_000, 0, 0, false, 0);
/// Absolute clamp applied to the upper freight bound.
pub const FREIGHT_MAX_BOUND_FLOOR: Decimal = Decimal::from_parts(450, 0, 0, false, 0);
pub const FREIGHT_MAX_BOUND_CEILING: Decimal = Decimal::from_parts(60_000, 0, 0, false, 0);

/// Per-bound freight multiplier for a shipping profile. Unknown profiles ship as medium.
pub fn profile_multiplier(profile: Option<ShippingProfile>, bound: Bound) -> Decimal {
    match (profile.unwrap_or(ShippingProfile::Medium), bound) {
        (ShippingProfile::Light, Bound::Min) => Decimal::new(75, 2),
        (ShippingProfile::Light, Bound::Max) => Decimal::new(85, 2),
        (ShippingProfile::Medium, _) => Decimal::ONE,
        (ShippingProfile::Heavy, Bound::Min) => Decimal::new(115, 2),
        (ShippingProfile::Heavy, Bound::Max) => Decimal::new(135, 2),
    }
}

/// Freight as a share of the unit FOB, clamped per bound, then scaled by the shipping
/// profile. The clamps keep one-unit and bulk shipments inside plausible absolute bands.
pub fn estimate(unit_fob: UsdRange, profile: Option<ShippingProfile>) -> UsdRange {
    let raw = unit_fob.percent(FREIGHT_PCT_MIN, FREIGHT_PCT_MAX);
    let clamped = raw.map_bounds(|value, bound| match bound {
        Bound::Min => value.clamp(FREIGHT_MIN_BOUND_FLOOR, FREIGHT_MIN_BOUND_CEILING),
        Bound::Max => value.clamp(FREIGHT_MAX_BOUND_FLOOR, FREIGHT_MAX_BOUND_CEILING),
    });
    let scaled = clamped.map_bounds(|value, bound| value * profile_multiplier(profile, bound));
    UsdRange::new(scaled.min, scaled.max)
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::estimate;
    use crate::domain::quote::UsdRange;
    use crate::domain::session::ShippingProfile;

    #[test]
    fn applies_percentage_band_inside_clamps() {
        let freight = estimate(UsdRange::point(Decimal::new(10_000, 0)), None);
        assert_eq!(freight.min, Decimal::new(1_800, 0));
        assert_eq!(freight.max, Decimal::new(4_200, 0));
    }

    #[test]
    fn small_shipments_hit_the_floor_and_large_ones_the_ceiling() {
        let small = estimate(UsdRange::point(Decimal::new(500, 0)), None);
        assert_eq!(small.min, Decimal::new(250, 0));
        assert_eq!(small.max, Decimal::new(450, 0));

        let large = estimate(UsdRange::point(Decimal::new(1_000_000, 0)), None);
        assert_eq!(large.min, Decimal::new(25_000, 0));
        assert_eq!(large.max, Decimal::new(60_000, 0));
    }

    #[test]
    fn heavy_profile_scales_each_bound() {
        let freight = estimate(UsdRange::point(Decimal::new(10_000, 0)), Some(ShippingProfile::Heavy));
        assert_eq!(freight.min, Decimal::new(2_070, 0));
        assert_eq!(freight.max, Decimal::new(5_670, 0));
    }
}
