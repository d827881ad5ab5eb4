use chrono::Utc;
use proptest::prelude::*;
use proptest::test_runner::Config;

use kumbhnav::advisor::assess_with;
use kumbhnav::crowd::CrowdModel;
use kumbhnav::distance::haversine_m;
use kumbhnav::models::types::{AdvisorCfg, Coord, CrowdSample};
use kumbhnav::registry::Registry;

fn coord() -> impl Strategy<Value = Coord> {
    (-90.0f64..=90.0, -180.0f64..=180.0).prop_map(|(lat, lon)| Coord { lat, lon })
}

/// Points around the venue, where the built-in registry lives.
fn venue_coord() -> impl Strategy<Value = Coord> {
    (23.12f64..23.19, 75.76f64..75.80).prop_map(|(lat, lon)| Coord { lat, lon })
}

fn samples(area: BoxedStrategy<Coord>) -> impl Strategy<Value = Vec<CrowdSample>> {
    prop::collection::vec((area, 0.0f64..=1.0), 0..40).prop_map(|v| {
        let now = Utc::now();
        v.into_iter().map(|(c, x)| CrowdSample::new(c, x, now).unwrap()).collect()
    })
}

proptest! {
    #![proptest_config(Config::with_cases(256))]

    #[test]
    fn haversine_is_symmetric_and_zero_on_self(a in coord(), b in coord()) {
        let ab = haversine_m(a, b);
        prop_assert!((ab - haversine_m(b, a)).abs() < 1e-6);
        prop_assert_eq!(haversine_m(a, a), 0.0);
        prop_assert!(ab >= 0.0 && ab <= std::f64::consts::PI * 6_371_000.0 + 1e-6);
    }

    #[test]
    fn density_stays_in_unit_range(
        s in samples(coord().boxed()),
        p in coord(),
        radius in 0.0f64..5_000_000.0,
    ) {
        let m = CrowdModel::new(s);
        let d = m.density_near(p, radius);
        prop_assert!((0.0..=1.0).contains(&d));
    }

    #[test]
    fn alternatives_exclude_self_and_crowded(s in samples(venue_coord().boxed()), pick in 0usize..11) {
        let m = CrowdModel::new(s);
        let reg = Registry::builtin();
        let cfg = AdvisorCfg::default();
        let dest = reg.iter().nth(pick % reg.len()).unwrap();
        let a = assess_with(&m, &reg, &cfg, dest);
        prop_assert!((0.0..=1.0).contains(&a.average_intensity));
        prop_assert!(a.alternatives.len() <= cfg.max_alternatives);
        if !a.risk.is_elevated() {
            prop_assert!(a.alternatives.is_empty());
        }
        for alt in &a.alternatives {
            prop_assert_ne!(&alt.id, &dest.id);
            prop_assert!(!assess_with(&m, &reg, &cfg, alt).risk.is_elevated());
        }
    }
}
