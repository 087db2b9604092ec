//! Keeps each Target's cached alt/az, observability window, and
//! meridian-flip instant current by calling into `vesper-astro`'s
//! trigonometry, so `Sequence::next_executable_target`'s astro
//! window check sees live data instead of whatever a loaded
//! sequence file happened to snapshot.
//!
//! `vesper-core` never depends on `vesper-astro` directly (the trig crate
//! sits above it); this module is the seam that ties the two together for a
//! live run, in the same spirit as `dispatch_adapter` bridging
//! `vesper-plugin` into `vesper-core`'s `CommandDispatch` trait.

use std::time::Duration;

use chrono::{DateTime, Utc};

use vesper_astro::AstroScheduler;
use vesper_config::ConfigStore;
use vesper_core::{ObserverLocation, Sequence};

/// How often the engine loop recomputes astro context; cheap closed-form
/// trigonometry with no I/O, so this just bounds how stale `current_alt_az`
/// is allowed to get between scheduling decisions.
pub const ASTRO_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Reads `site/location/{latitude,longitude}` out of a loaded config tree
/// `None` if either key
/// is absent or not numeric; callers should treat that as "no astro
/// scheduling configured" rather than an error.
pub fn observer_location_from_config(config: &ConfigStore) -> Option<ObserverLocation> {
    let latitude_deg = config.get("site/location/latitude")?.as_f64()?;
    let longitude_deg = config.get("site/location/longitude")?.as_f64()?;
    Some(ObserverLocation {
        latitude_deg,
        longitude_deg,
    })
}

/// Recomputes `current_alt_az`, `observability`, and `meridian_flip_at` for
/// every Target that carries an astro context. Targets with none are left
/// alone; `Sequence::next_executable_target` treats that as "no window
/// constraint" already.
pub fn refresh_targets(sequence: &Sequence, scheduler: &AstroScheduler, now: DateTime<Utc>) {
    for target in sequence.targets().iter() {
        target.with_astro_context_mut(|ctx| {
            ctx.current_alt_az = Some(scheduler.alt_az(ctx.coords, now));
            ctx.observability = scheduler.observability_window(ctx.coords, ctx.min_altitude_deg, now);
            ctx.meridian_flip_at = scheduler.meridian_flip_at(ctx.coords, now);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vesper_core::{AstroContext, EquatorialCoords};

    #[test]
    fn reads_location_from_config_keys() {
        let config = ConfigStore::new();
        config.set("site/location/latitude", serde_json::json!(45.0)).unwrap();
        config.set("site/location/longitude", serde_json::json!(-71.0)).unwrap();

        let location = observer_location_from_config(&config).unwrap();
        assert_eq!(location.latitude_deg, 45.0);
        assert_eq!(location.longitude_deg, -71.0);
    }

    #[test]
    fn missing_location_keys_yield_none() {
        let config = ConfigStore::new();
        assert!(observer_location_from_config(&config).is_none());
    }

    #[test]
    fn refresh_populates_alt_az_and_window_for_targets_with_astro_context() {
        let sequence = Sequence::new();
        let target = Arc::new(vesper_core::Target::new("polaris-ish"));
        target.set_astro_context(AstroContext::new(
            EquatorialCoords { ra_hours: 0.0, dec_deg: 89.0 },
            40.0,
        ));
        sequence.add_target(target.clone());

        let scheduler = AstroScheduler::new(ObserverLocation {
            latitude_deg: 45.0,
            longitude_deg: 0.0,
        });
        refresh_targets(&sequence, &scheduler, Utc::now());

        assert!(target.with_astro_context(|ctx| ctx.current_alt_az.is_some()).unwrap());
        assert!(target.with_astro_context(|ctx| !ctx.observability.is_empty()).unwrap());
    }

    #[test]
    fn refresh_leaves_targets_without_astro_context_untouched() {
        let sequence = Sequence::new();
        let target = Arc::new(vesper_core::Target::new("no-astro"));
        sequence.add_target(target.clone());

        let scheduler = AstroScheduler::new(ObserverLocation {
            latitude_deg: 45.0,
            longitude_deg: 0.0,
        });
        refresh_targets(&sequence, &scheduler, Utc::now());

        assert!(target.astro_snapshot().is_none());
    }
}
