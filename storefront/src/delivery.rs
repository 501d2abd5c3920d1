use std::sync::Arc;

use common::config::DeliveryConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    error::{Result, StoreError},
    geocoding::Geocoder,
    model::{Coordinates, DeliveryMethod},
};

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points.
pub fn haversine_km(a: Coordinates, b: Coordinates) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeliveryTier {
    pub max_distance_km: f64,
    pub fee: f64,
}

/// Ordered distance bands. Bounds strictly increase and fees never decrease,
/// so a longer distance can never price lower than a shorter one.
#[derive(Debug, Clone, PartialEq)]
pub struct TierTable {
    tiers: Vec<DeliveryTier>,
    per_km_rate: f64,
}

impl TierTable {
    pub fn new(tiers: Vec<DeliveryTier>, per_km_rate: f64) -> Result<Self> {
        if tiers.is_empty() {
            return Err(StoreError::Config("delivery tier table is empty".to_string()));
        }
        if !per_km_rate.is_finite() || per_km_rate < 0.0 {
            return Err(StoreError::Config(format!("invalid per-km rate {}", per_km_rate)));
        }
        for tier in &tiers {
            if !tier.max_distance_km.is_finite() || tier.max_distance_km < 0.0 {
                return Err(StoreError::Config(format!(
                    "invalid tier bound {}",
                    tier.max_distance_km
                )));
            }
            if !tier.fee.is_finite() || tier.fee < 0.0 {
                return Err(StoreError::Config(format!("invalid tier fee {}", tier.fee)));
            }
        }
        for pair in tiers.windows(2) {
            if pair[1].max_distance_km <= pair[0].max_distance_km {
                return Err(StoreError::Config(format!(
                    "tier bounds must strictly increase ({} then {})",
                    pair[0].max_distance_km, pair[1].max_distance_km
                )));
            }
            if pair[1].fee < pair[0].fee {
                return Err(StoreError::Config(format!(
                    "tier fees must not decrease ({} then {})",
                    pair[0].fee, pair[1].fee
                )));
            }
        }
        Ok(Self { tiers, per_km_rate })
    }

    pub fn tiers(&self) -> &[DeliveryTier] {
        &self.tiers
    }

    pub fn minimum_fee(&self) -> f64 {
        self.tiers[0].fee
    }

    /// Fee for a distance and the index of the tier that priced it
    /// (`None` once past the last band).
    pub fn fee_for(&self, distance_km: f64) -> (f64, Option<usize>) {
        if let Some(index) = self
            .tiers
            .iter()
            .position(|tier| distance_km <= tier.max_distance_km)
        {
            return (self.tiers[index].fee, Some(index));
        }

        let last_fee = self.tiers[self.tiers.len() - 1].fee;
        ((self.per_km_rate * distance_km).round().max(last_fee), None)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliverySettings {
    pub store: Coordinates,
    pub tiers: TierTable,
    pub free_delivery_threshold: f64,
}

impl DeliverySettings {
    pub fn from_config(config: &DeliveryConfig) -> Result<Self> {
        let store = Coordinates::new(config.store_latitude, config.store_longitude);
        if !store.is_valid() {
            return Err(StoreError::Config(format!("invalid store coordinate {:?}", store)));
        }
        let tiers = config
            .tiers
            .iter()
            .map(|t| DeliveryTier {
                max_distance_km: t.max_distance_km,
                fee: t.fee,
            })
            .collect();

        Ok(Self {
            store,
            tiers: TierTable::new(tiers, config.per_km_rate)?,
            free_delivery_threshold: config.free_delivery_threshold,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryQuote {
    pub fee: f64,
    pub distance_km: f64,
    pub free_delivery_applied: bool,
    pub tier: Option<usize>,
}

/// Prices delivery for a resolved customer point.
///
/// Pickup is always free. Otherwise a subtotal at or above the threshold is
/// free, and everything else pays its tier fee; a customer standing at the
/// store still pays the first tier.
pub fn quote(
    settings: &DeliverySettings,
    customer: Coordinates,
    subtotal: f64,
    method: DeliveryMethod,
) -> DeliveryQuote {
    if method == DeliveryMethod::Pickup {
        return DeliveryQuote {
            fee: 0.0,
            distance_km: 0.0,
            free_delivery_applied: false,
            tier: None,
        };
    }

    let distance_km = haversine_km(settings.store, customer);
    let (tier_fee, tier) = settings.tiers.fee_for(distance_km);
    let free = subtotal >= settings.free_delivery_threshold;

    DeliveryQuote {
        fee: if free { 0.0 } else { tier_fee },
        distance_km: (distance_km * 100.0).round() / 100.0,
        free_delivery_applied: free,
        tier,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CustomerLocation {
    Coordinates { latitude: f64, longitude: f64 },
    ManualAddress { address: String },
}

#[derive(Clone)]
pub struct DeliveryCalculator {
    settings: Arc<DeliverySettings>,
    geocoder: Arc<dyn Geocoder>,
}

impl DeliveryCalculator {
    pub fn new(settings: DeliverySettings, geocoder: Arc<dyn Geocoder>) -> Self {
        info!(
            store = ?settings.store,
            tiers = settings.tiers.tiers().len(),
            "Initializing delivery calculator"
        );
        Self {
            settings: Arc::new(settings),
            geocoder,
        }
    }

    pub fn settings(&self) -> &DeliverySettings {
        &self.settings
    }

    pub async fn resolve(&self, location: &CustomerLocation) -> Result<Coordinates> {
        match location {
            CustomerLocation::Coordinates { latitude, longitude } => {
                let point = Coordinates::new(*latitude, *longitude);
                if !point.is_valid() {
                    return Err(StoreError::LocationUnavailable(format!(
                        "coordinates out of range ({}, {})",
                        latitude, longitude
                    )));
                }
                Ok(point)
            }
            CustomerLocation::ManualAddress { address } => {
                let address = address.trim();
                if address.is_empty() {
                    return Err(StoreError::LocationUnavailable("address is empty".to_string()));
                }
                self.geocoder.resolve(address).await
            }
        }
    }

    /// Resolves the location (pickup needs none) and prices it.
    pub async fn quote(
        &self,
        location: Option<&CustomerLocation>,
        subtotal: f64,
        method: DeliveryMethod,
    ) -> Result<DeliveryQuote> {
        let customer = match (method, location) {
            (DeliveryMethod::Pickup, _) => self.settings.store,
            (DeliveryMethod::Delivery, Some(location)) => self.resolve(location).await?,
            (DeliveryMethod::Delivery, None) => {
                return Err(StoreError::invalid("delivery requires a customer location"));
            }
        };

        let quote = quote(&self.settings, customer, subtotal, method);
        debug!(
            fee = quote.fee,
            distance_km = quote.distance_km,
            free = quote.free_delivery_applied,
            "Computed delivery quote"
        );
        Ok(quote)
    }
}
