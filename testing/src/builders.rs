//! Entity builders with sensible defaults for scenario setup.

use dispatch_core::{GeoPoint, Money, ProviderId, ProviderSummary, ServiceTag};

/// Builder for [`ProviderSummary`] test fixtures.
///
/// Defaults: verified, available, offers "Plumbing" at 600/hour, located
/// in central Bangalore.
#[derive(Debug, Clone)]
pub struct ProviderBuilder {
    summary: ProviderSummary,
}

impl ProviderBuilder {
    /// Creates a builder with the default provider.
    #[must_use]
    pub fn new() -> Self {
        Self {
            summary: ProviderSummary {
                id: ProviderId::new(),
                hourly_rate: Money::from_major(600),
                services: vec![ServiceTag::new("Plumbing")],
                current_location: GeoPoint::new(77.5946, 12.9716),
                is_verified: true,
                is_available: true,
                distance_m: None,
            },
        }
    }

    /// Sets the provider id.
    #[must_use]
    pub const fn id(mut self, id: ProviderId) -> Self {
        self.summary.id = id;
        self
    }

    /// Sets the hourly rate.
    #[must_use]
    pub const fn hourly_rate(mut self, rate: Money) -> Self {
        self.summary.hourly_rate = rate;
        self
    }

    /// Replaces the offered services with a single tag.
    #[must_use]
    pub fn service(mut self, tag: impl Into<String>) -> Self {
        self.summary.services = vec![ServiceTag::new(tag)];
        self
    }

    /// Sets the last reported location.
    #[must_use]
    pub const fn location(mut self, point: GeoPoint) -> Self {
        self.summary.current_location = point;
        self
    }

    /// Sets the verification flag.
    #[must_use]
    pub const fn verified(mut self, verified: bool) -> Self {
        self.summary.is_verified = verified;
        self
    }

    /// Sets the advisory availability flag.
    #[must_use]
    pub const fn available(mut self, available: bool) -> Self {
        self.summary.is_available = available;
        self
    }

    /// Builds the summary.
    #[must_use]
    pub fn build(self) -> ProviderSummary {
        self.summary
    }
}

impl Default for ProviderBuilder {
    fn default() -> Self {
        Self::new()
    }
}
