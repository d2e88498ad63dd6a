//! `PostgreSQL` storage backend for the dispatch core.
//!
//! Implements the `dispatch-core` storage traits with runtime-bound sqlx
//! queries. Every atomic primitive of the core maps to exactly one
//! conditional statement here:
//!
//! - `ReservationStore::try_acquire` → `INSERT … ON CONFLICT (provider)
//!   DO UPDATE … WHERE <claim replaceable>` against the primary key that
//!   enforces at-most-one reservation row per provider;
//! - `BookingStore::update_if` → `UPDATE … WHERE id = $1 AND status =
//!   ANY($2) RETURNING *`;
//! - `BookingStore::sweep_expired_locks` → `UPDATE … WHERE is_locked AND
//!   locked_until <= $1 RETURNING *`.
//!
//! The database is therefore the sole serialization mechanism, which is
//! what allows multiple server instances to dispatch concurrently.
//!
//! The nearest-provider query is *not* implemented here: the geo index is
//! an external collaborator (a PostGIS/search deployment concern) consumed
//! through the `GeoIndex` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch_core::geo::{GeoPoint, Location};
use dispatch_core::store::{
    AcquireOutcome, BookingPatch, BookingStore, ConditionalUpdate,
    ProviderDirectory, ReservationStore, StoreError,
};
use dispatch_core::types::{
    Booking, BookingId, BookingKind, BookingStatus, CustomerId, LockExpiry,
    LockState, Minutes, Money, PaymentStatus, ProviderId, ProviderReservation,
    ProviderSummary, ServiceTag,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Schema DDL, applied by [`PgStore::migrate`]. Idempotent.
const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS bookings (
        id UUID PRIMARY KEY,
        customer UUID NOT NULL,
        provider UUID NOT NULL,
        service TEXT NOT NULL,
        status TEXT NOT NULL,
        longitude DOUBLE PRECISION NOT NULL,
        latitude DOUBLE PRECISION NOT NULL,
        address TEXT NOT NULL,
        scheduled_at TIMESTAMPTZ,
        started_at TIMESTAMPTZ,
        completed_at TIMESTAMPTZ,
        estimated_duration INTEGER NOT NULL,
        actual_duration INTEGER,
        total_amount_cents BIGINT NOT NULL,
        payment_status TEXT NOT NULL,
        notes TEXT,
        emergency BOOLEAN NOT NULL DEFAULT FALSE,
        is_locked BOOLEAN NOT NULL DEFAULT FALSE,
        locked_until TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL
    )
    ",
    "CREATE INDEX IF NOT EXISTS bookings_provider_idx ON bookings (provider)",
    "CREATE INDEX IF NOT EXISTS bookings_status_idx ON bookings (status)",
    "CREATE INDEX IF NOT EXISTS bookings_lock_idx ON bookings (emergency, is_locked)",
    r"
    CREATE TABLE IF NOT EXISTS provider_reservations (
        provider UUID PRIMARY KEY,
        booking UUID NOT NULL UNIQUE,
        expires_at TIMESTAMPTZ NOT NULL,
        acquired_at TIMESTAMPTZ NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS providers (
        id UUID PRIMARY KEY,
        hourly_rate_cents BIGINT NOT NULL,
        services TEXT[] NOT NULL,
        longitude DOUBLE PRECISION NOT NULL,
        latitude DOUBLE PRECISION NOT NULL,
        is_verified BOOLEAN NOT NULL DEFAULT FALSE,
        is_available BOOLEAN NOT NULL DEFAULT TRUE
    )
    ",
];

/// `PostgreSQL`-backed implementation of the dispatch storage traits.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect with production pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(300))
            .connect(database_url)
            .await
            .map_err(backend)?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (e.g. one shared with the REST layer).
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the schema. Idempotent; safe to run at every startup.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if a DDL statement fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(backend)?;
        }
        tracing::info!("dispatch schema ensured");
        Ok(())
    }
}

#[async_trait]
impl BookingStore for PgStore {
    async fn insert(&self, booking: Booking) -> Result<(), StoreError> {
        let row = BookingRow::try_from(&booking)?;
        let result = sqlx::query(
            r"
            INSERT INTO bookings (
                id, customer, provider, service, status,
                longitude, latitude, address,
                scheduled_at, started_at, completed_at,
                estimated_duration, actual_duration, total_amount_cents,
                payment_status, notes, emergency, is_locked, locked_until,
                created_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19, $20
            )
            ",
        )
        .bind(row.id)
        .bind(row.customer)
        .bind(row.provider)
        .bind(row.service)
        .bind(row.status)
        .bind(row.longitude)
        .bind(row.latitude)
        .bind(row.address)
        .bind(row.scheduled_at)
        .bind(row.started_at)
        .bind(row.completed_at)
        .bind(row.estimated_duration)
        .bind(row.actual_duration)
        .bind(row.total_amount_cents)
        .bind(row.payment_status)
        .bind(row.notes)
        .bind(row.emergency)
        .bind(row.is_locked)
        .bind(row.locked_until)
        .bind(row.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::DuplicateKey(booking.id.to_string()))
            }
            Err(error) => Err(backend(error)),
        }
    }

    async fn fetch(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        sqlx::query("SELECT * FROM bookings WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .map(|row| booking_from_row(&row))
            .transpose()
    }

    async fn update_if(
        &self,
        id: BookingId,
        expected: &[BookingStatus],
        patch: BookingPatch,
    ) -> Result<ConditionalUpdate, StoreError> {
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("UPDATE bookings SET ");
        push_patch(&mut qb, &patch)?;

        qb.push(" WHERE id = ");
        qb.push_bind(*id.as_uuid());
        if !expected.is_empty() {
            let statuses: Vec<String> =
                expected.iter().map(ToString::to_string).collect();
            qb.push(" AND status = ANY(");
            qb.push_bind(statuses);
            qb.push(")");
        }
        qb.push(" RETURNING *");

        if let Some(row) = qb
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
        {
            return Ok(ConditionalUpdate::Applied(booking_from_row(&row)?));
        }

        // Predicate failed: report the status that won, or not-found.
        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM bookings WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        match current {
            Some(raw) => Ok(ConditionalUpdate::Rejected {
                current: parse_status(&raw)?,
            }),
            None => Err(StoreError::Backend(format!("booking {id} not found"))),
        }
    }

    async fn sweep_expired_locks(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Booking>, StoreError> {
        let rows = sqlx::query(
            r"
            UPDATE bookings
            SET is_locked = FALSE, locked_until = NULL
            WHERE emergency AND is_locked AND locked_until <= $1
            RETURNING *
            ",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(booking_from_row).collect()
    }
}

#[async_trait]
impl ReservationStore for PgStore {
    async fn try_acquire(
        &self,
        claim: ProviderReservation,
        now: DateTime<Utc>,
    ) -> Result<AcquireOutcome, StoreError> {
        // The upsert replaces a row only when the standing claim is
        // expired, or its owning booking has left the lock-holding
        // statuses. A claim whose booking is not persisted yet (dispatch
        // in flight) stays exclusive.
        const ACQUIRE: &str = r"
            INSERT INTO provider_reservations (provider, booking, expires_at, acquired_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (provider) DO UPDATE
            SET booking = EXCLUDED.booking,
                expires_at = EXCLUDED.expires_at,
                acquired_at = EXCLUDED.acquired_at
            WHERE provider_reservations.expires_at <= $5
               OR EXISTS (
                    SELECT 1 FROM bookings b
                    WHERE b.id = provider_reservations.booking
                      AND b.status NOT IN ('pending', 'accepted')
               )
            RETURNING provider, booking, expires_at, acquired_at
        ";

        // The losing side re-reads the holder; if the holder vanishes in
        // between (released concurrently), retry the upsert.
        for _ in 0..3 {
            let granted = sqlx::query(ACQUIRE)
                .bind(claim.provider.as_uuid())
                .bind(claim.booking.as_uuid())
                .bind(claim.expires_at.inner())
                .bind(claim.acquired_at)
                .bind(now)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
            if let Some(row) = granted {
                return Ok(AcquireOutcome::Granted(reservation_from_row(&row)?));
            }

            let holder = sqlx::query(
                "SELECT provider, booking, expires_at, acquired_at \
                 FROM provider_reservations WHERE provider = $1",
            )
            .bind(claim.provider.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
            if let Some(row) = holder {
                return Ok(AcquireOutcome::Conflict {
                    holder: reservation_from_row(&row)?,
                });
            }
        }

        Err(StoreError::Backend(
            "reservation contention did not settle".to_string(),
        ))
    }

    async fn release(
        &self,
        booking: BookingId,
    ) -> Result<Option<ProviderReservation>, StoreError> {
        sqlx::query(
            "DELETE FROM provider_reservations WHERE booking = $1 \
             RETURNING provider, booking, expires_at, acquired_at",
        )
        .bind(booking.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .map(|row| reservation_from_row(&row))
        .transpose()
    }
}

#[async_trait]
impl ProviderDirectory for PgStore {
    async fn fetch(
        &self,
        id: ProviderId,
    ) -> Result<Option<ProviderSummary>, StoreError> {
        sqlx::query("SELECT * FROM providers WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .map(|row| provider_from_row(&row))
            .transpose()
    }

    async fn set_available(
        &self,
        id: ProviderId,
        available: bool,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE providers SET is_available = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(available)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

// ============================================================================
// Row mapping
// ============================================================================

/// Bind-ready flattening of a [`Booking`].
struct BookingRow {
    id: Uuid,
    customer: Uuid,
    provider: Uuid,
    service: String,
    status: String,
    longitude: f64,
    latitude: f64,
    address: String,
    scheduled_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    estimated_duration: i32,
    actual_duration: Option<i32>,
    total_amount_cents: i64,
    payment_status: String,
    notes: Option<String>,
    emergency: bool,
    is_locked: bool,
    locked_until: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<&Booking> for BookingRow {
    type Error = StoreError;

    fn try_from(booking: &Booking) -> Result<Self, StoreError> {
        Ok(Self {
            id: *booking.id.as_uuid(),
            customer: *booking.customer.as_uuid(),
            provider: *booking.provider.as_uuid(),
            service: booking.service.as_str().to_string(),
            status: booking.status.to_string(),
            longitude: booking.location.point.longitude,
            latitude: booking.location.point.latitude,
            address: booking.location.address.clone(),
            scheduled_at: booking.scheduled_at,
            started_at: booking.started_at,
            completed_at: booking.completed_at,
            estimated_duration: int_column(booking.estimated_duration.value())?,
            actual_duration: booking
                .actual_duration
                .map(|minutes| int_column(minutes.value()))
                .transpose()?,
            total_amount_cents: cents_column(booking.total_amount)?,
            payment_status: booking.payment_status.as_str().to_string(),
            notes: booking.notes.clone(),
            emergency: booking.is_emergency(),
            is_locked: booking.is_locked(),
            locked_until: booking.locked_until(),
            created_at: booking.created_at,
        })
    }
}

fn booking_from_row(row: &PgRow) -> Result<Booking, StoreError> {
    let emergency: bool = column(row, "emergency")?;
    let is_locked: bool = column(row, "is_locked")?;
    let locked_until: Option<DateTime<Utc>> = column(row, "locked_until")?;

    let kind = if emergency {
        let lock = match (is_locked, locked_until) {
            (true, Some(until)) => LockState::Held { until },
            _ => LockState::Released,
        };
        BookingKind::Emergency { lock }
    } else {
        BookingKind::Standard
    };

    let status_raw: String = column(row, "status")?;
    let payment_raw: String = column(row, "payment_status")?;
    let estimated: i32 = column(row, "estimated_duration")?;
    let actual: Option<i32> = column(row, "actual_duration")?;
    let cents: i64 = column(row, "total_amount_cents")?;

    Ok(Booking {
        id: BookingId::from_uuid(column(row, "id")?),
        customer: CustomerId::from_uuid(column(row, "customer")?),
        provider: ProviderId::from_uuid(column(row, "provider")?),
        service: ServiceTag::new(column::<String>(row, "service")?),
        status: parse_status(&status_raw)?,
        location: Location::new(
            GeoPoint::new(column(row, "longitude")?, column(row, "latitude")?),
            column(row, "address")?,
        ),
        scheduled_at: column(row, "scheduled_at")?,
        started_at: column(row, "started_at")?,
        completed_at: column(row, "completed_at")?,
        estimated_duration: Minutes::new(unsigned(estimated)?),
        actual_duration: actual.map(unsigned).transpose()?.map(Minutes::new),
        total_amount: Money::from_cents(unsigned_cents(cents)?),
        payment_status: PaymentStatus::from_str(&payment_raw)
            .map_err(StoreError::Serialization)?,
        notes: column(row, "notes")?,
        kind,
        created_at: column(row, "created_at")?,
    })
}

fn reservation_from_row(row: &PgRow) -> Result<ProviderReservation, StoreError> {
    Ok(ProviderReservation {
        provider: ProviderId::from_uuid(column(row, "provider")?),
        booking: BookingId::from_uuid(column(row, "booking")?),
        expires_at: LockExpiry::new(column(row, "expires_at")?),
        acquired_at: column(row, "acquired_at")?,
    })
}

fn provider_from_row(row: &PgRow) -> Result<ProviderSummary, StoreError> {
    let cents: i64 = column(row, "hourly_rate_cents")?;
    let services: Vec<String> = column(row, "services")?;
    Ok(ProviderSummary {
        id: ProviderId::from_uuid(column(row, "id")?),
        hourly_rate: Money::from_cents(unsigned_cents(cents)?),
        services: services.into_iter().map(ServiceTag::new).collect(),
        current_location: GeoPoint::new(
            column(row, "longitude")?,
            column(row, "latitude")?,
        ),
        is_verified: column(row, "is_verified")?,
        is_available: column(row, "is_available")?,
        distance_m: None,
    })
}

/// Append the patch's SET clauses, preserving the in-memory patch
/// semantics: lock fields only ever change on emergency rows.
fn push_patch(
    qb: &mut QueryBuilder<'_, Postgres>,
    patch: &BookingPatch,
) -> Result<(), StoreError> {
    let mut sets = qb.separated(", ");
    let mut any = false;

    if let Some(status) = patch.status {
        sets.push("status = ");
        sets.push_bind_unseparated(status.to_string());
        any = true;
    }
    if let Some(at) = patch.started_at {
        sets.push("started_at = ");
        sets.push_bind_unseparated(at);
        any = true;
    }
    if let Some(at) = patch.completed_at {
        sets.push("completed_at = ");
        sets.push_bind_unseparated(at);
        any = true;
    }
    if let Some(minutes) = patch.actual_duration {
        sets.push("actual_duration = ");
        sets.push_bind_unseparated(int_column(minutes.value())?);
        any = true;
    }
    if let Some(amount) = patch.total_amount {
        sets.push("total_amount_cents = ");
        sets.push_bind_unseparated(cents_column(amount)?);
        any = true;
    }
    match patch.lock {
        Some(LockState::Released) => {
            sets.push(
                "is_locked = FALSE, \
                 locked_until = CASE WHEN emergency THEN NULL ELSE locked_until END",
            );
            any = true;
        }
        Some(LockState::Held { until }) => {
            sets.push("is_locked = emergency");
            sets.push("locked_until = CASE WHEN emergency THEN ");
            sets.push_bind_unseparated(until);
            sets.push_unseparated(" ELSE locked_until END");
            any = true;
        }
        None => {}
    }

    if !any {
        // Keep the statement valid for an (unused) empty patch.
        sets.push("id = id");
    }
    Ok(())
}

fn parse_status(raw: &str) -> Result<BookingStatus, StoreError> {
    BookingStatus::from_str(raw).map_err(StoreError::Serialization)
}

fn column<'r, T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>>(
    row: &'r PgRow,
    name: &str,
) -> Result<T, StoreError> {
    row.try_get(name).map_err(backend)
}

fn int_column(value: u32) -> Result<i32, StoreError> {
    i32::try_from(value)
        .map_err(|_| StoreError::Serialization(format!("duration out of range: {value}")))
}

fn unsigned(value: i32) -> Result<u32, StoreError> {
    u32::try_from(value)
        .map_err(|_| StoreError::Serialization(format!("negative duration: {value}")))
}

fn cents_column(amount: Money) -> Result<i64, StoreError> {
    i64::try_from(amount.cents())
        .map_err(|_| StoreError::Serialization(format!("amount out of range: {amount}")))
}

fn unsigned_cents(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value)
        .map_err(|_| StoreError::Serialization(format!("negative amount: {value}")))
}

fn backend(error: sqlx::Error) -> StoreError {
    StoreError::Backend(error.to_string())
}
