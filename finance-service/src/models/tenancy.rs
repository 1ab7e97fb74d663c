//! Tenancy model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The agreement binding a tenant to a property (or sub-unit) for a period.
///
/// Renewal only considers tenancies with `is_renewable` set and a concrete
/// `renewal_period_days`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Tenancy {
    pub tenancy_id: Uuid,
    pub tenant_id: Uuid,
    pub property_id: Uuid,
    pub sub_unit_id: Option<Uuid>,
    pub assigned_rent: Decimal,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_renewable: bool,
    pub renewal_period_days: Option<i32>,
    pub is_active: bool,
    pub evacuation_date: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}
