//! Core Type Definitions
//!
//! Shared identifier aliases used across every module. Keep this file
//! dependency-light; everything else imports from here.

use uuid::Uuid;

/// Organization (tenant) identifier
pub type OrgId = Uuid;

/// Acting user identifier
pub type UserId = Uuid;

/// Lifecycle entity identifier (job, work order, resolution, ...)
pub type EntityId = Uuid;

/// Property unit identifier (the billing target for assessment charges)
pub type UnitId = Uuid;

/// Charge identifier
pub type ChargeId = Uuid;

/// Payment identifier
pub type PaymentId = Uuid;
