//! Inventory vehicle model, status lifecycle and VIN rules

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{Error, Result};

/// Inventory status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    Draft,
    Available,
    Pending,
    Sold,
    Archived,
}

impl VehicleStatus {
    pub const ALL: [VehicleStatus; 5] = [
        VehicleStatus::Draft,
        VehicleStatus::Available,
        VehicleStatus::Pending,
        VehicleStatus::Sold,
        VehicleStatus::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleStatus::Draft => "draft",
            VehicleStatus::Available => "available",
            VehicleStatus::Pending => "pending",
            VehicleStatus::Sold => "sold",
            VehicleStatus::Archived => "archived",
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: VehicleStatus) -> bool {
        use VehicleStatus::*;
        matches!(
            (self, next),
            (Draft, Available)
                | (Draft, Archived)
                | (Available, Pending)
                | (Available, Sold)
                | (Available, Archived)
                | (Pending, Available)
                | (Pending, Sold)
                | (Sold, Archived)
                | (Archived, Draft)
        )
    }
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(VehicleStatus::Draft),
            "available" => Ok(VehicleStatus::Available),
            "pending" => Ok(VehicleStatus::Pending),
            "sold" => Ok(VehicleStatus::Sold),
            "archived" => Ok(VehicleStatus::Archived),
            other => Err(Error::InvalidInput(format!("Unknown vehicle status: {}", other))),
        }
    }
}

/// How the dealership acquired the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleSource {
    Purchase,
    TradeIn,
    Consignment,
    Auction,
}

impl VehicleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleSource::Purchase => "purchase",
            VehicleSource::TradeIn => "trade_in",
            VehicleSource::Consignment => "consignment",
            VehicleSource::Auction => "auction",
        }
    }
}

impl FromStr for VehicleSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "purchase" => Ok(VehicleSource::Purchase),
            "trade_in" => Ok(VehicleSource::TradeIn),
            "consignment" => Ok(VehicleSource::Consignment),
            "auction" => Ok(VehicleSource::Auction),
            other => Err(Error::InvalidInput(format!("Unknown vehicle source: {}", other))),
        }
    }
}

/// A vehicle owned (or consigned) by the dealership
///
/// Prices are whole dollars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Uuid,
    pub stock_number: String,
    pub vin: String,
    pub year: i32,
    pub make: String,
    pub model: String,
    pub trim: Option<String>,
    pub body_style: Option<String>,
    pub exterior_color: Option<String>,
    pub interior_color: Option<String>,
    pub mileage: i64,
    pub price: i64,
    pub cost: Option<i64>,
    pub status: VehicleStatus,
    pub source: VehicleSource,
    pub description: Option<String>,
    pub photo_urls: Vec<String>,
    pub listed_at: Option<DateTime<Utc>>,
    pub sold_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Vehicle {
    /// Days the vehicle has been on the lot as of `now`
    ///
    /// Counted from `listed_at` (falling back to `created_at`) and frozen at
    /// `sold_at` once sold.
    pub fn days_on_lot(&self, now: DateTime<Utc>) -> i64 {
        let start = self.listed_at.unwrap_or(self.created_at);
        let end = self.sold_at.unwrap_or(now);
        crate::time::days_between(start, end)
    }

    /// Apply a status change, stamping `listed_at` / `sold_at`
    pub fn transition_to(&mut self, next: VehicleStatus, now: DateTime<Utc>) -> Result<()> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(Error::Conflict(format!(
                "Cannot change status from {} to {}",
                self.status, next
            )));
        }
        match next {
            VehicleStatus::Available if self.listed_at.is_none() => self.listed_at = Some(now),
            VehicleStatus::Sold => self.sold_at = Some(now),
            VehicleStatus::Draft => self.sold_at = None,
            _ => {}
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

/// Input for creating a vehicle
#[derive(Debug, Clone, Deserialize)]
pub struct NewVehicle {
    pub stock_number: String,
    pub vin: String,
    pub year: i32,
    pub make: String,
    pub model: String,
    pub trim: Option<String>,
    pub body_style: Option<String>,
    pub exterior_color: Option<String>,
    pub interior_color: Option<String>,
    pub mileage: i64,
    pub price: i64,
    pub cost: Option<i64>,
    pub source: Option<VehicleSource>,
    pub description: Option<String>,
    #[serde(default)]
    pub photo_urls: Vec<String>,
}

impl NewVehicle {
    /// Validate and build a `Draft` vehicle
    pub fn into_vehicle(self, now: DateTime<Utc>) -> Result<Vehicle> {
        let stock_number = self.stock_number.trim().to_string();
        if stock_number.is_empty() {
            return Err(Error::InvalidInput("Stock number is required".to_string()));
        }
        let vin = normalize_vin(&self.vin)?;
        validate_year(self.year, now)?;
        let make = required_text("make", &self.make)?;
        let model = required_text("model", &self.model)?;
        if self.mileage < 0 {
            return Err(Error::InvalidInput("Mileage cannot be negative".to_string()));
        }
        if self.price < 0 {
            return Err(Error::InvalidInput("Price cannot be negative".to_string()));
        }
        if matches!(self.cost, Some(c) if c < 0) {
            return Err(Error::InvalidInput("Cost cannot be negative".to_string()));
        }

        Ok(Vehicle {
            id: Uuid::new_v4(),
            stock_number,
            vin,
            year: self.year,
            make,
            model,
            trim: clean_optional(self.trim),
            body_style: clean_optional(self.body_style),
            exterior_color: clean_optional(self.exterior_color),
            interior_color: clean_optional(self.interior_color),
            mileage: self.mileage,
            price: self.price,
            cost: self.cost,
            status: VehicleStatus::Draft,
            source: self.source.unwrap_or(VehicleSource::Purchase),
            description: clean_optional(self.description),
            photo_urls: self.photo_urls,
            listed_at: None,
            sold_at: None,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Partial update; `None` leaves the field untouched
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VehicleUpdate {
    pub stock_number: Option<String>,
    pub vin: Option<String>,
    pub year: Option<i32>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub trim: Option<String>,
    pub body_style: Option<String>,
    pub exterior_color: Option<String>,
    pub interior_color: Option<String>,
    pub mileage: Option<i64>,
    pub price: Option<i64>,
    pub cost: Option<i64>,
    pub description: Option<String>,
    pub photo_urls: Option<Vec<String>>,
}

impl VehicleUpdate {
    pub fn apply(self, vehicle: &mut Vehicle, now: DateTime<Utc>) -> Result<()> {
        if let Some(stock) = self.stock_number {
            vehicle.stock_number = required_text("stock_number", &stock)?;
        }
        if let Some(vin) = self.vin {
            vehicle.vin = normalize_vin(&vin)?;
        }
        if let Some(year) = self.year {
            validate_year(year, now)?;
            vehicle.year = year;
        }
        if let Some(make) = self.make {
            vehicle.make = required_text("make", &make)?;
        }
        if let Some(model) = self.model {
            vehicle.model = required_text("model", &model)?;
        }
        if let Some(mileage) = self.mileage {
            if mileage < 0 {
                return Err(Error::InvalidInput("Mileage cannot be negative".to_string()));
            }
            vehicle.mileage = mileage;
        }
        if let Some(price) = self.price {
            if price < 0 {
                return Err(Error::InvalidInput("Price cannot be negative".to_string()));
            }
            vehicle.price = price;
        }
        if let Some(cost) = self.cost {
            if cost < 0 {
                return Err(Error::InvalidInput("Cost cannot be negative".to_string()));
            }
            vehicle.cost = Some(cost);
        }
        if self.trim.is_some() {
            vehicle.trim = clean_optional(self.trim);
        }
        if self.body_style.is_some() {
            vehicle.body_style = clean_optional(self.body_style);
        }
        if self.exterior_color.is_some() {
            vehicle.exterior_color = clean_optional(self.exterior_color);
        }
        if self.interior_color.is_some() {
            vehicle.interior_color = clean_optional(self.interior_color);
        }
        if self.description.is_some() {
            vehicle.description = clean_optional(self.description);
        }
        if let Some(photos) = self.photo_urls {
            vehicle.photo_urls = photos;
        }
        vehicle.updated_at = now;
        Ok(())
    }
}

fn required_text(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

fn clean_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Model years from 1900 through next year's models
pub fn validate_year(year: i32, now: DateTime<Utc>) -> Result<()> {
    let max_year = now.year() + 1;
    if !(1900..=max_year).contains(&year) {
        return Err(Error::InvalidInput(format!(
            "Year {} outside 1900..={}",
            year, max_year
        )));
    }
    Ok(())
}

/// Uppercase and validate a VIN
///
/// 17 alphanumeric characters, excluding I, O and Q. The check digit is
/// not enforced here; see [`vin_check_digit_ok`].
pub fn normalize_vin(raw: &str) -> Result<String> {
    let vin: String = raw.trim().to_ascii_uppercase();
    if vin.len() != 17 {
        return Err(Error::InvalidInput(format!(
            "VIN must be 17 characters, got {}",
            vin.len()
        )));
    }
    if let Some(bad) = vin
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() || matches!(c, 'I' | 'O' | 'Q'))
    {
        return Err(Error::InvalidInput(format!("VIN contains invalid character '{}'", bad)));
    }
    Ok(vin)
}

const VIN_WEIGHTS: [u32; 17] = [8, 7, 6, 5, 4, 3, 2, 10, 0, 9, 8, 7, 6, 5, 4, 3, 2];

fn vin_char_value(c: char) -> Option<u32> {
    match c {
        '0'..='9' => c.to_digit(10),
        'A' | 'J' => Some(1),
        'B' | 'K' | 'S' => Some(2),
        'C' | 'L' | 'T' => Some(3),
        'D' | 'M' | 'U' => Some(4),
        'E' | 'N' | 'V' => Some(5),
        'F' | 'W' => Some(6),
        'G' | 'P' | 'X' => Some(7),
        'H' | 'Y' => Some(8),
        'R' | 'Z' => Some(9),
        _ => None,
    }
}

/// North American check digit (position 9) test
///
/// Imported and pre-1981 vehicles often fail this, so callers report the
/// result rather than rejecting.
pub fn vin_check_digit_ok(vin: &str) -> bool {
    let chars: Vec<char> = vin.chars().collect();
    if chars.len() != 17 {
        return false;
    }
    let mut sum = 0u32;
    for (c, weight) in chars.iter().zip(VIN_WEIGHTS.iter()) {
        match vin_char_value(*c) {
            Some(v) => sum += v * weight,
            None => return false,
        }
    }
    let expected = match sum % 11 {
        10 => 'X',
        n => char::from_digit(n, 10).unwrap_or('?'),
    };
    chars[8] == expected
}
