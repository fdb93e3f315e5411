//! Input validation utilities.
//!
//! Field-level checks shared by inventory, billing and purchasing before anything touches
//! the database.

use crate::{HmsError, HmsResult};
use chrono::NaiveDate;
use rust_decimal::Decimal;

/// Validates a batch's price pair.
///
/// # Errors
///
/// Returns [`HmsError::Validation`] unless `selling_price >= cost_price > 0` and both prices have
/// at most two decimal places.
pub fn validate_prices(cost_price: Decimal, selling_price: Decimal) -> HmsResult<()> {
    validate_money("cost price", cost_price)?;
    validate_money("selling price", selling_price)?;
    if cost_price <= Decimal::ZERO {
        return Err(HmsError::Validation("cost price must be positive".into()));
    }
    if selling_price < cost_price {
        return Err(HmsError::Validation(format!(
            "selling price {selling_price} is below cost price {cost_price}"
        )));
    }
    Ok(())
}

/// Validates a strictly positive monetary amount.
pub fn validate_positive_amount(field: &str, amount: Decimal) -> HmsResult<()> {
    validate_money(field, amount)?;
    if amount <= Decimal::ZERO {
        return Err(HmsError::Validation(format!("{field} must be positive")));
    }
    Ok(())
}

fn validate_money(field: &str, amount: Decimal) -> HmsResult<()> {
    if amount.normalize().scale() > 2 {
        return Err(HmsError::Validation(format!(
            "{field} cannot have more than two decimal places"
        )));
    }
    Ok(())
}

/// Validates that a new batch has not already expired.
pub fn validate_expiry(expiry_date: NaiveDate, today: NaiveDate) -> HmsResult<()> {
    if expiry_date < today {
        return Err(HmsError::Validation(format!(
            "expiry date {expiry_date} is in the past"
        )));
    }
    Ok(())
}

/// Validates min/max stock levels.
pub fn validate_stock_levels(min_stock_level: u32, max_stock_level: u32) -> HmsResult<()> {
    if max_stock_level < min_stock_level {
        return Err(HmsError::Validation(format!(
            "max stock level {max_stock_level} is below min stock level {min_stock_level}"
        )));
    }
    Ok(())
}
