//! Order fee split

use thiserror::Error;

use crate::models::Money;

use super::model::Financials;

/// Platform commission on the order total, in basis points
pub const COMMISSION_BPS: i64 = 800;

/// Flat per-order platform fee
pub const FIXED_FEE: Money = Money::from_major(50);

/// VAT charged on platform fees, in basis points
pub const VAT_BPS: i64 = 1_600;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FinancialsError {
    #[error("Amounts must not be negative")]
    NegativeAmount,

    #[error("Amount overflow")]
    Overflow,
}

/// Split an order total into platform revenue, tax and the seller's share.
///
/// `net_to_seller + gross_platform_revenue + delivery_fee == order_total`
/// holds exactly for every input. `net_to_seller` goes negative when fees
/// exceed the total; callers decide whether such an order is acceptable.
pub fn compute_financials(
    order_total: Money,
    delivery_fee: Money,
) -> Result<Financials, FinancialsError> {
    if order_total.is_negative() || delivery_fee.is_negative() {
        return Err(FinancialsError::NegativeAmount);
    }

    let platform_commission = order_total.apply_bps(COMMISSION_BPS);
    let gross_platform_revenue = platform_commission
        .checked_add(FIXED_FEE)
        .ok_or(FinancialsError::Overflow)?;
    let vat_on_fees = gross_platform_revenue.apply_bps(VAT_BPS);
    let net_platform_revenue = gross_platform_revenue
        .checked_sub(vat_on_fees)
        .ok_or(FinancialsError::Overflow)?;
    let net_to_seller = order_total
        .checked_sub(gross_platform_revenue)
        .and_then(|m| m.checked_sub(delivery_fee))
        .ok_or(FinancialsError::Overflow)?;

    Ok(Financials {
        order_total,
        platform_commission,
        fixed_fee: FIXED_FEE,
        gross_platform_revenue,
        vat_on_fees,
        net_platform_revenue,
        net_to_seller,
        delivery_fee,
    })
}
