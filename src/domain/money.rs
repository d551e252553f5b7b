use crate::error::ServiceError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Stripe accepts at most twelve decimal places in `unit_amount_decimal`.
const MINOR_UNIT_SCALE: u32 = 12;

/// A monetary value in major currency units (e.g. dollars).
///
/// This is a wrapper around `rust_decimal::Decimal` so that prices and totals
/// never pass through floating point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

/// A strictly positive number of units on an order line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Quantity(i64);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Total for `quantity` units at this price. Fails when the product does
    /// not fit in a `Decimal`.
    pub fn times(self, quantity: Quantity) -> Result<Self, ServiceError> {
        self.0
            .checked_mul(Decimal::from(quantity.get()))
            .map(Self)
            .ok_or_else(|| {
                ServiceError::Validation(format!("{self} * {} is out of range", quantity.get()))
            })
    }

    pub fn checked_add(self, rhs: Self) -> Result<Self, ServiceError> {
        self.0
            .checked_add(rhs.0)
            .map(Self)
            .ok_or_else(|| ServiceError::Validation(format!("{self} + {rhs} is out of range")))
    }

    /// Sums prices, failing on overflow instead of panicking.
    pub fn try_sum(prices: impl IntoIterator<Item = Self>) -> Result<Self, ServiceError> {
        prices
            .into_iter()
            .try_fold(Self::ZERO, |total, price| total.checked_add(price))
    }

    /// Re-derives the unit price of a line total, expressed in minor units (cents).
    pub fn unit_minor_amount(self, quantity: Quantity) -> Result<Decimal, ServiceError> {
        (self.0 / Decimal::from(quantity.get()))
            .checked_mul(Decimal::ONE_HUNDRED)
            .map(|minor| minor.round_dp(MINOR_UNIT_SCALE).normalize())
            .ok_or_else(|| {
                ServiceError::Validation(format!("unit amount of {self} is out of range"))
            })
    }
}

impl std::fmt::Display for Price {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Quantity {
    pub fn new(value: i64) -> Result<Self, ServiceError> {
        if value > 0 {
            Ok(Self(value))
        } else {
            Err(ServiceError::Validation(format!(
                "Quantity must be positive, got {value}"
            )))
        }
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Quantity {
    type Error = ServiceError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quantity> for i64 {
    fn from(quantity: Quantity) -> Self {
        quantity.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_times_quantity() {
        let price = Price::new(dec!(10.00));
        assert_eq!(
            price.times(Quantity::new(2).unwrap()).unwrap(),
            Price::new(dec!(20.00))
        );
    }

    #[test]
    fn test_overflowing_line_total_is_rejected() {
        let price = Price::new(dec!(79000000000000000000000));
        let result = price.times(Quantity::new(i64::MAX).unwrap());
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    #[test]
    fn test_price_sum() {
        let total = Price::try_sum([dec!(1.25), dec!(2.50), dec!(0.25)].map(Price::new)).unwrap();
        assert_eq!(total, Price::new(dec!(4.00)));
        assert_eq!(Price::try_sum([]).unwrap(), Price::ZERO);
    }

    #[test]
    fn test_overflowing_sum_is_rejected() {
        let result = Price::try_sum([Price::new(Decimal::MAX), Price::new(dec!(1))]);
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    #[test]
    fn test_unit_minor_amount() {
        let line_total = Price::new(dec!(20.00));
        assert_eq!(
            line_total.unit_minor_amount(Quantity::new(2).unwrap()).unwrap(),
            dec!(1000)
        );

        let uneven = Price::new(dec!(10.00));
        let unit = uneven.unit_minor_amount(Quantity::new(3).unwrap()).unwrap();
        assert_eq!(unit.scale(), 12);
        assert!(unit > dec!(333.33) && unit < dec!(333.34));

        assert!(Price::new(Decimal::MAX)
            .unit_minor_amount(Quantity::new(1).unwrap())
            .is_err());
    }

    #[test]
    fn test_quantity_validation() {
        assert!(Quantity::new(1).is_ok());
        assert!(matches!(Quantity::new(0), Err(ServiceError::Validation(_))));
        assert!(matches!(Quantity::new(-3), Err(ServiceError::Validation(_))));
    }

    #[test]
    fn test_quantity_deserialization_rejects_zero() {
        assert!(serde_json::from_str::<Quantity>("0").is_err());
        assert_eq!(serde_json::from_str::<Quantity>("4").unwrap().get(), 4);
    }
}
