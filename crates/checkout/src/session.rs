//! The checkout session record and the command that creates it.

use chrono::{DateTime, Utc};
use common::{Currency, Money, OrderId, PaymentId, ProductId, ReservationId, SessionId, UserId, VariantId};
use payment::PaymentMethod;
use serde::{Deserialize, Serialize};

use crate::error::{CheckoutError, Result};
use crate::state::CheckoutStatus;

/// One line of a checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutItem {
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub unit_price: Money,
    pub quantity: u32,
    /// Set once the item holds stock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<ReservationId>,
}

impl CheckoutItem {
    pub fn new(
        product_id: impl Into<ProductId>,
        variant_id: impl Into<VariantId>,
        unit_price: Money,
        quantity: u32,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            variant_id: variant_id.into(),
            unit_price,
            quantity,
            reservation_id: None,
        }
    }

    /// `unit_price * quantity`, or `None` on overflow.
    pub fn line_total(&self) -> Option<Money> {
        self.unit_price.checked_mul(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub postal_code: String,
    /// ISO 3166-1 alpha-2.
    pub country: String,
}

/// A customer's in-progress purchase, driven by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: SessionId,
    pub user_id: UserId,
    pub items: Vec<CheckoutItem>,
    pub subtotal: Money,
    pub discount: Money,
    pub shipping: Money,
    pub total: Money,
    pub currency: Currency,
    pub shipping_address: Option<Address>,
    pub billing_address: Option<Address>,
    pub payment_method: PaymentMethod,
    pub payment_id: Option<PaymentId>,
    pub order_id: Option<OrderId>,
    pub failure_reason: Option<String>,
    pub status: CheckoutStatus,
    /// Reason of a pending cancellation request.
    pub cancel_requested: Option<String>,
    pub reconciliation_required: bool,
    pub compensation_errors: Vec<String>,
    pub correlation_id: String,
    /// Bumped by every successful save.
    pub version: i64,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CheckoutSession {
    /// Recomputes `subtotal` from the items and `total` from it.
    ///
    /// Saturates instead of overflowing; [`StartCheckout::validate`] rejects
    /// amounts that would overflow before a session exists.
    pub fn calculate_total(&mut self) -> Money {
        self.subtotal = Money::from_minor(
            self.items
                .iter()
                .map(|item| item.unit_price.minor().saturating_mul(i64::from(item.quantity)))
                .fold(0i64, i64::saturating_add),
        );
        self.total = Money::from_minor(
            self.subtotal
                .minor()
                .saturating_sub(self.discount.minor())
                .saturating_add(self.shipping.minor()),
        );
        self.total
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && self.expires_at <= now
    }

    /// Key under which this session's single charge is deduplicated.
    pub fn idempotency_key(&self) -> String {
        payment_idempotency_key(self.id)
    }

    /// Reservation ids in item order.
    pub fn reservation_ids(&self) -> impl DoubleEndedIterator<Item = ReservationId> + '_ {
        self.items.iter().filter_map(|item| item.reservation_id)
    }
}

pub fn payment_idempotency_key(id: SessionId) -> String {
    format!("checkout-{id}-payment")
}

/// Request to open a checkout session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartCheckout {
    pub user_id: UserId,
    pub items: Vec<CheckoutItem>,
    #[serde(default)]
    pub currency: Currency,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub discount: Money,
    #[serde(default)]
    pub shipping: Money,
    #[serde(default)]
    pub shipping_address: Option<Address>,
    #[serde(default)]
    pub billing_address: Option<Address>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl StartCheckout {
    pub fn new(user_id: UserId, items: Vec<CheckoutItem>) -> Self {
        Self {
            user_id,
            items,
            ..Self::default()
        }
    }

    pub fn with_discount(mut self, discount: Money) -> Self {
        self.discount = discount;
        self
    }

    pub fn with_shipping(mut self, shipping: Money) -> Self {
        self.shipping = shipping;
        self
    }

    pub fn with_shipping_address(mut self, address: Address) -> Self {
        self.shipping_address = Some(address);
        self
    }

    /// Rejects the command before anything is persisted.
    pub fn validate(&self) -> Result<()> {
        if self.items.is_empty() {
            return Err(CheckoutError::Validation(
                "checkout requires at least one item".to_string(),
            ));
        }
        if !self.currency.is_valid() {
            return Err(CheckoutError::Validation(format!(
                "invalid currency code: {}",
                self.currency
            )));
        }

        let mut subtotal = Money::zero();
        for item in &self.items {
            if item.product_id.as_str().is_empty() || item.variant_id.as_str().is_empty() {
                return Err(CheckoutError::Validation(
                    "item product and variant ids are required".to_string(),
                ));
            }
            if item.quantity == 0 {
                return Err(CheckoutError::Validation(format!(
                    "quantity for {}/{} must be positive",
                    item.product_id, item.variant_id
                )));
            }
            if item.unit_price.is_negative() {
                return Err(CheckoutError::Validation(format!(
                    "unit price for {}/{} must not be negative",
                    item.product_id, item.variant_id
                )));
            }
            subtotal = item
                .line_total()
                .and_then(|line| subtotal.checked_add(line))
                .ok_or_else(|| CheckoutError::Validation("order amount overflows".to_string()))?;
        }

        if self.discount.is_negative() || self.shipping.is_negative() {
            return Err(CheckoutError::Validation(
                "discount and shipping must not be negative".to_string(),
            ));
        }
        if self.discount > subtotal {
            return Err(CheckoutError::Validation(format!(
                "discount {} exceeds subtotal {}",
                self.discount, subtotal
            )));
        }
        (subtotal - self.discount)
            .checked_add(self.shipping)
            .ok_or_else(|| CheckoutError::Validation("order amount overflows".to_string()))?;
        Ok(())
    }

    /// Builds the `initiated` session. Client-supplied reservation ids are
    /// dropped.
    pub fn into_session(self, now: DateTime<Utc>, ttl: chrono::Duration) -> CheckoutSession {
        let id = SessionId::new();
        let items = self
            .items
            .into_iter()
            .map(|item| CheckoutItem {
                reservation_id: None,
                ..item
            })
            .collect();
        let mut session = CheckoutSession {
            id,
            user_id: self.user_id,
            items,
            subtotal: Money::zero(),
            discount: self.discount,
            shipping: self.shipping,
            total: Money::zero(),
            currency: self.currency,
            shipping_address: self.shipping_address,
            billing_address: self.billing_address,
            payment_method: self.payment_method,
            payment_id: None,
            order_id: None,
            failure_reason: None,
            status: CheckoutStatus::Initiated,
            cancel_requested: None,
            reconciliation_required: false,
            compensation_errors: Vec::new(),
            correlation_id: self.correlation_id.unwrap_or_else(|| id.to_string()),
            version: 0,
            expires_at: now + ttl,
            created_at: now,
            updated_at: now,
        };
        session.calculate_total();
        session
    }
}
