//! Payment collaborator.

use async_trait::async_trait;
use common::PaymentId;
use payment::{ChargeRequest, Payment, PaymentError, PaymentGuard};

use super::ServiceError;

/// Idempotent charging as seen by checkout.
#[async_trait]
pub trait PaymentClient: Send + Sync {
    /// Charges once per `request.idempotency_key`. A declined charge is an
    /// `Ok` payment in status `failed`.
    async fn charge(&self, request: ChargeRequest) -> Result<Payment, ServiceError>;

    async fn find_by_key(&self, idempotency_key: &str) -> Result<Option<Payment>, ServiceError>;

    /// Refunds whatever is still refundable.
    async fn refund(&self, id: PaymentId) -> Result<Payment, ServiceError>;

    /// Cancels a payment whose outcome is not known yet.
    async fn cancel(&self, id: PaymentId) -> Result<Payment, ServiceError>;
}

impl From<PaymentError> for ServiceError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::NotFound(_) => ServiceError::NotFound(e.to_string()),
            PaymentError::Validation(_)
            | PaymentError::Conflict(_)
            | PaymentError::InvalidTransition { .. } => ServiceError::Rejected(e.to_string()),
            PaymentError::GatewayUnavailable(_)
            | PaymentError::InvalidData(_)
            | PaymentError::Database(_)
            | PaymentError::Migration(_) => ServiceError::Unavailable(e.to_string()),
        }
    }
}

#[async_trait]
impl PaymentClient for PaymentGuard {
    async fn charge(&self, request: ChargeRequest) -> Result<Payment, ServiceError> {
        Ok(PaymentGuard::charge(self, request).await?)
    }

    async fn find_by_key(&self, idempotency_key: &str) -> Result<Option<Payment>, ServiceError> {
        Ok(PaymentGuard::find_by_key(self, idempotency_key).await?)
    }

    async fn refund(&self, id: PaymentId) -> Result<Payment, ServiceError> {
        Ok(PaymentGuard::refund(self, id, None).await?)
    }

    async fn cancel(&self, id: PaymentId) -> Result<Payment, ServiceError> {
        Ok(PaymentGuard::cancel(self, id).await?)
    }
}
