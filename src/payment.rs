use async_trait::async_trait;
use ulid::Ulid;

/// Payment confirmation as seen by the booking engine. The platform's payment
/// service owns capture/refund/webhooks; the engine only ever asks one
/// question before promoting a pending lesson.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// `Ok(true)` when a successful payment exists for the lesson,
    /// `Ok(false)` when none does, `Err` when the gateway itself failed.
    async fn is_payment_confirmed(&self, lesson_id: Ulid) -> Result<bool, String>;
}

/// Gateway for deployments without a payment processor: every lesson counts
/// as paid, so `confirm` always goes through.
pub struct AutoConfirm;

#[async_trait]
impl PaymentGateway for AutoConfirm {
    async fn is_payment_confirmed(&self, _lesson_id: Ulid) -> Result<bool, String> {
        Ok(true)
    }
}
